//! In-memory job table with read-once-then-evict delivery.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use crate::error::JobError;

/// Result of a successfully completed chat job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOutcome {
    pub reply: String,
    pub generated_image: Option<String>,
}

/// Lifecycle state of one job. `Succeeded` and `Failed` are terminal;
/// the only way out of a terminal state is eviction by `poll`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Processing,
    Succeeded(ChatOutcome),
    Failed(String),
}

/// Owns the job table and its locking discipline. The lock is coarse but
/// held only for table mutations, never across pipeline work.
#[derive(Default)]
pub struct JobStore {
    jobs: Mutex<HashMap<Uuid, JobStatus>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh job in `processing` state.
    pub fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().insert(id, JobStatus::Processing);
        id
    }

    /// Post the pipeline's terminal outcome. This is the single mutation
    /// a job record ever receives after creation.
    pub fn complete(&self, id: Uuid, outcome: Result<ChatOutcome, String>) {
        let status = match outcome {
            Ok(outcome) => JobStatus::Succeeded(outcome),
            Err(message) => JobStatus::Failed(message),
        };

        match self.lock().entry(id) {
            Entry::Occupied(mut entry) if *entry.get() == JobStatus::Processing => {
                entry.insert(status);
            }
            Entry::Occupied(_) => {
                tracing::warn!(job_id = %id, "ignoring second terminal write");
            }
            Entry::Vacant(_) => {
                tracing::warn!(job_id = %id, "completion for unknown job");
            }
        }
    }

    /// Read a job's status. A `processing` job is returned untouched; a
    /// terminal job is removed in the same locked operation, so exactly
    /// one poll observes the outcome and every later poll gets `NotFound`.
    pub fn poll(&self, id: Uuid) -> Result<JobStatus, JobError> {
        match self.lock().entry(id) {
            Entry::Vacant(_) => Err(JobError::NotFound { id }),
            Entry::Occupied(entry) => {
                if matches!(entry.get(), JobStatus::Processing) {
                    Ok(JobStatus::Processing)
                } else {
                    Ok(entry.remove())
                }
            }
        }
    }

    // On lock poisoning (a panicking thread held the lock), keep serving:
    // the table's entries are individually consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, JobStatus>> {
        match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
