//! End-to-end lifecycle tests for the job subsystem, driven through the
//! public submit/poll surface with scripted chat backends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use uuid::Uuid;

use minichat::error::{ChatError, JobError, LlmError};
use minichat::jobs::runner::{ChatJobRequest, submit};
use minichat::jobs::store::{JobStatus, JobStore};
use minichat::llm::provider::{Attachment, ChatBackend, ChatReplyParts, Content};
use minichat::server::AppState;

/// Backend that blocks until the test releases it, then replies with a
/// fixed text and optionally one generated image.
struct GatedBackend {
    gate: Arc<Notify>,
    text: &'static str,
    with_image: bool,
}

#[async_trait]
impl ChatBackend for GatedBackend {
    async fn generate(
        &self,
        _model: &str,
        _contents: &[Content],
    ) -> Result<ChatReplyParts, LlmError> {
        self.gate.notified().await;
        Ok(ChatReplyParts {
            text: self.text.to_string(),
            attachments: if self.with_image {
                vec![Attachment {
                    bytes: vec![0xff, 0xd8, 0xff],
                    mime_type: "image/jpeg".to_string(),
                }]
            } else {
                Vec::new()
            },
        })
    }
}

/// Backend that always fails at the provider.
struct FailingBackend;

#[async_trait]
impl ChatBackend for FailingBackend {
    async fn generate(
        &self,
        _model: &str,
        _contents: &[Content],
    ) -> Result<ChatReplyParts, LlmError> {
        Err(LlmError::RequestFailed {
            provider: "scripted".to_string(),
            reason: "quota exhausted".to_string(),
        })
    }
}

/// Backend that succeeds with nothing in it.
struct EmptyBackend;

#[async_trait]
impl ChatBackend for EmptyBackend {
    async fn generate(
        &self,
        _model: &str,
        _contents: &[Content],
    ) -> Result<ChatReplyParts, LlmError> {
        Ok(ChatReplyParts::default())
    }
}

fn app_state(backend: Arc<dyn ChatBackend>) -> Arc<AppState> {
    Arc::new(AppState {
        jobs: JobStore::new(),
        backend: Some(backend),
        storage: None,
        http: reqwest::Client::new(),
        default_model: "gemini-1.5-flash".to_string(),
    })
}

fn prompt_request(prompt: &str) -> ChatJobRequest {
    ChatJobRequest {
        prompt: Some(prompt.to_string()),
        image_url: None,
        model: Some("vendor/gemini-x".to_string()),
        history: Vec::new(),
    }
}

async fn poll_until_terminal(state: &AppState, id: Uuid) -> JobStatus {
    for _ in 0..200 {
        match state.jobs.poll(id).expect("job should exist until read") {
            JobStatus::Processing => tokio::time::sleep(Duration::from_millis(5)).await,
            terminal => return terminal,
        }
    }
    panic!("job {id} never reached a terminal state");
}

#[tokio::test]
async fn submit_poll_deliver_evict() {
    let gate = Arc::new(Notify::new());
    let state = app_state(Arc::new(GatedBackend {
        gate: Arc::clone(&gate),
        text: "Here is a cat",
        with_image: false,
    }));

    let id = submit(&state, prompt_request("draw a cat")).expect("submission succeeds");

    // The pipeline is parked on the gate, so this poll must see processing
    // and must not evict anything.
    assert_eq!(state.jobs.poll(id).unwrap(), JobStatus::Processing);
    assert_eq!(state.jobs.poll(id).unwrap(), JobStatus::Processing);

    gate.notify_one();

    match poll_until_terminal(&state, id).await {
        JobStatus::Succeeded(outcome) => {
            assert_eq!(outcome.reply, "Here is a cat");
            assert_eq!(outcome.generated_image, None);
        }
        other => panic!("expected success, got {other:?}"),
    }

    assert!(
        matches!(state.jobs.poll(id), Err(JobError::NotFound { .. })),
        "the outcome is delivered exactly once"
    );
}

#[tokio::test]
async fn generated_image_without_storage_degrades_to_note() {
    let gate = Arc::new(Notify::new());
    let state = app_state(Arc::new(GatedBackend {
        gate: Arc::clone(&gate),
        text: "Here is a cat",
        with_image: true,
    }));

    let id = submit(&state, prompt_request("draw a cat")).expect("submission succeeds");
    gate.notify_one();

    match poll_until_terminal(&state, id).await {
        JobStatus::Succeeded(outcome) => {
            assert!(
                outcome.reply.starts_with("Here is a cat"),
                "model text survives: {}",
                outcome.reply
            );
            assert!(
                outcome.reply.contains("could not be stored"),
                "undeliverable image is noted in the reply: {}",
                outcome.reply
            );
            assert_eq!(outcome.generated_image, None);
        }
        other => panic!("expected degraded success, got {other:?}"),
    }
}

#[tokio::test]
async fn backend_failure_becomes_failed_job() {
    let state = app_state(Arc::new(FailingBackend));

    let id = submit(&state, prompt_request("hello")).expect("submission succeeds");

    match poll_until_terminal(&state, id).await {
        JobStatus::Failed(message) => {
            assert!(
                message.contains("quota exhausted"),
                "failure message carries the cause: {message}"
            );
        }
        other => panic!("expected failure, got {other:?}"),
    }

    assert!(matches!(state.jobs.poll(id), Err(JobError::NotFound { .. })));
}

#[tokio::test]
async fn empty_model_output_is_a_failure_not_a_silent_success() {
    let state = app_state(Arc::new(EmptyBackend));

    let id = submit(&state, prompt_request("hello")).expect("submission succeeds");

    match poll_until_terminal(&state, id).await {
        JobStatus::Failed(message) => {
            assert!(
                message.contains("no usable content"),
                "fixed message expected: {message}"
            );
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_submission_creates_no_job() {
    let state = app_state(Arc::new(EmptyBackend));

    let result = submit(
        &state,
        ChatJobRequest {
            prompt: Some("   ".to_string()),
            image_url: None,
            model: None,
            history: Vec::new(),
        },
    );

    assert!(matches!(result, Err(ChatError::EmptyInput)));
}

#[tokio::test]
async fn unconfigured_backend_rejects_before_scheduling() {
    let state = Arc::new(AppState {
        jobs: JobStore::new(),
        backend: None,
        storage: None,
        http: reqwest::Client::new(),
        default_model: "gemini-1.5-flash".to_string(),
    });

    let result = submit(&state, prompt_request("hello"));
    assert!(matches!(result, Err(ChatError::BackendUnavailable)));
}
