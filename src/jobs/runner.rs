//! Background chat pipeline: fetch input image, assemble content, invoke
//! the model, upload generated attachments, post the terminal outcome.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use uuid::Uuid;

use crate::error::{ChatError, Error};
use crate::jobs::store::ChatOutcome;
use crate::llm::content::{HistoryTurn, assemble};
use crate::llm::provider::ChatBackend;
use crate::server::AppState;

/// Appended to the reply when an image was generated but could not be
/// persisted to the object store.
pub const UNDELIVERABLE_IMAGE_NOTE: &str =
    "\n\n(an image was generated but could not be stored)";

/// One submitted chat request, as handed to the background pipeline.
#[derive(Debug, Clone)]
pub struct ChatJobRequest {
    pub prompt: Option<String>,
    pub image_url: Option<String>,
    pub model: Option<String>,
    pub history: Vec<HistoryTurn>,
}

impl ChatJobRequest {
    fn is_empty(&self) -> bool {
        self.prompt.as_deref().is_none_or(|p| p.trim().is_empty())
            && self.image_url.is_none()
            && self.history.is_empty()
    }
}

/// Validate the request, allocate a `processing` job, and schedule the
/// pipeline without blocking the caller.
///
/// Both failure modes here (`BackendUnavailable`, `EmptyInput`) are
/// synchronous: the caller gets an immediate error and no job exists.
pub fn submit(state: &Arc<AppState>, request: ChatJobRequest) -> Result<Uuid, ChatError> {
    let backend = state
        .backend
        .clone()
        .ok_or(ChatError::BackendUnavailable)?;
    if request.is_empty() {
        return Err(ChatError::EmptyInput);
    }

    let id = state.jobs.create();
    let state = Arc::clone(state);

    tokio::spawn(async move {
        // Blanket fault containment: whatever happens in the pipeline,
        // including a panic, the job record leaves `processing`.
        let outcome = match AssertUnwindSafe(execute(&state, backend.as_ref(), request))
            .catch_unwind()
            .await
        {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err("chat pipeline panicked".to_string()),
        };

        match &outcome {
            Ok(result) => tracing::info!(
                job_id = %id,
                reply_chars = result.reply.len(),
                has_image = result.generated_image.is_some(),
                "chat job succeeded"
            ),
            Err(message) => tracing::warn!(job_id = %id, error = %message, "chat job failed"),
        }

        state.jobs.complete(id, outcome);
    });

    Ok(id)
}

/// The pipeline body. Stages run strictly in sequence; every stage's
/// failure is typed and becomes the job's failure message.
async fn execute(
    state: &AppState,
    backend: &dyn ChatBackend,
    request: ChatJobRequest,
) -> Result<ChatOutcome, Error> {
    let image = match &request.image_url {
        Some(url) => Some(fetch_input_image(&state.http, url).await?),
        None => None,
    };

    let contents = assemble(&request.history, request.prompt.as_deref(), image.as_deref())?;

    let model = request
        .model
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(&state.default_model);
    let parts = backend.generate(model, &contents).await?;

    if parts.is_empty() {
        return Err(ChatError::NoUsableContent.into());
    }

    let mut reply = parts.text;
    let mut generated_image = None;

    for attachment in parts.attachments {
        let uploaded = match &state.storage {
            Some(storage) => storage.upload(attachment.bytes, &attachment.mime_type).await,
            None => {
                tracing::warn!("cloud storage not configured; generated image dropped");
                None
            }
        };

        match uploaded {
            Some(url) if generated_image.is_none() => generated_image = Some(url),
            // A later attachment still gets persisted; surface its URL in the text.
            Some(url) => {
                reply.push_str("\n\n");
                reply.push_str(&url);
            }
            None => reply.push_str(UNDELIVERABLE_IMAGE_NOTE),
        }
    }

    Ok(ChatOutcome {
        reply,
        generated_image,
    })
}

/// Download the caller-hosted input image for inlining into the request.
async fn fetch_input_image(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, ChatError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ChatError::InputImageFetch {
            reason: e.to_string(),
        })?;

    if !response.status().is_success() {
        return Err(ChatError::InputImageFetch {
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ChatError::InputImageFetch {
            reason: e.to_string(),
        })?;

    Ok(bytes.to_vec())
}
