//! Chat backend trait and the content types shared across providers.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::LlmError;

/// Role of one content unit in the conversation sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One turn's worth of input: a role plus its ordered parts.
#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    /// Create a user content unit.
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Role::User,
            parts,
        }
    }

    /// Create a single-text content unit with the given role.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::Text(text.into())],
        }
    }
}

/// A single content part: inline text or an inline binary blob.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    InlineData(Blob),
}

/// Base64-encoded binary payload with its MIME tag.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

/// A decoded binary attachment returned by the model.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Decomposed model output: concatenated text plus any binary
/// attachments, in the order the provider emitted them.
#[derive(Debug, Clone, Default)]
pub struct ChatReplyParts {
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl ChatReplyParts {
    /// True when the model produced neither text nor attachments.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachments.is_empty()
    }
}

/// A generative chat backend.
///
/// The job runner only depends on this trait, so pipelines are testable
/// against a scripted backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Run one generation call with the full ordered content list.
    async fn generate(
        &self,
        model: &str,
        contents: &[Content],
    ) -> Result<ChatReplyParts, LlmError>;
}
