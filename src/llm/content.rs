//! Assembles a chat request into the ordered content list Gemini expects.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use crate::error::ChatError;
use crate::llm::provider::{Blob, Content, Part, Role};

/// Stand-in text for history turns whose original content was an image.
/// Historical image bytes are not retained, only this marker.
pub const BLANK_TURN_PLACEHOLDER: &str = "[image]";

/// One prior turn of the conversation as the client submitted it.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryTurn {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

/// Build the ordered content list: history turns first, then the current
/// turn (image part before text part).
///
/// Returns `ChatError::EmptyInput` when there is nothing to send at all;
/// callers reject the request before any job is created.
pub fn assemble(
    history: &[HistoryTurn],
    prompt: Option<&str>,
    image: Option<&[u8]>,
) -> Result<Vec<Content>, ChatError> {
    let mut contents = Vec::with_capacity(history.len() + 1);

    for turn in history {
        let role = if turn.role == "user" {
            Role::User
        } else {
            Role::Model
        };
        let text = if turn.content.trim().is_empty() {
            BLANK_TURN_PLACEHOLDER.to_string()
        } else {
            turn.content.clone()
        };
        contents.push(Content::text(role, text));
    }

    let mut parts = Vec::new();
    if let Some(bytes) = image {
        // The store hands us arbitrary image bytes; the tag is fixed and
        // Gemini decodes the payload regardless.
        parts.push(Part::InlineData(Blob {
            mime_type: "image/jpeg".to_string(),
            data: STANDARD.encode(bytes),
        }));
    }
    if let Some(prompt) = prompt
        && !prompt.trim().is_empty()
    {
        parts.push(Part::Text(prompt.to_string()));
    }
    if !parts.is_empty() {
        contents.push(Content::user(parts));
    }

    if contents.is_empty() {
        return Err(ChatError::EmptyInput);
    }

    Ok(contents)
}
