//! Gemini `generateContent` client.
//!
//! Direct HTTP calls via `reqwest::Client`; the response's candidate parts
//! are decomposed into a text accumulator plus decoded binary attachments.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::provider::{Attachment, ChatBackend, ChatReplyParts, Content};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com";
/// Generation can take tens of seconds for image-bearing replies.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Gemini chat backend.
pub struct GeminiClient {
    client: Client,
    api_key: SecretString,
    base_url: Option<String>,
}

impl GeminiClient {
    pub fn new(api_key: SecretString) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: "gemini".to_string(),
                reason: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: None,
        })
    }

    /// Set a custom base URL (for testing or regional proxies).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    fn api_url(&self, model: &str) -> String {
        let base = self
            .base_url
            .as_deref()
            .unwrap_or(GEMINI_API_URL)
            .trim_end_matches('/');
        format!("{}/v1beta/models/{}:generateContent", base, model)
    }

    /// Strip a provider-namespace prefix from a caller-supplied model name
    /// (`"google/gemini-1.5-pro"` becomes `"gemini-1.5-pro"`).
    pub fn normalize_model(model: &str) -> &str {
        model.rsplit('/').next().unwrap_or(model)
    }
}

#[async_trait]
impl ChatBackend for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        contents: &[Content],
    ) -> Result<ChatReplyParts, LlmError> {
        let model = Self::normalize_model(model);
        let url = self.api_url(model);

        tracing::debug!(model, units = contents.len(), "sending generateContent request");

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.expose_secret())])
            .json(&GenerateContentRequest { contents })
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: "gemini".to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let truncated: String = body.chars().take(512).collect();
            return Err(LlmError::RequestFailed {
                provider: "gemini".to_string(),
                reason: format!("HTTP {}: {}", status, truncated),
            });
        }

        let response: GenerateContentResponse =
            response.json().await.map_err(|e| LlmError::InvalidResponse {
                provider: "gemini".to_string(),
                reason: format!("JSON parse error: {}", e),
            })?;

        decompose(response)
    }
}

/// Fold the first candidate's parts, in order, into reply text plus
/// decoded attachments. A response with no candidates or no parts is an
/// empty result, not an error; the caller decides what that means.
fn decompose(response: GenerateContentResponse) -> Result<ChatReplyParts, LlmError> {
    let mut reply = ChatReplyParts::default();

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Ok(reply);
    };
    let Some(content) = candidate.content else {
        return Ok(reply);
    };

    for part in content.parts {
        match part {
            ResponsePart::Text { text } => reply.text.push_str(&text),
            ResponsePart::InlineData { inline_data } => {
                let bytes = STANDARD.decode(&inline_data.data).map_err(|e| {
                    LlmError::InvalidResponse {
                        provider: "gemini".to_string(),
                        reason: format!("inline data is not valid base64: {}", e),
                    }
                })?;
                reply.attachments.push(Attachment {
                    bytes,
                    mime_type: inline_data.mime_type,
                });
            }
            ResponsePart::Other(value) => {
                tracing::debug!(part = %value, "ignoring unsupported response part");
            }
        }
    }

    Ok(reply)
}

// --- Gemini wire types ---

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: &'a [Content],
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ResponsePart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: ResponseBlob,
    },
    // Parts this client does not consume (thoughts, function calls).
    Other(serde_json::Value),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseBlob {
    mime_type: String,
    data: String,
}
