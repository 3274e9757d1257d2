//! Three-step upload protocol for WeChat cloud object storage.
//!
//! 1. Request an upload slot (`tcb/uploadfile`): yields a one-time signed
//!    URL, the signature fields, and an internal file id.
//! 2. Multipart POST the bytes to the signed URL with the signature
//!    fields passed through verbatim; the store answers HTTP 204.
//! 3. Exchange the file id for a time-bounded download URL
//!    (`tcb/batchdownloadfile`).
//!
//! Any step failing aborts the upload; the caller degrades to a
//! text-only reply instead of failing the job.

use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, StatusCode, multipart};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::credentials::TokenCache;

const WECHAT_API_URL: &str = "https://api.weixin.qq.com";
const SLOT_TIMEOUT: Duration = Duration::from_secs(10);
/// Binary transfer of a generated image can be slow.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);
/// Validity window requested for resolved download URLs (24 hours).
const DOWNLOAD_URL_TTL: u64 = 86400;

/// Client for the cloud environment's object store.
pub struct CloudStorage {
    slot_client: Client,
    upload_client: Client,
    env_id: String,
    tokens: TokenCache,
    base_url: Option<String>,
}

impl CloudStorage {
    pub fn new(
        app_id: String,
        app_secret: SecretString,
        env_id: String,
    ) -> Result<Self, StorageError> {
        let build = |timeout| {
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| StorageError::ClientBuild(e.to_string()))
        };

        Ok(Self {
            slot_client: build(SLOT_TIMEOUT)?,
            upload_client: build(UPLOAD_TIMEOUT)?,
            env_id,
            tokens: TokenCache::new(app_id, app_secret)?,
            base_url: None,
        })
    }

    /// Point both the metadata calls and the token cache at a custom host
    /// (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.tokens = self.tokens.with_base_url(url.clone());
        self.base_url = Some(url);
        self
    }

    fn api_url(&self, path: &str) -> String {
        let base = self
            .base_url
            .as_deref()
            .unwrap_or(WECHAT_API_URL)
            .trim_end_matches('/');
        format!("{}/{}", base, path)
    }

    /// Persist one generated image and return its public download URL.
    /// `None` means the image exists but could not be stored.
    pub async fn upload(&self, bytes: Vec<u8>, mime_type: &str) -> Option<String> {
        let token = self.tokens.token().await?;
        let path = destination_path(mime_type);

        let slot = match self.request_slot(&token, &path).await {
            Ok(slot) => slot,
            Err(e) => {
                tracing::warn!(error = %e, path, "upload slot request failed");
                return None;
            }
        };

        if let Err(e) = self.put_object(&slot, &path, bytes, mime_type).await {
            tracing::warn!(error = %e, path, "object upload failed");
            return None;
        }

        match self.resolve_download_url(&token, &slot.file_id).await {
            Ok(url) => {
                tracing::info!(path, "generated image stored");
                Some(url)
            }
            Err(e) => {
                tracing::warn!(error = %e, path, "download URL resolution failed");
                None
            }
        }
    }

    async fn request_slot(&self, token: &str, path: &str) -> Result<UploadSlot, StorageError> {
        let response = self
            .slot_client
            .post(self.api_url("tcb/uploadfile"))
            .query(&[("access_token", token)])
            .json(&SlotRequest {
                env: &self.env_id,
                path,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::SlotRequest {
                code: i64::from(status.as_u16()),
                message: format!("HTTP {}", status),
            });
        }

        slot_from_response(response.json().await?)
    }

    async fn put_object(
        &self,
        slot: &UploadSlot,
        path: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<(), StorageError> {
        let file_part = multipart::Part::bytes(bytes)
            .file_name(path.to_string())
            .mime_str(mime_type)
            .map_err(|e| StorageError::InvalidPayload {
                reason: format!("invalid mime type {}: {}", mime_type, e),
            })?;

        // The signature fields are opaque; they go back exactly as the
        // slot response handed them out.
        let form = multipart::Form::new()
            .text("key", path.to_string())
            .text("Signature", slot.authorization.clone())
            .text("x-cos-security-token", slot.cos_token.clone())
            .text("x-cos-meta-fileid", slot.cos_file_id.clone())
            .part("file", file_part);

        let response = self
            .upload_client
            .post(&slot.url)
            .multipart(form)
            .send()
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            Ok(())
        } else {
            Err(StorageError::UploadRejected {
                status: response.status().as_u16(),
            })
        }
    }

    async fn resolve_download_url(
        &self,
        token: &str,
        file_id: &str,
    ) -> Result<String, StorageError> {
        let response = self
            .slot_client
            .post(self.api_url("tcb/batchdownloadfile"))
            .query(&[("access_token", token)])
            .json(&DownloadRequest {
                env: &self.env_id,
                file_list: vec![DownloadEntry {
                    fileid: file_id,
                    max_age: DOWNLOAD_URL_TTL,
                }],
            })
            .send()
            .await?;

        let body: DownloadResponse = response.json().await?;
        if body.errcode != 0 {
            return Err(StorageError::ResolveFailed {
                reason: format!("errcode {}: {}", body.errcode, body.errmsg.unwrap_or_default()),
            });
        }

        body.file_list
            .into_iter()
            .next()
            .and_then(|entry| entry.download_url)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| StorageError::ResolveFailed {
                reason: "response carried no download URL".to_string(),
            })
    }
}

/// Unique destination path: UTC timestamp plus a random suffix, with an
/// extension matching the attachment's reported MIME type.
fn destination_path(mime_type: &str) -> String {
    format!(
        "ai-images/{}-{:08x}{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        rand::random::<u32>(),
        extension_for(mime_type)
    )
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => ".png",
        "image/webp" => ".webp",
        "image/gif" => ".gif",
        _ => ".jpg",
    }
}

fn slot_from_response(body: SlotResponse) -> Result<UploadSlot, StorageError> {
    if body.errcode != 0 {
        return Err(StorageError::SlotRequest {
            code: body.errcode,
            message: body.errmsg.unwrap_or_default(),
        });
    }

    match (body.url, body.authorization, body.token, body.cos_file_id, body.file_id) {
        (Some(url), Some(authorization), Some(cos_token), Some(cos_file_id), Some(file_id)) => {
            Ok(UploadSlot {
                url,
                authorization,
                cos_token,
                cos_file_id,
                file_id,
            })
        }
        _ => Err(StorageError::SlotRequest {
            code: 0,
            message: "slot response missing upload fields".to_string(),
        }),
    }
}

/// Everything one upload needs, as returned by the slot request.
#[derive(Debug)]
struct UploadSlot {
    url: String,
    authorization: String,
    cos_token: String,
    cos_file_id: String,
    file_id: String,
}

// --- wire types ---

#[derive(Serialize)]
struct SlotRequest<'a> {
    env: &'a str,
    path: &'a str,
}

#[derive(Deserialize)]
struct SlotResponse {
    #[serde(default)]
    errcode: i64,
    errmsg: Option<String>,
    url: Option<String>,
    authorization: Option<String>,
    token: Option<String>,
    cos_file_id: Option<String>,
    file_id: Option<String>,
}

#[derive(Serialize)]
struct DownloadRequest<'a> {
    env: &'a str,
    file_list: Vec<DownloadEntry<'a>>,
}

#[derive(Serialize)]
struct DownloadEntry<'a> {
    fileid: &'a str,
    max_age: u64,
}

#[derive(Deserialize)]
struct DownloadResponse {
    #[serde(default)]
    errcode: i64,
    errmsg: Option<String>,
    #[serde(default)]
    file_list: Vec<DownloadResult>,
}

#[derive(Deserialize)]
struct DownloadResult {
    download_url: Option<String>,
}
