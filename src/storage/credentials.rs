//! Self-refreshing cache for the WeChat API access token.
//!
//! The token is short-lived and every storage call needs one, so the
//! cache hands out the stored token while it is inside a safety-margined
//! validity window and refreshes on demand otherwise.

use std::time::{Duration, Instant};

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::StorageError;

const WECHAT_API_URL: &str = "https://api.weixin.qq.com";
const REFRESH_TIMEOUT: Duration = Duration::from_secs(10);
/// Subtracted from the provider-declared lifetime so a token is never
/// handed out near its true expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(200);
/// Lifetime assumed when the provider omits `expires_in`.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(7200);

/// Cached access token for the WeChat API.
pub struct TokenCache {
    client: Client,
    app_id: String,
    app_secret: SecretString,
    base_url: Option<String>,
    slot: tokio::sync::Mutex<Option<CachedToken>>,
}

#[derive(Debug, Clone)]
pub(crate) struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    pub(crate) fn from_lifetime(token: String, declared: Duration, now: Instant) -> Self {
        Self {
            token,
            expires_at: now + declared.saturating_sub(EXPIRY_MARGIN),
        }
    }

    pub(crate) fn is_valid(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

impl TokenCache {
    pub fn new(app_id: String, app_secret: SecretString) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(REFRESH_TIMEOUT)
            .build()
            .map_err(|e| StorageError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            app_id,
            app_secret,
            base_url: None,
            slot: tokio::sync::Mutex::new(None),
        })
    }

    /// Set a custom base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Return a valid access token, refreshing it if the cached one is
    /// absent or past its margined expiry. `None` means the token could
    /// not be obtained; callers treat the storage backend as unreachable.
    pub async fn token(&self) -> Option<String> {
        let mut slot = self.slot.lock().await;

        if let Some(cached) = slot.as_ref()
            && cached.is_valid(Instant::now())
        {
            return Some(cached.token.clone());
        }

        match self.refresh().await {
            Ok(fresh) => {
                let token = fresh.token.clone();
                *slot = Some(fresh);
                Some(token)
            }
            Err(e) => {
                tracing::warn!(error = %e, "access token refresh failed");
                // Whatever was cached is already expired at this point.
                *slot = None;
                None
            }
        }
    }

    async fn refresh(&self) -> Result<CachedToken, StorageError> {
        let base = self
            .base_url
            .as_deref()
            .unwrap_or(WECHAT_API_URL)
            .trim_end_matches('/');
        let url = format!("{}/cgi-bin/token", base);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("grant_type", "client_credential"),
                ("appid", self.app_id.as_str()),
                ("secret", self.app_secret.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| StorageError::CredentialRefresh {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::CredentialRefresh {
                reason: format!("HTTP {}", status),
            });
        }

        let body: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| StorageError::CredentialRefresh {
                    reason: format!("malformed token response: {}", e),
                })?;

        match body.access_token {
            Some(token) => {
                let lifetime = body
                    .expires_in
                    .map_or(DEFAULT_LIFETIME, Duration::from_secs);
                tracing::debug!(lifetime_secs = lifetime.as_secs(), "access token refreshed");
                Ok(CachedToken::from_lifetime(token, lifetime, Instant::now()))
            }
            None => Err(StorageError::CredentialRefresh {
                reason: format!(
                    "errcode {}: {}",
                    body.errcode.unwrap_or_default(),
                    body.errmsg.unwrap_or_default()
                ),
            }),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    errcode: Option<i64>,
    errmsg: Option<String>,
}
