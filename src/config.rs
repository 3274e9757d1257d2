//! Configuration for minichat.

use std::net::SocketAddr;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Main configuration for the gateway.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Ok(Self {
            server: ServerConfig::from_env()?,
            llm: LlmConfig::from_env()?,
            storage: StorageConfig::from_env()?,
        })
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl ServerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let bind = optional_env("BIND_ADDR")?
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue {
                key: "BIND_ADDR".to_string(),
                message: format!("{e}"),
            })?;

        Ok(Self { bind })
    }
}

/// Gemini backend configuration.
///
/// A missing API key does not abort startup: the server runs and answers
/// submissions with a backend-unavailable error instead.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<SecretString>,
    /// Override for the Gemini endpoint (testing, regional proxies).
    pub base_url: Option<String>,
    pub default_model: String,
}

impl LlmConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: optional_env("GEMINI_API_KEY")?.map(SecretString::from),
            base_url: optional_env("GEMINI_BASE_URL")?,
            default_model: optional_env("GEMINI_DEFAULT_MODEL")?
                .unwrap_or_else(|| "gemini-1.5-flash".to_string()),
        })
    }
}

/// WeChat cloud object-storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub app_id: Option<String>,
    pub app_secret: Option<SecretString>,
    /// Cloud environment identifier (the `env` field of every tcb call).
    pub env_id: Option<String>,
    /// Override for the WeChat API host (testing).
    pub base_url: Option<String>,
}

impl StorageConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            app_id: optional_env("WECHAT_APP_ID")?,
            app_secret: optional_env("WECHAT_APP_SECRET")?.map(SecretString::from),
            env_id: optional_env("WECHAT_CLOUD_ENV")?,
            base_url: optional_env("WECHAT_API_BASE")?,
        })
    }

    /// Whether enough is configured to reach the object store at all.
    pub fn is_configured(&self) -> bool {
        self.app_id.is_some() && self.app_secret.is_some() && self.env_id.is_some()
    }
}

// Helper functions

pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::ParseError(format!(
            "failed to read {key}: {e}"
        ))),
    }
}
