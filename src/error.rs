//! Error types for minichat.

use uuid::Uuid;

/// Top-level error type for the gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Errors raised while turning a chat request into a model invocation.
///
/// `EmptyInput` and `BackendUnavailable` are surfaced synchronously at
/// submission time, before any job exists. The remaining variants occur
/// inside the background pipeline and end up as the job's failure message.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("no prompt, image, or history provided")]
    EmptyInput,

    #[error("AI backend is not configured")]
    BackendUnavailable,

    #[error("failed to fetch input image: {reason}")]
    InputImageFetch { reason: String },

    #[error("the model returned no usable content")]
    NoUsableContent,
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Object-storage errors. All of these are non-fatal to a job: the
/// pipeline degrades to a text-only reply when an upload fails.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Access token refresh failed: {reason}")]
    CredentialRefresh { reason: String },

    #[error("Invalid upload payload: {reason}")]
    InvalidPayload { reason: String },

    #[error("Upload slot request rejected: errcode {code}: {message}")]
    SlotRequest { code: i64, message: String },

    #[error("Object upload rejected with HTTP {status}")]
    UploadRejected { status: u16 },

    #[error("Download URL resolution failed: {reason}")]
    ResolveFailed { reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Job-table errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} not found")]
    NotFound { id: Uuid },
}

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Server error: {0}")]
    Serve(String),
}

/// Result type alias for the gateway.
pub type Result<T> = std::result::Result<T, Error>;
