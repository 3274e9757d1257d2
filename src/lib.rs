//! minichat: an asynchronous chat gateway.
//!
//! Mini-program clients submit a prompt (optionally with a hosted input
//! image and conversation history), the gateway runs Gemini
//! `generateContent` in a background job, persists any generated image to
//! WeChat cloud object storage, and the client polls for the outcome by
//! job id.

pub mod config;
pub mod error;
pub mod jobs;
pub mod llm;
pub mod server;
pub mod storage;

pub use error::{Error, Result};
