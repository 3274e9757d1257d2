//! Generative-AI backend: content model, assembler, and the Gemini client.

pub mod content;
pub mod gemini;
pub mod provider;

pub use content::{HistoryTurn, assemble};
pub use gemini::GeminiClient;
pub use provider::{Attachment, Blob, ChatBackend, ChatReplyParts, Content, Part, Role};
