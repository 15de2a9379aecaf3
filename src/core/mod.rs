//! Core configuration, errors and identifiers.

pub mod config;
pub mod errors;
pub mod ids;

pub use config::{ChatConfig, LlmConfig, ServerConfig, StorageConfig};
pub use errors::{ChatError, ChatResult};
pub use ids::ConversationId;
