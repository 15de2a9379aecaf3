//! Persistence of conversation messages.

pub mod conversation_store;
pub mod message;

pub use conversation_store::{ConversationStore, SqliteConversationStore, StoreFuture};
pub use message::{ChatRole, HistoryEntry, Message};
