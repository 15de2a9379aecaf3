//! Message model for persisted conversations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::ids::ConversationId;

/// Origin of a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    /// Instructions describing the assistant's role or personality.
    System,
    /// User input.
    User,
    /// Model response.
    Assistant,
}

impl ChatRole {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChatRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(value.to_string()),
        }
    }
}

/// A `{role, content}` pair, the shape handed to the model as context.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Role of the message.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
}

impl HistoryEntry {
    /// Build an entry.
    #[must_use]
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A stored message row.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Surrogate key assigned by the store.
    pub id: i64,
    /// Conversation the message belongs to.
    pub conversation_id: ConversationId,
    /// Role of the message.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
    /// Creation time assigned by the store.
    pub timestamp: DateTime<Utc>,
}

impl From<Message> for HistoryEntry {
    fn from(message: Message) -> Self {
        Self {
            role: message.role,
            content: message.content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [ChatRole::System, ChatRole::User, ChatRole::Assistant] {
            assert_eq!(ChatRole::from_str(role.as_str()), Ok(role));
        }
        assert_eq!(ChatRole::from_str("tool"), Err("tool".to_string()));
    }

    #[test]
    fn test_history_entry_wire_shape() {
        let entry = HistoryEntry::new(ChatRole::Assistant, "hello");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hello"}));
    }
}
