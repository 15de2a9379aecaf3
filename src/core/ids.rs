//! Conversation identifiers.
//!
//! A conversation id is an opaque token: the store only ever compares it for
//! equality and sorts it. Freshly created conversations get a random `UUIDv4`
//! rendered in its hyphenated form, but ids read back from the database are
//! accepted verbatim whatever their shape.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier grouping messages into one conversation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the raw token.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConversationId {
    #[inline]
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ConversationId {
    #[inline]
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for ConversationId {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}
