//! Per-session conversation bookkeeping.
//!
//! Labels are display-only and live here; the store only knows ids. A
//! conversation created in the session has no rows until its first message,
//! which is what [`ConversationSlot::Pending`] records.

use serde::Serialize;

use crate::core::errors::{ChatError, ChatResult};
use crate::core::ids::ConversationId;

/// Whether a conversation has rows in the store yet.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "status", content = "label", rename_all = "snake_case")]
pub enum ConversationSlot {
    /// Known to this session only.
    Pending(String),
    /// At least one message has been written.
    Persisted(String),
}

impl ConversationSlot {
    /// Display label.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Pending(label) | Self::Persisted(label) => label,
        }
    }

    /// True once the conversation has been written to.
    #[must_use]
    pub const fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted(_))
    }
}

/// One conversation known to the session.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ConversationEntry {
    /// Conversation identifier.
    pub id: ConversationId,
    /// Label and persistence state.
    pub slot: ConversationSlot,
}

/// Conversations of one user session and which one is active.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SessionState {
    conversations: Vec<ConversationEntry>,
    current: ConversationId,
}

fn label_for(position: usize) -> String {
    format!("Conversation {position}")
}

impl SessionState {
    /// A session holding a single, not yet written, conversation.
    #[must_use]
    pub fn fresh() -> Self {
        let id = ConversationId::generate();
        Self {
            conversations: vec![ConversationEntry {
                id: id.clone(),
                slot: ConversationSlot::Pending(label_for(1)),
            }],
            current: id,
        }
    }

    /// Seed a session from the ids found in the store.
    ///
    /// The first id becomes active. With no ids this is [`SessionState::fresh`].
    #[must_use]
    pub fn from_persisted(ids: Vec<ConversationId>) -> Self {
        let mut conversations: Vec<ConversationEntry> = Vec::with_capacity(ids.len());
        for id in ids {
            if conversations.iter().any(|entry| entry.id == id) {
                continue;
            }
            let label = label_for(conversations.len() + 1);
            conversations.push(ConversationEntry {
                id,
                slot: ConversationSlot::Persisted(label),
            });
        }

        match conversations.first().map(|entry| entry.id.clone()) {
            Some(current) => Self {
                conversations,
                current,
            },
            None => Self::fresh(),
        }
    }

    /// The active conversation.
    #[must_use]
    pub const fn current_id(&self) -> &ConversationId {
        &self.current
    }

    /// All conversations in display order.
    #[must_use]
    pub fn conversations(&self) -> &[ConversationEntry] {
        &self.conversations
    }

    /// Look up a conversation's entry.
    #[must_use]
    pub fn entry(&self, id: &ConversationId) -> Option<&ConversationEntry> {
        self.conversations.iter().find(|entry| &entry.id == id)
    }

    /// Make an existing conversation active.
    ///
    /// # Errors
    /// Returns `UnknownConversation` if `id` is not part of this session.
    pub fn select(&mut self, id: &ConversationId) -> ChatResult<()> {
        if self.entry(id).is_none() {
            return Err(ChatError::UnknownConversation(id.to_string()));
        }
        self.current = id.clone();
        Ok(())
    }

    /// Add a pending conversation labelled after the current count and make it active.
    pub fn create_conversation(&mut self) -> ConversationId {
        let id = ConversationId::generate();
        let label = label_for(self.conversations.len() + 1);
        self.conversations.push(ConversationEntry {
            id: id.clone(),
            slot: ConversationSlot::Pending(label),
        });
        self.current = id.clone();
        id
    }

    /// Drop the active conversation and pick another one, synthesizing a
    /// fresh conversation if none is left. Returns the removed id.
    pub fn remove_current(&mut self) -> ConversationId {
        let removed = self.current.clone();
        self.conversations.retain(|entry| entry.id != removed);

        match self.conversations.first().map(|entry| entry.id.clone()) {
            Some(next) => self.current = next,
            None => *self = Self::fresh(),
        }
        removed
    }

    /// Record that `id` now has rows in the store.
    pub fn mark_persisted(&mut self, id: &ConversationId) {
        let Some(entry) = self.conversations.iter_mut().find(|entry| &entry.id == id) else {
            return;
        };
        if let ConversationSlot::Pending(label) = &entry.slot {
            entry.slot = ConversationSlot::Persisted(label.clone());
        }
    }
}
