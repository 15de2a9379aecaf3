//! Per-user session state and the controller driving it.

pub mod controller;
pub mod state;

pub use controller::{ReplyTurn, SessionController, TurnRequest};
pub use state::{ConversationEntry, ConversationSlot, SessionState};
