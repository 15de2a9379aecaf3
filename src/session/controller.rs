//! Session controller: conversation switching and the message round-trip.

use std::sync::Arc;

use tracing::{debug, info};

use crate::core::errors::ChatResult;
use crate::core::ids::ConversationId;
use crate::llm::{ChatModel, FragmentStream, ModelCatalog, collect_reply};
use crate::session::state::SessionState;
use crate::store::conversation_store::ConversationStore;
use crate::store::message::{ChatRole, Message};

/// A user submission.
#[derive(Clone, Debug, Default)]
pub struct TurnRequest {
    /// Model chosen by the user; `None` selects the catalog default.
    pub model: Option<String>,
    /// Optional system message describing the assistant's role.
    pub system_message: Option<String>,
    /// The user's text.
    pub message: String,
}

/// A reply being generated for a conversation.
pub struct ReplyTurn {
    /// Conversation the reply belongs to.
    pub conversation_id: ConversationId,
    /// Model generating the reply.
    pub model: String,
    /// Reply fragments, to be drained to completion.
    pub fragments: FragmentStream,
}

/// Orchestrates the store and the model on behalf of one session state.
#[derive(Clone)]
pub struct SessionController {
    store: Arc<dyn ConversationStore>,
    model: Arc<dyn ChatModel>,
    catalog: ModelCatalog,
}

impl SessionController {
    /// Create a controller.
    #[must_use]
    pub const fn new(
        store: Arc<dyn ConversationStore>,
        model: Arc<dyn ChatModel>,
        catalog: ModelCatalog,
    ) -> Self {
        Self {
            store,
            model,
            catalog,
        }
    }

    /// Selectable models.
    #[must_use]
    pub const fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Load the conversations known to the store into a new session.
    pub async fn start_session(&self) -> SessionState {
        let ids = self.store.list_conversation_ids().await;
        let state = SessionState::from_persisted(ids);
        info!(
            "Session started with {} conversation(s), active {}",
            state.conversations().len(),
            state.current_id()
        );
        state
    }

    /// Switch to another conversation of the session.
    ///
    /// # Errors
    /// Returns `UnknownConversation` if `id` is not part of the session.
    #[allow(clippy::unused_self)]
    pub fn select(&self, state: &mut SessionState, id: &ConversationId) -> ChatResult<()> {
        state.select(id)?;
        debug!("Switched to conversation {id}");
        Ok(())
    }

    /// Start a new, empty conversation and make it active.
    #[allow(clippy::unused_self)]
    pub fn new_chat(&self, state: &mut SessionState) -> ConversationId {
        let id = state.create_conversation();
        debug!("Created conversation {id}");
        id
    }

    /// Delete the active conversation's messages and drop it from the session.
    ///
    /// # Errors
    /// Returns an error if the store fails; the session is left untouched then.
    pub async fn delete_current(&self, state: &mut SessionState) -> ChatResult<ConversationId> {
        let removed = self.store.delete_conversation(state.current_id()).await?;
        let id = state.remove_current();
        info!("Deleted conversation {id} ({removed} message(s))");
        Ok(id)
    }

    /// Messages of the active conversation as shown to the user (no system rows).
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn display_messages(&self, state: &SessionState) -> ChatResult<Vec<Message>> {
        let mut messages = self.store.messages(state.current_id()).await?;
        messages.retain(|message| message.role != ChatRole::System);
        Ok(messages)
    }

    /// Persist the user's side of a turn and start generating the reply.
    ///
    /// Returns `None` for an empty message. The caller must drain the returned
    /// fragments and hand the concatenated text to [`Self::complete_turn`].
    ///
    /// # Errors
    /// Returns `UnknownModel` before anything is written, or any store or
    /// model error. Rows already written stay written.
    pub async fn begin_turn(
        &self,
        state: &mut SessionState,
        request: TurnRequest,
    ) -> ChatResult<Option<ReplyTurn>> {
        if request.message.is_empty() {
            return Ok(None);
        }

        let model = self.catalog.resolve(request.model.as_deref())?.to_string();
        let conversation_id = state.current_id().clone();

        if let Some(system_message) = request.system_message.filter(|s| !s.is_empty()) {
            let history = self.store.history(&conversation_id).await?;
            if !history.iter().any(|entry| entry.role == ChatRole::System) {
                self.store
                    .append_message(&conversation_id, ChatRole::System, &system_message)
                    .await?;
            }
        }

        self.store
            .append_message(&conversation_id, ChatRole::User, &request.message)
            .await?;
        state.mark_persisted(&conversation_id);

        let context = self.store.history(&conversation_id).await?;
        debug!(
            "Requesting reply from {model} with {} message(s) of context",
            context.len()
        );
        let fragments = self.model.stream_chat(&model, context).await?;

        Ok(Some(ReplyTurn {
            conversation_id,
            model,
            fragments,
        }))
    }

    /// Persist the finished reply.
    ///
    /// Returns `None` without writing when the conversation was deleted while
    /// the reply was generated.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn complete_turn(
        &self,
        conversation_id: &ConversationId,
        reply: &str,
    ) -> ChatResult<Option<Message>> {
        if self.store.history(conversation_id).await?.is_empty() {
            info!("Dropping reply for deleted conversation {conversation_id}");
            return Ok(None);
        }
        let message = self
            .store
            .append_message(conversation_id, ChatRole::Assistant, reply)
            .await?;
        Ok(Some(message))
    }

    /// Run a whole turn: persist, stream the reply through `on_fragment`, persist the reply.
    ///
    /// # Errors
    /// Returns the first store or model error.
    pub async fn submit_message<F>(
        &self,
        state: &mut SessionState,
        request: TurnRequest,
        on_fragment: F,
    ) -> ChatResult<Option<String>>
    where
        F: FnMut(&str),
    {
        let Some(turn) = self.begin_turn(state, request).await? else {
            return Ok(None);
        };
        let reply = collect_reply(turn.fragments, on_fragment).await?;
        self.complete_turn(&turn.conversation_id, &reply).await?;
        Ok(Some(reply))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use futures::StreamExt;
    use futures::stream;
    use tempfile::TempDir;

    use super::*;
    use crate::core::config::{LlmConfig, StorageConfig};
    use crate::core::errors::ChatError;
    use crate::llm::ModelFuture;
    use crate::session::state::ConversationSlot;
    use crate::store::conversation_store::SqliteConversationStore;
    use crate::store::message::HistoryEntry;

    /// Replies with fixed fragments and records every request.
    pub(crate) struct ScriptedModel {
        pub(crate) fragments: Vec<&'static str>,
        pub(crate) fail: bool,
        pub(crate) fail_midway: bool,
        pub(crate) calls: Mutex<Vec<(String, Vec<HistoryEntry>)>>,
    }

    impl ScriptedModel {
        pub(crate) fn replying(fragments: Vec<&'static str>) -> Self {
            Self {
                fragments,
                fail: false,
                fail_midway: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Refuses to start a reply.
        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Self::replying(Vec::new())
            }
        }

        /// Yields `fragments`, then an inference error.
        pub(crate) fn failing_midway(fragments: Vec<&'static str>) -> Self {
            Self {
                fail_midway: true,
                ..Self::replying(fragments)
            }
        }
    }

    impl ChatModel for ScriptedModel {
        fn stream_chat<'a>(
            &'a self,
            model: &'a str,
            messages: Vec<HistoryEntry>,
        ) -> ModelFuture<'a, ChatResult<FragmentStream>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push((model.to_string(), messages));
                if self.fail {
                    return Err(ChatError::Inference("model unavailable".to_string()));
                }
                let mut fragments: Vec<ChatResult<String>> =
                    self.fragments.iter().map(|f| Ok((*f).to_string())).collect();
                if self.fail_midway {
                    fragments.push(Err(ChatError::Inference("stream interrupted".to_string())));
                }
                Ok(stream::iter(fragments).boxed())
            })
        }
    }

    pub(crate) async fn setup(
        model: Arc<ScriptedModel>,
    ) -> (TempDir, Arc<SqliteConversationStore>, SessionController) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteConversationStore::new(&StorageConfig {
            sqlite_path: dir.path().join("chat.db"),
            table: "chat_messages".to_string(),
        }));
        store.initialize().await.unwrap();
        let catalog = ModelCatalog::from_config(&LlmConfig::default()).unwrap();
        let controller = SessionController::new(store.clone(), model, catalog);
        (dir, store, controller)
    }

    fn request(message: &str) -> TurnRequest {
        TurnRequest {
            message: message.to_string(),
            ..TurnRequest::default()
        }
    }

    #[tokio::test]
    async fn test_start_session_on_empty_store() {
        let (_dir, store, controller) = setup(Arc::new(ScriptedModel::replying(vec![]))).await;
        let state = controller.start_session().await;

        assert_eq!(state.conversations().len(), 1);
        assert_eq!(state.conversations()[0].slot.label(), "Conversation 1");
        assert!(store.list_conversation_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_full_turn_persists_and_streams() {
        let model = Arc::new(ScriptedModel::replying(vec!["Hel", "lo"]));
        let (_dir, store, controller) = setup(model.clone()).await;
        let mut state = controller.start_session().await;
        let id = state.current_id().clone();

        let mut seen = Vec::new();
        let reply = controller
            .submit_message(&mut state, request("hi"), |f| seen.push(f.to_string()))
            .await
            .unwrap();

        assert_eq!(reply.as_deref(), Some("Hello"));
        assert_eq!(seen, vec!["Hel", "lo"]);
        assert_eq!(
            store.history(&id).await.unwrap(),
            vec![
                HistoryEntry::new(ChatRole::User, "hi"),
                HistoryEntry::new(ChatRole::Assistant, "Hello"),
            ]
        );
        assert!(state.entry(&id).unwrap().slot.is_persisted());

        let calls = model.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "gemma3:latest");
        assert_eq!(calls[0].1, vec![HistoryEntry::new(ChatRole::User, "hi")]);
    }

    #[tokio::test]
    async fn test_empty_message_is_a_no_op() {
        let model = Arc::new(ScriptedModel::replying(vec!["x"]));
        let (_dir, store, controller) = setup(model.clone()).await;
        let mut state = controller.start_session().await;

        let reply = controller
            .submit_message(&mut state, request(""), |_| {})
            .await
            .unwrap();

        assert!(reply.is_none());
        assert!(store.list_conversation_ids().await.is_empty());
        assert!(model.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_system_message_written_once() {
        let model = Arc::new(ScriptedModel::replying(vec!["ok"]));
        let (_dir, store, controller) = setup(model.clone()).await;
        let mut state = controller.start_session().await;
        let id = state.current_id().clone();

        for text in ["first", "second"] {
            let turn = TurnRequest {
                system_message: Some("You are terse.".to_string()),
                ..request(text)
            };
            controller
                .submit_message(&mut state, turn, |_| {})
                .await
                .unwrap();
        }

        let roles: Vec<ChatRole> = store
            .history(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.role)
            .collect();
        assert_eq!(
            roles,
            vec![
                ChatRole::System,
                ChatRole::User,
                ChatRole::Assistant,
                ChatRole::User,
                ChatRole::Assistant,
            ]
        );

        let calls = model.calls.lock().unwrap();
        assert_eq!(calls[0].1[0], HistoryEntry::new(ChatRole::System, "You are terse."));
    }

    #[tokio::test]
    async fn test_unknown_model_writes_nothing() {
        let (_dir, store, controller) = setup(Arc::new(ScriptedModel::replying(vec![]))).await;
        let mut state = controller.start_session().await;

        let turn = TurnRequest {
            model: Some("gpt-4o".to_string()),
            ..request("hi")
        };
        let result = controller.submit_message(&mut state, turn, |_| {}).await;

        assert!(matches!(result, Err(ChatError::UnknownModel(_))));
        assert!(store.list_conversation_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_inference_failure_leaves_user_row() {
        let (_dir, store, controller) = setup(Arc::new(ScriptedModel::failing())).await;
        let mut state = controller.start_session().await;
        let id = state.current_id().clone();

        let result = controller.submit_message(&mut state, request("hi"), |_| {}).await;

        assert!(matches!(result, Err(ChatError::Inference(_))));
        assert_eq!(
            store.history(&id).await.unwrap(),
            vec![HistoryEntry::new(ChatRole::User, "hi")]
        );
    }

    #[tokio::test]
    async fn test_pending_conversations_are_not_listed() {
        let (_dir, store, controller) = setup(Arc::new(ScriptedModel::replying(vec!["ok"]))).await;
        let mut state = controller.start_session().await;
        let first = state.current_id().clone();
        controller
            .submit_message(&mut state, request("hi"), |_| {})
            .await
            .unwrap();

        let second = controller.new_chat(&mut state);
        assert_eq!(
            state.entry(&second).map(|e| e.slot.clone()),
            Some(ConversationSlot::Pending("Conversation 2".to_string()))
        );
        assert_eq!(store.list_conversation_ids().await, vec![first]);
    }

    #[tokio::test]
    async fn test_delete_only_conversation_synthesizes_new_one() {
        let (_dir, store, controller) = setup(Arc::new(ScriptedModel::replying(vec!["ok"]))).await;
        let mut state = controller.start_session().await;
        controller
            .submit_message(&mut state, request("hi"), |_| {})
            .await
            .unwrap();

        let deleted = controller.delete_current(&mut state).await.unwrap();

        assert!(store.history(&deleted).await.unwrap().is_empty());
        assert_ne!(state.current_id(), &deleted);
        assert_eq!(state.conversations().len(), 1);
        assert_eq!(state.conversations()[0].slot.label(), "Conversation 1");
    }

    #[tokio::test]
    async fn test_restart_reloads_persisted_conversations() {
        let (_dir, _store, controller) = setup(Arc::new(ScriptedModel::replying(vec!["ok"]))).await;
        let mut state = controller.start_session().await;
        let first = state.current_id().clone();
        controller
            .submit_message(&mut state, request("hi"), |_| {})
            .await
            .unwrap();
        controller.new_chat(&mut state);

        let reloaded = controller.start_session().await;
        assert_eq!(reloaded.current_id(), &first);
        assert_eq!(reloaded.conversations().len(), 1);
        assert!(reloaded.conversations()[0].slot.is_persisted());
    }

    #[tokio::test]
    async fn test_display_messages_hide_system_rows() {
        let (_dir, _store, controller) = setup(Arc::new(ScriptedModel::replying(vec!["ok"]))).await;
        let mut state = controller.start_session().await;
        let turn = TurnRequest {
            system_message: Some("Be kind.".to_string()),
            ..request("hi")
        };
        controller.submit_message(&mut state, turn, |_| {}).await.unwrap();

        let shown: Vec<ChatRole> = controller
            .display_messages(&state)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(shown, vec![ChatRole::User, ChatRole::Assistant]);
    }

    #[tokio::test]
    async fn test_reply_for_deleted_conversation_is_dropped() {
        let (_dir, store, controller) =
            setup(Arc::new(ScriptedModel::replying(vec!["late"]))).await;
        let mut state = controller.start_session().await;

        let turn = controller
            .begin_turn(&mut state, request("hi"))
            .await
            .unwrap()
            .unwrap();
        controller.delete_current(&mut state).await.unwrap();

        let reply = collect_reply(turn.fragments, |_| {}).await.unwrap();
        let stored = controller
            .complete_turn(&turn.conversation_id, &reply)
            .await
            .unwrap();

        assert!(stored.is_none());
        assert!(store.history(&turn.conversation_id).await.unwrap().is_empty());
        assert!(store.list_conversation_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_mid_stream_failure_stores_no_reply() {
        let (_dir, store, controller) =
            setup(Arc::new(ScriptedModel::failing_midway(vec!["par"]))).await;
        let mut state = controller.start_session().await;
        let id = state.current_id().clone();

        let mut seen = Vec::new();
        let result = controller
            .submit_message(&mut state, request("hi"), |f| seen.push(f.to_string()))
            .await;

        assert!(matches!(result, Err(ChatError::Inference(_))));
        assert_eq!(seen, vec!["par"]);
        assert_eq!(
            store.history(&id).await.unwrap(),
            vec![HistoryEntry::new(ChatRole::User, "hi")]
        );
    }
}
