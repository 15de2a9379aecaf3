//! Application state shared across all request handlers.

use std::sync::Arc;

use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use crate::session::{SessionController, SessionState};

/// Shared application state.
///
/// The deployment serves a single user, so there is exactly one session. It
/// starts uninitialized and is loaded from the store on first use.
pub struct AppState {
    /// Controller for store and model operations.
    pub controller: SessionController,
    session: Mutex<Option<SessionState>>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(controller: SessionController) -> Arc<Self> {
        Arc::new(Self {
            controller,
            session: Mutex::new(None),
        })
    }

    /// Lock the session, loading it from the store if this is the first request.
    ///
    /// Hold the guard only for the duration of one interaction.
    pub async fn session(&self) -> MappedMutexGuard<'_, SessionState> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.controller.start_session().await);
        }
        MutexGuard::map(guard, |slot| slot.get_or_insert_with(SessionState::fresh))
    }
}
