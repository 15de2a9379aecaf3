//! Startup helpers for the chat server.

use std::process::ExitCode;
use std::sync::Arc;

use crate::core::config::ChatConfig;
use crate::core::errors::ChatResult;
use crate::llm::{ModelCatalog, OllamaChatClient};
use crate::server::{self, AppState};
use crate::session::SessionController;
use crate::store::{ConversationStore, SqliteConversationStore};

/// Run the server until Ctrl+C.
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting Ollama chat v{}", env!("CARGO_PKG_VERSION"));

    let config = ChatConfig::from_env();
    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {e}");
        return ExitCode::from(1);
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(serve(config)) {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Build application state from `config`: open the store and connect the model client.
///
/// # Errors
/// Returns an error if the store cannot be initialized or the client cannot be built.
pub async fn initialize(config: &ChatConfig) -> ChatResult<Arc<AppState>> {
    let store = SqliteConversationStore::new(&config.storage);
    store.initialize().await?;
    tracing::info!("Conversation store: {}", config.storage.sqlite_path.display());

    let client = OllamaChatClient::new(&config.llm)?;
    match client.is_ready().await {
        Ok(true) => tracing::info!("Ollama endpoint: {}", config.llm.base_url),
        Ok(false) => tracing::warn!("Ollama at {} answered with an error", config.llm.base_url),
        Err(e) => tracing::warn!("Ollama at {} is unreachable: {e}", config.llm.base_url),
    }

    let catalog = ModelCatalog::from_config(&config.llm)?;
    let controller = SessionController::new(Arc::new(store), Arc::new(client), catalog);
    Ok(AppState::new(controller))
}

async fn serve(config: ChatConfig) -> ChatResult<()> {
    let state = initialize(&config).await?;
    server::run_server_with_shutdown(
        state,
        config.server.port,
        &config.server.static_dir,
        shutdown_signal(),
    )
    .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
