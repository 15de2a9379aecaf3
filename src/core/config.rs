//! Configuration for the chat front-end.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::errors::{ChatError, ChatResult};

/// Environment variable overriding the database path.
const DB_PATH_ENV: &str = "OLLAMA_CHAT_DB";
/// Environment variable overriding the Ollama base URL.
const OLLAMA_URL_ENV: &str = "OLLAMA_CHAT_OLLAMA_URL";
/// Environment variable overriding the model catalog (comma separated).
const MODELS_ENV: &str = "OLLAMA_CHAT_MODELS";
/// Environment variable overriding the HTTP port.
const PORT_ENV: &str = "OLLAMA_CHAT_PORT";
/// Environment variable overriding the static asset directory.
const STATIC_DIR_ENV: &str = "OLLAMA_CHAT_STATIC_DIR";

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Storage settings.
    pub storage: StorageConfig,
    /// Inference settings.
    pub llm: LlmConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
}

impl ChatConfig {
    /// Build the default configuration, then apply environment overrides.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply overrides looked up through `lookup`. Unparsable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(DB_PATH_ENV) {
            self.storage.sqlite_path = PathBuf::from(path);
        }
        if let Some(url) = lookup(OLLAMA_URL_ENV) {
            self.llm.base_url = url;
        }
        if let Some(models) = lookup(MODELS_ENV) {
            self.llm.models = models
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(port) = lookup(PORT_ENV).and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(dir) = lookup(STATIC_DIR_ENV) {
            self.server.static_dir = PathBuf::from(dir);
        }
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        let table = &self.storage.table;
        let valid_table = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !table.starts_with(|c: char| c.is_ascii_digit());
        if !valid_table {
            return Err(ChatError::InvalidConfig(format!(
                "storage.table must be a plain identifier, got {table:?}"
            )));
        }

        if self.llm.models.is_empty() {
            return Err(ChatError::InvalidConfig(
                "llm.models must list at least one model".to_string(),
            ));
        }

        Url::parse(&self.llm.base_url)?;

        Ok(())
    }
}

/// Storage configuration for conversation data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path, relative to the working directory by default.
    pub sqlite_path: PathBuf,
    /// Message table name.
    pub table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("./db/chat_conversations.db"),
            table: "chat_messages".to_string(),
        }
    }
}

/// Inference settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ollama base URL.
    pub base_url: String,
    /// Models the user may pick from; the first one is the default.
    pub models: Vec<String>,
    /// How long Ollama keeps the model loaded after a request.
    pub keep_alive: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            models: vec!["gemma3:latest".to_string(), "deepseek-r1:7b".to_string()],
            keep_alive: "5m".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listening port.
    pub port: u16,
    /// Directory of static front-end assets.
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: crate::server::DEFAULT_PORT,
            static_dir: PathBuf::from("static"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChatConfig::default();
        assert_eq!(
            config.storage.sqlite_path,
            PathBuf::from("./db/chat_conversations.db")
        );
        assert_eq!(config.storage.table, "chat_messages");
        assert_eq!(config.llm.models, vec!["gemma3:latest", "deepseek-r1:7b"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OLLAMA_CHAT_DB", "/tmp/chat.db"),
            ("OLLAMA_CHAT_MODELS", "llama3.2:latest, ,qwen3:8b"),
            ("OLLAMA_CHAT_PORT", "not-a-port"),
        ]);
        let mut config = ChatConfig::default();
        config.apply_overrides(|key| env.get(key).map(ToString::to_string));

        assert_eq!(config.storage.sqlite_path, PathBuf::from("/tmp/chat.db"));
        assert_eq!(config.llm.models, vec!["llama3.2:latest", "qwen3:8b"]);
        assert_eq!(config.server.port, 8501);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ChatConfig::default();
        config.storage.table = "chat messages; DROP".to_string();
        assert!(matches!(config.validate(), Err(ChatError::InvalidConfig(_))));

        let mut config = ChatConfig::default();
        config.llm.models.clear();
        assert!(matches!(config.validate(), Err(ChatError::InvalidConfig(_))));

        let mut config = ChatConfig::default();
        config.llm.base_url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(ChatError::Url(_))));
    }
}
