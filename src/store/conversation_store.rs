//! SQLite-backed message store.
//!
//! Every operation opens its own connection and drops it before returning;
//! writes are committed immediately. This matches the single-user deployment
//! and keeps the database file free of long-lived handles.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeZone, Utc};
use rusqlite::types::Value;
use tokio_rusqlite::Connection;

use crate::core::config::StorageConfig;
use crate::core::errors::{ChatError, ChatResult};
use crate::core::ids::ConversationId;
use crate::store::message::{ChatRole, HistoryEntry, Message};

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Value written to the vestigial `user_id` column.
const USER_ID: &str = "user";

/// SQLite `CURRENT_TIMESTAMP` text, with optional fractional seconds.
const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Durable CRUD over conversation messages.
pub trait ConversationStore: Send + Sync {
    /// Create the message table if it does not exist yet.
    ///
    /// # Errors
    /// Returns an error if the storage medium is unavailable.
    fn initialize(&self) -> StoreFuture<'_, ChatResult<()>>;

    /// Distinct conversation ids with at least one message, sorted.
    ///
    /// Storage failures are logged and yield an empty list.
    fn list_conversation_ids(&self) -> StoreFuture<'_, Vec<ConversationId>>;

    /// Append one message; the store assigns id and timestamp.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn append_message<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        role: ChatRole,
        content: &'a str,
    ) -> StoreFuture<'a, ChatResult<Message>>;

    /// Ordered `{role, content}` pairs of a conversation, oldest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn history<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> StoreFuture<'a, ChatResult<Vec<HistoryEntry>>>;

    /// Ordered message records of a conversation, oldest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn messages<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> StoreFuture<'a, ChatResult<Vec<Message>>>;

    /// Remove every message of a conversation, returning how many were removed.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn delete_conversation<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> StoreFuture<'a, ChatResult<usize>>;
}

/// `SQLite` implementation of the message store.
pub struct SqliteConversationStore {
    path: PathBuf,
    table: String,
}

impl SqliteConversationStore {
    /// Build a store for the configured database file.
    ///
    /// Nothing is opened until the first operation.
    #[must_use]
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            path: config.sqlite_path.clone(),
            table: config.table.clone(),
        }
    }

    async fn connect(&self) -> ChatResult<Connection> {
        Ok(Connection::open(&self.path).await?)
    }

    async fn load_messages(&self, conversation_id: &ConversationId) -> ChatResult<Vec<Message>> {
        let table = self.table.clone();
        let conversation = conversation_id.as_str().to_string();
        let conn = self.connect().await?;
        let rows = conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT id, role, content, timestamp
                     FROM {table}
                     WHERE conversation_id = ?1
                     ORDER BY timestamp, id"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![conversation], |row| {
                        let id: i64 = row.get(0)?;
                        let role: String = row.get(1)?;
                        let content: String = row.get(2)?;
                        let ts: Value = row.get(3)?;
                        Ok((id, role, content, ts))
                    })?
                    .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for (id, role, content, ts) in rows {
            let decoded = decode_timestamp(&ts).and_then(|timestamp| {
                let role = ChatRole::from_str(&role)
                    .map_err(|err| ChatError::InvalidMessage(format!("invalid role: {err}")))?;
                Ok((role, timestamp))
            });
            match decoded {
                Ok((role, timestamp)) => messages.push(Message {
                    id,
                    conversation_id: conversation_id.clone(),
                    role,
                    content,
                    timestamp,
                }),
                Err(err) => {
                    tracing::warn!("Skipping row {id} of {conversation_id}: {err}");
                }
            }
        }

        // Rows written as text and as integers do not interleave in SQL order.
        messages.sort_by_key(|message| (message.timestamp, message.id));
        Ok(messages)
    }

    async fn try_list_conversation_ids(&self) -> ChatResult<Vec<ConversationId>> {
        let table = self.table.clone();
        let conn = self.connect().await?;
        let ids = conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT DISTINCT conversation_id
                     FROM {table}
                     ORDER BY conversation_id"
                ))?;
                let ids = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids.into_iter().map(ConversationId::from).collect())
    }
}

/// Decode a stored timestamp.
///
/// Rows written here hold Unix milliseconds. Databases created with a
/// `DATETIME DEFAULT CURRENT_TIMESTAMP` column hold UTC text instead.
fn decode_timestamp(value: &Value) -> ChatResult<DateTime<Utc>> {
    match value {
        Value::Integer(ms) => Utc
            .timestamp_millis_opt(*ms)
            .single()
            .ok_or_else(|| ChatError::InvalidMessage(format!("timestamp out of range: {ms}"))),
        Value::Text(text) => NaiveDateTime::parse_from_str(text, LEGACY_TIMESTAMP_FORMAT)
            .map(|naive| naive.and_utc())
            .or_else(|_| DateTime::parse_from_rfc3339(text).map(|dt| dt.with_timezone(&Utc)))
            .map_err(|err| ChatError::InvalidMessage(format!("invalid timestamp {text:?}: {err}"))),
        other => Err(ChatError::InvalidMessage(format!(
            "unsupported timestamp value: {other:?}"
        ))),
    }
}

impl ConversationStore for SqliteConversationStore {
    fn initialize(&self) -> StoreFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }

            let table_name = self.table.clone();
            let conn = self.connect().await?;
            conn.call(move |conn| {
                conn.execute_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS {table_name} (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        conversation_id TEXT,
                        user_id TEXT,
                        role TEXT,
                        content TEXT,
                        timestamp INTEGER NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_{table_name}_conversation_ts
                        ON {table_name} (conversation_id, timestamp);"
                ))?;
                Ok(())
            })
            .await?;

            tracing::debug!("Message table {} ready in {}", self.table, self.path.display());
            Ok(())
        })
    }

    fn list_conversation_ids(&self) -> StoreFuture<'_, Vec<ConversationId>> {
        Box::pin(async move {
            match self.try_list_conversation_ids().await {
                Ok(ids) => ids,
                Err(err) => {
                    tracing::error!("Database error when loading conversation ids: {err}");
                    Vec::new()
                }
            }
        })
    }

    fn append_message<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        role: ChatRole,
        content: &'a str,
    ) -> StoreFuture<'a, ChatResult<Message>> {
        Box::pin(async move {
            let table = self.table.clone();
            let conversation = conversation_id.as_str().to_string();
            let text = content.to_string();
            let timestamp = Utc::now().trunc_subsecs(3);
            let ts = timestamp.timestamp_millis();

            let conn = self.connect().await?;
            let id = conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table} (conversation_id, user_id, role, content, timestamp)
                             VALUES (?1, ?2, ?3, ?4, ?5)"
                        ),
                        rusqlite::params![conversation, USER_ID, role.as_str(), text, ts],
                    )?;
                    Ok(conn.last_insert_rowid())
                })
                .await?;

            Ok(Message {
                id,
                conversation_id: conversation_id.clone(),
                role,
                content: content.to_string(),
                timestamp,
            })
        })
    }

    fn history<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> StoreFuture<'a, ChatResult<Vec<HistoryEntry>>> {
        Box::pin(async move {
            let messages = self.load_messages(conversation_id).await?;
            Ok(messages.into_iter().map(HistoryEntry::from).collect())
        })
    }

    fn messages<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> StoreFuture<'a, ChatResult<Vec<Message>>> {
        Box::pin(self.load_messages(conversation_id))
    }

    fn delete_conversation<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> StoreFuture<'a, ChatResult<usize>> {
        Box::pin(async move {
            let table = self.table.clone();
            let conversation = conversation_id.as_str().to_string();
            let conn = self.connect().await?;
            let removed = conn
                .call(move |conn| {
                    let removed = conn.execute(
                        &format!("DELETE FROM {table} WHERE conversation_id = ?1"),
                        rusqlite::params![conversation],
                    )?;
                    Ok(removed)
                })
                .await?;
            Ok(removed)
        })
    }
}
