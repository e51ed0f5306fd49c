//! Message log storage.
//!
//! Every broadcast chat message is appended here once and replayed, oldest
//! first, to sessions as they join.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

use crate::{ChatterboxError, Result};

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub username: String,
    pub channel: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Database row type for StoredMessage.
#[derive(sqlx::FromRow)]
struct MessageRow {
    username: String,
    channel: String,
    content: String,
    created_at: String,
}

impl TryFrom<MessageRow> for StoredMessage {
    type Error = ChatterboxError;

    fn try_from(row: MessageRow) -> Result<Self> {
        let timestamp = DateTime::parse_from_rfc3339(&row.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                ChatterboxError::Database(format!(
                    "bad timestamp {:?} in message log: {e}",
                    row.created_at
                ))
            })?;
        Ok(Self {
            username: row.username,
            channel: row.channel,
            content: row.content,
            timestamp,
        })
    }
}

/// New message for insertion.
#[derive(Debug, Clone)]
pub struct NewMessage<'m> {
    pub username: &'m str,
    pub channel: &'m str,
    pub content: &'m str,
    pub timestamp: DateTime<Utc>,
}

/// Repository for the message log.
pub struct MessageRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MessageRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a message. Returns its row id.
    pub async fn append(&self, message: &NewMessage<'_>) -> Result<i64> {
        // Fixed-width UTC timestamps sort lexically in time order.
        let created_at = message
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Micros, true);

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO messages (username, channel, content, created_at)
             VALUES (?, ?, ?, ?)
             RETURNING id",
        )
        .bind(message.username)
        .bind(message.channel)
        .bind(message.content)
        .bind(created_at)
        .fetch_one(self.pool)
        .await
        .map_err(|e| ChatterboxError::Database(e.to_string()))?;

        Ok(id)
    }

    /// All messages in creation order (timestamp, then insertion id).
    pub async fn list_all(&self) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT username, channel, content, created_at
             FROM messages
             ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(self.pool)
        .await
        .map_err(|e| ChatterboxError::Database(e.to_string()))?;

        rows.into_iter().map(StoredMessage::try_from).collect()
    }

    /// Number of stored messages.
    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(self.pool)
            .await
            .map_err(|e| ChatterboxError::Database(e.to_string()))
    }
}
