//! Storage and authentication collaborator.
//!
//! The server core talks to persistence only through [`ChatStore`], so it
//! never embeds SQL. [`SqliteStore`] is the production implementation.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use crate::db::StoredMessage;
use crate::Result;

/// Accounts, bans and the message log.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Check a username/password pair.
    async fn verify_credentials(&self, username: &str, password: &str) -> Result<bool>;

    /// Create an account. Policy violations and taken names yield
    /// `ChatterboxError::Validation`.
    async fn create_account(&self, username: &str, password: &str) -> Result<()>;

    /// Whether a username is on the ban list.
    async fn is_banned(&self, username: &str) -> Result<bool>;

    /// Add a username to the ban list. Returns false if already banned.
    async fn ban(&self, username: &str) -> Result<bool>;

    /// Remove a username from the ban list. Returns false if not banned.
    async fn unban(&self, username: &str) -> Result<bool>;

    /// Append a message to the log.
    async fn persist_message(
        &self,
        username: &str,
        channel: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;

    /// Every logged message in creation order.
    async fn fetch_history(&self) -> Result<Vec<StoredMessage>>;
}
