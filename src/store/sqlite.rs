use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ChatStore, StoredMessage};
use crate::auth::{self, RegistrationError};
use crate::db::{BanRepository, Database, MessageRepository, NewMessage, UserRepository};
use crate::{ChatterboxError, Result};

/// [`ChatStore`] backed by the SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open (and migrate) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Database::open(path).await?))
    }

    /// Open a private in-memory database.
    pub async fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory().await?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn verify_credentials(&self, username: &str, password: &str) -> Result<bool> {
        let repo = UserRepository::new(self.db.pool());
        Ok(auth::authenticate(&repo, username, password).await?.is_some())
    }

    async fn create_account(&self, username: &str, password: &str) -> Result<()> {
        let repo = UserRepository::new(self.db.pool());
        match auth::register(&repo, username, password).await {
            Ok(_) => Ok(()),
            Err(RegistrationError::Validation(e)) => Err(ChatterboxError::Validation(e.to_string())),
            Err(RegistrationError::Password(e)) => Err(ChatterboxError::Auth(e.to_string())),
            Err(RegistrationError::Database(e)) => Err(ChatterboxError::Database(e)),
        }
    }

    async fn is_banned(&self, username: &str) -> Result<bool> {
        BanRepository::new(self.db.pool()).is_banned(username).await
    }

    async fn ban(&self, username: &str) -> Result<bool> {
        BanRepository::new(self.db.pool()).ban(username).await
    }

    async fn unban(&self, username: &str) -> Result<bool> {
        BanRepository::new(self.db.pool()).unban(username).await
    }

    async fn persist_message(
        &self,
        username: &str,
        channel: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        MessageRepository::new(self.db.pool())
            .append(&NewMessage {
                username,
                channel,
                content,
                timestamp,
            })
            .await?;
        Ok(())
    }

    async fn fetch_history(&self) -> Result<Vec<StoredMessage>> {
        MessageRepository::new(self.db.pool()).list_all().await
    }
}
