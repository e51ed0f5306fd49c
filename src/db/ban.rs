//! Persisted username bans.

use sqlx::SqlitePool;

use crate::{ChatterboxError, Result};

/// Repository for the ban list. Usernames compare case-insensitively.
pub struct BanRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BanRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Add a username to the ban list.
    ///
    /// Returns false if the username was already banned.
    pub async fn ban(&self, username: &str) -> Result<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO banned_users (username) VALUES (?)")
            .bind(username)
            .execute(self.pool)
            .await
            .map_err(|e| ChatterboxError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a username from the ban list.
    ///
    /// Returns false if the username was not banned.
    pub async fn unban(&self, username: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM banned_users WHERE username = ?")
            .bind(username)
            .execute(self.pool)
            .await
            .map_err(|e| ChatterboxError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    /// Check whether a username is banned.
    pub async fn is_banned(&self, username: &str) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM banned_users WHERE username = ?")
                .bind(username)
                .fetch_one(self.pool)
                .await
                .map_err(|e| ChatterboxError::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// List banned usernames in alphabetical order.
    pub async fn list(&self) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT username FROM banned_users ORDER BY username")
            .fetch_all(self.pool)
            .await
            .map_err(|e| ChatterboxError::Database(e.to_string()))
    }
}
