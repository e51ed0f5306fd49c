//! Account records and their repository.

use sqlx::SqlitePool;

use crate::{ChatterboxError, Result};

/// A registered account.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    /// Argon2 PHC string.
    pub password: String,
    pub created_at: String,
    pub last_login: Option<String>,
}

/// Data for inserting a new account. `password` must already be hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password: String,
}

impl NewUser {
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password_hash.into(),
        }
    }
}

/// Repository for account operations.
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    /// Create a new UserRepository with the given database pool reference.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert an account and return it with its assigned ID.
    pub async fn create(&self, new_user: &NewUser) -> Result<User> {
        let result = sqlx::query("INSERT INTO users (username, password) VALUES (?, ?)")
            .bind(&new_user.username)
            .bind(&new_user.password)
            .execute(self.pool)
            .await
            .map_err(|e| ChatterboxError::Database(e.to_string()))?;

        let id = result.last_insert_rowid();
        self.get_by_id(id)
            .await?
            .ok_or_else(|| ChatterboxError::NotFound("user".to_string()))
    }

    /// Get an account by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        sqlx::query_as::<_, User>(
            "SELECT id, username, password, created_at, last_login FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| ChatterboxError::Database(e.to_string()))
    }

    /// Get an account by username (case-insensitive).
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, User>(
            "SELECT id, username, password, created_at, last_login
             FROM users WHERE username = ? COLLATE NOCASE",
        )
        .bind(username)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| ChatterboxError::Database(e.to_string()))
    }

    /// Check whether a username is taken (case-insensitive).
    pub async fn username_exists(&self, username: &str) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ? COLLATE NOCASE")
                .bind(username)
                .fetch_one(self.pool)
                .await
                .map_err(|e| ChatterboxError::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// Record a successful login.
    pub async fn update_last_login(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = datetime('now') WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| ChatterboxError::Database(e.to_string()))?;
        Ok(())
    }

    /// Number of registered accounts.
    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(self.pool)
            .await
            .map_err(|e| ChatterboxError::Database(e.to_string()))
    }
}
