//! Account registration and credential checks.

use thiserror::Error;
use tracing::{info, warn};

use crate::auth::validation::{validate_password, validate_username, ValidationError};
use crate::auth::{hash_password, verify_password, PasswordError};
use crate::db::{NewUser, User, UserRepository};

/// Registration-specific errors.
#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("password error: {0}")]
    Password(#[from] PasswordError),

    #[error("database error: {0}")]
    Database(String),
}

/// Register a new account.
///
/// Validates the username and password policy, rejects a username already
/// taken in any letter case, hashes the password and inserts the account.
pub async fn register(
    repo: &UserRepository<'_>,
    username: &str,
    password: &str,
) -> std::result::Result<User, RegistrationError> {
    validate_username(username)?;
    validate_password(password)?;

    if repo
        .username_exists(username)
        .await
        .map_err(|e| RegistrationError::Database(e.to_string()))?
    {
        return Err(ValidationError::UsernameTaken.into());
    }

    let password_hash = hash_password(password)?;
    let user = repo
        .create(&NewUser::new(username, password_hash))
        .await
        .map_err(|e| RegistrationError::Database(e.to_string()))?;

    info!(username = %user.username, user_id = user.id, "New account registered");
    Ok(user)
}

/// Check a username/password pair.
///
/// Returns the account on success and `None` for an unknown username or a
/// wrong password. A corrupt stored hash is logged and treated as a mismatch.
pub async fn authenticate(
    repo: &UserRepository<'_>,
    username: &str,
    password: &str,
) -> crate::Result<Option<User>> {
    let Some(user) = repo.get_by_username(username).await? else {
        return Ok(None);
    };

    match verify_password(password, &user.password) {
        Ok(()) => {
            repo.update_last_login(user.id).await?;
            Ok(Some(user))
        }
        Err(PasswordError::VerificationFailed) => Ok(None),
        Err(e) => {
            warn!(username = %user.username, "Stored password hash unusable: {}", e);
            Ok(None)
        }
    }
}
