//! Input validation for account registration.

use thiserror::Error;

use crate::protocol;

/// Minimum username length.
pub const MIN_USERNAME_LENGTH: usize = 4;

/// Maximum username length.
pub const MAX_USERNAME_LENGTH: usize = 20;

/// Minimum password length.
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Maximum password length.
pub const MAX_PASSWORD_LENGTH: usize = 24;

/// Validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("username must be at least {MIN_USERNAME_LENGTH} characters")]
    UsernameTooShort,

    #[error("username must be at most {MAX_USERNAME_LENGTH} characters")]
    UsernameTooLong,

    /// The name could not be sent in a handshake.
    #[error("username cannot be used on the wire: {0}")]
    UsernameInvalidChars(String),

    #[error("username is already taken")]
    UsernameTaken,

    #[error("password must be at least {MIN_PASSWORD_LENGTH} characters")]
    PasswordTooShort,

    #[error("password must be at most {MAX_PASSWORD_LENGTH} characters")]
    PasswordTooLong,

    #[error("password must contain at least one digit")]
    PasswordMissingDigit,

    #[error("password must contain at least one lowercase letter")]
    PasswordMissingLowercase,

    #[error("password must contain at least one uppercase letter")]
    PasswordMissingUppercase,

    #[error("password must contain at least one special character")]
    PasswordMissingSpecial,

    #[error("passwords do not match")]
    PasswordMismatch,
}

/// Validate a username for registration.
///
/// Requirements:
/// - Length: 4-20 characters
/// - Usable in a handshake record (see [`protocol::validate_username`])
///
/// # Examples
///
/// ```
/// use chatterbox::auth::validation::validate_username;
///
/// assert!(validate_username("alice").is_ok());
/// assert!(validate_username("bob").is_err()); // too short
/// assert!(validate_username("al:ce").is_err()); // separator
/// ```
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    let length = username.chars().count();
    if length < MIN_USERNAME_LENGTH {
        return Err(ValidationError::UsernameTooShort);
    }
    if length > MAX_USERNAME_LENGTH {
        return Err(ValidationError::UsernameTooLong);
    }

    protocol::validate_username(username)
        .map_err(|e| ValidationError::UsernameInvalidChars(e.to_string()))
}

/// Validate a password for registration.
///
/// Requirements:
/// - Length: 6-24 characters
/// - At least one digit, one lowercase letter, one uppercase letter and one
///   non-alphanumeric character
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::PasswordTooShort);
    }
    if length > MAX_PASSWORD_LENGTH {
        return Err(ValidationError::PasswordTooLong);
    }
    if !password.chars().any(|c| c.is_numeric()) {
        return Err(ValidationError::PasswordMissingDigit);
    }
    if !password.chars().any(char::is_lowercase) {
        return Err(ValidationError::PasswordMissingLowercase);
    }
    if !password.chars().any(char::is_uppercase) {
        return Err(ValidationError::PasswordMissingUppercase);
    }
    if password.chars().all(char::is_alphanumeric) {
        return Err(ValidationError::PasswordMissingSpecial);
    }
    Ok(())
}

/// Validate a registration form: username, password and its confirmation.
pub fn validate_registration(
    username: &str,
    password: &str,
    confirm_password: &str,
) -> Result<(), ValidationError> {
    validate_username(username)?;
    validate_password(password)?;
    if password != confirm_password {
        return Err(ValidationError::PasswordMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_username_valid() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("john_doe").is_ok());
        assert!(validate_username("abcd").is_ok());
        assert!(validate_username(&"a".repeat(20)).is_ok());
    }

    #[test]
    fn test_validate_username_length() {
        assert_eq!(
            validate_username("abc"),
            Err(ValidationError::UsernameTooShort)
        );
        assert_eq!(
            validate_username(&"a".repeat(21)),
            Err(ValidationError::UsernameTooLong)
        );
    }

    #[test]
    fn test_validate_username_wire_rules() {
        for name in ["al:ce", "al ce", "Server", "historyfan"] {
            assert!(
                matches!(
                    validate_username(name),
                    Err(ValidationError::UsernameInvalidChars(_))
                ),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_password_valid() {
        assert!(validate_password("Abc12!").is_ok());
        assert!(validate_password("Secur3-Passw0rd").is_ok());
    }

    #[test]
    fn test_validate_password_rules() {
        assert_eq!(validate_password("Ab1!"), Err(ValidationError::PasswordTooShort));
        assert_eq!(
            validate_password(&format!("Ab1!{}", "x".repeat(21))),
            Err(ValidationError::PasswordTooLong)
        );
        assert_eq!(
            validate_password("Abcdef!"),
            Err(ValidationError::PasswordMissingDigit)
        );
        assert_eq!(
            validate_password("ABCDE1!"),
            Err(ValidationError::PasswordMissingLowercase)
        );
        assert_eq!(
            validate_password("abcde1!"),
            Err(ValidationError::PasswordMissingUppercase)
        );
        assert_eq!(
            validate_password("Abcde12"),
            Err(ValidationError::PasswordMissingSpecial)
        );
    }

    #[test]
    fn test_validate_registration_mismatch() {
        assert!(validate_registration("alice", "Abc12!", "Abc12!").is_ok());
        assert_eq!(
            validate_registration("alice", "Abc12!", "Abc12?"),
            Err(ValidationError::PasswordMismatch)
        );
    }
}
