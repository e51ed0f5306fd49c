//! Authentication module for chatterbox.
//!
//! Password hashing, registration policy and credential checks.

mod password;
mod registration;
pub mod validation;

pub use password::{hash_password, verify_password, PasswordError};
pub use registration::{authenticate, register, RegistrationError};
pub use validation::ValidationError;
