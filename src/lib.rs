//! chatterbox - channel-tagged TCP chat
//!
//! A chat server with history replay and operator moderation, and the
//! client that talks to it.

pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod store;

pub use client::{Client, ClientEvent, ClientState, DisplayLine};
pub use config::Config;
pub use db::Database;
pub use error::{ChatterboxError, Result};
pub use protocol::{Channel, Framing, ProtocolError};
pub use server::{AdminCommand, ChatServer, ModerationOutcome, Moderator, ServerEvent};
pub use store::{ChatStore, SqliteStore, StoredMessage};
