//! Wire protocol: channels, record formats and framing.

mod channel;
pub mod framing;
pub mod record;

pub use channel::Channel;
pub use framing::{Frame, FrameCodec, FrameError, Framing, Outbound, MAX_FRAME_LENGTH};
pub use record::{
    announcement_record, handshake_record, notice_record, parse_handshake, validate_username,
    ChatRecord, ClientRecord, HistoryEntry, Incoming, HANDSHAKE_MARKER, HISTORY_MARKER,
    MAX_HANDSHAKE_USERNAME_LENGTH, SERVER_SENDER,
};

/// Errors raised while parsing records.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("expected handshake record, got {0:?}")]
    MissingHandshake(String),

    #[error("invalid username {username:?}: {reason}")]
    InvalidUsername { username: String, reason: String },

    #[error("record has no ':' separator: {0:?}")]
    MissingSeparator(String),

    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("malformed history line: {0:?}")]
    MalformedHistory(String),
}
