//! Record formats carried inside frames.
//!
//! Four shapes travel on the wire:
//! - handshake: `Username:<name>` (client → server, first record only)
//! - client record: `<channel>:<content>` (client → server)
//! - chat record: `<username>:<channel>:<content>` (server → every client)
//! - history line: `history HH:MM - <username>: <channel>:<content>`
//!
//! Server notices (`Server: <content>`) and operator announcements
//! (`<channel>: <content>`) are two-part records sent server → client.

use super::{Channel, ProtocolError};

/// Prefix of the handshake record.
pub const HANDSHAKE_MARKER: &str = "Username:";

/// Prefix of every history line.
pub const HISTORY_MARKER: &str = "history";

/// Sender name used for server notices.
pub const SERVER_SENDER: &str = "Server";

/// Maximum username length accepted at handshake.
pub const MAX_HANDSHAKE_USERNAME_LENGTH: usize = 32;

/// Build the handshake record for a username.
pub fn handshake_record(username: &str) -> String {
    format!("{HANDSHAKE_MARKER}{username}")
}

/// Parse a handshake record and return the validated username.
pub fn parse_handshake(record: &str) -> Result<String, ProtocolError> {
    let username = record
        .strip_prefix(HANDSHAKE_MARKER)
        .ok_or_else(|| ProtocolError::MissingHandshake(truncate(record)))?;
    validate_username(username)?;
    Ok(username.to_string())
}

/// Check that a username can be carried by the record formats.
///
/// A name must be non-empty, at most [`MAX_HANDSHAKE_USERNAME_LENGTH`]
/// characters, free of `:` and whitespace/control characters, must not be
/// the reserved [`SERVER_SENDER`], and must not contain [`HISTORY_MARKER`].
pub fn validate_username(username: &str) -> Result<(), ProtocolError> {
    let invalid = |reason: &str| ProtocolError::InvalidUsername {
        username: truncate(username),
        reason: reason.to_string(),
    };

    if username.is_empty() {
        return Err(invalid("empty"));
    }
    if username.chars().count() > MAX_HANDSHAKE_USERNAME_LENGTH {
        return Err(invalid("too long"));
    }
    if username.contains(':') {
        return Err(invalid("contains ':'"));
    }
    if username
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(invalid("contains whitespace or control characters"));
    }
    if username.eq_ignore_ascii_case(SERVER_SENDER) {
        return Err(invalid("reserved"));
    }
    if username.contains(HISTORY_MARKER) {
        return Err(invalid("contains the history marker"));
    }
    Ok(())
}

/// An application record sent by a client: `<channel>:<content>`.
///
/// The channel is kept as sent; it is a display tag and the server does not
/// route on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub channel: String,
    pub content: String,
}

impl ClientRecord {
    /// Create a record for a known channel.
    pub fn new(channel: Channel, content: impl Into<String>) -> Self {
        Self {
            channel: channel.as_str().to_string(),
            content: content.into(),
        }
    }

    /// Parse `<channel>:<content>`, splitting on the first colon only.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let (channel, content) = raw
            .split_once(':')
            .ok_or_else(|| ProtocolError::MissingSeparator(truncate(raw)))?;
        Ok(Self {
            channel: channel.to_string(),
            content: content.to_string(),
        })
    }

    /// Wire form of the record.
    pub fn to_wire(&self) -> String {
        format!("{}:{}", self.channel, self.content)
    }
}

/// The canonical record fanned out to every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRecord {
    pub username: String,
    pub channel: String,
    pub content: String,
}

impl ChatRecord {
    /// Attach the sender's username to a client record.
    pub fn from_client(username: impl Into<String>, record: &ClientRecord) -> Self {
        Self {
            username: username.into(),
            channel: record.channel.clone(),
            content: record.content.clone(),
        }
    }

    /// Wire form: `<username>:<channel>:<content>`.
    pub fn to_wire(&self) -> String {
        format!("{}:{}:{}", self.username, self.channel, self.content)
    }
}

/// Build a server notice record, shown on every channel.
pub fn notice_record(text: &str) -> String {
    format!("{SERVER_SENDER}: {text}")
}

/// Build an operator announcement for a single channel.
pub fn announcement_record(channel: Channel, text: &str) -> String {
    format!("{channel}: {text}")
}

/// A live record as classified by the receiving client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A user message tagged with a channel.
    Chat {
        username: String,
        channel: Channel,
        content: String,
    },
    /// A server notice, shown against every channel.
    Notice { content: String },
    /// An operator message for one channel.
    Announcement { channel: Channel, content: String },
}

impl Incoming {
    /// Classify a live record.
    ///
    /// Records split on the first two colons. `Server:` records are notices
    /// whatever their content; other two-part records must name a channel.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        if let Some(rest) = raw
            .strip_prefix(SERVER_SENDER)
            .and_then(|rest| rest.strip_prefix(':'))
        {
            return Ok(Incoming::Notice {
                content: rest.trim_start().to_string(),
            });
        }

        let mut parts = raw.splitn(3, ':');
        let first = parts.next().unwrap_or_default();
        match (parts.next(), parts.next()) {
            (Some(channel), Some(content)) => Ok(Incoming::Chat {
                username: first.to_string(),
                channel: channel.parse()?,
                content: content.to_string(),
            }),
            (Some(content), None) => Ok(Incoming::Announcement {
                channel: first.parse()?,
                content: content.trim_start().to_string(),
            }),
            _ => Err(ProtocolError::MissingSeparator(truncate(raw))),
        }
    }

    /// The channel this record is displayed in, or `None` for every channel.
    pub fn channel(&self) -> Option<Channel> {
        match self {
            Incoming::Chat { channel, .. } | Incoming::Announcement { channel, .. } => {
                Some(*channel)
            }
            Incoming::Notice { .. } => None,
        }
    }
}

/// A parsed history line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Display time, `HH:MM`.
    pub time: String,
    pub username: String,
    pub channel: Channel,
    pub content: String,
}

impl HistoryEntry {
    /// Render a history line.
    pub fn format_line(time: &str, username: &str, channel: &str, content: &str) -> String {
        format!("{HISTORY_MARKER} {time} - {username}: {channel}:{content}")
    }

    /// Parse a history line.
    ///
    /// The `history` marker and surrounding whitespace are stripped, then the
    /// line is split on ` - `, then `: `, then the first remaining `:`.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::MalformedHistory(truncate(line));

        let body = line.trim();
        let body = body.strip_prefix(HISTORY_MARKER).unwrap_or(body).trim();

        let (time, rest) = body.split_once(" - ").ok_or_else(malformed)?;
        let (username, channel_content) = rest.split_once(": ").ok_or_else(malformed)?;
        let (channel, content) = channel_content.split_once(':').ok_or_else(malformed)?;

        Ok(Self {
            time: time.trim().to_string(),
            username: username.to_string(),
            channel: channel.parse()?,
            content: content.to_string(),
        })
    }
}

fn truncate(raw: &str) -> String {
    const LIMIT: usize = 64;
    match raw.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &raw[..idx]),
        None => raw.to_string(),
    }
}
