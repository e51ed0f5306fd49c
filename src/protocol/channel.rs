//! The fixed set of chat channels.

use std::fmt;
use std::str::FromStr;

use super::ProtocolError;

/// A chat channel.
///
/// Channels are display tags, not subscriptions: every session receives every
/// message and the receiving side filters by channel. The wire names returned
/// by [`Channel::as_str`] must match verbatim on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    General,
    Chitchat,
    Accounting,
    It,
    Marketing,
}

impl Channel {
    /// Every channel, in display order.
    pub const ALL: [Channel; 5] = [
        Channel::General,
        Channel::Chitchat,
        Channel::Accounting,
        Channel::It,
        Channel::Marketing,
    ];

    /// The wire name of the channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::General => "General",
            Channel::Chitchat => "Chitchat",
            Channel::Accounting => "Accounting",
            Channel::It => "IT",
            Channel::Marketing => "Marketing",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ProtocolError;

    /// Parse a wire name. Surrounding whitespace is ignored; case is not.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Channel::ALL
            .into_iter()
            .find(|channel| channel.as_str() == name)
            .ok_or_else(|| ProtocolError::UnknownChannel(name.to_string()))
    }
}
