//! Operator commands: kick, ban, unban, shutdown and announcements.
//!
//! These come from the server console only, never from a chat record.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::broadcast::Broadcaster;
use super::registry::SessionRegistry;
use super::session::SessionInfo;
use crate::protocol::{Channel, ProtocolError};
use crate::store::ChatStore;
use crate::Result;

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// Close every session with this username.
    Kick(String),
    /// Kick, then add to the ban list.
    Ban(String),
    /// Remove from the ban list.
    Unban(String),
    /// Stop accepting, close every session and exit.
    Shutdown,
    /// Announce to one channel.
    Say { channel: Channel, text: String },
    /// `Server: <text>` to everyone.
    Notice(String),
    /// List connected sessions.
    Who,
    /// Show console help.
    Help,
}

/// Console input that is not a runnable command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty input")]
    Empty,

    #[error("command '/{0}' requires an argument")]
    MissingArgument(String),

    #[error("unknown command '/{0}'")]
    Unknown(String),

    #[error(transparent)]
    InvalidChannel(#[from] ProtocolError),
}

impl AdminCommand {
    /// Parse a console line.
    ///
    /// Lines starting with `/` are commands; anything else is a server
    /// notice.
    pub fn parse(input: &str) -> std::result::Result<Self, CommandError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(CommandError::Empty);
        }

        let Some(without_slash) = trimmed.strip_prefix('/') else {
            return Ok(AdminCommand::Notice(trimmed.to_string()));
        };

        let (cmd, args) = match without_slash.split_once(' ') {
            Some((cmd, args)) => (cmd, args.trim()),
            None => (without_slash, ""),
        };
        let cmd = cmd.to_lowercase();

        let require = |args: &str| {
            if args.is_empty() {
                Err(CommandError::MissingArgument(cmd.clone()))
            } else {
                Ok(args.to_string())
            }
        };

        match cmd.as_str() {
            "kick" => Ok(AdminCommand::Kick(require(args)?)),
            "ban" => Ok(AdminCommand::Ban(require(args)?)),
            "unban" | "deban" => Ok(AdminCommand::Unban(require(args)?)),
            "shutdown" | "kill" => Ok(AdminCommand::Shutdown),
            "say" => {
                let args = require(args)?;
                let (channel, text) = args
                    .split_once(' ')
                    .map(|(c, t)| (c, t.trim()))
                    .unwrap_or((args.as_str(), ""));
                let channel: Channel = channel.parse()?;
                if text.is_empty() {
                    return Err(CommandError::MissingArgument(cmd.clone()));
                }
                Ok(AdminCommand::Say {
                    channel,
                    text: text.to_string(),
                })
            }
            "who" => Ok(AdminCommand::Who),
            "help" | "?" => Ok(AdminCommand::Help),
            _ => Err(CommandError::Unknown(cmd.clone())),
        }
    }
}

/// Console help text.
pub fn format_help() -> String {
    [
        "/kick <user>            close every session of <user>",
        "/ban <user>             kick <user> and refuse future connections",
        "/unban <user>           lift a ban (alias /deban)",
        "/say <channel> <text>   announce to one channel",
        "/who                    list connected sessions",
        "/shutdown               stop the server (alias /kill)",
        "<text>                  send a server notice to everyone",
    ]
    .join("\n")
}

/// What a moderation action did, for the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationOutcome {
    Kicked { username: String, sessions: usize },
    NotConnected { username: String },
    Banned { username: String, kicked: usize },
    AlreadyBanned { username: String, kicked: usize },
    Unbanned { username: String },
    NotBanned { username: String },
    Broadcast { delivered: usize },
    Sessions(Vec<SessionInfo>),
    ShutDown { closed: usize },
    Help(String),
}

impl fmt::Display for ModerationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModerationOutcome::Kicked { username, sessions } => {
                write!(f, "kicked {username} ({sessions} session(s))")
            }
            ModerationOutcome::NotConnected { username } => {
                write!(f, "{username} is not connected")
            }
            ModerationOutcome::Banned { username, kicked } => {
                write!(f, "banned {username} ({kicked} session(s) closed)")
            }
            ModerationOutcome::AlreadyBanned { username, kicked } => {
                write!(f, "{username} was already banned ({kicked} session(s) closed)")
            }
            ModerationOutcome::Unbanned { username } => write!(f, "unbanned {username}"),
            ModerationOutcome::NotBanned { username } => write!(f, "{username} was not banned"),
            ModerationOutcome::Broadcast { delivered } => {
                write!(f, "sent to {delivered} session(s)")
            }
            ModerationOutcome::Sessions(sessions) => {
                if sessions.is_empty() {
                    return write!(f, "no sessions");
                }
                let lines: Vec<String> = sessions
                    .iter()
                    .map(|s| {
                        format!(
                            "{} {} since {}",
                            s.username,
                            s.peer_addr,
                            s.connected_at.format("%H:%M:%S")
                        )
                    })
                    .collect();
                write!(f, "{}", lines.join("\n"))
            }
            ModerationOutcome::ShutDown { closed } => {
                write!(f, "server shut down ({closed} session(s) closed)")
            }
            ModerationOutcome::Help(text) => f.write_str(text),
        }
    }
}

/// Applies operator commands to the registry and the ban list.
#[derive(Clone)]
pub struct Moderator {
    registry: SessionRegistry,
    broadcaster: Broadcaster,
    store: Arc<dyn ChatStore>,
    shutdown: CancellationToken,
}

impl Moderator {
    pub fn new(
        registry: SessionRegistry,
        broadcaster: Broadcaster,
        store: Arc<dyn ChatStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            store,
            shutdown,
        }
    }

    /// Close and unregister every session named `username`.
    pub async fn kick(&self, username: &str) -> ModerationOutcome {
        let handles = self.registry.remove_by_username(username).await;
        if handles.is_empty() {
            warn!(%username, "kick: no connected session");
            return ModerationOutcome::NotConnected {
                username: username.to_string(),
            };
        }

        for handle in &handles {
            handle.close();
        }
        info!(%username, sessions = handles.len(), "Kicked");
        ModerationOutcome::Kicked {
            username: username.to_string(),
            sessions: handles.len(),
        }
    }

    /// Add `username` to the ban list, kick it and tell everyone.
    ///
    /// The ban is stored before the kick so a session registering
    /// concurrently either gets kicked or sees the ban itself. The notice
    /// goes out only when the name was not already banned.
    pub async fn ban(&self, username: &str) -> Result<ModerationOutcome> {
        let newly_banned = self.store.ban(username).await?;

        let kicked = match self.kick(username).await {
            ModerationOutcome::Kicked { sessions, .. } => sessions,
            _ => 0,
        };

        if !newly_banned {
            warn!(%username, "ban: already banned");
            return Ok(ModerationOutcome::AlreadyBanned {
                username: username.to_string(),
                kicked,
            });
        }

        info!(%username, "Banned");
        self.broadcaster
            .notice(&format!("user {username} has been banned."))
            .await;
        Ok(ModerationOutcome::Banned {
            username: username.to_string(),
            kicked,
        })
    }

    /// Lift a ban and tell everyone.
    pub async fn unban(&self, username: &str) -> Result<ModerationOutcome> {
        if !self.store.unban(username).await? {
            warn!(%username, "unban: not banned");
            return Ok(ModerationOutcome::NotBanned {
                username: username.to_string(),
            });
        }

        info!(%username, "Unbanned");
        self.broadcaster
            .notice(&format!("user {username} has been unbanned."))
            .await;
        Ok(ModerationOutcome::Unbanned {
            username: username.to_string(),
        })
    }

    /// Announce to one channel.
    pub async fn say(&self, channel: Channel, text: &str) -> ModerationOutcome {
        let report = self.broadcaster.announce(channel, text).await;
        ModerationOutcome::Broadcast {
            delivered: report.delivered,
        }
    }

    /// Send a server notice to everyone.
    pub async fn notice(&self, text: &str) -> ModerationOutcome {
        let report = self.broadcaster.notice(text).await;
        ModerationOutcome::Broadcast {
            delivered: report.delivered,
        }
    }

    pub async fn who(&self) -> ModerationOutcome {
        ModerationOutcome::Sessions(self.registry.list().await)
    }

    /// Stop the accept loop and close every session.
    pub async fn shutdown(&self) -> ModerationOutcome {
        info!("Shutdown requested");
        self.shutdown.cancel();

        let handles = self.registry.drain().await;
        for handle in &handles {
            handle.close();
        }
        ModerationOutcome::ShutDown {
            closed: handles.len(),
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Run a parsed command.
    pub async fn execute(&self, command: AdminCommand) -> Result<ModerationOutcome> {
        Ok(match command {
            AdminCommand::Kick(username) => self.kick(&username).await,
            AdminCommand::Ban(username) => self.ban(&username).await?,
            AdminCommand::Unban(username) => self.unban(&username).await?,
            AdminCommand::Shutdown => self.shutdown().await,
            AdminCommand::Say { channel, text } => self.say(channel, &text).await,
            AdminCommand::Notice(text) => self.notice(&text).await,
            AdminCommand::Who => self.who().await,
            AdminCommand::Help => ModerationOutcome::Help(format_help()),
        })
    }
}
