//! History replay for joining sessions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{error, warn};

use crate::protocol::HistoryEntry;
use crate::store::{ChatStore, StoredMessage};

/// Display format of history timestamps.
const TIME_FORMAT: &str = "%H:%M";

/// Renders the message log as history lines.
#[derive(Clone)]
pub struct HistoryReplay {
    store: Arc<dyn ChatStore>,
    timezone: Tz,
}

impl HistoryReplay {
    pub fn new(store: Arc<dyn ChatStore>, timezone: Tz) -> Self {
        Self { store, timezone }
    }

    /// Build from a timezone name, falling back to UTC if it is unknown.
    pub fn with_timezone_name(store: Arc<dyn ChatStore>, timezone: &str) -> Self {
        let timezone = timezone.parse().unwrap_or_else(|_| {
            warn!("Unknown timezone {:?}, using UTC", timezone);
            Tz::UTC
        });
        Self::new(store, timezone)
    }

    /// Every logged message as a history line, oldest first.
    ///
    /// A storage failure is logged and yields no history; the join goes on.
    pub async fn lines(&self) -> Vec<String> {
        match self.store.fetch_history().await {
            Ok(messages) => self.render(&messages),
            Err(e) => {
                error!("Failed to load message history: {}", e);
                Vec::new()
            }
        }
    }

    /// Render messages in the order given.
    pub fn render(&self, messages: &[StoredMessage]) -> Vec<String> {
        messages
            .iter()
            .map(|m| {
                HistoryEntry::format_line(
                    &self.format_time(&m.timestamp),
                    &m.username,
                    &m.channel,
                    &m.content,
                )
            })
            .collect()
    }

    fn format_time(&self, timestamp: &DateTime<Utc>) -> String {
        timestamp
            .with_timezone(&self.timezone)
            .format(TIME_FORMAT)
            .to_string()
    }
}
