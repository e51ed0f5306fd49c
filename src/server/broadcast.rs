//! Fan-out of records to every registered session.
//!
//! Channels are tags, not subscriptions: every record goes to every session,
//! sender included. Events for the operator console go out on a tokio
//! broadcast channel.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::registry::SessionRegistry;
use super::session::DeliveryError;
use crate::protocol::{
    announcement_record, notice_record, Channel, ChatRecord, ClientRecord, Outbound,
};
use crate::store::ChatStore;

/// Maximum number of events buffered for slow console subscribers.
const EVENT_CAPACITY: usize = 256;

/// Something the operator console may want to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    SessionJoined {
        id: Uuid,
        username: String,
        peer_addr: SocketAddr,
    },
    SessionLeft {
        id: Uuid,
        username: String,
    },
    MessageReceived {
        username: String,
        channel: String,
        content: String,
    },
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Delivers records to every session and logs chat messages.
#[derive(Clone)]
pub struct Broadcaster {
    registry: SessionRegistry,
    store: Arc<dyn ChatStore>,
    events: broadcast::Sender<ServerEvent>,
}

impl Broadcaster {
    pub fn new(registry: SessionRegistry, store: Arc<dyn ChatStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry,
            store,
            events,
        }
    }

    /// Get a receiver for server events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Publish an event. Having no subscriber is fine.
    pub fn emit(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }

    /// Queue a record on every registered session.
    ///
    /// A failure for one recipient never stops delivery to the others. A
    /// recipient whose queue is full is told to close; its handler then
    /// unregisters it.
    pub async fn fan_out(&self, record: &str) -> FanOutReport {
        let mut report = FanOutReport::default();

        for handle in self.registry.snapshot().await {
            match handle.deliver(Outbound::Record(record.to_string())) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::QueueFull) => {
                    warn!(
                        session = %handle.id(),
                        username = %handle.username(),
                        "Outbound queue full, closing slow session"
                    );
                    handle.close();
                    report.failed += 1;
                }
                Err(DeliveryError::Closed) => {
                    debug!(session = %handle.id(), "Skipping closed session");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Broadcast a chat record from `username` and log it.
    ///
    /// The message is persisted exactly once, after delivery. A storage
    /// failure is logged; delivery has already happened.
    pub async fn broadcast_chat(&self, username: &str, record: &ClientRecord) -> FanOutReport {
        let chat = ChatRecord::from_client(username, record);
        let report = self.fan_out(&chat.to_wire()).await;

        if let Err(e) = self
            .store
            .persist_message(&chat.username, &chat.channel, &chat.content, Utc::now())
            .await
        {
            error!(username = %chat.username, "Failed to persist message: {}", e);
        }

        self.emit(ServerEvent::MessageReceived {
            username: chat.username,
            channel: chat.channel,
            content: chat.content,
        });

        report
    }

    /// Send `Server: <text>` to every session.
    pub async fn notice(&self, text: &str) -> FanOutReport {
        self.fan_out(&notice_record(text)).await
    }

    /// Send `<channel>: <text>` to every session. Not logged.
    pub async fn announce(&self, channel: Channel, text: &str) -> FanOutReport {
        self.fan_out(&announcement_record(channel, text)).await
    }
}
