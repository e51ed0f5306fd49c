//! Chat client: connection, handshake, receive loop and typed events.
//!
//! The client reports everything through [`ClientEvent`]s on an unbounded
//! channel. Presentation code consumes the events and calls
//! [`Client::send`]; [`DisplayLine`] turns events into channel-tagged lines.

use std::sync::Arc;

use chrono::Local;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::protocol::{
    handshake_record, Channel, ClientRecord, Frame, FrameCodec, HistoryEntry, Incoming, Outbound,
    ProtocolError, SERVER_SENDER,
};
use crate::{ChatterboxError, Result};

type Writer = FramedWrite<OwnedWriteHalf, FrameCodec>;

/// Client connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    Disconnected,
    Connecting,
    /// Handshake sent.
    Connected,
    /// Connect or handshake failed. Terminal; there is no retry.
    Failed,
    /// Receive loop running.
    Receiving,
    Closed,
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    ConnectionFailed(String),
    /// A live record, unparsed.
    MessageReceived(String),
    /// A history line, trimmed.
    HistoryLineReceived(String),
    /// Emitted once when the receive loop ends.
    ConnectionClosed,
}

/// A chat client for one username.
pub struct Client {
    config: ClientConfig,
    username: String,
    events: mpsc::UnboundedSender<ClientEvent>,
    state: Arc<watch::Sender<ClientState>>,
    writer: Mutex<Option<Writer>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    closer: CancellationToken,
}

impl Client {
    /// Create a client and the receiver for its events.
    pub fn new(
        config: ClientConfig,
        username: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ClientState::Disconnected);
        let client = Self {
            config,
            username: username.into(),
            events,
            state: Arc::new(state),
            writer: Mutex::new(None),
            receiver: Mutex::new(None),
            closer: CancellationToken::new(),
        };
        (client, rx)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Watch state changes.
    pub fn watch_state(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    /// Connect, send the handshake and start the receive loop.
    ///
    /// On failure the client moves to [`ClientState::Failed`] and emits
    /// [`ClientEvent::ConnectionFailed`]; it does not retry.
    pub async fn connect(&self) -> Result<()> {
        if self.state() != ClientState::Disconnected {
            return Err(ChatterboxError::Connection(format!(
                "cannot connect from state {:?}",
                self.state()
            )));
        }
        self.state.send_replace(ClientState::Connecting);

        let address = self.config.address();
        let stream = match TcpStream::connect(&address).await {
            Ok(stream) => stream,
            Err(e) => return Err(self.fail(format!("cannot connect to {address}: {e}"))),
        };

        let (read_half, write_half) = stream.into_split();
        let mut writer = FramedWrite::new(write_half, FrameCodec::new(self.config.framing));
        if let Err(e) = writer
            .send(Outbound::Record(handshake_record(&self.username)))
            .await
        {
            return Err(self.fail(format!("handshake failed: {e}")));
        }

        info!(username = %self.username, %address, "Connected");
        *self.writer.lock().await = Some(writer);
        self.state.send_replace(ClientState::Connected);
        let _ = self.events.send(ClientEvent::Connected);

        let frames = FramedRead::new(read_half, FrameCodec::new(self.config.framing));
        let task = tokio::spawn(receive_loop(
            frames,
            self.events.clone(),
            self.state.clone(),
            self.closer.clone(),
        ));
        *self.receiver.lock().await = Some(task);
        Ok(())
    }

    fn fail(&self, reason: String) -> ChatterboxError {
        warn!(username = %self.username, "{}", reason);
        self.state.send_replace(ClientState::Failed);
        let _ = self.events.send(ClientEvent::ConnectionFailed(reason.clone()));
        ChatterboxError::Connection(reason)
    }

    /// Send `text` to `channel`.
    ///
    /// Line breaks become spaces so a message stays one record. Blank text
    /// is not sent.
    pub async fn send(&self, channel: Channel, text: &str) -> Result<()> {
        let text = text.replace(['\r', '\n'], " ");
        if text.trim().is_empty() {
            return Ok(());
        }

        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(ChatterboxError::Connection("not connected".to_string()));
        };
        let record = ClientRecord::new(channel, text);
        sink.send(Outbound::Record(record.to_wire()))
            .await
            .map_err(|e| ChatterboxError::Connection(e.to_string()))
    }

    /// Close the connection and wait for the receive loop to finish.
    pub async fn close(&self) {
        self.closer.cancel();
        if let Some(mut sink) = self.writer.lock().await.take() {
            let _ = sink.close().await;
        }
        if let Some(task) = self.receiver.lock().await.take() {
            let _ = task.await;
        }
        if self.state() == ClientState::Disconnected {
            self.state.send_replace(ClientState::Closed);
        }
    }
}

async fn receive_loop(
    mut frames: FramedRead<OwnedReadHalf, FrameCodec>,
    events: mpsc::UnboundedSender<ClientEvent>,
    state: Arc<watch::Sender<ClientState>>,
    closer: CancellationToken,
) {
    state.send_replace(ClientState::Receiving);

    loop {
        let frame = tokio::select! {
            _ = closer.cancelled() => break,
            frame = frames.next() => frame,
        };
        let event = match frame {
            Some(Ok(Frame::Record(raw))) => ClientEvent::MessageReceived(raw),
            Some(Ok(Frame::History(line))) => ClientEvent::HistoryLineReceived(line),
            Some(Err(e)) => {
                warn!("Receive failed: {}", e);
                break;
            }
            None => {
                debug!("Server closed the connection");
                break;
            }
        };
        if events.send(event).is_err() {
            debug!("Event receiver dropped");
            break;
        }
    }

    state.send_replace(ClientState::Closed);
    let _ = events.send(ClientEvent::ConnectionClosed);
}

/// A line ready for display, tagged with the channel it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayLine {
    /// `None` for lines shown in every channel.
    pub channel: Option<Channel>,
    pub text: String,
}

impl DisplayLine {
    /// Format a live record received at `time` (`HH:MM`).
    pub fn from_live(raw: &str, time: &str) -> std::result::Result<Self, ProtocolError> {
        Ok(match Incoming::parse(raw)? {
            Incoming::Chat {
                username,
                channel,
                content,
            } => Self {
                channel: Some(channel),
                text: format!("{time} - {username}: {content}"),
            },
            Incoming::Notice { content } => Self {
                channel: None,
                text: format!("{time} - {SERVER_SENDER}: {content}"),
            },
            Incoming::Announcement { channel, content } => Self {
                channel: Some(channel),
                text: format!("{time} - {SERVER_SENDER}: {content}"),
            },
        })
    }

    /// Format a history line; its own timestamp is kept.
    pub fn from_history(line: &str) -> std::result::Result<Self, ProtocolError> {
        let entry = HistoryEntry::parse(line)?;
        Ok(Self {
            channel: Some(entry.channel),
            text: format!("{} - {}: {}", entry.time, entry.username, entry.content),
        })
    }

    /// Format an event for display. Live records are stamped with the
    /// local time. Malformed records are logged and yield `None`.
    pub fn from_event(event: &ClientEvent) -> Option<Self> {
        let parsed = match event {
            ClientEvent::MessageReceived(raw) => {
                let time = Local::now().format("%H:%M").to_string();
                Self::from_live(raw, &time)
            }
            ClientEvent::HistoryLineReceived(line) => Self::from_history(line),
            _ => return None,
        };
        parsed
            .map_err(|e| warn!("Not displayed: {}", e))
            .ok()
    }
}
