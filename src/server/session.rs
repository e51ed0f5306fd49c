//! Server-side session state and the handle the registry keeps for it.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::Outbound;

/// Lifecycle of a server-side session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Accepted, nothing read yet.
    #[default]
    Connecting,
    /// Handshake received, ban check and history pending.
    Authenticating,
    /// Registered and receiving chat records.
    Active,
    /// Socket closed; terminal.
    Closed,
}

impl SessionState {
    fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticating) | (Authenticating, Active) | (_, Closed)
        ) && self != Closed
    }
}

/// A connected peer, owned by its connection handler task.
#[derive(Debug)]
pub struct ServerSession {
    id: Uuid,
    peer_addr: SocketAddr,
    state: SessionState,
    username: Option<String>,
    connected_at: DateTime<Utc>,
}

impl ServerSession {
    pub fn new(peer_addr: SocketAddr) -> Self {
        let id = Uuid::new_v4();
        debug!("Created new session {} for {}", id, peer_addr);
        Self {
            id,
            peer_addr,
            state: SessionState::Connecting,
            username: None,
            connected_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Record the handshake username and move to `Authenticating`.
    ///
    /// The username is set once; later calls are ignored.
    pub fn authenticate(&mut self, username: String) {
        if self.username.is_some() {
            warn!(session = %self.id, "username already set, ignoring");
            return;
        }
        self.username = Some(username);
        self.advance(SessionState::Authenticating);
    }

    /// Move to `Active`.
    pub fn activate(&mut self) {
        self.advance(SessionState::Active);
    }

    /// Move to `Closed`.
    pub fn close(&mut self) {
        self.advance(SessionState::Closed);
    }

    fn advance(&mut self, next: SessionState) {
        if self.state.can_advance_to(next) {
            debug!(session = %self.id, "{:?} -> {:?}", self.state, next);
            self.state = next;
        } else {
            warn!(session = %self.id, "ignored transition {:?} -> {:?}", self.state, next);
        }
    }

    /// Build the registry handle for this session.
    ///
    /// Returns `None` before the handshake has set a username.
    pub fn handle(
        &self,
        outbound: mpsc::Sender<Outbound>,
        closer: CancellationToken,
    ) -> Option<SessionHandle> {
        Some(SessionHandle {
            id: self.id,
            peer_addr: self.peer_addr,
            username: self.username.clone()?,
            connected_at: self.connected_at,
            outbound,
            closer,
        })
    }
}

/// Why a record could not be queued for a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("outbound queue full")]
    QueueFull,
    #[error("session closed")]
    Closed,
}

/// What the registry holds for a session: its identity, its outbound queue
/// and the signal that closes it. The socket itself stays with the handler.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    peer_addr: SocketAddr,
    username: String,
    connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Outbound>,
    closer: CancellationToken,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Queue a frame without waiting.
    pub fn deliver(&self, frame: Outbound) -> Result<(), DeliveryError> {
        if self.closer.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Signal the handler to close the socket.
    pub fn close(&self) {
        self.closer.cancel();
    }

    pub fn is_open(&self) -> bool {
        !self.closer.is_cancelled() && !self.outbound.is_closed()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            peer_addr: self.peer_addr,
            username: self.username.clone(),
            connected_at: self.connected_at,
        }
    }
}

/// Information about a session for external queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: Uuid,
    pub peer_addr: SocketAddr,
    pub username: String,
    pub connected_at: DateTime<Utc>,
}
