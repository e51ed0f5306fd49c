//! Chat server: accept loop, sessions, fan-out, history and moderation.

mod broadcast;
mod connection;
mod history;
mod listener;
mod moderation;
mod registry;
mod session;

pub use broadcast::{Broadcaster, FanOutReport, ServerEvent};
pub use connection::handle_connection;
pub use history::HistoryReplay;
pub use listener::{ChatListener, ConnectionPermit};
pub use moderation::{format_help, AdminCommand, CommandError, ModerationOutcome, Moderator};
pub use registry::SessionRegistry;
pub use session::{DeliveryError, ServerSession, SessionHandle, SessionInfo, SessionState};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast as tokio_broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::protocol::Framing;
use crate::store::ChatStore;
use crate::Result;

/// Everything a connection handler needs, cheap to clone.
#[derive(Clone)]
pub struct ServerContext {
    pub framing: Framing,
    pub handshake_timeout: Duration,
    pub outbound_queue_size: usize,
    pub registry: SessionRegistry,
    pub broadcaster: Broadcaster,
    pub history: HistoryReplay,
    pub store: Arc<dyn ChatStore>,
    /// Parent of every session's close signal.
    pub shutdown: CancellationToken,
}

/// A bound chat server.
pub struct ChatServer {
    listener: ChatListener,
    ctx: ServerContext,
    moderator: Moderator,
}

impl ChatServer {
    /// Bind the listener and wire up the shared state.
    pub async fn bind(config: &ServerConfig, store: Arc<dyn ChatStore>) -> Result<Self> {
        let listener = ChatListener::bind(config).await?;

        let registry = SessionRegistry::new();
        let broadcaster = Broadcaster::new(registry.clone(), store.clone());
        let history = HistoryReplay::with_timezone_name(store.clone(), &config.timezone);
        let shutdown = CancellationToken::new();
        let moderator = Moderator::new(
            registry.clone(),
            broadcaster.clone(),
            store.clone(),
            shutdown.clone(),
        );

        let ctx = ServerContext {
            framing: config.framing,
            handshake_timeout: Duration::from_secs(config.handshake_timeout_secs),
            outbound_queue_size: config.outbound_queue_size,
            registry,
            broadcaster,
            history,
            store,
            shutdown,
        };

        Ok(Self {
            listener,
            ctx,
            moderator,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> SessionRegistry {
        self.ctx.registry.clone()
    }

    pub fn broadcaster(&self) -> Broadcaster {
        self.ctx.broadcaster.clone()
    }

    /// Operator interface. Clone it before calling [`run`](Self::run).
    pub fn moderator(&self) -> Moderator {
        self.moderator.clone()
    }

    /// Subscribe to server events.
    pub fn subscribe(&self) -> tokio_broadcast::Receiver<ServerEvent> {
        self.ctx.broadcaster.subscribe()
    }

    /// Accept connections until shutdown, then close every session, drop
    /// the listener and wait for the handlers to finish.
    pub async fn run(self) -> Result<()> {
        let ChatServer { listener, ctx, .. } = self;
        let tracker = TaskTracker::new();

        loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr, permit)) => {
                        let ctx = ctx.clone();
                        tracker.spawn(async move {
                            handle_connection(stream, addr, ctx).await;
                            drop(permit);
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
            }
        }

        for handle in ctx.registry.drain().await {
            handle.close();
        }
        drop(listener);
        info!("Listener closed");

        tracker.close();
        tracker.wait().await;
        info!("All sessions closed");
        Ok(())
    }
}
