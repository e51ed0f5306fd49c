//! TCP listener for the chat server.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::{ChatterboxError, Result};

/// Accepts TCP connections, at most `max_connections` at a time.
pub struct ChatListener {
    listener: TcpListener,
    semaphore: Arc<Semaphore>,
    max_connections: usize,
}

impl ChatListener {
    /// Bind to the configured host and port. Port 0 picks a free port.
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        info!("Chat server listening on {}", local_addr);

        Ok(Self {
            listener,
            semaphore: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Number of connections currently holding a slot.
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.semaphore.available_permits()
    }

    /// Wait for a free slot, then accept the next connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit)> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ChatterboxError::Connection("connection semaphore closed".to_string()))?;

        let (stream, addr) = self.listener.accept().await?;
        // Records are small and latency matters more than packet count.
        if let Err(e) = stream.set_nodelay(true) {
            warn!(%addr, "Could not disable Nagle: {}", e);
        }
        debug!("Accepted connection from {}", addr);

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }
}

/// A connection slot, released on drop.
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
