//! Test helpers for end-to-end tests.
//!
//! Provides TestServer, a chat server on an ephemeral port backed by an
//! in-memory store, and TestClient, a raw wire-level client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::codec::FramedRead;

use chatterbox::config::{ClientConfig, ServerConfig};
use chatterbox::db::MessageRepository;
use chatterbox::protocol::{Frame, FrameCodec};
use chatterbox::server::{Broadcaster, SessionRegistry};
use chatterbox::{
    ChatServer, ChatStore, Framing, Moderator, ServerEvent, SqliteStore, StoredMessage,
};

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to watch a connection before deciding nothing more arrives.
pub const QUIET_PERIOD: Duration = Duration::from_millis(200);

/// A chat server running on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<SqliteStore>,
    pub registry: SessionRegistry,
    pub moderator: Moderator,
    broadcaster: Broadcaster,
    handle: Option<JoinHandle<chatterbox::Result<()>>>,
    framing: Framing,
}

impl TestServer {
    /// Start a server with default settings.
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start a server after adjusting its configuration.
    pub async fn start_with(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        Self::start_with_store(store, configure).await
    }

    /// Start a server whose history loads take `delay`.
    pub async fn start_with_history_delay(delay: Duration) -> Self {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let backend = Arc::new(SlowHistoryStore {
            inner: store.clone(),
            delay,
        });
        Self::launch(store, backend, |_| {}).await
    }

    /// Start a server over an existing store.
    pub async fn start_with_store(
        store: Arc<SqliteStore>,
        configure: impl FnOnce(&mut ServerConfig),
    ) -> Self {
        Self::launch(store.clone(), store, configure).await
    }

    async fn launch(
        store: Arc<SqliteStore>,
        backend: Arc<dyn ChatStore>,
        configure: impl FnOnce(&mut ServerConfig),
    ) -> Self {
        let mut config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        configure(&mut config);

        let server = ChatServer::bind(&config, backend).await.unwrap();
        let addr = server.local_addr().unwrap();
        let registry = server.registry();
        let moderator = server.moderator();
        let broadcaster = server.broadcaster();
        let handle = tokio::spawn(server.run());

        Self {
            addr,
            store,
            registry,
            moderator,
            broadcaster,
            handle: Some(handle),
            framing: config.framing,
        }
    }

    /// Subscribe to server events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.broadcaster.subscribe()
    }

    /// Client settings pointing at this server.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            framing: self.framing,
        }
    }

    /// Open a raw connection speaking this server's framing.
    pub async fn connect(&self) -> TestClient {
        TestClient::connect(self.addr, self.framing).await.unwrap()
    }

    /// Connect, send the handshake and wait until the session is registered.
    pub async fn join(&self, username: &str) -> TestClient {
        let before = self.registry.find_by_username(username).await.len();
        let mut client = self.connect().await;
        client.handshake(username).await;
        assert!(
            self.wait_for(|| async move {
                self.registry.find_by_username(username).await.len() > before
            })
            .await,
            "{username} was never registered"
        );
        client
    }

    /// Poll until a session named `username` is registered.
    pub async fn wait_for_user(&self, username: &str) -> bool {
        self.wait_for(|| async move { self.registry.is_user_connected(username).await })
            .await
    }

    /// Poll until `n` sessions are registered.
    pub async fn wait_for_sessions(&self, n: usize) -> bool {
        self.wait_for(|| async move { self.registry.count().await == n })
            .await
    }

    /// Poll until `n` messages are stored.
    pub async fn wait_for_messages(&self, n: usize) -> bool {
        self.wait_for(|| async move {
            MessageRepository::new(self.store.database().pool())
                .count()
                .await
                .unwrap_or(-1)
                == n as i64
        })
        .await
    }

    async fn wait_for<F, Fut>(&self, mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = Instant::now() + DEFAULT_TIMEOUT;
        while Instant::now() < deadline {
            if check().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Shut down and wait for the accept loop to return.
    pub async fn stop(&mut self) {
        self.moderator.shutdown().await;
        self.wait_stopped().await;
    }

    /// Wait for the accept loop to return after a shutdown.
    pub async fn wait_stopped(&mut self) {
        if let Some(handle) = self.handle.take() {
            timeout(DEFAULT_TIMEOUT, handle)
                .await
                .expect("server did not stop")
                .unwrap()
                .unwrap();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Delegates to a [`SqliteStore`], sleeping before every history fetch.
struct SlowHistoryStore {
    inner: Arc<SqliteStore>,
    delay: Duration,
}

#[async_trait]
impl ChatStore for SlowHistoryStore {
    async fn verify_credentials(&self, username: &str, password: &str) -> chatterbox::Result<bool> {
        self.inner.verify_credentials(username, password).await
    }

    async fn create_account(&self, username: &str, password: &str) -> chatterbox::Result<()> {
        self.inner.create_account(username, password).await
    }

    async fn is_banned(&self, username: &str) -> chatterbox::Result<bool> {
        self.inner.is_banned(username).await
    }

    async fn ban(&self, username: &str) -> chatterbox::Result<bool> {
        self.inner.ban(username).await
    }

    async fn unban(&self, username: &str) -> chatterbox::Result<bool> {
        self.inner.unban(username).await
    }

    async fn persist_message(
        &self,
        username: &str,
        channel: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> chatterbox::Result<()> {
        self.inner
            .persist_message(username, channel, content, timestamp)
            .await
    }

    async fn fetch_history(&self) -> chatterbox::Result<Vec<StoredMessage>> {
        sleep(self.delay).await;
        self.inner.fetch_history().await
    }
}

/// A wire-level client.
pub struct TestClient {
    reader: FramedRead<OwnedReadHalf, FrameCodec>,
    writer: OwnedWriteHalf,
    framing: Framing,
}

impl TestClient {
    /// Connect to the server at the given address.
    pub async fn connect(addr: SocketAddr, framing: Framing) -> Result<Self, std::io::Error> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: FramedRead::new(read_half, FrameCodec::new(framing)),
            writer: write_half,
            framing,
        })
    }

    /// Write bytes as-is.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Write one record, terminated the way the framing expects.
    pub async fn send_record(&mut self, record: &str) {
        match self.framing {
            Framing::Lines => self.send_raw(format!("{record}\n").as_bytes()).await,
            Framing::Legacy => self.send_raw(record.as_bytes()).await,
        }
    }

    pub async fn handshake(&mut self, username: &str) {
        self.send_record(&format!("Username:{username}")).await;
    }

    /// Send a chat record.
    pub async fn say(&mut self, channel: &str, content: &str) {
        self.send_record(&format!("{channel}:{content}")).await;
    }

    /// Next frame, or `None` when the server closed the connection.
    /// Panics on timeout.
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        match timeout(DEFAULT_TIMEOUT, self.reader.next()).await {
            Ok(Some(Ok(frame))) => Some(frame),
            Ok(Some(Err(_))) | Ok(None) => None,
            Err(_) => panic!("no frame within {DEFAULT_TIMEOUT:?}"),
        }
    }

    /// Next frame, expected to be a live record.
    pub async fn recv_record(&mut self) -> String {
        match self.recv_frame().await {
            Some(Frame::Record(record)) => record,
            other => panic!("expected a record, got {other:?}"),
        }
    }

    /// Next frame, expected to be a history line.
    pub async fn recv_history(&mut self) -> String {
        match self.recv_frame().await {
            Some(Frame::History(line)) => line,
            other => panic!("expected a history line, got {other:?}"),
        }
    }

    /// Whether the server closes the connection, skipping any frames
    /// still in flight.
    pub async fn expect_closed(&mut self) -> bool {
        let deadline = Instant::now() + DEFAULT_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.reader.next()).await {
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(_))) | Ok(None) => return true,
                Err(_) => return false,
            }
        }
    }

    /// Whether the connection stays open and silent for a short while.
    pub async fn expect_silence(&mut self) -> bool {
        timeout(QUIET_PERIOD, self.reader.next()).await.is_err()
    }
}
