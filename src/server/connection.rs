//! Per-connection handler: handshake, ban check, history, receive loop.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::broadcast::ServerEvent;
use super::session::ServerSession;
use super::ServerContext;
use crate::protocol::{parse_handshake, ClientRecord, Frame, FrameCodec, Outbound};
use crate::{ChatterboxError, Result};

type Reader = FramedRead<OwnedReadHalf, FrameCodec>;
type Writer = FramedWrite<OwnedWriteHalf, FrameCodec>;

/// Serve one accepted connection until it closes, is kicked, or the server
/// shuts down.
pub async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, ctx: ServerContext) {
    let mut session = ServerSession::new(peer_addr);
    let closer = ctx.shutdown.child_token();

    let (read_half, write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, FrameCodec::new(ctx.framing));
    let sink = FramedWrite::new(write_half, FrameCodec::new(ctx.framing));

    let username = match read_handshake(&mut frames, &closer, &ctx).await {
        Ok(username) => username,
        Err(e) => {
            info!(%peer_addr, "Handshake failed: {}", e);
            return;
        }
    };
    session.authenticate(username.clone());

    if is_refused(&ctx, &username, peer_addr).await {
        session.close();
        return;
    }

    // History goes into the queue before the session is registered, so it
    // precedes every live record. The writer starts only once registration
    // has stuck.
    let (tx, rx) = mpsc::channel(ctx.outbound_queue_size);
    let lines = ctx.history.lines().await;
    if !lines.is_empty() {
        debug!(%username, lines = lines.len(), "Replaying history");
        if tx.send(Outbound::History(lines)).await.is_err() {
            warn!(%username, "Outbound queue gone before history was sent");
        }
    }

    let Some(handle) = session.handle(tx, closer.clone()) else {
        return;
    };
    ctx.registry.insert(handle).await;

    // A ban stored while history was loading had nothing to kick yet.
    if is_refused(&ctx, &username, peer_addr).await {
        ctx.registry.remove(session.id()).await;
        closer.cancel();
        session.close();
        return;
    }

    let writer = tokio::spawn(write_loop(sink, rx, closer.clone()));
    session.activate();
    info!(session = %session.id(), %peer_addr, %username, "Session joined");
    ctx.broadcaster.emit(ServerEvent::SessionJoined {
        id: session.id(),
        username: username.clone(),
        peer_addr,
    });

    receive_loop(&mut frames, &closer, &ctx, &username).await;

    // Kick and shutdown have already unregistered the session.
    ctx.registry.remove(session.id()).await;
    closer.cancel();
    if let Err(e) = writer.await {
        warn!(%username, "Writer task failed: {}", e);
    }
    session.close();
    info!(session = %session.id(), %username, "Session left");
    ctx.broadcaster.emit(ServerEvent::SessionLeft {
        id: session.id(),
        username,
    });
}

/// Whether `username` must be turned away. Banned names and an unreachable
/// ban list both close without a reply.
async fn is_refused(ctx: &ServerContext, username: &str, peer_addr: SocketAddr) -> bool {
    match ctx.store.is_banned(username).await {
        Ok(false) => false,
        Ok(true) => {
            info!(%peer_addr, %username, "Refused banned user");
            true
        }
        Err(e) => {
            error!(%peer_addr, %username, "Ban check failed, refusing: {}", e);
            true
        }
    }
}

/// Read the first frame and return the username it carries.
async fn read_handshake(
    frames: &mut Reader,
    closer: &CancellationToken,
    ctx: &ServerContext,
) -> Result<String> {
    let next = tokio::select! {
        _ = closer.cancelled() => {
            return Err(ChatterboxError::Connection("server shutting down".to_string()));
        }
        next = tokio::time::timeout(ctx.handshake_timeout, frames.next()) => next,
    };

    match next {
        Err(_) => Err(ChatterboxError::Connection(format!(
            "no handshake within {:?}",
            ctx.handshake_timeout
        ))),
        Ok(None) => Err(ChatterboxError::Connection(
            "closed before handshake".to_string(),
        )),
        Ok(Some(Err(e))) => Err(ChatterboxError::Connection(e.to_string())),
        Ok(Some(Ok(Frame::Record(raw) | Frame::History(raw)))) => Ok(parse_handshake(&raw)?),
    }
}

async fn receive_loop(
    frames: &mut Reader,
    closer: &CancellationToken,
    ctx: &ServerContext,
    username: &str,
) {
    loop {
        let frame = tokio::select! {
            _ = closer.cancelled() => {
                debug!(%username, "Session closed by server");
                return;
            }
            frame = frames.next() => frame,
        };

        match frame {
            Some(Ok(Frame::Record(raw))) => match ClientRecord::parse(&raw) {
                Ok(record) => {
                    let report = ctx.broadcaster.broadcast_chat(username, &record).await;
                    debug!(
                        %username,
                        delivered = report.delivered,
                        failed = report.failed,
                        "Broadcast"
                    );
                }
                Err(e) => warn!(%username, "Dropping record: {}", e),
            },
            Some(Ok(Frame::History(_))) => {
                warn!(%username, "Dropping history line sent by client");
            }
            Some(Err(e)) => {
                debug!(%username, "Read error: {}", e);
                return;
            }
            None => {
                debug!(%username, "Peer closed connection");
                return;
            }
        }
    }
}

/// Drain the outbound queue into the socket until the session closes.
async fn write_loop(
    mut sink: Writer,
    mut rx: mpsc::Receiver<Outbound>,
    closer: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = closer.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        debug!("Write failed: {}", e);
                        // Let the reader side notice too.
                        closer.cancel();
                        break;
                    }
                }
                None => break,
            },
        }
    }
    let _ = sink.close().await;
}
