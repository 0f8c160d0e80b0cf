// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Relay Engine
//!
//! Drives one connection from handshake to teardown. Every accepted socket
//! gets its own task running [`run_session`]; all cross-session traffic goes
//! through the shared [`ClientRegistry`].

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::cipher::{self, SymmetricKey};
use crate::envelope;
use crate::frame::{read_frame, FrameReadError};
use crate::handshake::ServerHandshake;
use crate::keys::ServerKeyPair;
use crate::metrics::RelayMetrics;
use crate::payload::Payload;
use crate::registry::{ClientRegistry, Session};

/// Why an inbound envelope was dropped. None of these end the session.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("integrity tag mismatch")]
    Integrity,

    #[error("undecodable payload: {0}")]
    Decode(String),
}

/// Shared dependencies handed to every connection task.
pub struct ConnectionDeps<W> {
    pub registry: Arc<ClientRegistry<W>>,
    pub keypair: Arc<ServerKeyPair>,
    pub metrics: RelayMetrics,
    pub max_frame_size: usize,
}

impl<W> Clone for ConnectionDeps<W> {
    fn clone(&self) -> Self {
        ConnectionDeps {
            registry: self.registry.clone(),
            keypair: self.keypair.clone(),
            metrics: self.metrics.clone(),
            max_frame_size: self.max_frame_size,
        }
    }
}

/// Checks and opens one steady-state envelope.
pub fn inspect_frame(frame: &[u8], key: SymmetricKey) -> Result<Payload, FrameError> {
    let text = std::str::from_utf8(frame).map_err(|e| FrameError::Malformed(e.to_string()))?;
    let unwrapped = envelope::unwrap(text).map_err(|e| FrameError::Malformed(e.to_string()))?;
    if !unwrapped.tag_valid {
        return Err(FrameError::Integrity);
    }
    let json =
        cipher::decrypt(unwrapped.ciphertext, key).map_err(|e| FrameError::Decode(e.to_string()))?;
    Payload::from_json(&json).map_err(|e| FrameError::Decode(e.to_string()))
}

/// Splits a TCP stream and runs the session on it.
pub async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    deps: ConnectionDeps<OwnedWriteHalf>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", remote_addr, e);
    }
    let (reader, writer) = stream.into_split();
    run_session(reader, writer, remote_addr, deps).await;
}

/// Handshake, relay loop, teardown.
pub async fn run_session<R, W>(
    mut reader: R,
    mut writer: W,
    remote_addr: SocketAddr,
    deps: ConnectionDeps<W>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    let ConnectionDeps {
        registry,
        keypair,
        metrics,
        max_frame_size,
    } = deps;

    let mut handshake = ServerHandshake::new(&keypair, remote_addr, max_frame_size);
    let joined = match handshake.run(&mut reader, &mut writer).await {
        Ok(joined) => joined,
        Err(e) => {
            warn!("Handshake with {} failed: {}", remote_addr, e);
            metrics.handshake_failures.inc();
            let _ = writer.shutdown().await;
            return;
        }
    };

    let session = Session::new(remote_addr, joined.name, joined.key, writer);
    let id = session.id;
    let label = session.label();
    let name = session.name.clone();
    let key = session.key;

    registry.register(session).await;
    metrics.sessions_active.inc();
    info!("[{}] {} joined from {}", label, name, remote_addr);
    metrics.record_delivery(registry.broadcast_user_list().await);

    loop {
        let frame = match read_frame(&mut reader, max_frame_size).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("[{}] Connection closed by peer", label);
                break;
            }
            Err(FrameReadError::TooLarge { len, max }) => {
                warn!("[{}] Dropped oversized frame ({} > {} bytes)", label, len, max);
                metrics.integrity_failures.inc();
                continue;
            }
            Err(FrameReadError::Io(e)) => {
                debug!("[{}] Read failed: {}", label, e);
                break;
            }
        };
        metrics.frames_received.inc();

        match inspect_frame(&frame, key) {
            Ok(Payload::Msg { text, .. }) => {
                debug!("[{}] Relaying message ({} chars)", label, text.len());
                let delivery = registry
                    .broadcast(&Payload::relayed(name.as_str(), text), Some(id))
                    .await;
                metrics.messages_relayed.inc();
                metrics.record_delivery(delivery);
            }
            Ok(Payload::Leave) => {
                debug!("[{}] Leave requested", label);
                break;
            }
            Ok(other) => {
                warn!("[{}] Ignoring unrecognized {} payload", label, other.kind());
                metrics.unknown_payloads.inc();
            }
            Err(e @ (FrameError::Malformed(_) | FrameError::Integrity)) => {
                warn!("[{}] Dropped frame: {}", label, e);
                metrics.integrity_failures.inc();
            }
            Err(e @ FrameError::Decode(_)) => {
                warn!("[{}] Dropped frame: {}", label, e);
                metrics.decode_failures.inc();
            }
        }
    }

    if let Some(mut session) = registry.unregister(id).await {
        let _ = session.sink.shutdown().await;
        metrics.sessions_active.dec();
    }
    info!("[{}] {} left", label, name);
    metrics.record_delivery(registry.broadcast_user_list().await);
}
