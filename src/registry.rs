// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Client Registry
//!
//! Tracks every session that completed the handshake and owns the write half
//! of each connection. All server-to-client traffic goes through here.
//!
//! One `tokio::sync::Mutex` guards the session list. It is held for the whole
//! of a broadcast, including the socket writes, so the set of recipients
//! cannot change mid-broadcast. The cost is that one slow recipient stalls
//! every register/unregister until its write completes; this only scales to
//! small rooms.

use std::net::SocketAddr;

use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cipher::{self, SymmetricKey};
use crate::envelope;
use crate::frame::write_frame;
use crate::payload::Payload;

/// Identity of one accepted connection.
pub type ConnectionId = Uuid;

/// Server-side state for one joined client.
pub struct Session<W> {
    pub id: ConnectionId,
    pub remote_addr: SocketAddr,
    pub name: String,
    pub key: SymmetricKey,
    pub sink: W,
}

impl<W> Session<W> {
    pub fn new(remote_addr: SocketAddr, name: String, key: SymmetricKey, sink: W) -> Self {
        Session {
            id: Uuid::new_v4(),
            remote_addr,
            name,
            key,
            sink,
        }
    }

    /// Short label for log lines.
    pub fn label(&self) -> String {
        self.id.to_string()[..8].to_string()
    }
}

/// Encrypts `payload` under `key` and wraps it in a tagged envelope.
pub fn seal_payload(payload: &Payload, key: SymmetricKey) -> Result<String, serde_json::Error> {
    let json = payload.to_json()?;
    Ok(envelope::wrap(&cipher::encrypt(&json, key)))
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub sent: usize,
    pub failed: usize,
}

/// Thread-safe set of live sessions, in join order.
pub struct ClientRegistry<W> {
    sessions: Mutex<Vec<Session<W>>>,
}

impl<W> ClientRegistry<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new() -> Self {
        ClientRegistry {
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Adds a session and returns its id.
    pub async fn register(&self, session: Session<W>) -> ConnectionId {
        let id = session.id;
        let mut sessions = self.sessions.lock().await;
        sessions.push(session);
        debug!("Registered session ({} live)", sessions.len());
        id
    }

    /// Removes a session, handing back ownership of its sink so the caller
    /// can close it. Returns `None` if it was already removed.
    pub async fn unregister(&self, id: ConnectionId) -> Option<Session<W>> {
        let mut sessions = self.sessions.lock().await;
        let index = sessions.iter().position(|s| s.id == id)?;
        let session = sessions.remove(index);
        debug!("Unregistered session ({} live)", sessions.len());
        Some(session)
    }

    /// Names of all live sessions, in join order.
    pub async fn snapshot(&self) -> Vec<String> {
        let sessions = self.sessions.lock().await;
        sessions.iter().map(|s| s.name.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Sends `payload` to every session except `except`, encrypting it
    /// separately under each recipient's own key.
    ///
    /// A failed write is logged and does not stop delivery to the remaining
    /// sessions.
    pub async fn broadcast(&self, payload: &Payload, except: Option<ConnectionId>) -> Delivery {
        let mut sessions = self.sessions.lock().await;
        send_to_all(&mut sessions, payload, except).await
    }

    /// Sends the current name list to every session. The snapshot and the
    /// sends happen under a single lock acquisition.
    pub async fn broadcast_user_list(&self) -> Delivery {
        let mut sessions = self.sessions.lock().await;
        let users = Payload::users(sessions.iter().map(|s| s.name.clone()).collect());
        send_to_all(&mut sessions, &users, None).await
    }
}

impl<W> Default for ClientRegistry<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn default() -> Self {
        Self::new()
    }
}

async fn send_to_all<W>(
    sessions: &mut [Session<W>],
    payload: &Payload,
    except: Option<ConnectionId>,
) -> Delivery
where
    W: AsyncWrite + Unpin + Send,
{
    let mut delivery = Delivery::default();
    for session in sessions.iter_mut() {
        if Some(session.id) == except {
            continue;
        }
        let frame = match seal_payload(payload, session.key) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("[{}] Failed to encode {} payload: {}", session.label(), payload.kind(), e);
                delivery.failed += 1;
                continue;
            }
        };
        match write_frame(&mut session.sink, frame.as_bytes()).await {
            Ok(()) => delivery.sent += 1,
            Err(e) => {
                warn!("[{}] Failed to send {}: {}", session.label(), payload.kind(), e);
                delivery.failed += 1;
            }
        }
    }
    delivery
}
