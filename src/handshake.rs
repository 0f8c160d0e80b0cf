// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Session Handshake
//!
//! Wire order, one frame each:
//!
//! ```text
//! server -> client   public key (PEM text)
//! client -> server   sealed decimal session key (raw bytes, no envelope)
//! client -> server   envelope carrying {"type":"join","name":...}
//! ```
//!
//! Server state: `AwaitingKey -> AwaitingJoin -> Active`, or `Closed` on any
//! failure. A failed handshake never leaves anything in the registry, since
//! registration only happens after [`ServerHandshake::receive_join`] succeeds.

use std::fmt;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::cipher::{self, CipherError, SymmetricKey};
use crate::envelope::{self, EnvelopeError};
use crate::frame::{read_frame, write_frame, FrameReadError};
use crate::keys::{self, KeyError, ServerKeyPair};
use crate::payload::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingKey,
    AwaitingJoin,
    Active,
    Closed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::AwaitingKey => "awaiting-key",
            HandshakeState::AwaitingJoin => "awaiting-join",
            HandshakeState::Active => "active",
            HandshakeState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("connection closed during handshake")]
    Closed,

    #[error("frame error: {0}")]
    Frame(#[from] FrameReadError),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("key material: {0}")]
    Key(#[from] KeyError),

    #[error("session key is not a number in 1-255")]
    InvalidSessionKey,

    #[error("malformed join envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("join envelope failed integrity check")]
    IntegrityMismatch,

    #[error("join payload could not be decrypted: {0}")]
    Cipher(#[from] CipherError),

    #[error("join payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected join payload, got {0}")]
    UnexpectedPayload(&'static str),

    #[error("handshake called out of order (state {0})")]
    OutOfOrder(HandshakeState),

    #[error("no system randomness for session key")]
    Random,
}

/// Outcome of a completed server-side handshake.
#[derive(Debug, Clone)]
pub struct Joined {
    pub key: SymmetricKey,
    pub name: String,
}

/// Server side of the handshake for one connection.
pub struct ServerHandshake<'a> {
    keypair: &'a ServerKeyPair,
    remote_addr: SocketAddr,
    max_frame_size: usize,
    state: HandshakeState,
    key: Option<SymmetricKey>,
}

impl<'a> ServerHandshake<'a> {
    pub fn new(keypair: &'a ServerKeyPair, remote_addr: SocketAddr, max_frame_size: usize) -> Self {
        ServerHandshake {
            keypair,
            remote_addr,
            max_frame_size,
            state: HandshakeState::AwaitingKey,
            key: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Runs all steps. On error the state is left at `Closed`.
    pub async fn run<R, W>(&mut self, reader: &mut R, writer: &mut W) -> Result<Joined, HandshakeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let result: Result<Joined, HandshakeError> = async {
            self.send_public_key(writer).await?;
            self.receive_key(reader).await?;
            self.receive_join(reader).await
        }
        .await;
        if result.is_err() {
            self.state = HandshakeState::Closed;
        }
        result
    }

    /// Step 1: publish the relay's public key.
    pub async fn send_public_key<W>(&mut self, writer: &mut W) -> Result<(), HandshakeError>
    where
        W: AsyncWrite + Unpin,
    {
        self.expect_state(HandshakeState::AwaitingKey)?;
        write_frame(writer, self.keypair.public_key_pem().as_bytes()).await?;
        Ok(())
    }

    /// Step 3: open the sealed session key.
    pub async fn receive_key<R>(&mut self, reader: &mut R) -> Result<SymmetricKey, HandshakeError>
    where
        R: AsyncRead + Unpin,
    {
        self.expect_state(HandshakeState::AwaitingKey)?;
        let sealed = read_frame(reader, self.max_frame_size)
            .await?
            .ok_or(HandshakeError::Closed)?;
        let opened = self.keypair.open(&sealed)?;
        let key = std::str::from_utf8(&opened)
            .ok()
            .and_then(SymmetricKey::from_decimal)
            .ok_or(HandshakeError::InvalidSessionKey)?;

        self.key = Some(key);
        self.state = HandshakeState::AwaitingJoin;
        Ok(key)
    }

    /// Step 4: verify and decode the join envelope.
    pub async fn receive_join<R>(&mut self, reader: &mut R) -> Result<Joined, HandshakeError>
    where
        R: AsyncRead + Unpin,
    {
        self.expect_state(HandshakeState::AwaitingJoin)?;
        let key = self.key.ok_or(HandshakeError::OutOfOrder(self.state))?;

        let frame = read_frame(reader, self.max_frame_size)
            .await?
            .ok_or(HandshakeError::Closed)?;
        let text = String::from_utf8(frame).map_err(CipherError::Utf8)?;
        let unwrapped = envelope::unwrap(&text)?;
        if !unwrapped.tag_valid {
            return Err(HandshakeError::IntegrityMismatch);
        }

        let json = cipher::decrypt(unwrapped.ciphertext, key)?;
        let name = match Payload::from_json(&json)? {
            Payload::Join { name } => name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| self.remote_addr.to_string()),
            other => return Err(HandshakeError::UnexpectedPayload(other.kind())),
        };

        self.state = HandshakeState::Active;
        Ok(Joined { key, name })
    }

    fn expect_state(&self, expected: HandshakeState) -> Result<(), HandshakeError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(HandshakeError::OutOfOrder(self.state))
        }
    }
}

/// Client side: read the relay key, deliver a fresh session key, send `join`.
///
/// Returns the session key the caller must use for all later envelopes.
pub async fn initiate<R, W>(
    reader: &mut R,
    writer: &mut W,
    name: Option<&str>,
    max_frame_size: usize,
) -> Result<SymmetricKey, HandshakeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let pem = read_frame(reader, max_frame_size)
        .await?
        .ok_or(HandshakeError::Closed)?;
    let pem = String::from_utf8(pem)
        .map_err(|e| KeyError::InvalidPem(e.to_string()))?;
    let server_public = keys::parse_public_key_pem(&pem)?;

    let key = SymmetricKey::random().map_err(|_| HandshakeError::Random)?;
    let sealed = keys::seal(key.to_decimal().as_bytes(), &server_public)?;
    write_frame(writer, &sealed).await?;

    let join = Payload::join(name).to_json()?;
    let frame = envelope::wrap(&cipher::encrypt(&join, key));
    write_frame(writer, frame.as_bytes()).await?;

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split};

    const MAX: usize = 64 * 1024;

    fn addr() -> SocketAddr {
        "10.0.0.7:40123".parse().unwrap()
    }

    /// Runs the client half by hand so each step can be corrupted.
    async fn client_send_key<R, W>(reader: &mut R, writer: &mut W, key_text: &str)
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let pem = read_frame(reader, MAX).await.unwrap().unwrap();
        let pem = String::from_utf8(pem).unwrap();
        let public = keys::parse_public_key_pem(&pem).unwrap();
        let sealed = keys::seal(key_text.as_bytes(), &public).unwrap();
        write_frame(writer, &sealed).await.unwrap();
    }

    #[tokio::test]
    async fn test_full_handshake() {
        let kp = ServerKeyPair::generate().unwrap();
        let (client, server) = duplex(4096);
        let (mut cr, mut cw) = split(client);
        let (mut sr, mut sw) = split(server);

        let client_task =
            tokio::spawn(async move { initiate(&mut cr, &mut cw, Some("alice"), MAX).await });

        let mut hs = ServerHandshake::new(&kp, addr(), MAX);
        let joined = hs.run(&mut sr, &mut sw).await.unwrap();
        let client_key = client_task.await.unwrap().unwrap();

        assert_eq!(hs.state(), HandshakeState::Active);
        assert_eq!(joined.name, "alice");
        assert_eq!(joined.key, client_key);
    }

    #[tokio::test]
    async fn test_missing_name_defaults_to_address() {
        let kp = ServerKeyPair::generate().unwrap();
        let (client, server) = duplex(4096);
        let (mut cr, mut cw) = split(client);
        let (mut sr, mut sw) = split(server);

        tokio::spawn(async move { initiate(&mut cr, &mut cw, None, MAX).await });

        let mut hs = ServerHandshake::new(&kp, addr(), MAX);
        let joined = hs.run(&mut sr, &mut sw).await.unwrap();
        assert_eq!(joined.name, "10.0.0.7:40123");
    }

    #[tokio::test]
    async fn test_empty_name_defaults_to_address() {
        let kp = ServerKeyPair::generate().unwrap();
        let (client, server) = duplex(4096);
        let (mut cr, mut cw) = split(client);
        let (mut sr, mut sw) = split(server);

        tokio::spawn(async move { initiate(&mut cr, &mut cw, Some(""), MAX).await });

        let mut hs = ServerHandshake::new(&kp, addr(), MAX);
        assert_eq!(hs.run(&mut sr, &mut sw).await.unwrap().name, "10.0.0.7:40123");
    }

    #[tokio::test]
    async fn test_join_with_wrong_tag_rejected() {
        let kp = ServerKeyPair::generate().unwrap();
        let (client, server) = duplex(4096);
        let (mut cr, mut cw) = split(client);
        let (mut sr, mut sw) = split(server);

        tokio::spawn(async move {
            client_send_key(&mut cr, &mut cw, "42").await;
            let key = SymmetricKey::new(42).unwrap();
            let ciphertext = cipher::encrypt(&Payload::join(Some("mallory")).to_json().unwrap(), key);
            // Tag computed over different bytes than the ones transmitted
            let tag = envelope::compute_tag("something else");
            let frame = format!("{}||{}", ciphertext, tag);
            write_frame(&mut cw, frame.as_bytes()).await.unwrap();
        });

        let mut hs = ServerHandshake::new(&kp, addr(), MAX);
        let result = hs.run(&mut sr, &mut sw).await;
        assert!(matches!(result, Err(HandshakeError::IntegrityMismatch)));
        assert_eq!(hs.state(), HandshakeState::Closed);
    }

    #[tokio::test]
    async fn test_malformed_join_envelope_rejected() {
        let kp = ServerKeyPair::generate().unwrap();
        let (client, server) = duplex(4096);
        let (mut cr, mut cw) = split(client);
        let (mut sr, mut sw) = split(server);

        tokio::spawn(async move {
            client_send_key(&mut cr, &mut cw, "42").await;
            write_frame(&mut cw, b"no delimiter here").await.unwrap();
        });

        let mut hs = ServerHandshake::new(&kp, addr(), MAX);
        assert!(matches!(
            hs.run(&mut sr, &mut sw).await,
            Err(HandshakeError::Envelope(EnvelopeError::Delimiter { found: 0 }))
        ));
    }

    #[tokio::test]
    async fn test_zero_session_key_rejected() {
        let kp = ServerKeyPair::generate().unwrap();
        let (client, server) = duplex(4096);
        let (mut cr, mut cw) = split(client);
        let (mut sr, mut sw) = split(server);

        tokio::spawn(async move {
            client_send_key(&mut cr, &mut cw, "0").await;
        });

        let mut hs = ServerHandshake::new(&kp, addr(), MAX);
        assert!(matches!(
            hs.run(&mut sr, &mut sw).await,
            Err(HandshakeError::InvalidSessionKey)
        ));
        assert_eq!(hs.state(), HandshakeState::Closed);
    }

    #[tokio::test]
    async fn test_garbage_key_block_rejected() {
        let kp = ServerKeyPair::generate().unwrap();
        let (client, server) = duplex(4096);
        let (mut cr, mut cw) = split(client);
        let (mut sr, mut sw) = split(server);

        tokio::spawn(async move {
            let _ = read_frame(&mut cr, MAX).await;
            write_frame(&mut cw, &[0xAB; 80]).await.unwrap();
        });

        let mut hs = ServerHandshake::new(&kp, addr(), MAX);
        assert!(matches!(
            hs.run(&mut sr, &mut sw).await,
            Err(HandshakeError::Key(KeyError::Open))
        ));
    }

    #[tokio::test]
    async fn test_non_join_payload_rejected() {
        let kp = ServerKeyPair::generate().unwrap();
        let (client, server) = duplex(4096);
        let (mut cr, mut cw) = split(client);
        let (mut sr, mut sw) = split(server);

        tokio::spawn(async move {
            client_send_key(&mut cr, &mut cw, "9").await;
            let key = SymmetricKey::new(9).unwrap();
            let frame = envelope::wrap(&cipher::encrypt(&Payload::text("hi").to_json().unwrap(), key));
            write_frame(&mut cw, frame.as_bytes()).await.unwrap();
        });

        let mut hs = ServerHandshake::new(&kp, addr(), MAX);
        assert!(matches!(
            hs.run(&mut sr, &mut sw).await,
            Err(HandshakeError::UnexpectedPayload("msg"))
        ));
    }

    #[tokio::test]
    async fn test_peer_closing_early_is_closed() {
        let kp = ServerKeyPair::generate().unwrap();
        let (client, server) = duplex(4096);
        let (mut sr, mut sw) = split(server);
        drop(client);

        let mut hs = ServerHandshake::new(&kp, addr(), MAX);
        let result = hs.run(&mut sr, &mut sw).await;
        assert!(result.is_err());
        assert_eq!(hs.state(), HandshakeState::Closed);
    }

    #[tokio::test]
    async fn test_steps_out_of_order_rejected() {
        let kp = ServerKeyPair::generate().unwrap();
        let (_client, server) = duplex(4096);
        let (mut sr, _sw) = split(server);

        let mut hs = ServerHandshake::new(&kp, addr(), MAX);
        assert!(matches!(
            hs.receive_join(&mut sr).await,
            Err(HandshakeError::OutOfOrder(HandshakeState::AwaitingKey))
        ));
    }
}
