// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat Client
//!
//! Client side of the protocol: performs the handshake, then seals outgoing
//! payloads and opens incoming ones with the session key.
//!
//! Incoming envelopes whose tag does not match are still delivered, marked
//! with `verified: false`; it is up to the caller to decide what to show.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::cipher::{self, CipherError, SymmetricKey};
use crate::envelope::{self, EnvelopeError};
use crate::frame::{read_frame, write_frame, FrameReadError};
use crate::handshake::{self, HandshakeError};
use crate::payload::Payload;
use crate::registry::seal_payload;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameReadError),

    #[error("malformed envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("received non-UTF-8 frame")]
    NotText,

    #[error("failed to decrypt: {0}")]
    Cipher(#[from] CipherError),

    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Whether the connection is unusable after this error. Per-frame decoding
    /// problems leave the stream in sync and are not fatal.
    pub fn is_fatal(&self) -> bool {
        match self {
            ClientError::Handshake(_) | ClientError::Io(_) => true,
            ClientError::Frame(FrameReadError::Io(_)) => true,
            ClientError::Frame(FrameReadError::TooLarge { .. }) => false,
            ClientError::Envelope(_)
            | ClientError::NotText
            | ClientError::Cipher(_)
            | ClientError::Json(_) => false,
        }
    }
}

/// A payload received from the relay.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub payload: Payload,
    /// False when the integrity tag did not match the ciphertext.
    pub verified: bool,
}

/// Receiving half of a joined session.
pub struct ChatReceiver<R> {
    reader: R,
    key: SymmetricKey,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> ChatReceiver<R> {
    /// Next payload from the relay, or `None` once the relay closed the stream.
    pub async fn recv(&mut self) -> Result<Option<Inbound>, ClientError> {
        let Some(frame) = read_frame(&mut self.reader, self.max_frame_size).await? else {
            return Ok(None);
        };
        let text = String::from_utf8(frame).map_err(|_| ClientError::NotText)?;
        let unwrapped = envelope::unwrap(&text)?;
        if !unwrapped.tag_valid {
            debug!("Integrity tag mismatch on inbound frame");
        }
        let json = cipher::decrypt(unwrapped.ciphertext, self.key)?;
        Ok(Some(Inbound {
            payload: Payload::from_json(&json)?,
            verified: unwrapped.tag_valid,
        }))
    }
}

/// Sending half of a joined session.
pub struct ChatSender<W> {
    writer: W,
    key: SymmetricKey,
}

impl<W: AsyncWrite + Unpin> ChatSender<W> {
    pub async fn send(&mut self, payload: &Payload) -> Result<(), ClientError> {
        let frame = seal_payload(payload, self.key)?;
        write_frame(&mut self.writer, frame.as_bytes()).await?;
        Ok(())
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), ClientError> {
        self.send(&Payload::text(text)).await
    }

    /// Sends `leave` and closes the write side.
    pub async fn leave(&mut self) -> Result<(), ClientError> {
        self.send(&Payload::Leave).await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// A session that has completed the handshake.
pub struct ChatClient<R, W> {
    receiver: ChatReceiver<R>,
    sender: ChatSender<W>,
}

impl ChatClient<OwnedReadHalf, OwnedWriteHalf> {
    /// Connects over TCP and joins as `name` (or as the client address when `None`).
    pub async fn connect(
        addr: &str,
        name: Option<&str>,
        max_frame_size: usize,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Self::over(reader, writer, name, max_frame_size).await
    }
}

impl<R, W> ChatClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Runs the handshake over an arbitrary transport.
    pub async fn over(
        mut reader: R,
        mut writer: W,
        name: Option<&str>,
        max_frame_size: usize,
    ) -> Result<Self, ClientError> {
        let key = handshake::initiate(&mut reader, &mut writer, name, max_frame_size).await?;
        Ok(ChatClient {
            receiver: ChatReceiver {
                reader,
                key,
                max_frame_size,
            },
            sender: ChatSender { writer, key },
        })
    }

    pub fn key(&self) -> SymmetricKey {
        self.sender.key
    }

    pub async fn send(&mut self, payload: &Payload) -> Result<(), ClientError> {
        self.sender.send(payload).await
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), ClientError> {
        self.sender.send_text(text).await
    }

    pub async fn leave(&mut self) -> Result<(), ClientError> {
        self.sender.leave().await
    }

    pub async fn recv(&mut self) -> Result<Option<Inbound>, ClientError> {
        self.receiver.recv().await
    }

    /// Splits into independently owned halves, e.g. for a reader task.
    pub fn into_split(self) -> (ChatReceiver<R>, ChatSender<W>) {
        (self.receiver, self.sender)
    }
}
