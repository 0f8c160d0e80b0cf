// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Relay Key Pair
//!
//! The relay's static X25519 key pair, generated once per process, and the
//! sealed-box construction clients use to deliver their session key:
//!
//! ```text
//! ephemeral X25519 -> DH(server public) -> HKDF-SHA256 -> ChaCha20-Poly1305
//! sealed = ephemeral_public (32) || nonce (12) || ciphertext + tag
//! ```
//!
//! The public key is shared as a PEM-style text block.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, CHACHA20_POLY1305, NONCE_LEN};
use ring::hkdf;
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

const PUBLIC_KEY_HEADER: &str = "-----BEGIN RELAY PUBLIC KEY-----";
const PUBLIC_KEY_FOOTER: &str = "-----END RELAY PUBLIC KEY-----";

const HKDF_INFO: &[u8] = b"relay-chat/session-key";

const KEY_LEN: usize = 32;
const AEAD_TAG_LEN: usize = 16;

/// Smallest possible sealed block (empty plaintext).
pub const SEALED_MIN_LEN: usize = KEY_LEN + NONCE_LEN + AEAD_TAG_LEN;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("system randomness unavailable")]
    Random,

    #[error("invalid public key text: {0}")]
    InvalidPem(String),

    #[error("sealed block too short: {0} bytes")]
    SealedTooShort(usize),

    #[error("failed to seal payload")]
    Seal,

    #[error("failed to open sealed payload")]
    Open,
}

/// The relay's process-wide key pair.
pub struct ServerKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl fmt::Debug for ServerKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerKeyPair")
            .field("public", &STANDARD.encode(self.public.as_bytes()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl ServerKeyPair {
    /// Generates a fresh key pair from system randomness.
    pub fn generate() -> Result<Self, KeyError> {
        let secret = StaticSecret::from(random_bytes::<KEY_LEN>()?);
        let public = PublicKey::from(&secret);
        Ok(ServerKeyPair { secret, public })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// PEM-style serialization sent to every client at connect time.
    pub fn public_key_pem(&self) -> String {
        encode_public_key_pem(&self.public)
    }

    /// First 16 hex chars of SHA-256 over the public key, for log lines.
    pub fn fingerprint(&self) -> String {
        let hash = ring::digest::digest(&ring::digest::SHA256, self.public.as_bytes());
        hex::encode(&hash.as_ref()[..8])
    }

    /// Opens a block produced by [`seal`] for this key pair.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, KeyError> {
        if sealed.len() < SEALED_MIN_LEN {
            return Err(KeyError::SealedTooShort(sealed.len()));
        }
        let (ephemeral, rest) = sealed.split_at(KEY_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let mut ephemeral_bytes = [0u8; KEY_LEN];
        ephemeral_bytes.copy_from_slice(ephemeral);
        let shared = self
            .secret
            .diffie_hellman(&PublicKey::from(ephemeral_bytes));

        let key = derive_key(shared.as_bytes())?;
        let nonce = Nonce::try_assume_unique_for_key(nonce).map_err(|_| KeyError::Open)?;
        let mut in_out = ciphertext.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| KeyError::Open)?;
        Ok(plaintext.to_vec())
    }
}

/// Encrypts `plaintext` so only the holder of `recipient`'s secret can read it.
pub fn seal(plaintext: &[u8], recipient: &PublicKey) -> Result<Vec<u8>, KeyError> {
    let ephemeral = StaticSecret::from(random_bytes::<KEY_LEN>()?);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient);

    let key = derive_key(shared.as_bytes())?;
    let nonce_bytes = random_bytes::<NONCE_LEN>()?;
    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(nonce_bytes),
        Aad::empty(),
        &mut in_out,
    )
    .map_err(|_| KeyError::Seal)?;

    let mut sealed = Vec::with_capacity(KEY_LEN + NONCE_LEN + in_out.len());
    sealed.extend_from_slice(ephemeral_public.as_bytes());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&in_out);
    Ok(sealed)
}

pub fn encode_public_key_pem(public: &PublicKey) -> String {
    format!(
        "{}\n{}\n{}\n",
        PUBLIC_KEY_HEADER,
        STANDARD.encode(public.as_bytes()),
        PUBLIC_KEY_FOOTER
    )
}

pub fn parse_public_key_pem(text: &str) -> Result<PublicKey, KeyError> {
    let body = text
        .trim()
        .strip_prefix(PUBLIC_KEY_HEADER)
        .and_then(|rest| rest.strip_suffix(PUBLIC_KEY_FOOTER))
        .ok_or_else(|| KeyError::InvalidPem("missing header or footer".to_string()))?;

    let bytes = STANDARD
        .decode(body.trim())
        .map_err(|e| KeyError::InvalidPem(e.to_string()))?;
    let bytes: [u8; KEY_LEN] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::InvalidPem(format!("expected {} bytes, got {}", KEY_LEN, bytes.len())))?;
    Ok(PublicKey::from(bytes))
}

fn derive_key(shared_secret: &[u8]) -> Result<LessSafeKey, KeyError> {
    let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, &[]).extract(shared_secret);
    let okm = prk
        .expand(&[HKDF_INFO], &CHACHA20_POLY1305)
        .map_err(|_| KeyError::Seal)?;
    Ok(LessSafeKey::new(UnboundKey::from(okm)))
}

fn random_bytes<const N: usize>() -> Result<[u8; N], KeyError> {
    let mut bytes = [0u8; N];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| KeyError::Random)?;
    Ok(bytes)
}
