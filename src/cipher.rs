// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Single-Byte XOR Cipher
//!
//! Every UTF-8 byte of the plaintext is XORed with the session key and the
//! result is carried as standard (padded) base64 text. This provides no
//! authentication and only token confidentiality; integrity is the job of
//! the envelope tag.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

/// Errors returned when a ciphertext cannot be turned back into text.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("ciphertext is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("decrypted bytes are not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Per-session symmetric key. Always in the range 1-255.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymmetricKey(u8);

impl SymmetricKey {
    /// Returns `None` for zero, which would make the cipher the identity.
    pub fn new(value: u8) -> Option<Self> {
        if value == 0 {
            None
        } else {
            Some(SymmetricKey(value))
        }
    }

    /// Draws a random non-zero key from the system RNG.
    pub fn random() -> Result<Self, ring::error::Unspecified> {
        use ring::rand::SecureRandom;

        let rng = ring::rand::SystemRandom::new();
        let mut byte = [0u8; 1];
        loop {
            rng.fill(&mut byte)?;
            if let Some(key) = SymmetricKey::new(byte[0]) {
                return Ok(key);
            }
        }
    }

    /// Parses the decimal form used when the key travels inside the
    /// handshake (e.g. `"42"`).
    pub fn from_decimal(text: &str) -> Option<Self> {
        text.trim().parse::<u8>().ok().and_then(SymmetricKey::new)
    }

    pub fn to_decimal(self) -> String {
        self.0.to_string()
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

// Keys never show up in logs.
impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

fn xor_bytes(data: &mut [u8], key: SymmetricKey) {
    for byte in data.iter_mut() {
        *byte ^= key.0;
    }
}

/// XOR-encrypts `plaintext` and returns base64 text.
pub fn encrypt(plaintext: &str, key: SymmetricKey) -> String {
    let mut data = plaintext.as_bytes().to_vec();
    xor_bytes(&mut data, key);
    STANDARD.encode(data)
}

/// Reverses [`encrypt`].
pub fn decrypt(ciphertext: &str, key: SymmetricKey) -> Result<String, CipherError> {
    let mut data = STANDARD.decode(ciphertext.as_bytes())?;
    xor_bytes(&mut data, key);
    Ok(String::from_utf8(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(value: u8) -> SymmetricKey {
        SymmetricKey::new(value).unwrap()
    }

    #[test]
    fn test_roundtrip_every_key() {
        let samples = ["", "hi", "{\"type\":\"msg\",\"text\":\"hi\"}", "grüße 👋 ünïcödé"];
        for k in 1..=255u8 {
            for s in samples {
                assert_eq!(decrypt(&encrypt(s, key(k)), key(k)).unwrap(), s, "key {}", k);
            }
        }
    }

    #[test]
    fn test_known_vector_key_7() {
        let plaintext = r#"{"type":"msg","text":"hi"}"#;
        let xored: Vec<u8> = plaintext.bytes().map(|b| b ^ 7).collect();
        assert_eq!(encrypt(plaintext, key(7)), STANDARD.encode(xored));
    }

    #[test]
    fn test_output_is_base64_alphabet_only() {
        let ct = encrypt("a || b || c", key(0x5c));
        assert!(ct
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '='));
    }

    #[test]
    fn test_wrong_key_does_not_roundtrip() {
        let ct = encrypt("hello", key(1));
        let result = decrypt(&ct, key(2)).unwrap();
        assert_ne!(result, "hello");
    }

    #[test]
    fn test_invalid_base64_fails() {
        assert!(matches!(decrypt("not base64!!", key(9)), Err(CipherError::Base64(_))));
    }

    #[test]
    fn test_invalid_utf8_fails() {
        // 0xff is never valid UTF-8; pre-XOR so decryption yields it
        let ct = STANDARD.encode([0xff ^ 3]);
        assert!(matches!(decrypt(&ct, key(3)), Err(CipherError::Utf8(_))));
    }

    #[test]
    fn test_zero_key_rejected() {
        assert!(SymmetricKey::new(0).is_none());
        assert!(SymmetricKey::from_decimal("0").is_none());
        assert!(SymmetricKey::from_decimal("256").is_none());
        assert!(SymmetricKey::from_decimal("abc").is_none());
        assert_eq!(SymmetricKey::from_decimal("42").unwrap().value(), 42);
    }

    #[test]
    fn test_random_key_nonzero() {
        for _ in 0..64 {
            assert_ne!(SymmetricKey::random().unwrap().value(), 0);
        }
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", key(77));
        assert!(!rendered.contains("77"));
    }
}
