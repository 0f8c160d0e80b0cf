// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Envelope Codec
//!
//! An envelope is `ciphertext || "||" || tag`, where the tag is the SHA-256
//! of the ciphertext text as lowercase hex. The tag is not keyed: anyone who
//! can rewrite the ciphertext can also recompute a matching tag. It catches
//! corruption and naive tampering, nothing more.

use ring::digest;
use thiserror::Error;

/// Separator between ciphertext and tag.
pub const DELIMITER: &str = "||";

/// SHA-256 = 32 bytes = 64 hex chars.
pub const TAG_LEN: usize = 64;

/// Structural problems with a received envelope. A well-formed envelope
/// whose tag does not match is *not* an error; see [`Unwrapped::tag_valid`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("expected exactly one delimiter, found {found}")]
    Delimiter { found: usize },

    #[error("tag is not a 64-character hex string")]
    InvalidTag,
}

/// Result of splitting an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unwrapped<'a> {
    pub ciphertext: &'a str,
    pub tag_valid: bool,
}

/// Computes the integrity tag for a ciphertext.
pub fn compute_tag(ciphertext: &str) -> String {
    let hash = digest::digest(&digest::SHA256, ciphertext.as_bytes());
    hex::encode(hash.as_ref())
}

/// Appends the delimiter and a freshly computed tag.
pub fn wrap(ciphertext: &str) -> String {
    let tag = compute_tag(ciphertext);
    let mut frame = String::with_capacity(ciphertext.len() + DELIMITER.len() + TAG_LEN);
    frame.push_str(ciphertext);
    frame.push_str(DELIMITER);
    frame.push_str(&tag);
    frame
}

/// Splits an envelope and checks its tag.
pub fn unwrap(frame: &str) -> Result<Unwrapped<'_>, EnvelopeError> {
    let found = frame.matches(DELIMITER).count();
    if found != 1 {
        return Err(EnvelopeError::Delimiter { found });
    }
    let (ciphertext, tag) = frame
        .split_once(DELIMITER)
        .ok_or(EnvelopeError::Delimiter { found: 0 })?;

    if tag.len() != TAG_LEN || !tag.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(EnvelopeError::InvalidTag);
    }

    Ok(Unwrapped {
        ciphertext,
        tag_valid: compute_tag(ciphertext) == tag,
    })
}
