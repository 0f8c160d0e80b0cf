// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Encrypted multi-client chat relay.
//!
//! Clients deliver a per-session key under the relay's public key, then
//! exchange integrity-tagged, encrypted envelopes that the relay re-encrypts
//! for every other session.

pub mod cipher;
pub mod client;
pub mod config;
pub mod envelope;
pub mod frame;
pub mod handshake;
pub mod http;
pub mod keys;
pub mod metrics;
pub mod payload;
pub mod registry;
pub mod relay;
pub mod server;
