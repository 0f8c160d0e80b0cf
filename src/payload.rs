// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat payloads carried inside decrypted envelopes.
//!
//! ```text
//! {"type":"join","name":"alice"}           client -> server
//! {"type":"msg","text":"hi"}               client -> server
//! {"type":"msg","from":"alice","text":"hi"} server -> client
//! {"type":"leave"}                         client -> server
//! {"type":"users","users":["alice","bob"]} server -> client
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
    Join {
        #[serde(default)]
        name: Option<String>,
    },
    Msg {
        /// Only set on messages relayed by the server.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(default)]
        text: String,
    },
    Leave,
    Users {
        #[serde(default)]
        users: Vec<String>,
    },
    #[serde(other)]
    Unknown,
}

impl Payload {
    pub fn join(name: Option<&str>) -> Self {
        Payload::Join {
            name: name.map(str::to_string),
        }
    }

    /// A client-originated chat message.
    pub fn text(text: impl Into<String>) -> Self {
        Payload::Msg {
            from: None,
            text: text.into(),
        }
    }

    /// A chat message as relayed to other sessions.
    pub fn relayed(from: impl Into<String>, text: impl Into<String>) -> Self {
        Payload::Msg {
            from: Some(from.into()),
            text: text.into(),
        }
    }

    pub fn users(users: Vec<String>) -> Self {
        Payload::Users { users }
    }

    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Join { .. } => "join",
            Payload::Msg { .. } => "msg",
            Payload::Leave => "leave",
            Payload::Users { .. } => "users",
            Payload::Unknown => "unknown",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
