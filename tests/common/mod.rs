// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Common test utilities for relay integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use relay_chat::client::{ChatClient, Inbound};
use relay_chat::config::RelayConfig;
use relay_chat::keys::ServerKeyPair;
use relay_chat::metrics::RelayMetrics;
use relay_chat::payload::Payload;
use relay_chat::server::RelayServer;

pub const MAX_FRAME: usize = 64 * 1024;

pub type TcpClient = ChatClient<OwnedReadHalf, OwnedWriteHalf>;

/// A relay running on an ephemeral localhost port.
pub struct TestRelay {
    pub addr: SocketAddr,
    pub metrics: RelayMetrics,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Starts a relay server for integration tests.
pub async fn start_relay() -> TestRelay {
    let config = RelayConfig {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        metrics_addr: None,
        ..RelayConfig::default()
    };
    let keypair = Arc::new(ServerKeyPair::generate().expect("key generation"));
    let metrics = RelayMetrics::new();
    let server = RelayServer::bind(&config, keypair, metrics.clone())
        .await
        .expect("Failed to bind test listener");
    let addr = server.local_addr().expect("local addr");
    let task = tokio::spawn(server.run());
    TestRelay {
        addr,
        metrics,
        task,
    }
}

/// Connects and joins under `name`.
#[allow(dead_code)]
pub async fn join(relay: &TestRelay, name: &str) -> TcpClient {
    ChatClient::connect(&relay.addr.to_string(), Some(name), MAX_FRAME)
        .await
        .expect("join failed")
}

/// Next inbound payload, failing the test after two seconds.
#[allow(dead_code)]
pub async fn recv(client: &mut TcpClient) -> Inbound {
    timeout(Duration::from_secs(2), client.recv())
        .await
        .expect("timed out waiting for payload")
        .expect("recv failed")
        .expect("relay closed the connection")
}

/// Reads until a user list equal to `expected` arrives.
#[allow(dead_code)]
pub async fn wait_for_users(client: &mut TcpClient, expected: &[&str]) {
    loop {
        if let Payload::Users { users } = recv(client).await.payload {
            if users == expected {
                return;
            }
        }
    }
}

/// Opens a raw TCP connection without performing the handshake.
#[allow(dead_code)]
pub async fn raw_connect(relay: &TestRelay) -> TcpStream {
    TcpStream::connect(relay.addr).await.expect("connect failed")
}
