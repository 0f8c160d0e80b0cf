// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat Listener
//!
//! Binds the TCP listener and spawns one relay task per accepted connection.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::keys::ServerKeyPair;
use crate::metrics::RelayMetrics;
use crate::registry::ClientRegistry;
use crate::relay::{self, ConnectionDeps};

pub struct RelayServer {
    listener: TcpListener,
    deps: ConnectionDeps<OwnedWriteHalf>,
}

impl RelayServer {
    /// Binds `config.listen_addr`. Nothing is accepted until [`run`](Self::run).
    pub async fn bind(
        config: &RelayConfig,
        keypair: Arc<ServerKeyPair>,
        metrics: RelayMetrics,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        Ok(RelayServer {
            listener,
            deps: ConnectionDeps {
                registry: Arc::new(ClientRegistry::new()),
                keypair,
                metrics,
                max_frame_size: config.max_frame_size,
            },
        })
    }

    /// Actual bound address (useful with port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> &Arc<ClientRegistry<OwnedWriteHalf>> {
        &self.deps.registry
    }

    /// Accept loop. Runs until the task is dropped.
    pub async fn run(self) {
        info!("Chat relay listening on {:?}", self.listener.local_addr().ok());
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };
            debug!("Accepted connection from {}", addr);
            self.deps.metrics.connections_total.inc();

            let deps = self.deps.clone();
            tokio::spawn(async move {
                relay::handle_connection(stream, addr, deps).await;
            });
        }
    }
}
