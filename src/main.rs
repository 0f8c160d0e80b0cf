// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat Relay Server
//!
//! Relays encrypted chat messages between connected clients.
//! Provides:
//! - TCP endpoint for the session handshake and message relay
//! - HTTP endpoints for health checks and Prometheus metrics

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use relay_chat::config::RelayConfig;
use relay_chat::http::{create_router, HttpState};
use relay_chat::keys::ServerKeyPair;
use relay_chat::metrics::RelayMetrics;
use relay_chat::server::RelayServer;

#[tokio::main]
async fn main() {
    // Initialize logging
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "relay_chat=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = RelayConfig::from_env();

    info!("Starting chat relay v{}", env!("CARGO_PKG_VERSION"));
    info!("Chat listener: {}", config.listen_addr);
    info!("Max frame size: {} bytes", config.max_frame_size);

    let keypair = match ServerKeyPair::generate() {
        Ok(keypair) => Arc::new(keypair),
        Err(e) => {
            error!("Failed to generate relay key pair: {}", e);
            std::process::exit(1);
        }
    };
    info!("Relay key fingerprint: {}", keypair.fingerprint());

    let metrics = RelayMetrics::new();

    if let Some(http_addr) = config.metrics_addr {
        if config.metrics_token.is_some() {
            info!("Metrics endpoint protected with bearer token");
        } else if !http_addr.ip().is_loopback() {
            warn!("Metrics exposed on non-localhost without auth token");
            warn!("Consider setting RELAY_METRICS_TOKEN for production use");
        }

        let http_router = create_router(HttpState {
            metrics: metrics.clone(),
            metrics_token: config.metrics_token.clone(),
        });
        match TcpListener::bind(http_addr).await {
            Ok(http_listener) => {
                tokio::spawn(async move {
                    info!("HTTP server listening on {}", http_addr);
                    if let Err(e) = axum::serve(http_listener, http_router).await {
                        error!("HTTP server failed: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to bind HTTP listener on {}: {}", http_addr, e);
                std::process::exit(1);
            }
        }
    } else {
        info!("Metrics endpoint disabled");
    }

    let server = match RelayServer::bind(&config, keypair, metrics).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to bind chat listener on {}: {}", config.listen_addr, e);
            std::process::exit(1);
        }
    };

    tokio::select! {
        _ = server.run() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
        }
    }
}
