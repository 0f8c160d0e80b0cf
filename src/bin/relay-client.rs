// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Terminal chat client.
//!
//! Each stdin line is sent as a message; end of input leaves the room.

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, warn};

use relay_chat::client::{ChatClient, Inbound};
use relay_chat::config::ClientConfig;
use relay_chat::payload::Payload;

fn render(inbound: &Inbound) -> Option<String> {
    let line = match &inbound.payload {
        Payload::Msg { from, text } => {
            format!("[{}]: {}", from.as_deref().unwrap_or("?"), text)
        }
        Payload::Users { users } => format!("[Users]: {}", users.join(", ")),
        _ => return None,
    };
    if inbound.verified {
        Some(line)
    } else {
        Some(format!("{} (unverified)", line))
    }
}

#[tokio::main]
async fn main() {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "relay_chat=warn".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env();
    let client = match ChatClient::connect(
        &config.server_addr,
        config.username.as_deref(),
        config.max_frame_size,
    )
    .await
    {
        Ok(client) => client,
        Err(e) => {
            error!("Could not join {}: {}", config.server_addr, e);
            std::process::exit(1);
        }
    };
    let (mut receiver, mut sender) = client.into_split();

    let printer = tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(Some(inbound)) => {
                    if let Some(line) = render(&inbound) {
                        println!("{}", line);
                    }
                }
                Ok(None) => break,
                Err(e) if e.is_fatal() => {
                    error!("Connection lost: {}", e);
                    break;
                }
                Err(e) => warn!("Dropped frame: {}", e),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Err(e) = sender.send_text(&line).await {
                        error!("Failed to send: {}", e);
                        break;
                    }
                }
                Ok(None) | Err(_) => {
                    if let Err(e) = sender.leave().await {
                        warn!("Failed to leave cleanly: {}", e);
                    }
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                let _ = sender.leave().await;
                break;
            }
        }
    }

    printer.abort();
}
