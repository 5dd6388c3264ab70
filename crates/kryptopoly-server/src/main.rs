//! Kryptopoly development gateway
//!
//! Speaks line-delimited JSON over stdio: one `ClientRequest` per input line,
//! one `ServerMessage` per output line. Replies and pushed snapshots share
//! stdout; logs go to stderr.

use std::sync::Arc;
use std::time::Duration;

use kryptopoly_protocol::ErrorKind;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kryptopoly_server::{
    client_request_from_json, server_message_to_json, ServerConfig, ServerMessage, SessionRegistry,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("kryptopoly_server=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => match ServerConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };

    let registry = match SessionRegistry::from_config(config) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            error!("Failed to load catalog: {}", e);
            std::process::exit(1);
        }
    };

    info!("Kryptopoly server v{}", env!("CARGO_PKG_VERSION"));

    let sweeper = {
        let registry = registry.clone();
        let period = registry.config().sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let evicted = registry.evict_terminated().await;
                if evicted > 0 {
                    info!("Swept {} sessions", evicted);
                }
            }
        })
    };

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = out_rx.recv().await {
            let line = match server_message_to_json(&message) {
                Ok(line) => line,
                Err(e) => {
                    warn!("Failed to encode message: {}", e);
                    continue;
                }
            };
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let reply = match client_request_from_json(&line) {
            Ok(request) => registry.dispatch(request, &out_tx).await,
            Err(e) => ServerMessage::error(None, ErrorKind::Validation, e.to_string()),
        };
        if out_tx.send(reply).is_err() {
            break;
        }
    }

    info!("Input closed, shutting down");
    sweeper.abort();
    drop(out_tx);
    drop(registry);
    // Session tasks hold watcher senders until they wind down.
    let _ = tokio::time::timeout(Duration::from_secs(1), writer).await;
}
