// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Push socket: long-lived transaction subscription with liveness.
//!
//! Session lifecycle:
//!
//! 1. `POST /ws/start` for a fresh websocket URL.
//! 2. Connect (bounded by the connect timeout), send the subscribe frame
//!    for the `transactions` event, reseed the ID source with the URL.
//! 3. Event loop: select on the next frame vs the liveness deadline. Every
//!    received frame refreshes liveness; `transaction` events go to the
//!    assembler's live-push entry.
//! 4. On liveness expiry, stream end, or any error: publish status=down and
//!    reopen with exponential backoff.
//!
//! The up/down transitions are published on a watch channel - `is_up()`
//! reads it, and the assembler's `wait()` uses it to coalesce wake-ups.

use crate::api::NodeApi;
use crate::assembler::TransactionStream;
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::ids::IdSource;
use crate::retry::Backoff;
use crate::transaction::{ApiTransaction, Transaction};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Incoming frame shapes we care about. Everything else only refreshes
/// liveness.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum SocketMessage {
    Event {
        event: String,
        #[serde(default)]
        transaction: Option<ApiTransaction>,
    },
    #[serde(other)]
    Other,
}

enum SessionEnd {
    Shutdown,
    Dropped,
}

/// Run the push socket until shutdown. Never returns `Ok` earlier; all
/// transient failures reopen with backoff.
pub async fn run_socket<A: NodeApi>(
    api: Arc<A>,
    assembler: Arc<TransactionStream<A>>,
    status_tx: watch::Sender<bool>,
    ids: Arc<IdSource>,
    mut shutdown_rx: watch::Receiver<bool>,
    config: StreamConfig,
) -> Result<()> {
    let mut backoff = Backoff::new(config.reconnect_retry());

    loop {
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        match run_session(
            &*api,
            &assembler,
            &status_tx,
            &ids,
            &mut shutdown_rx,
            &config,
            &mut backoff,
        )
        .await
        {
            Ok(SessionEnd::Shutdown) => {
                let _ = status_tx.send(false);
                crate::metrics::record_socket_status(false);
                return Ok(());
            }
            Ok(SessionEnd::Dropped) => {
                let _ = status_tx.send(false);
                crate::metrics::record_socket_status(false);
                crate::metrics::record_socket_reconnect();
            }
            Err(e) if e.is_retryable() => {
                let _ = status_tx.send(false);
                crate::metrics::record_socket_status(false);
                crate::metrics::record_socket_reconnect();
                warn!(error = %e, "socket session failed");
            }
            Err(e) => {
                let _ = status_tx.send(false);
                crate::metrics::record_socket_status(false);
                return Err(e);
            }
        }

        let delay = backoff.next();
        if backoff.exhausted() {
            return Err(StreamError::Socket(
                "reconnect attempts exhausted".to_string(),
            ));
        }
        debug!(delay_ms = delay.as_millis() as u64, "socket reopening");
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return Ok(());
                }
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn run_session<A: NodeApi>(
    api: &A,
    assembler: &TransactionStream<A>,
    status_tx: &watch::Sender<bool>,
    ids: &IdSource,
    shutdown_rx: &mut watch::Receiver<bool>,
    config: &StreamConfig,
    backoff: &mut Backoff,
) -> Result<SessionEnd> {
    let url = api.ws_start().await?;
    ids.reseed(&url);

    let connect = tokio_tungstenite::connect_async(url.as_str());
    let (ws, _) = match tokio::time::timeout(config.connect_timeout_duration(), connect).await {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => return Err(StreamError::Socket(format!("connect: {e}"))),
        Err(_) => return Err(StreamError::Socket("connect timeout".to_string())),
    };
    let (mut sink, mut stream) = ws.split();

    let subscribe =
        serde_json::json!({"id": 0, "type": "subscribe", "event": "transactions"}).to_string();
    sink.send(Message::Text(subscribe))
        .await
        .map_err(|e| StreamError::Socket(format!("subscribe: {e}")))?;

    info!("push socket subscribed");
    let _ = status_tx.send(true);
    crate::metrics::record_socket_status(true);
    backoff.reset();

    let liveness = config.ping_timeout_duration();
    let mut last_ping = Instant::now();

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    let _ = sink.close().await;
                    return Ok(SessionEnd::Shutdown);
                }
            }

            _ = tokio::time::sleep_until(last_ping + liveness) => {
                warn!(timeout_ms = liveness.as_millis() as u64, "socket liveness expired");
                let _ = sink.close().await;
                return Ok(SessionEnd::Dropped);
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_ping = Instant::now();
                        let _ = status_tx.send(true);
                        handle_text(assembler, &text).await;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        last_ping = Instant::now();
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("socket closed by node");
                        return Ok(SessionEnd::Dropped);
                    }
                    Some(Ok(_)) => {
                        // Binary, Pong: liveness only.
                        last_ping = Instant::now();
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "socket receive error");
                        return Ok(SessionEnd::Dropped);
                    }
                    None => {
                        info!("socket stream ended");
                        return Ok(SessionEnd::Dropped);
                    }
                }
            }
        }
    }
}

async fn handle_text<A: NodeApi>(assembler: &TransactionStream<A>, text: &str) {
    let Ok(message) = serde_json::from_str::<SocketMessage>(text) else {
        // Subscription acks and hello frames have no `type` we dispatch on.
        return;
    };
    let SocketMessage::Event { event, transaction } = message else {
        return;
    };
    if event != "transaction" {
        return;
    }
    let Some(wire) = transaction else {
        warn!("transaction event without transaction body");
        return;
    };

    let tx = Transaction::decode(wire);
    let id = tx.id;
    let accepted = assembler.push_live(&tx).await;
    crate::metrics::record_live_push(accepted);
    debug!(id, accepted, "live push");
}
