// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Node API trait and the HTTP client implementation.
//!
//! [`NodeApi`] is the seam between the pipeline and the node: everything the
//! pipeline needs from the remote side, as boxed-future methods so tests can
//! substitute a recording mock. [`ApiClient`] is the real implementation
//! over reqwest.
//!
//! # Retry discipline
//!
//! Idempotent GETs retry transient failures with exponential backoff until
//! the attempt cap or the deadline, whichever comes first. `POST
//! /transactions/` is issued exactly once per call - the outbox
//! UNKNOWN-resolver owns at-least-once delivery, and retrying a send at the
//! transport layer would defeat the crash accounting. `POST /ws/start` is
//! likewise single-shot; the socket reopen loop is the retry.

use crate::config::StreamConfig;
use crate::error::{ApiError, Result, StreamError};
use crate::retry::{Backoff, RetryConfig};
use crate::transaction::{ApiTransaction, Order, Page, PageQuery, Transaction, TransactionFilter};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Boxed async future (reduces trait signature complexity).
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Wire body for `POST /transactions/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireSend {
    pub privatekey: String,
    pub to: String,
    pub amount: u64,
    pub metadata: String,
}

/// What the pipeline needs from the node.
///
/// Implemented by [`ApiClient`] for real nodes and by the test mock.
pub trait NodeApi: Send + Sync + 'static {
    /// Fetch one lookup page.
    fn fetch_page(&self, query: PageQuery) -> ApiFuture<'_, Page>;

    /// Check whether any transaction on the node carries this `ref` tag in
    /// its metadata. This is the UNKNOWN-status resolver's oracle.
    fn ref_exists(&self, ref_id: &str) -> ApiFuture<'_, bool>;

    /// Submit an outgoing transaction. Exactly one POST per call.
    ///
    /// `Err(StreamError::Api)` is the node's structured rejection; any
    /// retryable error means the outcome is unknown.
    fn submit_transaction(&self, body: WireSend) -> ApiFuture<'_, ()>;

    /// Current balance of an address, retried until `deadline`.
    fn balance(&self, address: &str, deadline: Option<Instant>) -> ApiFuture<'_, u64>;

    /// Obtain a websocket URL for the push subscription.
    fn ws_start(&self) -> ApiFuture<'_, String>;

    /// The node's current last transaction ID, or `None` when the node has
    /// no transactions at all.
    fn last_transaction_id(&self) -> ApiFuture<'_, Option<i64>> {
        let page = self.fetch_page(TransactionFilter::everything().page_query(Order::Desc, 0, 1));
        Box::pin(async move {
            let page = page.await?;
            Ok(page.transactions.first().map(|tx| tx.id))
        })
    }
}

/// HTTP client for a node.
pub struct ApiClient {
    base: String,
    http: reqwest::Client,
    retry: RetryConfig,
    get_deadline: Duration,
}

impl ApiClient {
    pub fn new(endpoint: &str, config: &StreamConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| StreamError::http("client build", e))?;
        Ok(Self {
            base: endpoint.trim_end_matches('/').to_string(),
            http,
            retry: config.http_retry(),
            get_deadline: config.http_deadline_duration(),
        })
    }

    /// The node endpoint this client talks to.
    pub fn endpoint(&self) -> &str {
        &self.base
    }

    fn url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base, path_and_query)
    }

    /// GET with transient-failure retry, stopping at the attempt cap or
    /// `deadline`.
    async fn get_enveloped(
        &self,
        operation: &'static str,
        path_and_query: &str,
        deadline: Instant,
    ) -> Result<serde_json::Value> {
        let url = self.url(path_and_query);
        let mut backoff = Backoff::new(self.retry.clone());

        loop {
            let attempt = self
                .http
                .get(&url)
                .timeout(self.retry.attempt_timeout)
                .send()
                .await;

            let err = match attempt {
                Ok(response) => match decode_envelope(operation, response).await {
                    Ok(value) => return Ok(value),
                    Err(e) if e.is_retryable() => e,
                    Err(e) => return Err(e),
                },
                Err(e) => StreamError::http(operation, e),
            };

            let delay = backoff.next();
            if backoff.exhausted() || Instant::now() + delay >= deadline {
                return Err(err);
            }
            crate::metrics::record_http_retry(operation);
            warn!(
                operation,
                attempts = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient http error, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// POST without retry: the caller owns at-least-once semantics.
    async fn post_enveloped(
        &self,
        operation: &'static str,
        path: &str,
        body: &impl Serialize,
    ) -> Result<serde_json::Value> {
        let response = self
            .http
            .post(self.url(path))
            .timeout(self.retry.attempt_timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| StreamError::http(operation, e))?;
        decode_envelope(operation, response).await
    }
}

/// Decode a `{ok, ...}` envelope.
///
/// `ok: true` yields the body; `ok: false` yields the structured error.
/// A body without a boolean `ok` is a protocol violation - unless the
/// status was a server error, in which case it is treated as transient
/// (gateways answer with HTML).
async fn decode_envelope(
    operation: &'static str,
    response: reqwest::Response,
) -> Result<serde_json::Value> {
    let status = response.status();
    let value: serde_json::Value = match response.json().await {
        Ok(v) => v,
        Err(e) if status.is_server_error() => {
            return Err(StreamError::http(operation, e));
        }
        Err(e) => {
            return Err(StreamError::protocol(operation, format!("bad body: {e}")));
        }
    };

    match value.get("ok").and_then(|v| v.as_bool()) {
        Some(true) => Ok(value),
        Some(false) => {
            let code = value
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown_error")
                .to_string();
            let message = value
                .get("message")
                .and_then(|v| v.as_str())
                .map(String::from);
            Err(ApiError::new(code, message).into())
        }
        None if status.is_server_error() => Err(StreamError::http_msg(
            operation,
            format!("server error {status}"),
        )),
        None => Err(StreamError::protocol(operation, "missing ok field")),
    }
}

fn lookup_path(query: &PageQuery) -> String {
    let mut path = String::from("/lookup/transactions");
    if let Some(ref addr) = query.address {
        path.push('/');
        path.push_str(addr);
    }
    path.push_str(&format!(
        "?order={}&offset={}&limit={}",
        query.order.as_str(),
        query.offset,
        query.limit
    ));
    if query.include_mined {
        path.push_str("&includeMined=true");
    }
    path
}

impl NodeApi for ApiClient {
    fn fetch_page(&self, query: PageQuery) -> ApiFuture<'_, Page> {
        let path = lookup_path(&query);
        let deadline = Instant::now() + self.get_deadline;
        Box::pin(async move {
            let value = self.get_enveloped("lookup", &path, deadline).await?;
            let total = value
                .get("total")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| StreamError::protocol("lookup", "missing total"))?;
            let raw = value
                .get("transactions")
                .cloned()
                .ok_or_else(|| StreamError::protocol("lookup", "missing transactions"))?;
            let wire: Vec<ApiTransaction> = serde_json::from_value(raw)
                .map_err(|e| StreamError::protocol("lookup", format!("bad transactions: {e}")))?;
            let transactions = wire.into_iter().map(Transaction::decode).collect();
            crate::metrics::record_page_fetch(query.order.as_str());
            Ok(Page {
                total,
                transactions,
            })
        })
    }

    fn ref_exists(&self, ref_id: &str) -> ApiFuture<'_, bool> {
        let path = format!("/search/extended?q={ref_id}");
        let deadline = Instant::now() + self.get_deadline;
        Box::pin(async move {
            let value = self.get_enveloped("search", &path, deadline).await?;
            let count = value
                .pointer("/matches/transactions/metadata")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| StreamError::protocol("search", "missing metadata match count"))?;
            debug!(count, "ref search result");
            Ok(count > 0)
        })
    }

    fn submit_transaction(&self, body: WireSend) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            self.post_enveloped("send", "/transactions/", &body).await?;
            Ok(())
        })
    }

    fn balance(&self, address: &str, deadline: Option<Instant>) -> ApiFuture<'_, u64> {
        let path = format!("/addresses/{address}");
        let deadline = deadline.unwrap_or_else(|| Instant::now() + self.get_deadline);
        Box::pin(async move {
            let value = self.get_enveloped("balance", &path, deadline).await?;
            value
                .pointer("/address/balance")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| StreamError::protocol("balance", "missing address balance"))
        })
    }

    fn ws_start(&self) -> ApiFuture<'_, String> {
        Box::pin(async move {
            let value = self
                .post_enveloped("ws start", "/ws/start", &serde_json::json!({}))
                .await?;
            value
                .get("url")
                .and_then(|v| v.as_str())
                .map(String::from)
                .ok_or_else(|| StreamError::protocol("ws start", "missing url"))
        })
    }
}
