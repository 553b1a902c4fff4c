//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Transaction delivery and live-push acceptance
//! - Outbox sends and resolver verdicts
//! - Socket reconnects
//! - State commits, backfill pages, locator restarts
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `kstream_` and follow Prometheus
//! conventions: counters end in `_total`, gauges represent current state.

use metrics::{counter, gauge};

/// Record a transaction handed to the inbox worker.
pub fn record_transaction_delivered(id: i64) {
    counter!("kstream_transactions_delivered_total").increment(1);
    gauge!("kstream_last_delivered_id").set(id as f64);
}

/// Record an outbox send attempt outcome.
pub fn record_send(outcome: &'static str) {
    counter!("kstream_sends_total", "outcome" => outcome).increment(1);
}

/// Record an UNKNOWN-status resolver verdict.
pub fn record_resolver(found: bool) {
    let verdict = if found { "sent" } else { "unsent" };
    counter!("kstream_resolver_checks_total", "verdict" => verdict).increment(1);
}

/// Record a state document commit.
pub fn record_state_commit() {
    counter!("kstream_state_commits_total").increment(1);
}

/// Record a backfill/locator page fetch.
pub fn record_page_fetch(order: &'static str) {
    counter!("kstream_pages_fetched_total", "order" => order).increment(1);
}

/// Record an HTTP retry.
pub fn record_http_retry(operation: &'static str) {
    counter!("kstream_http_retries_total", "operation" => operation).increment(1);
}

/// Record a socket reconnect.
pub fn record_socket_reconnect() {
    counter!("kstream_socket_reconnects_total").increment(1);
}

/// Record socket liveness status.
pub fn record_socket_status(up: bool) {
    gauge!("kstream_socket_up").set(if up { 1.0 } else { 0.0 });
}

/// Record a live push and whether the queue accepted it.
pub fn record_live_push(accepted: bool) {
    let status = if accepted { "accepted" } else { "rejected" };
    counter!("kstream_live_pushes_total", "status" => status).increment(1);
}

/// Record a tail-hole repair attempt.
pub fn record_tail_hole_repair(closed: bool) {
    let status = if closed { "closed" } else { "retry" };
    counter!("kstream_tail_hole_repairs_total", "status" => status).increment(1);
}

/// Record a locator restart (deletions observed mid-search).
pub fn record_locator_restart() {
    counter!("kstream_locator_restarts_total").increment(1);
}
