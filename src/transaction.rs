// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Transaction wire and decoded types, and the observation filter.
//!
//! The node reports transactions as JSON objects ([`ApiTransaction`]).
//! Decoding adds a parsed timestamp, the metadata key/value map, and a typed
//! [`TransactionKind`]. The kind enum is open: tags this crate does not know
//! are preserved in `Unknown` so newer node versions keep flowing through
//! the pipeline.
//!
//! [`TransactionFilter`] is the value-level predicate deciding which
//! transactions a stream observes, plus its projection onto lookup query
//! parameters.

use crate::meta::{parse_meta, parse_time};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A transaction as returned by the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiTransaction {
    pub id: i64,
    #[serde(default)]
    pub from: Option<String>,
    pub to: String,
    pub value: u64,
    /// ISO-8601 UTC instant.
    pub time: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: Option<String>,
}

/// Typed transaction kind.
///
/// Open on purpose: unknown tags carry the raw string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Transfer,
    Mined,
    NamePurchase,
    NameTransfer,
    NameARecord,
    Unknown(String),
}

impl TransactionKind {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "transfer" => Self::Transfer,
            "mined" => Self::Mined,
            "name_purchase" => Self::NamePurchase,
            "name_transfer" => Self::NameTransfer,
            "name_a_record" => Self::NameARecord,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn is_mined(&self) -> bool {
        matches!(self, Self::Mined)
    }
}

/// A decoded transaction.
///
/// This is what flows through the queue, the inbox, and the user hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub from: Option<String>,
    pub to: String,
    pub value: u64,
    /// Raw ISO-8601 string as reported by the node.
    pub time: String,
    /// Parsed instant. Falls back to the epoch when the node reports a
    /// malformed time, so decoding is total.
    pub timestamp: DateTime<Utc>,
    pub kind: TransactionKind,
    pub name: Option<String>,
    /// Raw metadata string.
    pub metadata: Option<String>,
    /// Parsed CommonMeta map (empty when there is no metadata).
    pub meta: BTreeMap<String, String>,
}

impl Transaction {
    /// Decode a wire transaction.
    ///
    /// Total: malformed times fall back to the epoch, unknown kinds are
    /// preserved, metadata parsing drops malformed pieces.
    pub fn decode(wire: ApiTransaction) -> Self {
        let timestamp = parse_time(&wire.time).unwrap_or_else(|| {
            tracing::warn!(id = wire.id, time = %wire.time, "unparseable transaction time");
            DateTime::<Utc>::UNIX_EPOCH
        });
        let meta = wire
            .metadata
            .as_deref()
            .map(parse_meta)
            .unwrap_or_default();
        Self {
            id: wire.id,
            from: wire.from,
            to: wire.to,
            value: wire.value,
            timestamp,
            kind: TransactionKind::from_tag(&wire.kind),
            time: wire.time,
            name: wire.name,
            metadata: wire.metadata,
            meta,
        }
    }

    /// The `ref=` deduplication tag, if the sender attached one.
    pub fn ref_tag(&self) -> Option<&str> {
        self.meta.get(crate::meta::REF_KEY).map(String::as_str)
    }
}

/// Sort order for lookup queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// A lookup page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    /// Restrict to transactions touching this address (`None` = all).
    pub address: Option<String>,
    /// Include mining-reward transactions.
    pub include_mined: bool,
    pub order: Order,
    pub offset: u64,
    pub limit: u64,
}

/// A lookup page response, already decoded.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Total size of the queried set (not just this page).
    pub total: u64,
    pub transactions: Vec<Transaction>,
}

/// The set of transactions a stream observes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    /// Only transactions touching this address are observed.
    pub address: Option<String>,
    /// Whether mining rewards are observed.
    pub include_mined: bool,
}

impl TransactionFilter {
    pub fn new(address: Option<String>, include_mined: bool) -> Self {
        Self {
            address,
            include_mined,
        }
    }

    /// The unfiltered superset (all transactions, mined included).
    pub fn everything() -> Self {
        Self {
            address: None,
            include_mined: true,
        }
    }

    /// Value-level membership predicate.
    pub fn matches(&self, tx: &Transaction) -> bool {
        if !self.include_mined && tx.kind.is_mined() {
            return false;
        }
        match &self.address {
            None => true,
            Some(addr) => tx.from.as_deref() == Some(addr.as_str()) || tx.to == *addr,
        }
    }

    /// Project onto a lookup page request.
    pub fn page_query(&self, order: Order, offset: u64, limit: u64) -> PageQuery {
        PageQuery {
            address: self.address.clone(),
            include_mined: self.include_mined,
            order,
            offset,
            limit,
        }
    }
}

/// A pending outgoing transaction, exactly as the user enqueued it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    /// Recipient address or name.
    pub to: String,
    /// Amount in the node's base unit.
    pub amount: u64,
    /// Private key authorizing the spend.
    pub private_key: String,
    /// Metadata key/values; `ref=<uuid>` is appended on the wire.
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
    /// Opaque user data carried through the outbox, never sent to the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ud: Option<serde_json::Value>,
}
