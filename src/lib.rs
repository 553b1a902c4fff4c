//! # Kstream
//!
//! A reliable client for Krist-style currency nodes: every transaction the
//! node observes is delivered to a user hook exactly in order, and outgoing
//! transactions are sent with at-least-once semantics plus a searchable
//! deduplication tag - across process crashes and reboots.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                 Stream                                  │
//! │                                                                         │
//! │  ┌────────────┐    ┌───────────────────┐    ┌─────────────────────────┐ │
//! │  │ PushSocket │───►│ TransactionStream │───►│ inbox worker            │ │
//! │  │ (ws, live) │    │ (queue + backfill)│    │ (hook protocol)         │ │
//! │  └────────────┘    └───────────────────┘    └─────────────────────────┘ │
//! │         │                    │                          │               │
//! │         ▼                    ▼                          ▼               │
//! │  ┌────────────┐    ┌───────────────────┐    ┌─────────────────────────┐ │
//! │  │ status     │    │ ApiClient (pages, │    │ StateStore (two-phase   │ │
//! │  │ watch      │    │ locator, search)  │    │ document on disk)       │ │
//! │  └────────────┘    └───────────────────┘    └─────────────────────────┘ │
//! │                              ▲                          ▲               │
//! │                              └────── outbox worker ─────┘               │
//! │                                     (UNKNOWN resolver)                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery discipline
//!
//! All durable state lives in one serialized document, written with a
//! two-phase file protocol. A single async mutex serializes every read and
//! write of it; user hooks run inside a transactional [`HookContext`] whose
//! commit/prepare/abort map directly onto disk commits. The assembler merges
//! live socket pushes with paged backfill into a gap-free ID-ordered
//! sequence, repairing tail holes from lookup pages.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kstream::{HookContext, HookOutcome, Stream, Transaction};
//!
//! struct Printer;
//!
//! impl kstream::StreamHandler for Printer {
//!     fn on_transaction(
//!         &self,
//!         _ctx: &mut HookContext<'_>,
//!         tx: &Transaction,
//!     ) -> kstream::Result<HookOutcome> {
//!         println!("{} -> {}: {}", tx.from.as_deref().unwrap_or("mined"), tx.to, tx.value);
//!         Ok(HookOutcome::Done)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> kstream::Result<()> {
//!     Stream::create("./state", "https://krist.example", None, false).await?;
//!     let stream = Stream::open("./state", None).await?;
//!     stream.run(&Printer).await
//! }
//! ```

pub mod address;
pub mod api;
pub mod assembler;
pub mod config;
pub mod error;
pub mod hooks;
pub mod ids;
pub mod locator;
pub mod meta;
pub mod metrics;
pub mod queue;
pub mod retry;
pub mod socket;
pub mod store;
pub mod stream;
pub mod transaction;

// Re-exports for convenience
pub use address::{make_refund_for, make_v2_address};
pub use api::{ApiClient, NodeApi, WireSend};
pub use config::StreamConfig;
pub use error::{ApiError, Result, StreamError};
pub use hooks::{HookContext, HookOutcome, HookState, StreamHandler};
pub use ids::IdSource;
pub use retry::RetryConfig;
pub use store::{Boxes, OutboxEntry, OutboxStatus, StoredState};
pub use stream::Stream;
pub use transaction::{
    ApiTransaction, Order, Page, PageQuery, SendRequest, Transaction, TransactionFilter,
    TransactionKind,
};
