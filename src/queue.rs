//! In-memory gap-free ordered transaction buffer.
//!
//! The queue is the meeting point of the two ingestion paths: paged
//! backfill ([`try_push_page`](TransactionQueue::try_push_page)) and live
//! socket pushes ([`try_push_transaction`](TransactionQueue::try_push_transaction)).
//! It tracks the ingestion frontier (`last_seen_id`, in global ID space) and
//! only ever accepts input that provably extends the frontier without a gap.
//!
//! # Tail flags
//!
//! - `reached_tail`: the frontier equals the node's current last
//!   transaction, as proven by a contiguous live push or an exhausted
//!   backfill.
//! - `tail_hole`: a live push arrived that does **not** extend the frontier
//!   contiguously - transactions exist between the frontier and the push.
//!   The assembler repairs this with
//!   [`try_push_unseen`](TransactionQueue::try_push_unseen).
//!
//! Buffered transactions are already filtered: only members of the observed
//! set are queued for delivery, but *every* accepted input advances the
//! frontier.

use crate::transaction::{Transaction, TransactionFilter};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Ordered buffer with contiguity checks.
#[derive(Debug)]
pub struct TransactionQueue {
    filter: TransactionFilter,
    /// Delivery floor: IDs at or below this were already delivered in a
    /// previous run and are never buffered again.
    floor: i64,
    /// Ingestion frontier in global transaction ID space.
    last_seen_id: i64,
    /// The ID the next `pop()` must deliver (filtered-set members below it
    /// are already out).
    next_pop_id: i64,
    buffer: VecDeque<Transaction>,
    reached_tail: bool,
    tail_hole: bool,
}

impl TransactionQueue {
    /// Create a queue resuming after `last_popped_id` (−1 = from the start).
    pub fn new(filter: TransactionFilter, last_popped_id: i64) -> Self {
        Self {
            filter,
            floor: last_popped_id,
            last_seen_id: last_popped_id,
            next_pop_id: last_popped_id + 1,
            buffer: VecDeque::new(),
            reached_tail: false,
            tail_hole: false,
        }
    }

    pub fn filter(&self) -> &TransactionFilter {
        &self.filter
    }

    pub fn last_seen_id(&self) -> i64 {
        self.last_seen_id
    }

    pub fn next_pop_id(&self) -> i64 {
        self.next_pop_id
    }

    pub fn reached_tail(&self) -> bool {
        self.reached_tail
    }

    pub fn tail_hole(&self) -> bool {
        self.tail_hole
    }

    /// Number of buffered (poppable) transactions.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Whether `pop()` would yield a transaction.
    pub fn poppable(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Mark the frontier as the node's current tail (backfill exhausted the
    /// list).
    pub fn mark_tail_reached(&mut self) {
        self.reached_tail = true;
    }

    /// Pop the next in-order transaction of the observed set.
    pub fn pop(&mut self) -> Option<Transaction> {
        let tx = self.buffer.pop_front()?;
        self.next_pop_id = tx.id + 1;
        trace!(id = tx.id, "popped");
        Some(tx)
    }

    /// Offer a live-pushed transaction.
    ///
    /// Accepted only when it extends the frontier contiguously
    /// (`id == last_seen_id + 1`). Acceptance proves we are at the tail;
    /// rejection while at the tail reveals a hole.
    pub fn try_push_transaction(&mut self, tx: &Transaction) -> bool {
        if tx.id != self.last_seen_id + 1 {
            if self.reached_tail {
                debug!(
                    id = tx.id,
                    last_seen = self.last_seen_id,
                    "live push rejected, tail hole suspected"
                );
                self.tail_hole = true;
            }
            return false;
        }

        self.last_seen_id = tx.id;
        self.reached_tail = true;
        self.tail_hole = false;
        self.enqueue(tx);
        true
    }

    /// Offer a backfill page (ascending order).
    ///
    /// When `anchor` is set, the page must start with exactly that ID -
    /// the overlap element proving no gap against the frontier. A page
    /// violating the anchor or internal ordering is rejected wholesale.
    pub fn try_push_page(&mut self, page: &[Transaction], anchor: Option<i64>) -> bool {
        if let Some(anchor_id) = anchor {
            match page.first() {
                Some(first) if first.id == anchor_id => {}
                _ => {
                    debug!(anchor = anchor_id, "page rejected: overlap element missing");
                    return false;
                }
            }
        }
        if !is_strictly_ascending(page) {
            debug!("page rejected: ids not strictly ascending");
            return false;
        }

        for tx in page {
            if tx.id > self.last_seen_id {
                self.last_seen_id = tx.id;
                self.enqueue(tx);
            }
        }
        true
    }

    /// Close a tail hole with the filtered last page (`last`) and the
    /// unfiltered last page (`next`), both ascending, with `next` having
    /// been queried strictly before `last`.
    ///
    /// Succeeds only when `next` spans the entire hole, `last` is a subset
    /// of `next` over the shared range, and every observed-set member of
    /// `next` beyond the frontier appears in `last`. On success the
    /// frontier advances to `next`'s last ID.
    pub fn try_push_unseen(&mut self, last: &[Transaction], next: &[Transaction]) -> bool {
        let Some(next_first) = next.first() else {
            // The node has no transactions at all; there is no hole.
            self.tail_hole = false;
            self.reached_tail = true;
            return true;
        };
        if !is_strictly_ascending(last) || !is_strictly_ascending(next) {
            return false;
        }

        // The unfiltered page must span the whole hole, or unseen
        // transactions could hide below its first element.
        if next_first.id > self.last_seen_id + 1 {
            debug!(
                next_first = next_first.id,
                last_seen = self.last_seen_id,
                "hole exceeds one unfiltered page"
            );
            return false;
        }

        // Subset check over the shared range.
        for tx in last {
            if tx.id >= next_first.id && !next.iter().any(|n| n.id == tx.id) {
                debug!(id = tx.id, "filtered page not a subset of unfiltered page");
                return false;
            }
        }

        // Every observed-set member past the frontier must be in `last`
        // (which was queried after `next` and therefore saw at least as
        // much history).
        let fresh: Vec<&Transaction> = next
            .iter()
            .filter(|tx| tx.id > self.last_seen_id && self.filter.matches(tx))
            .collect();
        for tx in &fresh {
            if !last.iter().any(|l| l.id == tx.id) {
                debug!(id = tx.id, "observed member missing from filtered page");
                return false;
            }
        }

        for tx in fresh {
            self.enqueue(tx);
        }
        let tail = next.last().map(|tx| tx.id).unwrap_or(self.last_seen_id);
        if tail > self.last_seen_id {
            self.last_seen_id = tail;
        }
        self.tail_hole = false;
        self.reached_tail = true;
        debug!(last_seen = self.last_seen_id, "tail hole closed");
        true
    }

    fn enqueue(&mut self, tx: &Transaction) {
        if tx.id > self.floor && self.filter.matches(tx) {
            self.buffer.push_back(tx.clone());
        }
    }
}

fn is_strictly_ascending(page: &[Transaction]) -> bool {
    page.windows(2).all(|w| w[0].id < w[1].id)
}
