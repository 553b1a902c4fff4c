// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Stream assembler: merges paged backfill with live socket pushes.
//!
//! The assembler owns the [`TransactionQueue`] and drives it from two sides:
//!
//! - **Backfill** ([`populate`]): while behind the node's tail, fetch
//!   ascending pages overlapping the frontier by one element. A missing
//!   overlap element means the node deleted it - re-run the offset locator
//!   and resume from the re-anchored position.
//! - **Live** ([`push_live`](TransactionStream::push_live)): the socket
//!   offers every pushed transaction. Contiguous pushes are accepted
//!   directly; a rejected push at the tail flags a hole, repaired by
//!   fetching the filtered and unfiltered tail pages
//!   ([`fill_tail_holes`]).
//!
//! `wait()` suspends until the queue is poppable, running whichever of the
//! two repairs the flags call for. Transient fetch errors back off and
//! retry inside `wait()`; only fatal errors surface.
//!
//! [`populate`]: TransactionStream::populate
//! [`fill_tail_holes`]: TransactionStream::fill_tail_holes

use crate::api::NodeApi;
use crate::config::StreamConfig;
use crate::error::Result;
use crate::locator::{find_transaction, Resume};
use crate::queue::TransactionQueue;
use crate::retry::Backoff;
use crate::transaction::{Order, Transaction, TransactionFilter};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info, warn};

/// Backfill cursor over the ascending filtered list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backfill {
    /// Position unknown; run the locator before the next fetch.
    Unlocated,
    /// Fetch from `offset`; when `anchor` is set, the element there must
    /// carry that ID (the overlap element).
    At { offset: u64, anchor: Option<i64> },
}

struct AssemblerState {
    queue: TransactionQueue,
    backfill: Backfill,
}

/// Continuation for the `wait()` loop.
enum Step {
    /// State changed; re-evaluate immediately.
    Again,
    /// Nothing to do until a push or a socket status flip.
    Block,
    /// A repair failed softly; back off then re-evaluate.
    Retry,
}

/// Gap-free merge of backfill and live pushes.
pub struct TransactionStream<A: NodeApi> {
    api: Arc<A>,
    config: StreamConfig,
    inner: Mutex<AssemblerState>,
    /// Rung by every live push attempt, so `wait()` re-evaluates the flags.
    wake: Notify,
    /// Socket up/down transitions; used to coalesce wake-ups while idle at
    /// the tail.
    status_rx: watch::Receiver<bool>,
}

impl<A: NodeApi> TransactionStream<A> {
    pub fn new(
        api: Arc<A>,
        filter: TransactionFilter,
        last_popped_id: i64,
        config: StreamConfig,
        status_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            api,
            config,
            inner: Mutex::new(AssemblerState {
                queue: TransactionQueue::new(filter, last_popped_id),
                backfill: Backfill::Unlocated,
            }),
            wake: Notify::new(),
            status_rx,
        }
    }

    /// Offer a live-pushed transaction (called by the socket listener).
    pub async fn push_live(&self, tx: &Transaction) -> bool {
        let accepted = {
            let mut st = self.inner.lock().await;
            st.queue.try_push_transaction(tx)
        };
        // Wake the waiter either way: an accepted push may be poppable, a
        // rejected one may have flagged a hole to repair.
        self.wake.notify_one();
        accepted
    }

    /// Pop the next in-order transaction, if one is buffered.
    pub async fn try_pop(&self) -> Option<Transaction> {
        self.inner.lock().await.queue.pop()
    }

    /// Suspend until the queue has a poppable transaction.
    pub async fn wait(&self) -> Result<()> {
        let mut backoff = Backoff::new(self.config.reconnect_retry());

        loop {
            let notified = self.wake.notified();
            let mut status = self.status_rx.clone();

            let step = {
                let mut st = self.inner.lock().await;
                if st.queue.poppable() {
                    return Ok(());
                }

                let attempt = if st.queue.reached_tail() {
                    if st.queue.tail_hole() {
                        self.fill_tail_holes(&mut st).await
                    } else {
                        drop(st);
                        Ok(Step::Block)
                    }
                } else {
                    self.populate(&mut st).await
                };

                match attempt {
                    Ok(step) => step,
                    Err(e) if e.is_retryable() && !backoff.exhausted() => {
                        warn!(error = %e, "assembler fetch failed, backing off");
                        Step::Retry
                    }
                    Err(e) => return Err(e),
                }
            };

            match step {
                Step::Again => {
                    backoff.reset();
                }
                Step::Block => {
                    tokio::select! {
                        _ = notified => {}
                        _ = status.changed() => {}
                    }
                }
                Step::Retry => {
                    tokio::time::sleep(backoff.next()).await;
                }
            }
        }
    }

    /// Fetch the next backfill page into the queue.
    async fn populate(&self, st: &mut AssemblerState) -> Result<Step> {
        let (offset, anchor) = match st.backfill {
            Backfill::At { offset, anchor } => (offset, anchor),
            Backfill::Unlocated => {
                let target = st.queue.last_seen_id();
                match find_transaction(&*self.api, st.queue.filter(), target, &self.config).await? {
                    None => {
                        // The filtered list is empty: trivially at the tail.
                        st.queue.mark_tail_reached();
                        return Ok(Step::Again);
                    }
                    Some(Resume::Start) => {
                        st.backfill = Backfill::At {
                            offset: 0,
                            anchor: None,
                        };
                        (0, None)
                    }
                    Some(Resume::Anchor { offset, id }) => {
                        debug!(offset, id, "backfill anchored");
                        st.backfill = Backfill::At {
                            offset,
                            anchor: Some(id),
                        };
                        (offset, Some(id))
                    }
                }
            }
        };

        let page = self
            .api
            .fetch_page(
                st.queue
                    .filter()
                    .page_query(Order::Asc, offset, self.config.page_size),
            )
            .await?;

        if !st.queue.try_push_page(&page.transactions, anchor) {
            // The overlap element vanished from the node. Re-anchor.
            info!(offset, ?anchor, "overlap element missing, re-locating");
            st.backfill = Backfill::Unlocated;
            return Ok(Step::Again);
        }

        let consumed = page.transactions.len() as u64;
        let Some(last) = page.transactions.last() else {
            st.queue.mark_tail_reached();
            return Ok(Step::Again);
        };
        st.backfill = Backfill::At {
            offset: offset + consumed - 1,
            anchor: Some(last.id),
        };
        if offset + consumed >= page.total {
            debug!(last_seen = st.queue.last_seen_id(), "backfill reached tail");
            st.queue.mark_tail_reached();
        }
        Ok(Step::Again)
    }

    /// Repair a tail hole with the filtered and unfiltered tail pages.
    ///
    /// The unfiltered page is fetched strictly first: the filtered page,
    /// being newer, then provably contains every observed-set member the
    /// unfiltered snapshot knew about.
    async fn fill_tail_holes(&self, st: &mut AssemblerState) -> Result<Step> {
        let unfiltered = TransactionFilter::everything();
        let mut next = self
            .api
            .fetch_page(unfiltered.page_query(Order::Desc, 0, self.config.page_size))
            .await?
            .transactions;
        let mut last = self
            .api
            .fetch_page(
                st.queue
                    .filter()
                    .page_query(Order::Desc, 0, self.config.page_size),
            )
            .await?
            .transactions;
        next.reverse();
        last.reverse();

        if st.queue.try_push_unseen(&last, &next) {
            crate::metrics::record_tail_hole_repair(true);
            Ok(Step::Again)
        } else {
            crate::metrics::record_tail_hole_repair(false);
            warn!(
                last_seen = st.queue.last_seen_id(),
                "tail hole repair failed, will retry"
            );
            Ok(Step::Retry)
        }
    }

    /// Frontier ID (for diagnostics and tests).
    pub async fn last_seen_id(&self) -> i64 {
        self.inner.lock().await.queue.last_seen_id()
    }

    /// Tail flags (for diagnostics and tests).
    pub async fn flags(&self) -> (bool, bool) {
        let st = self.inner.lock().await;
        (st.queue.reached_tail(), st.queue.tail_hole())
    }
}
