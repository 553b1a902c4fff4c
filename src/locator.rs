//! Offset locator for the node's transaction list.
//!
//! Backfill needs to know *where* in the (ascending) filtered list a known
//! transaction ID sits, so paging can resume with a one-element overlap.
//! IDs are not dense within a filtered list, so the locator probes:
//!
//! 1. Fast path: the last page. Most resumes are near the tail.
//! 2. Up to a few interpolation-search rounds (IDs are roughly uniform in
//!    offset), then binary search. Every probe is a one-element page.
//! 3. A two-element validation page at the converged offset.
//!
//! The node can delete transactions while we search. Any probe that lands
//! outside the current bracket, and any validation mismatch, restarts the
//! whole locator; a restart cap turns pathological churn into an error
//! instead of an unbounded loop.

use crate::api::NodeApi;
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::transaction::{Order, Transaction, TransactionFilter};
use tracing::{debug, trace};

/// Where backfill should resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Consume the list from offset 0; nothing recorded, no overlap anchor.
    Start,
    /// The element with `id` sits at `offset` in the ascending list. Fetch
    /// from `offset` so it serves as the overlap element.
    Anchor { offset: u64, id: i64 },
}

/// Locate where fetching should resume for `target`.
///
/// Returns `None` when the filtered list is empty. A `target` of −1 maps to
/// [`Resume::Start`] whenever the list is non-empty.
///
/// For a `target` that no longer exists (deleted), the anchor converges on
/// the greatest remaining ID below it.
pub async fn find_transaction<A: NodeApi>(
    api: &A,
    filter: &TransactionFilter,
    target: i64,
    config: &StreamConfig,
) -> Result<Option<Resume>> {
    for restart in 0..config.locator_restarts {
        if restart > 0 {
            debug!(target, restart, "locator restarting");
            crate::metrics::record_locator_restart();
        }
        match locate_once(api, filter, target, config).await? {
            Outcome::Done(resume) => return Ok(resume),
            Outcome::Restart => continue,
        }
    }
    Err(StreamError::protocol(
        "locator",
        format!("did not converge on id {target} (list churning)"),
    ))
}

enum Outcome {
    Done(Option<Resume>),
    Restart,
}

async fn locate_once<A: NodeApi>(
    api: &A,
    filter: &TransactionFilter,
    target: i64,
    config: &StreamConfig,
) -> Result<Outcome> {
    // Fast path: the last page, fetched newest-first.
    let page = api
        .fetch_page(filter.page_query(Order::Desc, 0, config.page_size))
        .await?;
    let total = page.total;
    if total == 0 {
        return Ok(Outcome::Done(None));
    }
    if target < 0 {
        return Ok(Outcome::Done(Some(Resume::Start)));
    }

    let mut tail: Vec<Transaction> = page.transactions;
    tail.reverse(); // ascending
    if tail.is_empty() {
        // total > 0 but an empty page: the list shifted mid-query.
        return Ok(Outcome::Restart);
    }
    let tail_base = total - tail.len() as u64;

    if target >= tail[0].id {
        // Within the last page's ID range (or beyond the head).
        let (idx, tx) = match tail
            .iter()
            .enumerate()
            .rev()
            .find(|(_, tx)| tx.id <= target)
        {
            Some(found) => found,
            None => return Ok(Outcome::Restart),
        };
        trace!(target, offset = tail_base + idx as u64, "located in last page");
        return Ok(Outcome::Done(Some(Resume::Anchor {
            offset: tail_base + idx as u64,
            id: tx.id,
        })));
    }

    // Probe offset 0 to establish the lower bracket.
    let Some(first) = probe(api, filter, 0).await? else {
        return Ok(Outcome::Restart);
    };
    if first.id > target {
        // Everything recorded is older than the whole list.
        return Ok(Outcome::Done(Some(Resume::Start)));
    }
    if first.id == target {
        return Ok(Outcome::Done(Some(Resume::Anchor { offset: 0, id: target })));
    }

    // Bracket invariant: lo.id < target < hi.id, lo.offset < hi.offset.
    let mut lo = (0u64, first.id);
    let mut hi = (tail_base, tail[0].id);
    let mut round: u32 = 0;

    while hi.0 - lo.0 > 1 {
        let guess = if round < config.interpolation_rounds {
            interpolate(lo, hi, target)
        } else {
            lo.0 + (hi.0 - lo.0) / 2
        };
        round += 1;

        let Some(probed) = probe(api, filter, guess).await? else {
            return Ok(Outcome::Restart);
        };
        if probed.id <= lo.1 || probed.id >= hi.1 {
            // Monotonicity violation: deletions shifted the list under us.
            debug!(
                probed = probed.id,
                lo = lo.1,
                hi = hi.1,
                "probe outside bracket"
            );
            return Ok(Outcome::Restart);
        }
        if probed.id == target {
            return validate(api, filter, guess, target).await;
        }
        if probed.id < target {
            lo = (guess, probed.id);
        } else {
            hi = (guess, probed.id);
        }
    }

    // Adjacent bracket without an exact hit: the target was deleted; the
    // lower endpoint is the greatest remaining ID below it.
    validate(api, filter, lo.0, target).await
}

fn interpolate(lo: (u64, i64), hi: (u64, i64), target: i64) -> u64 {
    let span_ids = (hi.1 - lo.1) as i128;
    let span_offsets = (hi.0 - lo.0) as i128;
    let into = (target - lo.1) as i128;
    let raw = lo.0 as i128 + into * span_offsets / span_ids;
    // Keep the probe strictly inside the bracket.
    (raw.clamp(lo.0 as i128 + 1, hi.0 as i128 - 1)) as u64
}

async fn probe<A: NodeApi>(
    api: &A,
    filter: &TransactionFilter,
    offset: u64,
) -> Result<Option<Transaction>> {
    let page = api
        .fetch_page(filter.page_query(Order::Asc, offset, 1))
        .await?;
    Ok(page.transactions.into_iter().next())
}

/// Confirm convergence with a two-element page at `offset`: the element
/// there must be the greatest ID at or below `target`, and its successor
/// (when present) must be above `target`.
async fn validate<A: NodeApi>(
    api: &A,
    filter: &TransactionFilter,
    offset: u64,
    target: i64,
) -> Result<Outcome> {
    let page = api
        .fetch_page(filter.page_query(Order::Asc, offset, 2))
        .await?;
    let txs = page.transactions;
    let Some(anchor) = txs.first() else {
        return Ok(Outcome::Restart);
    };
    if anchor.id > target {
        return Ok(Outcome::Restart);
    }
    if let Some(successor) = txs.get(1) {
        if successor.id <= target {
            return Ok(Outcome::Restart);
        }
    }
    trace!(target, offset, anchor = anchor.id, "locator validated");
    Ok(Outcome::Done(Some(Resume::Anchor {
        offset,
        id: anchor.id,
    })))
}
