// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hook contexts: the transactional view over the inbox and outbox.
//!
//! A [`HookContext`] is opened over the locked state store for the duration
//! of one user hook. It clones the committed boxes into a working copy,
//! bumps the revision, and applies the copy back through `commit()` - or
//! stages it on disk first through `prepare()` when the hook coordinates
//! with an external store.
//!
//! # State machine
//!
//! ```text
//!                prepare()
//! Uncommitted ──────────────→ Prepared
//!      │                         │
//!      │ commit()      commit()  │   abort()
//!      ├──────────→ Committed ←──┤──────────→ Aborted
//!      └──────────────────────────────────────────↑
//! ```
//!
//! Terminal states reject every further operation.
//!
//! # Hook execution protocol
//!
//! [`run_hook`] drives a user hook through the guarantees the pipeline
//! documents: the main body runs **at least once** per inbox entry, the
//! after-commit callback runs **at most once**, and a prepare callback runs
//! strictly between the prepared-write and the committed-write.

use crate::error::{ApiError, Result, StreamError};
use crate::ids::IdSource;
use crate::store::{Boxes, OutboxEntry, OutboxStatus, StateStore};
use crate::transaction::{SendRequest, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle of a hook context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    Uncommitted,
    Prepared,
    Committed,
    Aborted,
}

impl std::fmt::Display for HookState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uncommitted => write!(f, "Uncommitted"),
            Self::Prepared => write!(f, "Prepared"),
            Self::Committed => write!(f, "Committed"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Deferred-callback choice returned by a hook body.
///
/// `Prepare` asks for two-phase commit: the callback receives the revision
/// after the prepared snapshot is on disk and before it is promoted -
/// record it in your external store, and pass it to `Stream::open` after a
/// crash. `Commit` runs its callback strictly after the committed write; a
/// failure there bubbles up without re-running the hook body.
pub enum HookOutcome {
    Done,
    Prepare(PrepareFn),
    Commit(AfterCommitFn),
}

/// Callback invoked with the prepared revision.
pub type PrepareFn = Box<dyn FnOnce(u64) -> Result<()> + Send>;
/// Callback invoked after the committed write.
pub type AfterCommitFn = Box<dyn FnOnce() -> Result<()> + Send>;

/// The capability record of user hooks, passed to `run()`.
///
/// `on_transaction` is the required consumer. The send hooks default to
/// removing the head entry and committing - exactly what the outbox worker
/// would otherwise do itself. An override that does *not* remove entry 0
/// makes the worker re-dispatch the same entry forever; removal is the
/// hook's responsibility.
pub trait StreamHandler: Send + Sync + 'static {
    /// Called once per observed transaction, in strict ascending ID order.
    /// Runs at least once per entry: a crash before commit redelivers.
    fn on_transaction(&self, ctx: &mut HookContext<'_>, tx: &Transaction) -> Result<HookOutcome>;

    /// Called when the head outbox entry is confirmed on the node.
    fn on_send_success(
        &self,
        ctx: &mut HookContext<'_>,
        tx: &SendRequest,
        id: Uuid,
    ) -> Result<HookOutcome> {
        let _ = (tx, id);
        ctx.take_outbox_head()?;
        Ok(HookOutcome::Done)
    }

    /// Called when the node rejects the head outbox entry with a
    /// structured error.
    fn on_send_failure(
        &self,
        ctx: &mut HookContext<'_>,
        tx: &SendRequest,
        id: Uuid,
        error: &ApiError,
    ) -> Result<HookOutcome> {
        let _ = (tx, id);
        warn!(error = %error, "send rejected; dropping outbox entry");
        ctx.take_outbox_head()?;
        Ok(HookOutcome::Done)
    }
}

/// Transactional working copy of the boxes, open over the locked store.
pub struct HookContext<'a> {
    store: &'a mut StateStore,
    ids: &'a IdSource,
    uncommitted: Boxes,
    state: HookState,
}

impl<'a> HookContext<'a> {
    /// Open a context: clone `committed`, bump the revision.
    pub(crate) fn new(store: &'a mut StateStore, ids: &'a IdSource) -> Self {
        store.assert_no_prepared();
        let mut uncommitted = store.state().committed.clone();
        uncommitted.revision += 1;
        Self {
            store,
            ids,
            uncommitted,
            state: HookState::Uncommitted,
        }
    }

    fn ensure(&self, allowed: &[HookState], expected: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(StreamError::InvalidState {
                expected: expected.to_string(),
                actual: self.state.to_string(),
            })
        }
    }

    /// Revision of the working copy.
    pub fn revision(&self) -> u64 {
        self.uncommitted.revision
    }

    pub fn state(&self) -> HookState {
        self.state
    }

    /// The working copy's inbox slot.
    pub fn inbox(&self) -> Option<&Transaction> {
        self.uncommitted.inbox.as_ref()
    }

    /// The working copy's outbox.
    pub fn outbox(&self) -> &[OutboxEntry] {
        &self.uncommitted.outbox
    }

    /// Consume the inbox slot. Committing afterwards marks the transaction
    /// processed; aborting leaves it for redelivery.
    pub fn take_inbox(&mut self) -> Result<Option<Transaction>> {
        self.ensure(&[HookState::Uncommitted], "Uncommitted")?;
        Ok(self.uncommitted.inbox.take())
    }

    /// Remove the head outbox entry (the one a send hook is reporting on).
    pub fn take_outbox_head(&mut self) -> Result<Option<OutboxEntry>> {
        self.ensure(&[HookState::Uncommitted], "Uncommitted")?;
        if self.uncommitted.outbox.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.uncommitted.outbox.remove(0)))
        }
    }

    /// Append an outgoing transaction to the working outbox.
    ///
    /// Assigns the tracking ID and the `ref` dedup tag; both survive every
    /// retry of the send. Returns the tracking ID.
    pub fn enqueue_send(&mut self, tx: SendRequest) -> Result<Uuid> {
        self.ensure(&[HookState::Uncommitted], "Uncommitted")?;
        let id = self.ids.next_id();
        let ref_id = self.ids.next_id();
        debug!(%id, %ref_id, to = %tx.to, amount = tx.amount, "send enqueued");
        self.uncommitted.outbox.push(OutboxEntry {
            id,
            ref_id,
            status: OutboxStatus::Pending,
            transaction: tx,
        });
        Ok(id)
    }

    /// Stage the working copy on disk without promoting it.
    ///
    /// Returns the revision to record in the external store.
    pub async fn prepare(&mut self) -> Result<u64> {
        self.ensure(&[HookState::Uncommitted], "Uncommitted")?;
        self.store.state_mut().prepared = Some(self.uncommitted.clone());
        self.store.commit().await?;
        self.state = HookState::Prepared;
        Ok(self.uncommitted.revision)
    }

    /// Promote the working copy to committed and persist.
    pub async fn commit(&mut self) -> Result<()> {
        self.ensure(
            &[HookState::Uncommitted, HookState::Prepared],
            "Uncommitted or Prepared",
        )?;
        let state = self.store.state_mut();
        state.committed = self.uncommitted.clone();
        state.prepared = None;
        self.store.commit().await?;
        self.state = HookState::Committed;
        Ok(())
    }

    /// Discard the working copy, clearing any prepared snapshot.
    pub async fn abort(&mut self) -> Result<()> {
        self.ensure(
            &[HookState::Uncommitted, HookState::Prepared],
            "Uncommitted or Prepared",
        )?;
        self.store.state_mut().prepared = None;
        self.store.commit().await?;
        self.state = HookState::Aborted;
        Ok(())
    }
}

/// Run a hook body under the execution protocol.
///
/// - Body failure: abort, re-raise. The committed state is untouched, so
///   the same work is redelivered.
/// - `Prepare(f)`: stage on disk, run `f(revision)`, then commit. If `f`
///   fails the prepared snapshot **stays on disk** and the error is
///   re-raised - recovery is a restart with the externally recorded
///   revision.
/// - `Commit(f)`: commit, then run `f`. A failure in `f` re-raises without
///   re-running the body; the commit already happened.
pub(crate) async fn run_hook<F>(store: &mut StateStore, ids: &IdSource, body: F) -> Result<()>
where
    F: FnOnce(&mut HookContext<'_>) -> Result<HookOutcome>,
{
    let mut ctx = HookContext::new(store, ids);
    let outcome = match body(&mut ctx) {
        Ok(outcome) => outcome,
        Err(e) => {
            ctx.abort().await?;
            return Err(e);
        }
    };

    match outcome {
        HookOutcome::Done => ctx.commit().await,
        HookOutcome::Prepare(on_prepare) => {
            let revision = ctx.prepare().await?;
            on_prepare(revision)?;
            ctx.commit().await
        }
        HookOutcome::Commit(after_commit) => {
            ctx.commit().await?;
            after_commit()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn store(dir: &std::path::Path) -> StateStore {
        StateStore::create(dir, "https://node.test".to_string(), false, None, -1)
            .await
            .unwrap()
    }

    fn send_req(to: &str) -> SendRequest {
        SendRequest {
            to: to.to_string(),
            amount: 5,
            private_key: "pk".to_string(),
            meta: Default::default(),
            ud: None,
        }
    }

    #[tokio::test]
    async fn test_enqueue_and_commit() {
        let dir = tempdir().unwrap();
        let mut st = store(dir.path()).await;
        let ids = IdSource::from_seed(1);

        let mut ctx = HookContext::new(&mut st, &ids);
        assert_eq!(ctx.revision(), 1);
        let id = ctx.enqueue_send(send_req("kbbb")).unwrap();
        ctx.commit().await.unwrap();

        assert_eq!(st.state().committed.revision, 1);
        assert_eq!(st.state().committed.outbox.len(), 1);
        assert_eq!(st.state().committed.outbox[0].id, id);
        assert_eq!(st.state().committed.outbox[0].status, OutboxStatus::Pending);
        assert_ne!(st.state().committed.outbox[0].ref_id, id);
    }

    #[tokio::test]
    async fn test_abort_discards_working_copy() {
        let dir = tempdir().unwrap();
        let mut st = store(dir.path()).await;
        let ids = IdSource::from_seed(1);

        let mut ctx = HookContext::new(&mut st, &ids);
        ctx.enqueue_send(send_req("kbbb")).unwrap();
        ctx.abort().await.unwrap();

        assert_eq!(st.state().committed.revision, 0);
        assert!(st.state().committed.outbox.is_empty());
    }

    #[tokio::test]
    async fn test_terminal_states_reject_operations() {
        let dir = tempdir().unwrap();
        let mut st = store(dir.path()).await;
        let ids = IdSource::from_seed(1);

        let mut ctx = HookContext::new(&mut st, &ids);
        ctx.commit().await.unwrap();
        assert_eq!(ctx.state(), HookState::Committed);
        assert!(ctx.enqueue_send(send_req("kbbb")).is_err());
        assert!(ctx.take_inbox().is_err());
        assert!(ctx.commit().await.is_err());
        assert!(ctx.abort().await.is_err());
        assert!(ctx.prepare().await.is_err());
    }

    #[tokio::test]
    async fn test_prepare_stages_on_disk() {
        let dir = tempdir().unwrap();
        let mut st = store(dir.path()).await;
        let ids = IdSource::from_seed(1);

        let mut ctx = HookContext::new(&mut st, &ids);
        ctx.enqueue_send(send_req("kbbb")).unwrap();
        let revision = ctx.prepare().await.unwrap();
        assert_eq!(revision, 1);
        assert_eq!(ctx.state(), HookState::Prepared);

        let prepared = st.state().prepared.as_ref().unwrap();
        assert_eq!(prepared.revision, 1);
        assert_eq!(prepared.outbox.len(), 1);
        // Committed is untouched until the promote.
        assert_eq!(st.state().committed.revision, 0);
    }

    #[tokio::test]
    async fn test_prepare_then_commit_promotes_and_clears() {
        let dir = tempdir().unwrap();
        let mut st = store(dir.path()).await;
        let ids = IdSource::from_seed(1);

        let mut ctx = HookContext::new(&mut st, &ids);
        ctx.enqueue_send(send_req("kbbb")).unwrap();
        ctx.prepare().await.unwrap();
        ctx.commit().await.unwrap();

        assert!(st.state().prepared.is_none());
        assert_eq!(st.state().committed.revision, 1);
        assert_eq!(st.state().committed.outbox.len(), 1);
    }

    #[tokio::test]
    async fn test_take_inbox_consumed_on_commit_kept_on_abort() {
        let dir = tempdir().unwrap();
        let mut st = store(dir.path()).await;
        let ids = IdSource::from_seed(1);
        let tx = Transaction::decode(crate::transaction::ApiTransaction {
            id: 42,
            from: Some("ka".to_string()),
            to: "kb".to_string(),
            value: 1,
            time: "2024-06-01T10:00:00.000Z".to_string(),
            kind: "transfer".to_string(),
            name: None,
            metadata: None,
        });
        st.state_mut().committed.inbox = Some(tx.clone());
        st.commit().await.unwrap();

        // Abort leaves the transaction in place.
        let mut ctx = HookContext::new(&mut st, &ids);
        assert_eq!(ctx.take_inbox().unwrap().unwrap().id, 42);
        ctx.abort().await.unwrap();
        assert!(st.state().committed.inbox.is_some());

        // Commit consumes it.
        let mut ctx = HookContext::new(&mut st, &ids);
        assert_eq!(ctx.take_inbox().unwrap().unwrap().id, 42);
        ctx.commit().await.unwrap();
        assert!(st.state().committed.inbox.is_none());
    }

    #[tokio::test]
    async fn test_run_hook_body_failure_aborts() {
        let dir = tempdir().unwrap();
        let mut st = store(dir.path()).await;
        let ids = IdSource::from_seed(1);

        let result = run_hook(&mut st, &ids, |ctx| {
            ctx.enqueue_send(send_req("kbbb"))?;
            Err(StreamError::hook_msg("body exploded"))
        })
        .await;

        assert!(result.is_err());
        assert!(st.state().committed.outbox.is_empty());
        assert!(st.state().prepared.is_none());
    }

    #[tokio::test]
    async fn test_run_hook_done_commits() {
        let dir = tempdir().unwrap();
        let mut st = store(dir.path()).await;
        let ids = IdSource::from_seed(1);

        run_hook(&mut st, &ids, |ctx| {
            ctx.enqueue_send(send_req("kbbb"))?;
            Ok(HookOutcome::Done)
        })
        .await
        .unwrap();

        assert_eq!(st.state().committed.outbox.len(), 1);
    }

    #[tokio::test]
    async fn test_run_hook_prepare_callback_sees_revision() {
        let dir = tempdir().unwrap();
        let mut st = store(dir.path()).await;
        let ids = IdSource::from_seed(1);
        let seen = Arc::new(AtomicU64::new(0));
        let seen_in_hook = Arc::clone(&seen);

        run_hook(&mut st, &ids, move |ctx| {
            ctx.enqueue_send(send_req("kbbb"))?;
            Ok(HookOutcome::Prepare(Box::new(move |revision| {
                seen_in_hook.store(revision, Ordering::SeqCst);
                Ok(())
            })))
        })
        .await
        .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(st.state().prepared.is_none());
        assert_eq!(st.state().committed.revision, 1);
    }

    #[tokio::test]
    async fn test_run_hook_prepare_failure_leaves_prepared_on_disk() {
        let dir = tempdir().unwrap();
        let mut st = store(dir.path()).await;
        let ids = IdSource::from_seed(1);

        let result = run_hook(&mut st, &ids, |ctx| {
            ctx.enqueue_send(send_req("kbbb"))?;
            Ok(HookOutcome::Prepare(Box::new(|_| {
                Err(StreamError::hook_msg("external store refused"))
            })))
        })
        .await;

        assert!(result.is_err());
        // The prepared snapshot is the crash-recovery artifact.
        assert!(st.state().prepared.is_some());
        assert_eq!(st.state().committed.revision, 0);
    }

    #[tokio::test]
    async fn test_run_hook_after_commit_failure_keeps_commit() {
        let dir = tempdir().unwrap();
        let mut st = store(dir.path()).await;
        let ids = IdSource::from_seed(1);

        let result = run_hook(&mut st, &ids, |ctx| {
            ctx.enqueue_send(send_req("kbbb"))?;
            Ok(HookOutcome::Commit(Box::new(|| {
                Err(StreamError::hook_msg("after-commit exploded"))
            })))
        })
        .await;

        assert!(result.is_err());
        // The commit happened; the failure must not undo it.
        assert_eq!(st.state().committed.outbox.len(), 1);
        assert!(st.state().prepared.is_none());
    }

    #[tokio::test]
    async fn test_outbox_append_preserves_existing_entries() {
        let dir = tempdir().unwrap();
        let mut st = store(dir.path()).await;
        let ids = IdSource::from_seed(1);

        run_hook(&mut st, &ids, |ctx| {
            ctx.enqueue_send(send_req("kaaa"))?;
            Ok(HookOutcome::Done)
        })
        .await
        .unwrap();

        run_hook(&mut st, &ids, |ctx| {
            ctx.enqueue_send(send_req("kbbb"))?;
            ctx.enqueue_send(send_req("kccc"))?;
            Ok(HookOutcome::Done)
        })
        .await
        .unwrap();

        let outbox = &st.state().committed.outbox;
        assert_eq!(outbox.len(), 3);
        let to: Vec<&str> = outbox.iter().map(|e| e.transaction.to.as_str()).collect();
        assert_eq!(to, vec!["kaaa", "kbbb", "kccc"]);
        // Every entry carries a distinct ref.
        let mut refs: Vec<Uuid> = outbox.iter().map(|e| e.ref_id).collect();
        refs.dedup();
        assert_eq!(refs.len(), 3);
    }

    #[tokio::test]
    async fn test_take_outbox_head_order() {
        let dir = tempdir().unwrap();
        let mut st = store(dir.path()).await;
        let ids = IdSource::from_seed(1);

        run_hook(&mut st, &ids, |ctx| {
            ctx.enqueue_send(send_req("kaaa"))?;
            ctx.enqueue_send(send_req("kbbb"))?;
            Ok(HookOutcome::Done)
        })
        .await
        .unwrap();

        run_hook(&mut st, &ids, |ctx| {
            let head = ctx.take_outbox_head()?.unwrap();
            assert_eq!(head.transaction.to, "kaaa");
            Ok(HookOutcome::Done)
        })
        .await
        .unwrap();

        assert_eq!(st.state().committed.outbox.len(), 1);
        assert_eq!(st.state().committed.outbox[0].transaction.to, "kbbb");
    }
}
