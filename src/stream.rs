// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Stream facade: the user-facing pipeline object and its workers.
//!
//! [`Stream::run`] drives three cooperative tasks to completion under one
//! future (no spawned threads - all state mutation interleaves at await
//! points):
//!
//! - **Inbox worker**: waits on the assembler, moves the next in-order
//!   transaction into the durable inbox slot (together with
//!   `last_popped_id`, in one commit), then runs `on_transaction` under the
//!   hook protocol.
//! - **Outbox worker**: sends the head outbox entry with the
//!   UNKNOWN-resolver algorithm, then dispatches `on_send_success` /
//!   `on_send_failure`, whose transactional body removes the entry.
//! - **Socket listener**: the push socket, feeding the assembler.
//!
//! A single `tokio::sync::Mutex` over the state store serializes every
//! durable read and write. The outbox worker parks on a `Notify` bell rung
//! by any commit that leaves the outbox non-empty.
//!
//! # Send algorithm
//!
//! For the head entry, under the mutex:
//!
//! 1. `Sent` → already delivered in a previous life; report success.
//! 2. `Unknown` → ask the node's extended search for the entry's `ref`
//!    tag. A match means the POST landed before the crash: mark `Sent`.
//!    No match: mark `Pending` and fall through.
//! 3. `Pending` → mark `Unknown` and **commit before issuing the POST**,
//!    so a crash mid-flight is recoverable via step 2. Then POST once.
//!    Success → `Sent`. Structured rejection → `Pending` + failure hook.
//!    No answer → back to step 2.
//!
//! The `ref` tag is fixed at enqueue, so any number of retry cycles leave
//! at most one matching transaction on the node.

use crate::api::{ApiClient, NodeApi, WireSend};
use crate::assembler::TransactionStream;
use crate::config::StreamConfig;
use crate::error::{ApiError, Result, StreamError};
use crate::hooks::{run_hook, HookContext, HookOutcome, StreamHandler};
use crate::ids::IdSource;
use crate::meta::serialize_meta_with_ref;
use crate::retry::Backoff;
use crate::socket::run_socket;
use crate::store::{OutboxStatus, StateStore};
use crate::transaction::{SendRequest, TransactionFilter};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, MutexGuard, Notify};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

struct StreamInner<A: NodeApi> {
    api: Arc<A>,
    config: StreamConfig,
    /// The per-stream mutex: all durable reads and writes happen under it.
    store: Mutex<StateStore>,
    assembler: Arc<TransactionStream<A>>,
    ids: Arc<IdSource>,
    /// Rung by every commit that leaves the outbox non-empty.
    outbox_bell: Notify,
    status_tx: watch::Sender<bool>,
    status_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    running: AtomicBool,
}

/// A reliable transaction stream over one state directory.
///
/// Cloning is cheap and shares the underlying pipeline.
pub struct Stream<A: NodeApi = ApiClient> {
    inner: Arc<StreamInner<A>>,
}

impl<A: NodeApi> Clone for Stream<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

enum SendOutcome {
    Delivered,
    Rejected(ApiError),
}

impl Stream<ApiClient> {
    /// Create a fresh state directory for `endpoint`.
    ///
    /// Probes the node for its current last transaction ID so history is
    /// not replayed. Fails if the directory already holds a state.
    pub async fn create(
        dir: impl AsRef<Path>,
        endpoint: &str,
        address: Option<String>,
        include_mined: bool,
    ) -> Result<()> {
        let config = StreamConfig::default();
        let api = ApiClient::new(endpoint, &config)?;
        Self::create_with(dir, endpoint, address, include_mined, api).await
    }

    /// Open an existing state directory.
    ///
    /// `revision` is the externally recorded two-phase handshake token;
    /// pass it after a crash between `prepare` and `commit`.
    pub async fn open(dir: impl AsRef<Path>, revision: Option<u64>) -> Result<Self> {
        let config = StreamConfig::default();
        Self::open_config(dir, revision, config).await
    }

    /// Open with explicit tunables.
    pub async fn open_config(
        dir: impl AsRef<Path>,
        revision: Option<u64>,
        config: StreamConfig,
    ) -> Result<Self> {
        let store = StateStore::open(dir, revision).await?;
        let api = ApiClient::new(&store.state().endpoint, &config)?;
        Ok(Self::from_parts(store, api, config))
    }
}

impl<A: NodeApi> Stream<A> {
    /// [`create`](Stream::create) against an injected node API.
    pub async fn create_with(
        dir: impl AsRef<Path>,
        endpoint: &str,
        address: Option<String>,
        include_mined: bool,
        api: A,
    ) -> Result<()> {
        let last_popped_id = api.last_transaction_id().await?.unwrap_or(-1);
        StateStore::create(
            dir,
            endpoint.to_string(),
            include_mined,
            address,
            last_popped_id,
        )
        .await?;
        Ok(())
    }

    /// [`open`](Stream::open) against an injected node API.
    pub async fn open_with(
        dir: impl AsRef<Path>,
        revision: Option<u64>,
        api: A,
        config: StreamConfig,
    ) -> Result<Self> {
        let store = StateStore::open(dir, revision).await?;
        Ok(Self::from_parts(store, api, config))
    }

    fn from_parts(store: StateStore, api: A, config: StreamConfig) -> Self {
        let api = Arc::new(api);
        let (status_tx, status_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let filter = TransactionFilter::new(
            store.state().address.clone(),
            store.state().include_mined,
        );
        let assembler = Arc::new(TransactionStream::new(
            Arc::clone(&api),
            filter,
            store.state().last_popped_id,
            config.clone(),
            status_rx.clone(),
        ));
        Self {
            inner: Arc::new(StreamInner {
                api,
                config,
                store: Mutex::new(store),
                assembler,
                ids: Arc::new(IdSource::new()),
                outbox_bell: Notify::new(),
                status_tx,
                status_rx,
                shutdown_tx,
                shutdown_rx,
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Run the pipeline until `close()` or a fatal error.
    ///
    /// The error contract mirrors the hook protocol: a failed
    /// `on_transaction` aborts its context and re-raises here, and the
    /// next `run()` (or process restart) replays the same inbox entry.
    pub async fn run<H: StreamHandler>(&self, handler: &H) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(StreamError::InvalidState {
                expected: "not running".to_string(),
                actual: "running".to_string(),
            });
        }
        info!("stream running");

        let result = tokio::try_join!(
            self.inbox_worker(handler).instrument(info_span!("inbox")),
            self.outbox_worker(handler).instrument(info_span!("outbox")),
            run_socket(
                Arc::clone(&self.inner.api),
                Arc::clone(&self.inner.assembler),
                self.inner.status_tx.clone(),
                Arc::clone(&self.inner.ids),
                self.inner.shutdown_rx.clone(),
                self.inner.config.clone(),
            )
            .instrument(info_span!("socket")),
        )
        .map(|_| ());

        self.inner.running.store(false, Ordering::SeqCst);
        info!("stream stopped");
        result
    }

    /// Close the socket and stop the workers.
    pub fn close(&self) {
        let _ = self.inner.shutdown_tx.send(true);
    }

    /// Last-known socket liveness.
    pub fn is_up(&self) -> bool {
        *self.inner.status_rx.borrow()
    }

    /// Balance of an address, retried until the timeout.
    pub async fn get_balance(&self, address: &str, timeout: Option<Duration>) -> Result<u64> {
        let deadline = timeout.map(|t| Instant::now() + t);
        self.inner.api.balance(address, deadline).await
    }

    /// Run a hook body under the commit protocol.
    ///
    /// The timeout applies to mutex acquisition only; once the body runs,
    /// it runs to completion. Returns `false` on acquisition timeout.
    pub async fn begin<F>(&self, body: F, timeout: Option<Duration>) -> Result<bool>
    where
        F: FnOnce(&mut HookContext<'_>) -> Result<HookOutcome>,
    {
        let mut guard = match timeout {
            Some(t) => match tokio::time::timeout(t, self.inner.store.lock()).await {
                Ok(guard) => guard,
                Err(_) => return Ok(false),
            },
            None => self.inner.store.lock().await,
        };
        let result = run_hook(&mut guard, &self.inner.ids, body).await;
        self.ring_bell_if_pending(&guard);
        drop(guard);
        result.map(|()| true)
    }

    /// Enqueue a send; sugar for [`begin`](Stream::begin).
    ///
    /// Returns the tracking ID, or `None` on acquisition timeout.
    pub async fn send(
        &self,
        tx: SendRequest,
        timeout: Option<Duration>,
    ) -> Result<Option<Uuid>> {
        let mut id = None;
        let entered = self
            .begin(
                |ctx| {
                    id = Some(ctx.enqueue_send(tx)?);
                    Ok(HookOutcome::Done)
                },
                timeout,
            )
            .await?;
        Ok(if entered { id } else { None })
    }

    fn ring_bell_if_pending(&self, guard: &MutexGuard<'_, StateStore>) {
        if !guard.state().committed.outbox.is_empty() {
            self.inner.outbox_bell.notify_one();
        }
    }

    // =========================================================================
    // Inbox worker
    // =========================================================================

    async fn inbox_worker<H: StreamHandler>(&self, handler: &H) -> Result<()> {
        let mut shutdown = self.inner.shutdown_rx.clone();
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            let Some(mut guard) = self.fetch_slot(&mut shutdown).await? else {
                return Ok(());
            };
            let Some(tx) = guard.state().committed.inbox.clone() else {
                continue;
            };
            crate::metrics::record_transaction_delivered(tx.id);

            let result = run_hook(&mut guard, &self.inner.ids, |ctx| {
                ctx.take_inbox()?;
                handler.on_transaction(ctx, &tx)
            })
            .await;

            self.ring_bell_if_pending(&guard);
            drop(guard);
            result?;
        }
    }

    /// Acquire the mutex with a filled inbox slot.
    ///
    /// If the slot is already filled (a previous hook attempt did not
    /// commit), returns the held mutex immediately. Otherwise releases,
    /// waits on the assembler, re-acquires, and atomically persists both
    /// the inbox slot and `last_popped_id` in one commit.
    ///
    /// Returns `None` on shutdown.
    async fn fetch_slot(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<MutexGuard<'_, StateStore>>> {
        loop {
            let guard = self.inner.store.lock().await;
            guard.assert_no_prepared();
            if guard.state().committed.inbox.is_some() {
                return Ok(Some(guard));
            }
            drop(guard);

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(None);
                    }
                    continue;
                }
                waited = self.inner.assembler.wait() => waited?,
            }

            let mut guard = self.inner.store.lock().await;
            if guard.state().committed.inbox.is_none() {
                match self.inner.assembler.try_pop().await {
                    Some(tx) => {
                        let state = guard.state_mut();
                        state.last_popped_id = tx.id;
                        state.committed.inbox = Some(tx);
                        guard.commit().await?;
                    }
                    None => continue,
                }
            }
            return Ok(Some(guard));
        }
    }

    // =========================================================================
    // Outbox worker
    // =========================================================================

    async fn outbox_worker<H: StreamHandler>(&self, handler: &H) -> Result<()> {
        let mut shutdown = self.inner.shutdown_rx.clone();
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            let notified = self.inner.outbox_bell.notified();
            let mut guard = self.inner.store.lock().await;
            guard.assert_no_prepared();

            let Some(entry) = guard.state().committed.outbox.first().cloned() else {
                drop(guard);
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = notified => {}
                }
                continue;
            };

            let Some(outcome) = self.send_outbox_head(&mut guard, &mut shutdown).await? else {
                return Ok(());
            };

            let result = match outcome {
                SendOutcome::Delivered => {
                    run_hook(&mut guard, &self.inner.ids, |ctx| {
                        handler.on_send_success(ctx, &entry.transaction, entry.id)
                    })
                    .await
                }
                SendOutcome::Rejected(error) => {
                    run_hook(&mut guard, &self.inner.ids, |ctx| {
                        handler.on_send_failure(ctx, &entry.transaction, entry.id, &error)
                    })
                    .await
                }
            };
            drop(guard);
            result?;
        }
    }

    /// Drive the head outbox entry to a verdict (see module docs).
    ///
    /// Runs under the held mutex; every status transition is committed
    /// before the next network interaction. Returns `None` on shutdown.
    async fn send_outbox_head(
        &self,
        guard: &mut MutexGuard<'_, StateStore>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<SendOutcome>> {
        let mut backoff = Backoff::new(self.inner.config.reconnect_retry());

        loop {
            if *shutdown.borrow() {
                return Ok(None);
            }
            let Some(entry) = guard.state().committed.outbox.first().cloned() else {
                return Err(StreamError::InvalidState {
                    expected: "non-empty outbox".to_string(),
                    actual: "empty outbox".to_string(),
                });
            };

            match entry.status {
                OutboxStatus::Sent => {
                    crate::metrics::record_send("delivered");
                    return Ok(Some(SendOutcome::Delivered));
                }

                OutboxStatus::Unknown => {
                    match self.inner.api.ref_exists(&entry.ref_id.to_string()).await {
                        Ok(found) => {
                            crate::metrics::record_resolver(found);
                            backoff.reset();
                            // A hit means the POST landed; a miss reverts to
                            // Pending for a fresh POST.
                            set_head_status(
                                guard,
                                if found {
                                    OutboxStatus::Sent
                                } else {
                                    OutboxStatus::Pending
                                },
                            );
                            guard.commit().await?;
                        }
                        Err(e) if e.is_retryable() => {
                            let delay = backoff.next();
                            if backoff.exhausted() {
                                return Err(e);
                            }
                            warn!(error = %e, "resolver unreachable, backing off");
                            self.sleep_or_shutdown(delay, shutdown).await;
                        }
                        Err(e) => return Err(e),
                    }
                }

                OutboxStatus::Pending => {
                    let wire = WireSend {
                        privatekey: entry.transaction.private_key.clone(),
                        to: entry.transaction.to.clone(),
                        amount: entry.transaction.amount,
                        metadata: serialize_meta_with_ref(
                            &entry.transaction.meta,
                            &entry.ref_id.to_string(),
                        ),
                    };

                    // Durable UNKNOWN before the POST: a crash during the
                    // network call is recoverable via the resolver.
                    set_head_status(guard, OutboxStatus::Unknown);
                    guard.commit().await?;

                    match self.inner.api.submit_transaction(wire).await {
                        Ok(()) => {
                            crate::metrics::record_send("delivered");
                            set_head_status(guard, OutboxStatus::Sent);
                            guard.commit().await?;
                            return Ok(Some(SendOutcome::Delivered));
                        }
                        Err(StreamError::Api(error)) => {
                            crate::metrics::record_send("rejected");
                            set_head_status(guard, OutboxStatus::Pending);
                            guard.commit().await?;
                            return Ok(Some(SendOutcome::Rejected(error)));
                        }
                        Err(e) if e.is_retryable() => {
                            crate::metrics::record_send("unknown");
                            let delay = backoff.next();
                            if backoff.exhausted() {
                                return Err(e);
                            }
                            warn!(error = %e, "send outcome unknown, resolving");
                            self.sleep_or_shutdown(delay, shutdown).await;
                            // Status stays Unknown; the loop re-enters the
                            // resolver.
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    async fn sleep_or_shutdown(&self, delay: Duration, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = shutdown.changed() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn set_head_status(guard: &mut MutexGuard<'_, StateStore>, status: OutboxStatus) {
    if let Some(head) = guard.state_mut().committed.outbox.first_mut() {
        head.status = status;
    }
}
