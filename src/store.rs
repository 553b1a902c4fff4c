// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable state store with a two-phase write protocol.
//!
//! The whole pipeline state is one serialized document. Three file names
//! participate:
//!
//! - `stream.ltn` - the canonical state (`S`)
//! - `stream.mod.ltn` - a pending new version (`S.mod`)
//! - `stream.new.ltn` - used only while creating a fresh directory (`S.new`)
//!
//! # Durability protocol
//!
//! ```text
//! commit:  serialize → write S.mod (fsync) → delete S → rename S.mod → S
//! create:  write S.new (fsync) → rename S.new → S
//! open:    delete S.new
//!          if S exists        → delete S.mod      (incomplete prior commit)
//!          else if S.mod      → rename S.mod → S  (crash between delete and rename)
//!          else               → invalid directory
//! ```
//!
//! At every instant exactly one of `{S, S.mod}` holds a valid prior version,
//! so a crash at any point leaves `open` able to recover.
//!
//! # Revision recovery
//!
//! `open(dir, revision)` inspects `prepared`: if present and its revision
//! equals the caller's, it is promoted to `committed`; otherwise it is
//! discarded. Either way the result is committed back to disk immediately,
//! so a prepared snapshot never survives past one open.

use crate::error::{Result, StreamError};
use crate::transaction::{SendRequest, Transaction};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Canonical state file name.
pub const STATE_FILE: &str = "stream.ltn";
/// Pending-commit file name.
pub const STATE_MOD_FILE: &str = "stream.mod.ltn";
/// Creation-only scratch file name.
pub const STATE_NEW_FILE: &str = "stream.new.ltn";

/// Delivery status of an outbox entry.
///
/// Transitions form `Pending → Unknown → {Pending, Sent}`; `Sent` is
/// terminal until the entry is removed by a send hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutboxStatus {
    /// Not yet handed to the node.
    Pending,
    /// A POST was issued but its outcome is not known on disk. Only exit is
    /// the search-based resolver.
    Unknown,
    /// Confirmed on the node.
    Sent,
}

/// One pending outgoing transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// User-facing tracking ID, assigned at enqueue.
    pub id: Uuid,
    /// Deduplication tag, also attached as `ref=<uuid>` in transaction
    /// metadata. Assigned at enqueue and reused across every retry - this
    /// is the idempotency token with respect to the node.
    #[serde(rename = "ref")]
    pub ref_id: Uuid,
    pub status: OutboxStatus,
    pub transaction: SendRequest,
}

/// The inbox slot and outbox queue, versioned by a revision counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Boxes {
    /// Incremented each time a hook context is opened over this snapshot.
    pub revision: u64,
    /// At most one incoming transaction awaiting user processing.
    pub inbox: Option<Transaction>,
    /// Ordered pending sends.
    pub outbox: Vec<OutboxEntry>,
}

/// The full durable document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredState {
    /// Base URL of the node.
    pub endpoint: String,
    /// Whether mining rewards are observed.
    pub include_mined: bool,
    /// Optional address filter.
    pub address: Option<String>,
    /// Highest transaction ID already handed to the inbox worker, or −1.
    pub last_popped_id: i64,
    pub committed: Boxes,
    /// Present only while a two-phase commit is in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepared: Option<Boxes>,
}

/// Disk-backed store for a [`StoredState`].
#[derive(Debug)]
pub struct StateStore {
    dir: PathBuf,
    state: StoredState,
}

impl StateStore {
    /// Create a fresh state directory.
    ///
    /// `last_popped_id` should be the node's current last transaction ID
    /// (so history is not replayed), or −1 to observe everything.
    /// Fails if the directory already holds a state file.
    pub async fn create(
        dir: impl AsRef<Path>,
        endpoint: String,
        include_mined: bool,
        address: Option<String>,
        last_popped_id: i64,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StreamError::state("create dir", e))?;

        let canonical = dir.join(STATE_FILE);
        let pending = dir.join(STATE_MOD_FILE);
        if path_exists(&canonical).await || path_exists(&pending).await {
            return Err(StreamError::state_msg(
                "create",
                format!("state already exists in {}", dir.display()),
            ));
        }

        let state = StoredState {
            endpoint,
            include_mined,
            address,
            last_popped_id,
            committed: Boxes::default(),
            prepared: None,
        };

        let scratch = dir.join(STATE_NEW_FILE);
        write_document(&scratch, &state).await?;
        tokio::fs::rename(&scratch, &canonical)
            .await
            .map_err(|e| StreamError::state("rename new", e))?;

        info!(dir = %dir.display(), last_popped_id, "created state directory");
        Ok(Self { dir, state })
    }

    /// Open an existing state directory, recovering from any crash residue.
    ///
    /// `revision` is the externally recorded handshake token: a `prepared`
    /// snapshot is promoted iff its revision equals it, and discarded
    /// otherwise. Recovery is persisted before this returns.
    pub async fn open(dir: impl AsRef<Path>, revision: Option<u64>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let canonical = dir.join(STATE_FILE);
        let pending = dir.join(STATE_MOD_FILE);
        let scratch = dir.join(STATE_NEW_FILE);

        // A leftover S.new means create() crashed before its rename; the
        // directory was never valid with it in place.
        remove_if_exists(&scratch, "remove stale new").await?;

        if path_exists(&canonical).await {
            // S is authoritative; any S.mod is an incomplete commit.
            remove_if_exists(&pending, "remove stale mod").await?;
        } else if path_exists(&pending).await {
            // A commit crashed after deleting S but before the rename;
            // S.mod holds the complete new version.
            warn!(dir = %dir.display(), "recovering pending state file");
            tokio::fs::rename(&pending, &canonical)
                .await
                .map_err(|e| StreamError::state("recover mod", e))?;
        } else {
            return Err(StreamError::state_msg(
                "open",
                format!("no state file in {}", dir.display()),
            ));
        }

        let bytes = tokio::fs::read(&canonical)
            .await
            .map_err(|e| StreamError::state("read", e))?;
        let mut state: StoredState = serde_json::from_slice(&bytes)
            .map_err(|e| StreamError::state_msg("decode", e.to_string()))?;

        // Revision recovery.
        if let Some(prepared) = state.prepared.take() {
            if revision == Some(prepared.revision) {
                info!(revision = prepared.revision, "promoting prepared state");
                state.committed = prepared;
            } else {
                info!(
                    prepared_revision = prepared.revision,
                    caller_revision = ?revision,
                    "discarding prepared state"
                );
            }
        }

        let mut store = Self { dir, state };
        // Persist the recovery outcome unconditionally.
        store.commit().await?;
        Ok(store)
    }

    /// Write the current state to disk via the two-phase protocol.
    pub async fn commit(&mut self) -> Result<()> {
        let canonical = self.dir.join(STATE_FILE);
        let pending = self.dir.join(STATE_MOD_FILE);

        write_document(&pending, &self.state).await?;
        remove_if_exists(&canonical, "remove canonical").await?;
        tokio::fs::rename(&pending, &canonical)
            .await
            .map_err(|e| StreamError::state("rename mod", e))?;

        crate::metrics::record_state_commit();
        debug!(revision = self.state.committed.revision, "state committed");
        Ok(())
    }

    /// The state directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state(&self) -> &StoredState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut StoredState {
        &mut self.state
    }

    /// Invariant check for the normal (non-`open`) path: only `open` may
    /// ever observe a prepared snapshot.
    pub fn assert_no_prepared(&self) {
        debug_assert!(
            self.state.prepared.is_none(),
            "prepared state observed outside open()"
        );
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn remove_if_exists(path: &Path, operation: &'static str) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StreamError::state(operation, e)),
    }
}

async fn write_document(path: &Path, state: &StoredState) -> Result<()> {
    let bytes =
        serde_json::to_vec(state).map_err(|e| StreamError::state_msg("encode", e.to_string()))?;
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| StreamError::state("write", e))?;
    file.write_all(&bytes)
        .await
        .map_err(|e| StreamError::state("write", e))?;
    file.sync_all()
        .await
        .map_err(|e| StreamError::state("sync", e))?;
    Ok(())
}
