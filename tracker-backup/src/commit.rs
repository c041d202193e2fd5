//! Commit protocol: publish a new snapshot and prune old ones.
//!
//! The remote store has no atomic rename, so a snapshot becomes visible in three steps:
//!
//! 1. upload the blob to `staging/<id>_full.zip.part`
//! 2. upload the blob to `snapshots/<id>_full.zip`
//! 3. upload an empty `snapshots/<id>_full.zip.ready` marker
//!
//! Only then is the manifest updated. Readers trust an entry only if its marker exists,
//! so a crash anywhere before the manifest write leaves the history unchanged; the
//! orphaned staging/blob files are inert.
//!
//! After the manifest is written, snapshots pushed out of the history are deleted.
//! Deletion is best-effort and does not affect the result of the commit.

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::{
    Result,
    engine::BackupEngine,
    error::BackupError,
    item::Item,
    manifest::{BackupEntry, Manifest},
};

/// Steps of the commit state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CommitPhase {
    Idle,
    Hashing,
    Uploading,
    Publishing,
    Pruning,
    Done,
    Failed,
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReport {
    /// The published snapshot, now `history[0]`.
    pub entry: BackupEntry,
    /// Entries removed from the history by the retention limit.
    pub pruned: Vec<BackupEntry>,
    /// Number of remote deletions that failed while pruning.
    pub prune_failures: usize,
    /// History length after the commit.
    pub history_len: usize,
}

struct PhaseTracker {
    phase: CommitPhase,
}

impl PhaseTracker {
    fn new() -> Self {
        Self {
            phase: CommitPhase::Idle,
        }
    }

    fn enter(&mut self, next: CommitPhase) {
        debug!(from = %self.phase, to = %next, "commit phase");
        self.phase = next;
    }

    fn fail(&mut self, err: BackupError) -> BackupError {
        warn!(phase = %self.phase, "commit failed: {err}");
        self.phase = CommitPhase::Failed;
        err
    }
}

impl BackupEngine {
    /// Snapshot `items` to the remote store and record it in the manifest.
    ///
    /// An empty collection is rejected with [`BackupError::EmptyCollection`] before anything
    /// is uploaded. Any failure before the manifest is written leaves the manifest unchanged.
    pub async fn commit(&self, items: &[Item], embed_images: bool) -> Result<CommitReport> {
        let mut tracker = PhaseTracker::new();
        if items.is_empty() {
            return Err(tracker.fail(BackupError::EmptyCollection));
        }

        tracker.enter(CommitPhase::Hashing);
        let builder = self.snapshot_builder();
        let blob = builder
            .build(items, embed_images)
            .map_err(|err| tracker.fail(err))?;
        let entry = blob.entry;

        tracker.enter(CommitPhase::Uploading);
        let staging_path = builder.staging_path(&entry);
        self.store
            .upload(&staging_path, blob.bytes.clone())
            .await
            .map_err(|err| tracker.fail(err))?;
        self.store
            .upload(&entry.zip_path, blob.bytes)
            .await
            .map_err(|err| tracker.fail(err))?;

        tracker.enter(CommitPhase::Publishing);
        self.store
            .upload(&entry.ready_path, Bytes::new())
            .await
            .map_err(|err| tracker.fail(err))?;

        tracker.enter(CommitPhase::Pruning);
        let mut manifest = self.manifests.read().await.unwrap_or_default();
        let pruned = manifest.publish(entry.clone(), self.config.retention);
        self.manifests
            .write(&manifest)
            .await
            .map_err(|err| tracker.fail(err))?;

        let prune_failures = self.prune(&pruned, &manifest).await;
        tracker.enter(CommitPhase::Done);
        info!(
            id = %entry.id,
            size = ?entry.size,
            pruned = pruned.len(),
            "backup committed"
        );
        Ok(CommitReport {
            entry,
            pruned,
            prune_failures,
            history_len: manifest.history.len(),
        })
    }

    /// Delete blobs and markers of entries no longer in the manifest.
    /// Returns the number of failed deletions.
    async fn prune(&self, removed: &[BackupEntry], manifest: &Manifest) -> usize {
        let mut failures = 0;
        for entry in removed {
            // a pruned id can't share paths with a kept entry, but an old manifest
            // written by hand might reuse one
            let still_referenced = manifest
                .history
                .iter()
                .any(|kept| kept.zip_path == entry.zip_path);
            if still_referenced {
                continue;
            }
            for path in [&entry.zip_path, &entry.ready_path] {
                if path.is_empty() {
                    continue;
                }
                if let Err(err) = self.store.delete(path).await {
                    warn!("failed to delete pruned snapshot file {path}: {err}");
                    failures += 1;
                }
            }
        }
        failures
    }
}
