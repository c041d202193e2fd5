//! Listing restorable snapshots and restoring one into the local collection.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tracing::{debug, info, warn};

use crate::{
    Result,
    engine::BackupEngine,
    error::{BackupError, IntegritySnafu, SnapshotNotReadySnafu},
    item::{Item, normalize_records},
    manifest::BackupEntry,
    merge::merge_items,
    snapshot::sha256_hex,
    state::LocalCollection,
};

/// How restored records are applied to the local collection.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum RestoreMode {
    /// Replace the local collection.
    Overwrite,
    /// Merge into the local collection by id and content signature.
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub mode: RestoreMode,
    /// Records decoded from the snapshot.
    pub restored: usize,
    /// Collection size after the restore.
    pub total: usize,
}

impl BackupEngine {
    /// Snapshots in the manifest whose ready marker exists, newest first, at most
    /// `display_count` of them. Never fails: an unreadable manifest is an empty list and
    /// an entry whose marker can't be checked is left out.
    pub async fn list_restorable(&self) -> Vec<BackupEntry> {
        let Some(manifest) = self.manifests.read().await else {
            return Vec::new();
        };
        let checks = manifest.history.iter().map(|entry| async move {
            if entry.ready_path.is_empty() {
                return false;
            }
            match self.store.exists(&entry.ready_path).await {
                Ok(ready) => ready,
                Err(err) => {
                    warn!("cannot check ready marker {}: {err}", entry.ready_path);
                    false
                }
            }
        });
        let ready = join_all(checks).await;
        let restorable: Vec<BackupEntry> = manifest
            .history
            .into_iter()
            .zip(ready)
            .filter_map(|(entry, ready)| ready.then_some(entry))
            .take(self.config.display_count)
            .collect();
        debug!(count = restorable.len(), "restorable snapshots");
        restorable
    }

    /// Restorable snapshot with the given id.
    pub async fn find_restorable(&self, id: &str) -> Result<BackupEntry> {
        self.list_restorable()
            .await
            .into_iter()
            .find(|entry| entry.id == id)
            .ok_or_else(|| BackupError::SnapshotNotFound { id: id.to_string() })
    }

    /// Download, verify and decode a snapshot, then apply it to `collection`.
    ///
    /// Every check happens before the collection is touched; on error the collection is
    /// unchanged. On success it is replaced in one swap.
    pub async fn restore(
        &self,
        entry: &BackupEntry,
        mode: RestoreMode,
        collection: &LocalCollection,
    ) -> Result<RestoreReport> {
        let incoming = self.fetch_snapshot(entry).await?;
        let report = apply_items(collection, mode, incoming);
        info!(
            id = %entry.id,
            %mode,
            restored = report.restored,
            total = report.total,
            "restore complete"
        );
        Ok(report)
    }

    /// Restore the newest restorable snapshot.
    pub async fn restore_latest(
        &self,
        mode: RestoreMode,
        collection: &LocalCollection,
    ) -> Result<RestoreReport> {
        let latest = self
            .list_restorable()
            .await
            .into_iter()
            .next()
            .ok_or(BackupError::NoRestorableSnapshot)?;
        self.restore(&latest, mode, collection).await
    }

    /// Download and verify a snapshot, returning its normalized items.
    pub async fn fetch_snapshot(&self, entry: &BackupEntry) -> Result<Vec<Item>> {
        let ready = !entry.ready_path.is_empty() && self.store.exists(&entry.ready_path).await?;
        ensure!(
            ready,
            SnapshotNotReadySnafu {
                id: &entry.id,
                ready_path: &entry.ready_path,
            }
        );

        let bytes = self.store.download(&entry.zip_path).await?;
        if let Some(size) = entry.size {
            ensure!(
                bytes.len() as u64 == size,
                IntegritySnafu {
                    path: &entry.zip_path,
                    message: format!("expected {size} bytes, downloaded {}", bytes.len()),
                }
            );
        }
        if !entry.sha256.is_empty() {
            let actual = sha256_hex(&bytes);
            ensure!(
                actual.eq_ignore_ascii_case(&entry.sha256),
                IntegritySnafu {
                    path: &entry.zip_path,
                    message: format!("sha256 {actual} does not match {}", entry.sha256),
                }
            );
        } else {
            debug!(id = %entry.id, "no hash recorded, size check only");
        }

        let records = self.codec.decode(&bytes)?;
        Ok(normalize_records(records))
    }
}

/// Apply already-normalized items to the collection in the given mode.
pub fn apply_items(
    collection: &LocalCollection,
    mode: RestoreMode,
    incoming: Vec<Item>,
) -> RestoreReport {
    let restored = incoming.len();
    let total = collection.update(|items| {
        *items = match mode {
            RestoreMode::Overwrite => incoming,
            RestoreMode::Merge => merge_items(items, incoming),
        };
        items.len()
    });
    RestoreReport {
        mode,
        restored,
        total,
    }
}

#[cfg(test)]
mod tests {
    use std::{str::FromStr, sync::Arc};

    use super::*;
    use crate::{
        codec::ZipArchiveCodec,
        config::BackupConfig,
        test_util::{FixedClock, MemoryStore, StoreOp},
    };

    fn engine(store: Arc<MemoryStore>) -> BackupEngine {
        BackupEngine::with_parts(
            store,
            Arc::new(ZipArchiveCodec),
            Arc::new(FixedClock::at("2026-10-16T08:00:00.000Z")),
            BackupConfig::default().root("TrackerBackups"),
        )
    }

    #[test]
    fn mode_parses_from_cli_strings() {
        assert_eq!(RestoreMode::from_str("merge").unwrap(), RestoreMode::Merge);
        assert_eq!(
            RestoreMode::from_str("Overwrite").unwrap(),
            RestoreMode::Overwrite
        );
        assert!(RestoreMode::from_str("replace").is_err());
        assert_eq!(RestoreMode::Overwrite.to_string(), "overwrite");
    }

    #[tokio::test]
    async fn missing_marker_is_not_ready() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let report = engine
            .commit(&[Item::new("a", "Lamp", 20.0)], true)
            .await
            .unwrap();
        store.remove(&report.entry.ready_path);

        assert!(engine.list_restorable().await.is_empty());
        let collection = LocalCollection::new(vec![Item::new("local", "Desk", 90.0)]);
        let err = engine
            .restore(&report.entry, RestoreMode::Overwrite, &collection)
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::SnapshotNotReady { .. }));
        assert_eq!(collection.snapshot(), [Item::new("local", "Desk", 90.0)]);
        assert!(
            !store
                .ops()
                .contains(&StoreOp::Download(report.entry.zip_path.clone()))
        );
    }

    #[tokio::test]
    async fn download_failure_leaves_collection_unchanged() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let report = engine
            .commit(&[Item::new("a", "Lamp", 20.0)], true)
            .await
            .unwrap();
        store.fail_downloads_matching("/snapshots/");

        let collection = LocalCollection::new(vec![Item::new("local", "Desk", 90.0)]);
        for mode in [RestoreMode::Overwrite, RestoreMode::Merge] {
            let err = engine
                .restore(&report.entry, mode, &collection)
                .await
                .unwrap_err();
            assert!(matches!(err, BackupError::Remote { code: 503, .. }));
            assert_eq!(collection.snapshot(), [Item::new("local", "Desk", 90.0)]);
        }
    }

    #[tokio::test]
    async fn tampered_blob_fails_hash_check() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let report = engine
            .commit(&[Item::new("a", "Lamp", 20.0)], true)
            .await
            .unwrap();
        let mut bytes = store.get(&report.entry.zip_path).unwrap().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        store.put(&report.entry.zip_path, bytes);

        let collection = LocalCollection::new(vec![Item::new("local", "Desk", 90.0)]);
        let err = engine
            .restore(&report.entry, RestoreMode::Overwrite, &collection)
            .await
            .unwrap_err();
        assert!(err.is_integrity());
        assert_eq!(collection.snapshot()[0].id, "local");
    }

    #[tokio::test]
    async fn entry_without_hash_uses_size_only() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let report = engine
            .commit(&[Item::new("a", "Lamp", 20.0)], true)
            .await
            .unwrap();
        let mut entry = report.entry.clone();
        entry.sha256 = String::new();

        let collection = LocalCollection::default();
        engine
            .restore(&entry, RestoreMode::Overwrite, &collection)
            .await
            .unwrap();
        assert_eq!(collection.len(), 1);

        entry.size = Some(3);
        let err = engine
            .restore(&entry, RestoreMode::Overwrite, &collection)
            .await
            .unwrap_err();
        assert!(err.is_integrity());
    }

    #[tokio::test]
    async fn restore_latest_without_history() {
        let store = Arc::new(MemoryStore::new());
        store.put("TrackerBackups/manifest.json", b"[]".to_vec());
        let err = engine(store)
            .restore_latest(RestoreMode::Merge, &LocalCollection::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::NoRestorableSnapshot));
    }

    #[test]
    fn apply_overwrite_and_merge() {
        let collection = LocalCollection::new(vec![Item::new("a", "Lamp", 20.0)]);
        let report = apply_items(
            &collection,
            RestoreMode::Merge,
            vec![Item::new("b", "Chair", 45.0)],
        );
        assert_eq!((report.restored, report.total), (1, 2));

        let report = apply_items(
            &collection,
            RestoreMode::Overwrite,
            vec![Item::new("c", "Rug", 60.0)],
        );
        assert_eq!((report.restored, report.total), (1, 1));
        assert_eq!(collection.snapshot()[0].id, "c");
    }
}
