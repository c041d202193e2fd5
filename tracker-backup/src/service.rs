//! User-facing backup operations.
//!
//! [`BackupService`] sits between a front end and the [`BackupEngine`]: it turns errors into
//! short notifications, asks before an overwrite, and handles local archive export/import.
//! Error details go to the log, not to the user.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::NaiveDate;
use snafu::prelude::*;
use tracing::{info, warn};

use crate::{
    Result,
    clock::{Clock, SystemClock},
    codec::{ArchiveCodec, ZipArchiveCodec},
    commit::CommitReport,
    csv::{export_csv, import_csv},
    engine::BackupEngine,
    error::{BackupError, IoSnafu, ValidationSnafu},
    item::normalize_records,
    manifest::BackupEntry,
    restore::{RestoreMode, RestoreReport, apply_items},
    state::LocalCollection,
};

/// Front-end callbacks.
#[async_trait]
pub trait UserInteraction: Send + Sync {
    /// Show a short message.
    async fn notify(&self, message: &str);

    /// Ask a yes/no question; `true` means proceed.
    async fn confirm(&self, message: &str) -> bool;
}

#[derive(Debug)]
pub enum RestoreOutcome {
    Restored(RestoreReport),
    /// The user declined the overwrite confirmation.
    Cancelled,
    /// Restore failed; the collection is unchanged.
    Failed(BackupError),
}

impl RestoreOutcome {
    pub fn report(&self) -> Option<&RestoreReport> {
        match self {
            Self::Restored(report) => Some(report),
            _ => None,
        }
    }
}

const MSG_NOT_CONFIGURED: &str = "Remote backup is not configured.";
const MSG_NOTHING_TO_BACK_UP: &str = "Nothing to back up yet.";
const MSG_BACKUP_FAILED: &str = "Backup failed. Check the connection and try again.";
const MSG_RESTORE_FAILED: &str = "Restore failed. Local data was not changed.";
const MSG_IMPORT_FAILED: &str = "Import failed. Local data was not changed.";

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Default file name for a local export.
pub fn default_export_name(date: NaiveDate) -> String {
    format!("tracker_backup_{}.zip", date.format("%Y-%m-%d"))
}

pub struct BackupService {
    engine: Option<BackupEngine>,
    collection: LocalCollection,
    ui: Arc<dyn UserInteraction>,
    codec: Arc<dyn ArchiveCodec>,
    clock: Arc<dyn Clock>,
    embed_images: bool,
}

impl std::fmt::Debug for BackupService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupService")
            .field("engine", &self.engine)
            .field("items", &self.collection.len())
            .finish_non_exhaustive()
    }
}

impl BackupService {
    /// `engine` is `None` when no remote target is configured. Local export and import
    /// still work in that case.
    pub fn new(
        engine: Option<BackupEngine>,
        collection: LocalCollection,
        ui: Arc<dyn UserInteraction>,
    ) -> Self {
        let (codec, clock, embed_images): (Arc<dyn ArchiveCodec>, Arc<dyn Clock>, bool) =
            match &engine {
                Some(engine) => (
                    engine.codec().clone(),
                    engine.clock().clone(),
                    engine.config().embed_images,
                ),
                None => (Arc::new(ZipArchiveCodec), Arc::new(SystemClock), true),
            };
        Self {
            engine,
            collection,
            ui,
            codec,
            clock,
            embed_images,
        }
    }

    #[must_use]
    pub fn with_embed_images(mut self, embed_images: bool) -> Self {
        self.embed_images = embed_images;
        self
    }

    pub fn engine(&self) -> Option<&BackupEngine> {
        self.engine.as_ref()
    }

    pub fn collection(&self) -> &LocalCollection {
        &self.collection
    }

    async fn require_engine(&self) -> Option<&BackupEngine> {
        if self.engine.is_none() {
            self.ui.notify(MSG_NOT_CONFIGURED).await;
        }
        self.engine.as_ref()
    }

    /// Commit a snapshot of the current collection.
    pub async fn backup_now(&self) -> Option<CommitReport> {
        let engine = self.require_engine().await?;
        let items = self.collection.snapshot();
        if items.is_empty() {
            self.ui.notify(MSG_NOTHING_TO_BACK_UP).await;
            return None;
        }
        match engine.commit(&items, self.embed_images).await {
            Ok(report) => {
                let message = if report.prune_failures > 0 {
                    format!(
                        "Backup complete ({} items). Some old backups could not be removed.",
                        items.len()
                    )
                } else {
                    format!("Backup complete ({} items).", items.len())
                };
                self.ui.notify(&message).await;
                Some(report)
            }
            Err(err) => {
                warn!("backup failed: {err}");
                self.ui.notify(MSG_BACKUP_FAILED).await;
                None
            }
        }
    }

    /// Snapshots the user can restore, newest first.
    pub async fn restorable(&self) -> Vec<BackupEntry> {
        let Some(engine) = self.require_engine().await else {
            return Vec::new();
        };
        engine.list_restorable().await
    }

    /// Restore the snapshot `id`. Overwrite needs confirmation.
    pub async fn restore(&self, id: &str, mode: RestoreMode) -> RestoreOutcome {
        let Some(engine) = self.require_engine().await else {
            return RestoreOutcome::Failed(BackupError::NotConfigured);
        };
        let entry = match engine.find_restorable(id).await {
            Ok(entry) => entry,
            Err(err) => return self.restore_failed(err, MSG_RESTORE_FAILED).await,
        };
        if mode == RestoreMode::Overwrite && !self.confirm_overwrite(&entry.id).await {
            return RestoreOutcome::Cancelled;
        }
        match engine.restore(&entry, mode, &self.collection).await {
            Ok(report) => {
                self.ui
                    .notify(&format!("Restored {} items.", report.restored))
                    .await;
                RestoreOutcome::Restored(report)
            }
            Err(err) => self.restore_failed(err, MSG_RESTORE_FAILED).await,
        }
    }

    async fn confirm_overwrite(&self, source: &str) -> bool {
        let prompt = format!(
            "Replace all {} local items with {source}? This cannot be undone.",
            self.collection.len()
        );
        self.ui.confirm(&prompt).await
    }

    async fn restore_failed(&self, err: BackupError, message: &str) -> RestoreOutcome {
        warn!("{message} {err}");
        self.ui.notify(message).await;
        RestoreOutcome::Failed(err)
    }

    /// Write the current collection to `path`: CSV (with a byte-order mark) when the file
    /// name ends in `.csv`, otherwise a zip archive. A directory gets the default archive
    /// name inside it. Returns the written path.
    pub async fn export(&self, path: &Path) -> Result<PathBuf> {
        let target = if path.is_dir() {
            path.join(default_export_name(self.clock.today()))
        } else {
            path.to_path_buf()
        };
        let items = self.collection.snapshot();
        let bytes = if is_csv_path(&target) {
            format!("\u{feff}{}", export_csv(&items)).into_bytes()
        } else {
            self.codec.encode(&items, self.embed_images)?
        };
        tokio::fs::write(&target, &bytes)
            .await
            .context(IoSnafu { path: &target })?;
        info!(path = %target.display(), bytes = bytes.len(), "exported");
        Ok(target)
    }

    /// Load a `.zip` archive or `.csv` file and apply it to the collection.
    pub async fn import(&self, path: &Path, mode: RestoreMode) -> RestoreOutcome {
        let incoming = match self.read_import(path).await {
            Ok(items) => items,
            Err(err) => return self.restore_failed(err, MSG_IMPORT_FAILED).await,
        };
        let source = path.display().to_string();
        if mode == RestoreMode::Overwrite && !self.confirm_overwrite(&source).await {
            return RestoreOutcome::Cancelled;
        }
        let report = apply_items(&self.collection, mode, incoming);
        info!(path = %source, %mode, restored = report.restored, "import complete");
        self.ui
            .notify(&format!("Imported {} items.", report.restored))
            .await;
        RestoreOutcome::Restored(report)
    }

    async fn read_import(&self, path: &Path) -> Result<Vec<crate::item::Item>> {
        let data = tokio::fs::read(path).await.context(IoSnafu { path })?;
        let records = if is_csv_path(path) {
            import_csv(csv_text(path, &data)?)
        } else {
            self.codec.decode(&data)?
        };
        Ok(normalize_records(records))
    }
}

fn is_csv_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

/// CSV file contents as text. A zip or non-UTF-8 file is refused rather than parsed lossily.
fn csv_text<'a>(path: &Path, data: &'a [u8]) -> Result<&'a str> {
    if data.starts_with(ZIP_MAGIC) {
        return ValidationSnafu {
            message: format!("{} is a zip archive, not CSV", path.display()),
        }
        .fail();
    }
    std::str::from_utf8(data).map_err(|err| BackupError::Validation {
        message: format!("{} is not UTF-8 text: {err}", path.display()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::BackupConfig,
        item::Item,
        test_util::{FixedClock, MemoryStore, ScriptedInteraction, sample_items},
    };

    fn service(
        store: Arc<MemoryStore>,
        items: Vec<Item>,
        ui: Arc<ScriptedInteraction>,
    ) -> BackupService {
        let engine = BackupEngine::with_parts(
            store,
            Arc::new(ZipArchiveCodec),
            Arc::new(FixedClock::at("2026-10-16T08:00:00.000Z")),
            BackupConfig::default().root("TrackerBackups"),
        );
        BackupService::new(Some(engine), LocalCollection::new(items), ui)
    }

    #[test]
    fn export_name() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        assert_eq!(default_export_name(date), "tracker_backup_2026-10-16.zip");
    }

    #[tokio::test]
    async fn unconfigured_service_notifies() {
        let ui = Arc::new(ScriptedInteraction::new());
        let service = BackupService::new(None, LocalCollection::new(sample_items()), ui.clone());
        assert!(service.backup_now().await.is_none());
        assert!(service.restorable().await.is_empty());
        assert_eq!(ui.notifications(), [MSG_NOT_CONFIGURED, MSG_NOT_CONFIGURED]);
    }

    #[tokio::test]
    async fn backup_failure_is_generic() {
        let store = Arc::new(MemoryStore::new());
        store.fail_uploads_matching("/staging/");
        let ui = Arc::new(ScriptedInteraction::new());
        let service = service(store, sample_items(), ui.clone());
        assert!(service.backup_now().await.is_none());
        assert_eq!(ui.notifications(), [MSG_BACKUP_FAILED]);
    }

    #[tokio::test]
    async fn declined_overwrite_is_cancelled() {
        let store = Arc::new(MemoryStore::new());
        let ui = Arc::new(ScriptedInteraction::answering([false]));
        let service = service(store, sample_items(), ui.clone());
        let report = service.backup_now().await.unwrap();
        service.collection().replace(vec![Item::new("new", "Bike", 700.0)]);

        let outcome = service
            .restore(&report.entry.id, RestoreMode::Overwrite)
            .await;
        assert!(matches!(outcome, RestoreOutcome::Cancelled));
        assert_eq!(ui.prompts().len(), 1);
        assert_eq!(service.collection().snapshot()[0].id, "new");
    }

    #[tokio::test]
    async fn merge_restore_needs_no_confirmation() {
        let store = Arc::new(MemoryStore::new());
        let ui = Arc::new(ScriptedInteraction::new());
        let service = service(store, sample_items(), ui.clone());
        let report = service.backup_now().await.unwrap();
        service.collection().replace(vec![Item::new("new", "Bike", 700.0)]);

        let outcome = service.restore(&report.entry.id, RestoreMode::Merge).await;
        assert_eq!(outcome.report().map(|r| r.total), Some(4));
        assert!(ui.prompts().is_empty());
    }

    #[tokio::test]
    async fn unknown_snapshot_fails_without_change() {
        let store = Arc::new(MemoryStore::new());
        let ui = Arc::new(ScriptedInteraction::answering([true]));
        let service = service(store, sample_items(), ui.clone());
        service.backup_now().await.unwrap();

        let outcome = service.restore("nope", RestoreMode::Overwrite).await;
        assert!(matches!(
            outcome,
            RestoreOutcome::Failed(BackupError::SnapshotNotFound { .. })
        ));
        assert_eq!(service.collection().len(), 3);
        assert_eq!(ui.notifications().last().map(String::as_str), Some(MSG_RESTORE_FAILED));
    }

    #[tokio::test]
    async fn export_then_import_csv_and_zip() {
        let temp = tempfile::tempdir().unwrap();
        let ui = Arc::new(ScriptedInteraction::answering([true]));
        let service = BackupService::new(None, LocalCollection::new(sample_items()), ui)
            .with_embed_images(true);

        let zip_path = service.export(temp.path()).await.unwrap();
        assert!(
            zip_path
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("tracker_backup_")
        );

        let csv_path = temp.path().join("items.csv");
        std::fs::write(&csv_path, crate::csv::export_csv(&sample_items())).unwrap();

        service.collection().replace(Vec::new());
        let outcome = service.import(&zip_path, RestoreMode::Overwrite).await;
        assert_eq!(outcome.report().map(|r| r.total), Some(3));
        assert_eq!(service.collection().snapshot(), sample_items());

        let outcome = service.import(&csv_path, RestoreMode::Merge).await;
        assert_eq!(outcome.report().map(|r| r.total), Some(3));
    }

    #[tokio::test]
    async fn csv_export_round_trips() {
        let temp = tempfile::tempdir().unwrap();
        let ui = Arc::new(ScriptedInteraction::new());
        let service = BackupService::new(None, LocalCollection::new(sample_items()), ui);

        let path = service.export(&temp.path().join("items.csv")).await.unwrap();
        let data = std::fs::read(&path).unwrap();
        assert!(data.starts_with("\u{feff}id,type,name".as_bytes()));

        let outcome = service.import(&path, RestoreMode::Merge).await;
        assert_eq!(outcome.report().map(|r| r.total), Some(3));
        let names: Vec<_> = service
            .collection()
            .snapshot()
            .into_iter()
            .map(|item| item.name)
            .collect();
        assert_eq!(names, ["Camera", "Hiking boots", "Espresso machine"]);
    }

    #[tokio::test]
    async fn zip_bytes_named_csv_are_refused() {
        let temp = tempfile::tempdir().unwrap();
        let ui = Arc::new(ScriptedInteraction::new());
        let service = BackupService::new(None, LocalCollection::new(sample_items()), ui.clone());

        let path = temp.path().join("items.csv");
        let archive = ZipArchiveCodec.encode(&sample_items(), true).unwrap();
        std::fs::write(&path, archive).unwrap();

        let outcome = service.import(&path, RestoreMode::Merge).await;
        assert!(matches!(
            outcome,
            RestoreOutcome::Failed(BackupError::Validation { .. })
        ));
        assert_eq!(service.collection().snapshot(), sample_items());
        assert_eq!(ui.notifications(), [MSG_IMPORT_FAILED]);

        std::fs::write(&path, [0xff, 0xfe, b'i', b'd']).unwrap();
        let outcome = service.import(&path, RestoreMode::Merge).await;
        assert!(matches!(outcome, RestoreOutcome::Failed(_)));
        assert_eq!(service.collection().len(), 3);
    }
}
