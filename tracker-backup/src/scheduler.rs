//! Once-per-day automatic backup.
//!
//! [`AutoBackupScheduler::trigger`] is meant to be called after every local save. It
//! commits a snapshot at most once per local calendar day and never runs two commits
//! at the same time; every other call returns [`TriggerOutcome::Skipped`] right away.

use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    commit::CommitReport,
    engine::BackupEngine,
    error::BackupError,
    manifest::BackupEntry,
    state::{LocalCollection, StateStore},
};

/// Mutable scheduler state, guarded by one lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerState {
    pub in_flight: bool,
    pub last_backup_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    /// No remote target.
    NotConfigured,
    EmptyCollection,
    AlreadyBackedUpToday,
    /// Another trigger is committing.
    InFlight,
}

#[derive(Debug)]
pub enum TriggerOutcome {
    Skipped(SkipReason),
    Completed(CommitReport),
    Failed(BackupError),
}

impl TriggerOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Clears the in-flight flag on every exit path of a trigger.
struct InFlightGuard<'a> {
    state: &'a Mutex<SchedulerState>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().in_flight = false;
    }
}

pub struct AutoBackupScheduler {
    engine: Option<BackupEngine>,
    collection: LocalCollection,
    clock: Arc<dyn Clock>,
    state: Mutex<SchedulerState>,
    state_store: Option<Arc<dyn StateStore>>,
    restorable: Mutex<Vec<BackupEntry>>,
}

impl std::fmt::Debug for AutoBackupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoBackupScheduler")
            .field("configured", &self.engine.is_some())
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl AutoBackupScheduler {
    /// `engine` is `None` when no remote target is configured; triggers are then skipped.
    pub fn new(
        engine: Option<BackupEngine>,
        collection: LocalCollection,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine,
            collection,
            clock,
            state: Mutex::new(SchedulerState::default()),
            state_store: None,
            restorable: Mutex::new(Vec::new()),
        }
    }

    /// Persist the backup date to `store` after each successful backup.
    #[must_use]
    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Seed the last backup date, usually from the loaded local state.
    #[must_use]
    pub fn with_last_backup_date(self, date: Option<NaiveDate>) -> Self {
        self.state.lock().last_backup_date = date;
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state.lock().clone()
    }

    /// Restorable snapshots as of the last successful backup or [`refresh`](Self::refresh).
    pub fn restorable(&self) -> Vec<BackupEntry> {
        self.restorable.lock().clone()
    }

    pub async fn refresh(&self) -> Vec<BackupEntry> {
        let Some(engine) = &self.engine else {
            return Vec::new();
        };
        let list = engine.list_restorable().await;
        self.restorable.lock().clone_from(&list);
        list
    }

    /// Commit a snapshot if none was made today and none is in progress.
    pub async fn trigger(&self) -> TriggerOutcome {
        let Some(engine) = &self.engine else {
            return TriggerOutcome::Skipped(SkipReason::NotConfigured);
        };
        let items = self.collection.snapshot();
        if items.is_empty() {
            return TriggerOutcome::Skipped(SkipReason::EmptyCollection);
        }
        let today = self.clock.today();

        let _guard = {
            let mut state = self.state.lock();
            if state.in_flight {
                debug!("auto backup skipped: already running");
                return TriggerOutcome::Skipped(SkipReason::InFlight);
            }
            if state.last_backup_date == Some(today) {
                debug!(%today, "auto backup skipped: already done today");
                return TriggerOutcome::Skipped(SkipReason::AlreadyBackedUpToday);
            }
            state.in_flight = true;
            InFlightGuard { state: &self.state }
        };

        match engine.commit(&items, engine.config().embed_images).await {
            Ok(report) => {
                self.state.lock().last_backup_date = Some(today);
                self.persist_date(today).await;
                self.refresh().await;
                info!(id = %report.entry.id, "auto backup completed");
                TriggerOutcome::Completed(report)
            }
            Err(err) => {
                warn!("auto backup failed: {err}");
                TriggerOutcome::Failed(err)
            }
        }
    }

    async fn persist_date(&self, today: NaiveDate) {
        let Some(store) = &self.state_store else {
            return;
        };
        let result: crate::Result<()> = async {
            let mut state = store.load().await?;
            state.last_backup_date = Some(today);
            store.save(&state).await
        }
        .await;
        if let Err(err) = result {
            warn!("failed to record backup date: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::ZipArchiveCodec,
        config::BackupConfig,
        item::Item,
        test_util::{FixedClock, MemoryStore},
    };

    fn scheduler(store: Arc<MemoryStore>, clock: Arc<FixedClock>) -> AutoBackupScheduler {
        let engine = BackupEngine::with_parts(
            store,
            Arc::new(ZipArchiveCodec),
            clock.clone(),
            BackupConfig::default().root("TrackerBackups"),
        );
        AutoBackupScheduler::new(
            Some(engine),
            LocalCollection::new(vec![Item::new("a", "Lamp", 20.0)]),
            clock,
        )
    }

    #[tokio::test]
    async fn not_configured_and_empty_are_skipped() {
        let clock = Arc::new(FixedClock::at("2026-10-16T08:00:00.000Z"));
        let unconfigured =
            AutoBackupScheduler::new(None, LocalCollection::default(), clock.clone());
        assert!(matches!(
            unconfigured.trigger().await,
            TriggerOutcome::Skipped(SkipReason::NotConfigured)
        ));

        let store = Arc::new(MemoryStore::new());
        let engine = BackupEngine::new(store.clone(), BackupConfig::default());
        let empty = AutoBackupScheduler::new(Some(engine), LocalCollection::default(), clock);
        assert!(matches!(
            empty.trigger().await,
            TriggerOutcome::Skipped(SkipReason::EmptyCollection)
        ));
        assert!(store.ops().is_empty());
    }

    #[tokio::test]
    async fn once_per_day() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::at("2026-10-16T08:00:00.000Z"));
        let scheduler = scheduler(store, clock.clone());

        assert!(scheduler.trigger().await.is_completed());
        assert_eq!(scheduler.restorable().len(), 1);
        assert!(matches!(
            scheduler.trigger().await,
            TriggerOutcome::Skipped(SkipReason::AlreadyBackedUpToday)
        ));

        clock.set("2026-10-17T08:00:00.000Z");
        assert!(scheduler.trigger().await.is_completed());
        assert_eq!(
            scheduler.state().last_backup_date,
            NaiveDate::from_ymd_opt(2026, 10, 17)
        );
    }

    #[tokio::test]
    async fn failure_clears_in_flight_and_keeps_date() {
        let store = Arc::new(MemoryStore::new());
        store.fail_uploads_matching("_full.zip");
        let clock = Arc::new(FixedClock::at("2026-10-16T08:00:00.000Z"));
        let scheduler = scheduler(store.clone(), clock);

        assert!(matches!(
            scheduler.trigger().await,
            TriggerOutcome::Failed(_)
        ));
        assert_eq!(scheduler.state(), SchedulerState::default());

        store.clear_faults();
        assert!(scheduler.trigger().await.is_completed());
    }
}
