//! Shared helpers for tracker-backup integration tests
#![cfg(test)]
#![allow(dead_code)]

use std::sync::Arc;

use tracker_backup::prelude::*;
use tracker_backup::test_util::{FixedClock, MemoryStore};

pub use tracker_backup::test_util::sample_items;

pub const ROOT: &str = "TrackerBackups";
pub const MANIFEST_PATH: &str = "TrackerBackups/manifest.json";

/// Engine over `store` with a settable clock.
pub fn engine_with(store: Arc<dyn RemoteStore>, clock: Arc<FixedClock>) -> BackupEngine {
    BackupEngine::with_parts(
        store,
        Arc::new(ZipArchiveCodec),
        clock,
        BackupConfig::default().root(ROOT).retention(4).display_count(3),
    )
}

/// In-memory store, engine and clock starting at 2026-10-16 08:00 UTC.
pub fn memory_engine() -> (Arc<MemoryStore>, BackupEngine, Arc<FixedClock>) {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(FixedClock::at("2026-10-16T08:00:00.000Z"));
    let engine = engine_with(store.clone(), clock.clone());
    (store, engine, clock)
}

/// Commit `count` snapshots one minute apart. Returns the ids, oldest first.
pub async fn commit_many(engine: &BackupEngine, clock: &FixedClock, count: usize) -> Vec<String> {
    let mut ids = Vec::with_capacity(count);
    for n in 0..count {
        let items = vec![Item::new(format!("item-{n}"), format!("Item {n}"), 10.0 + n as f64)];
        let report = engine.commit(&items, true).await.expect("commit");
        ids.push(report.entry.id);
        clock.advance(chrono::Duration::minutes(1));
    }
    ids
}

/// Parsed manifest currently on the store.
pub fn manifest_on(store: &MemoryStore) -> Manifest {
    let bytes = store.get(MANIFEST_PATH).expect("manifest present");
    tracker_backup::manifest::parse_manifest(&bytes).expect("valid manifest")
}

pub fn entry_ids(entries: &[BackupEntry]) -> Vec<&str> {
    entries.iter().map(|entry| entry.id.as_str()).collect()
}
