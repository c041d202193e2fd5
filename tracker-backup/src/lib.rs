/*
 * tracker-backup - remote snapshots for the item tracker
 *
 * SPDX-FileCopyrightText: 2025-2026 Steve Schoettler
 * SPDX-License-Identifier: Apache-2.0
 */
//! # Tracker remote backup and restore
//!
//! Durable, versioned snapshots of the tracker's item collection on a remote
//! object store (WebDAV or a mounted directory), with verified restore.
//!
//! ## Features
//!
//! - staged upload with a ready marker, for stores without atomic rename
//! - bounded snapshot history in a remote `manifest.json`, legacy manifests normalized
//! - size and sha256 verification before any local data is touched
//! - overwrite or merge restore; merge deduplicates by id and content signature
//! - single-flight, once-per-day automatic backup
//! - zip archive codec with embedded images and CSV fallback
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tracker_backup::prelude::*;
//! # async fn example() -> Result<(), BackupError> {
//!
//! let store = Arc::new(FsStore::new("/mnt/backups"));
//! let engine = BackupEngine::new(store, BackupConfig::default());
//!
//! let collection = LocalCollection::new(vec![Item::new("item-1", "Camera", 499.0)]);
//! let report = engine.commit(&collection.snapshot(), true).await?;
//! println!("published {}", report.entry.id);
//!
//! for entry in engine.list_restorable().await {
//!     println!("{} {}", entry.id, entry.created_at);
//! }
//! let latest = engine.list_restorable().await.into_iter().next().unwrap();
//! engine.restore(&latest, RestoreMode::Merge, &collection).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Remote layout
//!
//! ```text
//! <root>/manifest.json
//! <root>/manifest.json.tmp
//! <root>/snapshots/<id>_full.zip
//! <root>/snapshots/<id>_full.zip.ready
//! <root>/staging/<id>_full.zip.part
//! ```
//!
//! Two devices committing at the same time race on `manifest.json`; the last
//! writer wins and the other device's snapshot stays on the server unreferenced.
//!
#![allow(clippy::missing_errors_doc)] // pedantic
#![allow(clippy::missing_const_for_fn)] //  nursery function
#![allow(clippy::must_use_candidate)] // pedantic
#![warn(clippy::default_trait_access)]
#![warn(clippy::doc_markdown)]
#![warn(clippy::explicit_iter_loop)]
#![warn(clippy::implicit_clone)]
#![warn(clippy::match_same_arms)]
#![warn(clippy::needless_raw_strings)]
#![warn(clippy::option_if_let_else)]
#![warn(clippy::redundant_clone)]
#![warn(clippy::ref_option)]
#![warn(clippy::redundant_closure)]
#![warn(clippy::uninlined_format_args)]
#![warn(clippy::unnecessary_wraps)]
#![warn(clippy::unused_async)]

pub mod clock;
pub mod codec;
pub mod commit;
pub mod config;
pub mod csv;
pub mod engine;
pub mod error;
pub mod item;
pub mod manifest;
pub mod merge;
pub mod restore;
pub mod scheduler;
pub mod service;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod webdav;

pub mod test_util;

/// Result type alias using `BackupError` as the default error.
pub type Result<T, E = crate::error::BackupError> = std::result::Result<T, E>;

/// Prelude module - import the commonly used types with `use tracker_backup::prelude::*;`
pub mod prelude {
    pub use crate::error::*;
    pub use crate::{
        clock::{Clock, SystemClock},
        codec::{ArchiveCodec, ZipArchiveCodec},
        commit::{CommitPhase, CommitReport},
        config::{BackupConfig, RemoteLayout},
        engine::BackupEngine,
        item::{Item, ItemType, PricePoint},
        manifest::{BackupEntry, Manifest, ManifestStore},
        merge::merge_items,
        restore::{RestoreMode, RestoreReport},
        scheduler::{AutoBackupScheduler, SchedulerState, SkipReason, TriggerOutcome},
        service::{BackupService, RestoreOutcome, UserInteraction},
        snapshot::{SnapshotBlob, SnapshotBuilder},
        state::{JsonStateFile, LocalCollection, LocalState, StateStore},
        store::{FsStore, RemoteStore},
        webdav::{WebDavConfig, WebDavCredentials, WebDavMetricsSnapshot, WebDavStore},
    };
}

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default remote directory holding the manifest, snapshots and staging area.
pub const DEFAULT_BACKUP_ROOT: &str = "TrackerBackups";

/// Number of snapshots kept in the manifest history.
pub const DEFAULT_RETENTION: usize = 4;

/// Number of restorable snapshots offered to the user.
pub const DEFAULT_DISPLAY_COUNT: usize = 3;

/// Current manifest schema version.
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Environment variable overriding the remote root directory.
pub const BACKUP_ROOT_ENV: &str = "TRACKER_BACKUP_ROOT";

/// Environment variable overriding the retention count.
pub const RETENTION_ENV: &str = "TRACKER_RETENTION";
