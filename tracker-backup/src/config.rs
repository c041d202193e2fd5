//! Backup configuration and remote path layout.

use crate::{
    BACKUP_ROOT_ENV, DEFAULT_BACKUP_ROOT, DEFAULT_DISPLAY_COUNT, DEFAULT_RETENTION, RETENTION_ENV,
};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const TMP_SUFFIX: &str = ".tmp";
pub const SNAPSHOTS_DIR: &str = "snapshots";
pub const STAGING_DIR: &str = "staging";
pub const SNAPSHOT_SUFFIX: &str = "_full.zip";
pub const READY_SUFFIX: &str = ".ready";
pub const PART_SUFFIX: &str = ".part";

/// Configuration for [`BackupEngine`](crate::engine::BackupEngine)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    /// Remote directory holding manifest, snapshots and staging files.
    /// Defaults to "TrackerBackups", or the environment variable `TRACKER_BACKUP_ROOT`.
    pub root: String,

    /// Number of snapshots kept in the manifest history. Older snapshots are deleted
    /// after each commit. Defaults to 4, or `TRACKER_RETENTION`.
    pub retention: usize,

    /// Maximum number of snapshots returned by `list_restorable`.
    pub display_count: usize,

    /// Include item images in snapshots.
    pub embed_images: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig {
            root: std::env::var(BACKUP_ROOT_ENV)
                .ok()
                .filter(|root| !root.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BACKUP_ROOT.to_string()),
            retention: std::env::var(RETENTION_ENV)
                .ok()
                .and_then(|value| value.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_RETENTION),
            display_count: DEFAULT_DISPLAY_COUNT,
            embed_images: true,
        }
    }
}

impl BackupConfig {
    /// Sets the remote root directory.
    #[must_use]
    pub fn root(self, root: impl Into<String>) -> Self {
        BackupConfig {
            root: root.into(),
            ..self
        }
    }

    /// Sets the retention count (minimum 1).
    #[must_use]
    pub fn retention(self, retention: usize) -> Self {
        BackupConfig {
            retention: retention.max(1),
            ..self
        }
    }

    #[must_use]
    pub fn display_count(self, display_count: usize) -> Self {
        BackupConfig {
            display_count,
            ..self
        }
    }

    #[must_use]
    pub fn embed_images(self, embed_images: bool) -> Self {
        BackupConfig {
            embed_images,
            ..self
        }
    }

    pub fn layout(&self) -> RemoteLayout {
        RemoteLayout::new(&self.root)
    }
}

/// Remote paths used by the backup protocol, all below one root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    root: String,
}

impl RemoteLayout {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.trim_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    fn join(&self, rel: &str) -> String {
        if self.root.is_empty() {
            rel.to_string()
        } else {
            format!("{}/{rel}", self.root)
        }
    }

    pub fn manifest_path(&self) -> String {
        self.join(MANIFEST_FILE)
    }

    pub fn manifest_tmp_path(&self) -> String {
        format!("{}{TMP_SUFFIX}", self.manifest_path())
    }

    pub fn snapshot_path(&self, id: &str) -> String {
        self.join(&format!("{SNAPSHOTS_DIR}/{id}{SNAPSHOT_SUFFIX}"))
    }

    pub fn staging_path(&self, id: &str) -> String {
        self.join(&format!("{STAGING_DIR}/{id}{SNAPSHOT_SUFFIX}{PART_SUFFIX}"))
    }
}

/// Marker path for a snapshot blob.
pub fn ready_path_for(zip_path: &str) -> String {
    format!("{zip_path}{READY_SUFFIX}")
}
