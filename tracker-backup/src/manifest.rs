//! Remote snapshot index (`manifest.json`).
//!
//! The manifest is the only mutable object on the remote side. It lists snapshots newest
//! first, capped at the retention count. A snapshot listed here is not necessarily usable:
//! readers must also check that its ready marker exists.
//!
//! Manifests on the server may have been written by older clients, so reading goes through
//! [`normalize_manifest`], which accepts:
//!  - `{"schemaVersion": 1, "history": [ ... ]}`
//!  - `{"schemaVersion": 1, "current": {..}, "previous": {..}}` (legacy pair)
//!
//! Anything else (including another schema version) is discarded.

use std::{collections::HashSet, sync::Arc};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::prelude::*;
use tracing::{debug, warn};

use crate::{
    MANIFEST_SCHEMA_VERSION, Result,
    config::RemoteLayout,
    error::{BackupError, SerializationSnafu},
    store::RemoteStore,
};

/// One immutable snapshot on the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    /// Creation timestamp with `:` replaced by `-`; sorts by creation order.
    pub id: String,
    #[serde(default)]
    pub zip_path: String,
    /// `zip_path` + ".ready"; the snapshot is complete once this exists.
    #[serde(default)]
    pub ready_path: String,
    /// Lowercase hex sha256 of the blob; empty if the writer didn't record one.
    #[serde(default)]
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default)]
    pub created_at: String,
}

/// Canonical manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    pub history: Vec<BackupEntry>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            history: Vec::new(),
        }
    }
}

impl Manifest {
    pub fn new(history: Vec<BackupEntry>) -> Self {
        let mut manifest = Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            history,
        };
        manifest.dedupe();
        manifest
    }

    /// Collapse duplicate ids, keeping the first occurrence.
    pub fn dedupe(&mut self) {
        let mut seen = HashSet::new();
        self.history.retain(|entry| seen.insert(entry.id.clone()));
    }

    /// Put `entry` at the front of the history, dedupe, and trim to `retention`.
    /// Returns the entries that fell off the end.
    pub fn publish(&mut self, entry: BackupEntry, retention: usize) -> Vec<BackupEntry> {
        self.history.insert(0, entry);
        self.dedupe();
        let keep = retention.max(1);
        if self.history.len() > keep {
            self.history.split_off(keep)
        } else {
            Vec::new()
        }
    }
}

/// Manifest as found on the server, before normalization.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawManifest {
    History {
        #[serde(rename = "schemaVersion")]
        schema_version: Option<u32>,
        history: Vec<Value>,
    },
    Legacy {
        #[serde(rename = "schemaVersion")]
        schema_version: Option<u32>,
        #[serde(default)]
        current: Option<Value>,
        #[serde(default)]
        previous: Option<Value>,
    },
}

/// Convert a raw manifest value to the canonical form, or `None` if it isn't a
/// version 1 manifest. Entries that don't decode are dropped.
pub fn normalize_manifest(raw: Value) -> Option<Manifest> {
    let parsed: RawManifest = serde_json::from_value(raw).ok()?;
    let (version, entries) = match parsed {
        RawManifest::History {
            schema_version,
            history,
        } => (schema_version, history),
        RawManifest::Legacy {
            schema_version,
            current,
            previous,
        } => (
            schema_version,
            current.into_iter().chain(previous).collect::<Vec<_>>(),
        ),
    };
    if version != Some(MANIFEST_SCHEMA_VERSION) {
        debug!(?version, "discarding manifest with unsupported schema version");
        return None;
    }
    let history = entries
        .into_iter()
        .filter(|value| !value.is_null())
        .filter_map(|value| match serde_json::from_value::<BackupEntry>(value) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("dropping malformed manifest entry: {err}");
                None
            }
        })
        .collect();
    Some(Manifest::new(history))
}

/// Parse manifest bytes; errors describe why the manifest was rejected.
pub fn parse_manifest(bytes: &[u8]) -> Result<Manifest> {
    let raw: Value = serde_json::from_slice(bytes).map_err(|err| BackupError::ManifestParse {
        message: err.to_string(),
    })?;
    normalize_manifest(raw).ok_or_else(|| BackupError::ManifestParse {
        message: format!("not a schema version {MANIFEST_SCHEMA_VERSION} manifest"),
    })
}

/// Reads and writes the manifest on a remote store.
#[derive(Clone)]
pub struct ManifestStore {
    store: Arc<dyn RemoteStore>,
    layout: RemoteLayout,
}

impl std::fmt::Debug for ManifestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestStore")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl ManifestStore {
    pub fn new(store: Arc<dyn RemoteStore>, layout: RemoteLayout) -> Self {
        Self { store, layout }
    }

    /// Fetch the manifest. A missing, unreadable, or unsupported manifest is reported
    /// as `None` ("no history yet") and logged; this never fails.
    pub async fn read(&self) -> Option<Manifest> {
        match self.fetch().await {
            Ok(manifest) => Some(manifest),
            Err(BackupError::NotFound { .. }) => {
                debug!("no manifest at {}", self.layout.manifest_path());
                None
            }
            Err(err) => {
                warn!("ignoring remote manifest: {err}");
                None
            }
        }
    }

    async fn fetch(&self) -> Result<Manifest> {
        let bytes = self.store.download(&self.layout.manifest_path()).await?;
        parse_manifest(&bytes)
    }

    /// Upload the manifest: first a best-effort temp copy, then the canonical path.
    /// Only a failure writing the canonical path is returned.
    pub async fn write(&self, manifest: &Manifest) -> Result<()> {
        let data = Bytes::from(serde_json::to_vec_pretty(manifest).context(SerializationSnafu)?);
        let tmp_path = self.layout.manifest_tmp_path();
        if let Err(err) = self.store.upload(&tmp_path, data.clone()).await {
            warn!("failed to write {tmp_path}: {err}");
        }
        self.store
            .upload(&self.layout.manifest_path(), data)
            .await?;
        debug!(entries = manifest.history.len(), "manifest written");
        Ok(())
    }
}
