//! Snapshot builder: item collection to content blob plus its identity.

use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::{
    Result,
    clock::{Clock, format_created_at, snapshot_id_for},
    codec::ArchiveCodec,
    config::{RemoteLayout, ready_path_for},
    item::Item,
    manifest::BackupEntry,
};

/// Encoded snapshot and the manifest entry describing it.
#[derive(Debug, Clone)]
pub struct SnapshotBlob {
    pub entry: BackupEntry,
    pub bytes: Bytes,
}

pub struct SnapshotBuilder {
    codec: Arc<dyn ArchiveCodec>,
    clock: Arc<dyn Clock>,
    layout: RemoteLayout,
}

impl std::fmt::Debug for SnapshotBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotBuilder")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl SnapshotBuilder {
    pub fn new(codec: Arc<dyn ArchiveCodec>, clock: Arc<dyn Clock>, layout: RemoteLayout) -> Self {
        Self {
            codec,
            clock,
            layout,
        }
    }

    /// Encode `items` and describe the result. Only reads the clock; nothing is uploaded.
    pub fn build(&self, items: &[Item], embed_images: bool) -> Result<SnapshotBlob> {
        let bytes = Bytes::from(self.codec.encode(items, embed_images)?);
        let now = self.clock.now();
        let id = snapshot_id_for(now);
        let zip_path = self.layout.snapshot_path(&id);
        let entry = BackupEntry {
            ready_path: ready_path_for(&zip_path),
            zip_path,
            sha256: sha256_hex(&bytes),
            size: Some(bytes.len() as u64),
            created_at: format_created_at(now),
            id,
        };
        Ok(SnapshotBlob { entry, bytes })
    }

    pub fn staging_path(&self, entry: &BackupEntry) -> String {
        self.layout.staging_path(&entry.id)
    }
}

/// Lowercase hex sha256 digest.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    format!("{digest:x}")
}
