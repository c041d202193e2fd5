//! `BackupEngine` ties a remote store, the archive codec and the manifest together.
//!
//! Commit lives in [`commit`](crate::commit), restore in [`restore`](crate::restore).

use std::sync::Arc;

use crate::{
    clock::{Clock, SystemClock},
    codec::{ArchiveCodec, ZipArchiveCodec},
    config::{BackupConfig, RemoteLayout},
    manifest::ManifestStore,
    snapshot::SnapshotBuilder,
    store::RemoteStore,
};

#[derive(Clone)]
pub struct BackupEngine {
    pub(crate) store: Arc<dyn RemoteStore>,
    pub(crate) codec: Arc<dyn ArchiveCodec>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: BackupConfig,
    pub(crate) manifests: ManifestStore,
}

impl std::fmt::Debug for BackupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BackupEngine {
    /// Engine with the zip codec and the system clock.
    pub fn new(store: Arc<dyn RemoteStore>, config: BackupConfig) -> Self {
        Self::with_parts(
            store,
            Arc::new(ZipArchiveCodec),
            Arc::new(SystemClock),
            config,
        )
    }

    pub fn with_parts(
        store: Arc<dyn RemoteStore>,
        codec: Arc<dyn ArchiveCodec>,
        clock: Arc<dyn Clock>,
        config: BackupConfig,
    ) -> Self {
        let manifests = ManifestStore::new(store.clone(), config.layout());
        Self {
            store,
            codec,
            clock,
            config,
            manifests,
        }
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn layout(&self) -> RemoteLayout {
        self.config.layout()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn codec(&self) -> &Arc<dyn ArchiveCodec> {
        &self.codec
    }

    pub fn manifests(&self) -> &ManifestStore {
        &self.manifests
    }

    pub(crate) fn snapshot_builder(&self) -> SnapshotBuilder {
        SnapshotBuilder::new(self.codec.clone(), self.clock.clone(), self.layout())
    }
}
