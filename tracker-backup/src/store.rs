//! Remote object store contract and a directory-backed implementation.

use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use bytes::Bytes;
use snafu::prelude::*;
use tracing::debug;

use crate::{
    Result,
    error::{BackupError, IoSnafu},
};

/// Four-operation contract for the remote side of backups.
///
/// Paths are `/`-separated and relative to the store root (for example
/// `TrackerBackups/snapshots/<id>_full.zip`).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Write `bytes` to `path`, replacing any existing object.
    async fn upload(&self, path: &str, bytes: Bytes) -> Result<()>;

    /// Read the object at `path`. A missing path is an error.
    async fn download(&self, path: &str) -> Result<Bytes>;

    /// Returns false for a missing path; only transport failures are errors.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Remove the object at `path`. Deleting a missing path succeeds.
    async fn delete(&self, path: &str) -> Result<()>;
}

/// Store rooted at a local directory, such as a mounted network share.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a store path below the root, rejecting `..` and absolute components.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = Path::new(path.trim_start_matches('/'));
        ensure!(
            !path.is_empty()
                && rel
                    .components()
                    .all(|c| matches!(c, Component::Normal(_) | Component::CurDir)),
            crate::error::ValidationSnafu {
                message: format!("invalid store path '{path}'"),
            }
        );
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl RemoteStore for FsStore {
    async fn upload(&self, path: &str, bytes: Bytes) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context(IoSnafu { path: parent })?;
        }
        debug!(path, bytes = bytes.len(), "fs upload");
        tokio::fs::write(&full, &bytes)
            .await
            .context(IoSnafu { path: &full })
    }

    async fn download(&self, path: &str) -> Result<Bytes> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(BackupError::NotFound {
                path: path.to_string(),
            }),
            Err(source) => Err(BackupError::Io { path: full, source }),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        tokio::fs::try_exists(&full)
            .await
            .context(IoSnafu { path: &full })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Err(err) if err.kind() != ErrorKind::NotFound => {
                Err(BackupError::Io { path: full, source: err })
            }
            _ => Ok(()),
        }
    }
}
