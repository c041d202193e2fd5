//! Errors returned by the backup engine and its collaborators
//!
use std::path::PathBuf;

use snafu::prelude::*;

/// Errors returned by tracker-backup crate
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BackupError {
    /// Http connection or timeout error
    #[snafu(display("HTTP error {method} url:{url}"))]
    Http {
        method: String,
        url: String,
        source: reqwest::Error,
    },

    /// Remote server responded with a non-success status.
    #[snafu(display("Remote server reported error ({code}) {method} {url}: {message}"))]
    Remote {
        code: u16,
        method: String,
        url: String,
        message: String,
    },

    /// Download of a path that does not exist on the remote store.
    #[snafu(display("remote path {path} not found"))]
    NotFound { path: String },

    /// Local or remote filesystem error.
    #[snafu(display("io error {path:?}: {source}"))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Downloaded snapshot does not match the size or hash recorded in the manifest.
    /// The restore is abandoned and local data is not modified.
    #[snafu(display("integrity check failed for {path}: {message}"))]
    Integrity { path: String, message: String },

    /// Remote manifest is malformed or has an unsupported schema version.
    /// Readers recover from this by treating the history as empty.
    #[snafu(display("manifest parse error: {message}"))]
    ManifestParse { message: String },

    /// The manifest references a snapshot whose ready marker is missing.
    #[snafu(display("snapshot {id} is not ready (marker {ready_path} missing)"))]
    SnapshotNotReady { id: String, ready_path: String },

    /// No restorable snapshot has the requested id.
    #[snafu(display("snapshot {id} not found"))]
    SnapshotNotFound { id: String },

    /// The manifest lists no snapshot with a ready marker.
    #[snafu(display("no restorable snapshot"))]
    NoRestorableSnapshot,

    /// Committing an empty collection is refused; it would publish a backup equivalent to a wipe.
    #[snafu(display("refusing to back up an empty item collection"))]
    EmptyCollection,

    /// No remote target has been configured.
    #[snafu(display("no remote backup target configured"))]
    NotConfigured,

    /// Zip archive could not be read or written.
    #[snafu(display("archive error: {source}"))]
    Zip { source: zip::result::ZipError },

    /// Archive content is structurally invalid.
    #[snafu(display("archive error: {message}"))]
    Archive { message: String },

    /// Deserialization error.
    #[snafu(display("Deserialization: {source}"))]
    Deserialization { source: serde_json::Error },

    /// Serialization error. unlikely to occur.
    #[snafu(display("Serialization: {source}"))]
    Serialization { source: serde_json::Error },

    /// Local state file could not be decoded.
    #[snafu(display("state file {path:?}: {source}"))]
    StateFormat {
        path: PathBuf,
        source: serde_path_to_error::Error<serde_json::Error>,
    },

    /// Validation error: an input check failed.
    #[snafu(display("Validation error: {message}"))]
    Validation { message: String },

    /// Some other error occurred
    #[snafu(display("{message}"))]
    Other { message: String },
}

impl BackupError {
    /// Returns true for network and filesystem failures of the remote store.
    /// These are never retried inside a commit; the next auto-backup trigger retries.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Http { .. } | Self::Remote { .. } | Self::NotFound { .. } | Self::Io { .. }
        )
    }

    /// Returns true for size or hash mismatches on download.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }
}

impl From<zip::result::ZipError> for BackupError {
    fn from(source: zip::result::ZipError) -> Self {
        Self::Zip { source }
    }
}
