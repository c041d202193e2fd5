//! Local side of backups: the in-memory item collection and the persisted state file.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::prelude::*;
use tracing::debug;

use crate::{
    Result,
    error::{BackupError, IoSnafu, SerializationSnafu, StateFormatSnafu},
    item::Item,
};

/// Shared, swappable list of items.
///
/// Readers get a cloned snapshot; restore replaces the whole list at once, so no reader
/// ever observes a partially applied restore.
#[derive(Debug, Clone, Default)]
pub struct LocalCollection {
    items: Arc<RwLock<Vec<Item>>>,
}

impl LocalCollection {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items: Arc::new(RwLock::new(items)),
        }
    }

    pub fn snapshot(&self) -> Vec<Item> {
        self.items.read().clone()
    }

    /// Read-modify-write the contents under one write lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut Vec<Item>) -> R) -> R {
        f(&mut self.items.write())
    }

    /// Replace the contents, returning the previous items.
    pub fn replace(&self, items: Vec<Item>) -> Vec<Item> {
        std::mem::replace(&mut *self.items.write(), items)
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

/// Persisted application state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalState {
    /// Local date of the last successful automatic backup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_backup_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<usize>,
    #[serde(default = "default_embed_images")]
    pub embed_images: bool,
    #[serde(default)]
    pub items: Vec<Item>,
    /// Settings owned by other parts of the application.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_embed_images() -> bool {
    true
}

impl Default for LocalState {
    fn default() -> Self {
        Self {
            last_backup_date: None,
            retention: None,
            embed_images: true,
            items: Vec::new(),
            extra: Map::new(),
        }
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<LocalState>;

    async fn save(&self, state: &LocalState) -> Result<()>;
}

/// [`LocalState`] stored as pretty-printed JSON.
///
/// Saves write `<path>.tmp` and rename it over the target.
#[derive(Debug, Clone)]
pub struct JsonStateFile {
    path: PathBuf,
}

impl JsonStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[async_trait]
impl StateStore for JsonStateFile {
    /// A missing file loads as the default state.
    async fn load(&self) -> Result<LocalState> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no state file, using defaults");
                return Ok(LocalState::default());
            }
            Err(source) => {
                return Err(BackupError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let mut deserializer = serde_json::Deserializer::from_slice(&data);
        let mut state: LocalState = serde_path_to_error::deserialize(&mut deserializer)
            .context(StateFormatSnafu { path: &self.path })?;
        for item in state.items.iter_mut().filter(|item| item.quantity == 0) {
            debug!(id = %item.id, "state item with quantity 0, using 1");
            item.set_quantity(1);
        }
        Ok(state)
    }

    async fn save(&self, state: &LocalState) -> Result<()> {
        let data = serde_json::to_vec_pretty(state).context(SerializationSnafu)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .context(IoSnafu { path: parent })?;
        }
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &data)
            .await
            .context(IoSnafu { path: &tmp })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .context(IoSnafu { path: &self.path })?;
        debug!(path = %self.path.display(), items = state.items.len(), "state saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn missing_file_is_default() {
        let temp = tempfile::tempdir().unwrap();
        let file = JsonStateFile::new(temp.path().join("state.json"));
        assert_eq!(file.load().await.unwrap(), LocalState::default());
    }

    #[tokio::test]
    async fn save_then_load_preserves_unknown_fields() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested").join("state.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            serde_json::to_vec(&json!({
                "lastBackupDate": "2026-10-15",
                "theme": "dark",
                "items": [{"id": "a", "type": "owned", "name": "Lamp", "price": 20}]
            }))
            .unwrap(),
        )
        .unwrap();

        let file = JsonStateFile::new(&path);
        let mut state = file.load().await.unwrap();
        assert_eq!(
            state.last_backup_date,
            NaiveDate::from_ymd_opt(2026, 10, 15)
        );
        assert!(state.embed_images);
        assert_eq!(state.items[0].quantity, 1);

        state.last_backup_date = NaiveDate::from_ymd_opt(2026, 10, 16);
        file.save(&state).await.unwrap();
        assert!(!file.tmp_path().exists());

        let reloaded = file.load().await.unwrap();
        assert_eq!(reloaded.extra["theme"], json!("dark"));
        assert_eq!(reloaded, state);
    }

    #[tokio::test]
    async fn malformed_state_reports_json_path() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("state.json");
        std::fs::write(&path, br#"{"items": [{"id": 5}]}"#).unwrap();
        let err = JsonStateFile::new(&path).load().await.unwrap_err();
        assert!(matches!(err, BackupError::StateFormat { .. }));
        assert!(err.to_string().contains("items"));
    }

    #[tokio::test]
    async fn zero_quantity_is_clamped_on_load() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("state.json");
        let state = json!({
            "items": [{"id": "a", "type": "owned", "name": "Lamp", "price": 20, "quantity": 0}]
        });
        std::fs::write(&path, serde_json::to_vec(&state).unwrap()).unwrap();
        let state = JsonStateFile::new(&path).load().await.unwrap();
        assert_eq!(state.items[0].quantity, 1);
        assert!((state.items[0].avg_price - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn update_reads_and_writes_under_one_lock() {
        let collection = LocalCollection::new(vec![Item::new("a", "Lamp", 20.0)]);
        let len = collection.update(|items| {
            items.push(Item::new("b", "Chair", 45.0));
            items.len()
        });
        assert_eq!(len, 2);
        assert_eq!(collection.snapshot()[1].id, "b");
    }

    #[test]
    fn collection_replace_swaps_contents() {
        let collection = LocalCollection::new(vec![Item::new("a", "Lamp", 20.0)]);
        let reader = collection.clone();
        let previous = collection.replace(vec![]);
        assert_eq!(previous.len(), 1);
        assert!(reader.is_empty());
    }
}
