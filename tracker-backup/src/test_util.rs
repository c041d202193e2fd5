//! Test utilities
//!
//! In-memory doubles for the store, clock and user interaction, used by the unit and
//! integration tests. Not part of the supported api and subject to change.
//!
#![doc(hidden)]

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;

use crate::{
    Result, clock::Clock, error::BackupError, item::Item, service::UserInteraction,
    store::RemoteStore,
};

// =============================================================================
// MemoryStore
// =============================================================================

/// One call made against a [`MemoryStore`], in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Upload(String),
    Download(String),
    Exists(String),
    Delete(String),
}

#[derive(Debug, Default)]
struct Faults {
    upload: Vec<String>,
    download: Vec<String>,
    exists: Vec<String>,
    delete: Vec<String>,
}

/// Recording in-memory [`RemoteStore`] with injectable failures.
///
/// A fault pattern matches any path containing it. Failed calls are still recorded.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: Mutex<BTreeMap<String, Bytes>>,
    ops: Mutex<Vec<StoreOp>>,
    faults: Mutex<Faults>,
    upload_delay: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before every upload, so concurrent callers overlap.
    #[must_use]
    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = Some(delay);
        self
    }

    pub fn put(&self, path: &str, bytes: impl Into<Bytes>) {
        self.files.lock().insert(path.to_string(), bytes.into());
    }

    pub fn get(&self, path: &str) -> Option<Bytes> {
        self.files.lock().get(path).cloned()
    }

    pub fn remove(&self, path: &str) -> Option<Bytes> {
        self.files.lock().remove(path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.lock().keys().cloned().collect()
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.ops.lock().clone()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.filter_ops(|op| match op {
            StoreOp::Upload(path) => Some(path.clone()),
            _ => None,
        })
    }

    pub fn deletes(&self) -> Vec<String> {
        self.filter_ops(|op| match op {
            StoreOp::Delete(path) => Some(path.clone()),
            _ => None,
        })
    }

    fn filter_ops(&self, f: impl Fn(&StoreOp) -> Option<String>) -> Vec<String> {
        self.ops.lock().iter().filter_map(f).collect()
    }

    pub fn fail_uploads_matching(&self, pattern: &str) {
        self.faults.lock().upload.push(pattern.to_string());
    }

    pub fn fail_downloads_matching(&self, pattern: &str) {
        self.faults.lock().download.push(pattern.to_string());
    }

    pub fn fail_exists_matching(&self, pattern: &str) {
        self.faults.lock().exists.push(pattern.to_string());
    }

    pub fn fail_deletes_matching(&self, pattern: &str) {
        self.faults.lock().delete.push(pattern.to_string());
    }

    pub fn clear_faults(&self) {
        *self.faults.lock() = Faults::default();
    }

    fn check(&self, method: &str, path: &str, select: fn(&Faults) -> &Vec<String>) -> Result<()> {
        let faults = self.faults.lock();
        if select(&faults).iter().any(|pattern| path.contains(pattern.as_str())) {
            return Err(BackupError::Remote {
                code: 503,
                method: method.to_string(),
                url: path.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn upload(&self, path: &str, bytes: Bytes) -> Result<()> {
        self.ops.lock().push(StoreOp::Upload(path.to_string()));
        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }
        self.check("PUT", path, |f| &f.upload)?;
        self.put(path, bytes);
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Bytes> {
        self.ops.lock().push(StoreOp::Download(path.to_string()));
        self.check("GET", path, |f| &f.download)?;
        self.get(path).ok_or_else(|| BackupError::NotFound {
            path: path.to_string(),
        })
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.ops.lock().push(StoreOp::Exists(path.to_string()));
        self.check("HEAD", path, |f| &f.exists)?;
        Ok(self.files.lock().contains_key(path))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.ops.lock().push(StoreOp::Delete(path.to_string()));
        self.check("DELETE", path, |f| &f.delete)?;
        self.files.lock().remove(path);
        Ok(())
    }
}

// =============================================================================
// FixedClock
// =============================================================================

/// Settable clock. `today()` is the UTC date of `now()`.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Clock at an RFC 3339 timestamp. Panics on a malformed timestamp.
    pub fn at(rfc3339: &str) -> Self {
        Self::new(parse_ts(rfc3339))
    }

    pub fn set(&self, rfc3339: &str) {
        *self.now.lock() = parse_ts(rfc3339);
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

fn parse_ts(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(|err| panic!("bad test timestamp {rfc3339}: {err}"))
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn today(&self) -> NaiveDate {
        self.now.lock().date_naive()
    }
}

// =============================================================================
// ScriptedInteraction
// =============================================================================

/// [`UserInteraction`] that records notifications and answers confirmations from a script.
/// Once the script runs out, confirmations are declined.
#[derive(Debug, Default)]
pub struct ScriptedInteraction {
    answers: Mutex<VecDeque<bool>>,
    notifications: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedInteraction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answering(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn notifications(&self) -> Vec<String> {
        self.notifications.lock().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl UserInteraction for ScriptedInteraction {
    async fn notify(&self, message: &str) {
        self.notifications.lock().push(message.to_string());
    }

    async fn confirm(&self, message: &str) -> bool {
        self.prompts.lock().push(message.to_string());
        self.answers.lock().pop_front().unwrap_or(false)
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// A small mixed collection: owned items, a wishlist entry, one image.
pub fn sample_items() -> Vec<Item> {
    let mut wish = Item::new("item-3", "Espresso machine", 389.0).wishlist();
    wish.price_history = vec![
        crate::item::PricePoint {
            date: "2026-09-01".to_string(),
            price: 429.0,
        },
        crate::item::PricePoint {
            date: "2026-10-01".to_string(),
            price: 389.0,
        },
    ];
    vec![
        Item::new("item-1", "Camera", 499.0)
            .purchased_on("2026-03-14")
            .with_category("electronics")
            .with_channel("online"),
        Item::new("item-2", "Hiking boots", 180.0)
            .purchased_on("2026-05-02")
            .with_quantity(2)
            .with_image("data:image/png;base64,iVBORw0KGgo="),
        wish,
    ]
}

/// Shared in-memory store.
pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}
