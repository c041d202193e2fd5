//! WebDAV implementation of [`RemoteStore`].
//!
//! | operation  | request | notes                                                  |
//! |------------|---------|--------------------------------------------------------|
//! | `upload`   | PUT     | on 404/409, MKCOL each parent collection and PUT again |
//! | `download` | GET     | 404 maps to [`BackupError::NotFound`]                  |
//! | `exists`   | HEAD    | 404 is `false`                                         |
//! | `delete`   | DELETE  | 404 is success                                         |
//!
//! Other non-2xx responses become [`BackupError::Remote`]. Requests are not retried here;
//! a failed commit is retried by the next automatic backup.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, StatusCode, Url};
use snafu::prelude::*;
use tracing::{debug, error, trace};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    Result,
    error::{BackupError, HttpSnafu, ValidationSnafu},
    store::RemoteStore,
};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Username and password for HTTP basic auth. Cleared from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct WebDavCredentials {
    username: String,
    password: String,
}

impl fmt::Debug for WebDavCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebDavCredentials")
            .field("username", &self.username)
            .field("password", &"MASKED")
            .finish()
    }
}

impl WebDavCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

/// Connection settings for [`WebDavStore`].
#[derive(Debug, Clone)]
pub struct WebDavConfig {
    /// Server URL of the directory that contains the backup root,
    /// e.g. `https://dav.example.com/remote.php/dav/files/me/`
    pub url: String,
    pub credentials: Option<WebDavCredentials>,
    pub timeout: Duration,
}

impl WebDavConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn credentials(self, credentials: WebDavCredentials) -> Self {
        WebDavConfig {
            credentials: Some(credentials),
            ..self
        }
    }

    #[must_use]
    pub fn timeout(self, timeout: Duration) -> Self {
        WebDavConfig { timeout, ..self }
    }
}

/// Request counters. Cumulative for the lifetime of the store.
#[derive(Debug, Default)]
struct WebDavMetrics {
    total_requests: AtomicU64,
    errors: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    collections_created: AtomicU64,
}

impl WebDavMetrics {
    fn snapshot(&self) -> WebDavMetricsSnapshot {
        WebDavMetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            collections_created: self.collections_created.load(Ordering::Relaxed),
        }
    }

    fn count(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the store's request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WebDavMetricsSnapshot {
    pub total_requests: u64,
    /// Responses that were turned into errors, plus transport failures
    pub errors: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub collections_created: u64,
}

impl fmt::Display for WebDavMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requests={} errors={} mkcol={} sent={} recv={}",
            self.total_requests,
            self.errors,
            self.collections_created,
            format_bytes(self.bytes_sent),
            format_bytes(self.bytes_received),
        )
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes}B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[derive(Debug, Clone)]
pub struct WebDavStore {
    client: reqwest::Client,
    base_url: Url,
    credentials: Option<WebDavCredentials>,
    metrics: Arc<WebDavMetrics>,
}

impl WebDavStore {
    pub fn new(config: WebDavConfig) -> Result<Self> {
        let builder = reqwest::Client::builder()
            .no_proxy()
            .timeout(config.timeout);
        Self::with_client(builder, config)
    }

    /// Create a store from a customized `reqwest::ClientBuilder`.
    /// The builder's timeout is left as configured by the caller.
    pub fn with_client(builder: reqwest::ClientBuilder, config: WebDavConfig) -> Result<Self> {
        let base_url = normalize_base_url(&config.url)?;
        let client = builder.build().context(HttpSnafu {
            method: "client-init",
            url: base_url.as_str(),
        })?;
        debug!(url = %base_url, "webdav store");
        Ok(Self {
            client,
            base_url,
            credentials: config.credentials,
            metrics: Arc::new(WebDavMetrics::default()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn metrics_snapshot(&self) -> WebDavMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Absolute URL for a store path. Each segment is percent-encoded.
    pub fn url_for(&self, path: &str) -> Result<Url> {
        build_url(&self.base_url, path, false)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Bytes>,
    ) -> Result<reqwest::Response> {
        let mut request = self.client.request(method.clone(), url.clone());
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }
        let body_len = body.as_ref().map_or(0, |b| b.len() as u64);
        if let Some(body) = body {
            request = request.body(body);
        }
        trace!(%method, %url, bytes = body_len, "webdav request");
        WebDavMetrics::count(&self.metrics.total_requests, 1);
        WebDavMetrics::count(&self.metrics.bytes_sent, body_len);
        match request.send().await {
            Ok(response) => Ok(response),
            Err(source) => {
                WebDavMetrics::count(&self.metrics.errors, 1);
                error!(%method, %url, "webdav request failed: {source}");
                Err(BackupError::Http {
                    method: method.to_string(),
                    url: url.to_string(),
                    source,
                })
            }
        }
    }

    /// Convert a non-success response into `BackupError::Remote`.
    async fn remote_error(
        &self,
        method: &Method,
        url: &Url,
        response: reqwest::Response,
    ) -> BackupError {
        WebDavMetrics::count(&self.metrics.errors, 1);
        let code = response.status();
        let message = response.text().await.unwrap_or_default();
        error!(?code, %method, %url, "webdav");
        BackupError::Remote {
            code: code.as_u16(),
            method: method.to_string(),
            url: url.to_string(),
            message: truncate_message(message),
        }
    }

    async fn put(&self, url: &Url, bytes: &Bytes) -> Result<reqwest::Response> {
        self.send(Method::PUT, url.clone(), Some(bytes.clone())).await
    }

    /// MKCOL every parent collection of `path`, outermost first.
    /// "Already exists" (405) counts as success.
    async fn create_parents(&self, path: &str) -> Result<()> {
        let mkcol = Method::from_bytes(b"MKCOL").map_err(|err| BackupError::Other {
            message: format!("MKCOL method: {err}"),
        })?;
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((_, parents)) = segments.split_last() else {
            return Ok(());
        };
        for depth in 1..=parents.len() {
            let url = build_url(&self.base_url, &parents[..depth].join("/"), true)?;
            let response = self.send(mkcol.clone(), url.clone(), None).await?;
            let status = response.status();
            if status.is_success() {
                WebDavMetrics::count(&self.metrics.collections_created, 1);
                debug!(%url, "created collection");
            } else if status != StatusCode::METHOD_NOT_ALLOWED {
                return Err(self.remote_error(&mkcol, &url, response).await);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for WebDavStore {
    async fn upload(&self, path: &str, bytes: Bytes) -> Result<()> {
        let url = self.url_for(path)?;
        let mut response = self.put(&url, &bytes).await?;
        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::CONFLICT) {
            debug!(path, status = %response.status(), "parent collection missing");
            self.create_parents(path).await?;
            response = self.put(&url, &bytes).await?;
        }
        if response.status().is_success() {
            debug!(path, bytes = bytes.len(), "uploaded");
            Ok(())
        } else {
            Err(self.remote_error(&Method::PUT, &url, response).await)
        }
    }

    async fn download(&self, path: &str) -> Result<Bytes> {
        let url = self.url_for(path)?;
        let response = self.send(Method::GET, url.clone(), None).await?;
        match response.status() {
            ok if ok.is_success() => {
                let body = response.bytes().await.context(HttpSnafu {
                    method: "GET",
                    url: url.as_str(),
                })?;
                WebDavMetrics::count(&self.metrics.bytes_received, body.len() as u64);
                Ok(body)
            }
            StatusCode::NOT_FOUND => Err(BackupError::NotFound {
                path: path.to_string(),
            }),
            _ => Err(self.remote_error(&Method::GET, &url, response).await),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let url = self.url_for(path)?;
        let response = self.send(Method::HEAD, url.clone(), None).await?;
        match response.status() {
            ok if ok.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(self.remote_error(&Method::HEAD, &url, response).await),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let url = self.url_for(path)?;
        let response = self.send(Method::DELETE, url.clone(), None).await?;
        match response.status() {
            status if status.is_success() || status == StatusCode::NOT_FOUND => Ok(()),
            _ => Err(self.remote_error(&Method::DELETE, &url, response).await),
        }
    }
}

/// Parse the server URL and make sure it ends with `/`, so store paths resolve below it.
pub fn normalize_base_url(url: &str) -> Result<Url> {
    let trimmed = url.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    let parsed = Url::parse(&with_slash).map_err(|err| BackupError::Validation {
        message: format!("invalid WebDAV url '{trimmed}': {err}"),
    })?;
    ensure!(
        matches!(parsed.scheme(), "http" | "https"),
        ValidationSnafu {
            message: format!("WebDAV url must be http or https: {trimmed}"),
        }
    );
    Ok(parsed)
}

/// Append the `/`-separated `path` to `base`, percent-encoding each segment.
/// With `collection`, the result ends in `/`.
pub fn build_url(base: &Url, path: &str, collection: bool) -> Result<Url> {
    let mut url = base.clone();
    {
        let mut segments = url.path_segments_mut().map_err(|()| BackupError::Validation {
            message: format!("WebDAV url cannot be a base: {base}"),
        })?;
        segments
            .pop_if_empty()
            .extend(path.split('/').filter(|s| !s.is_empty()));
        if collection {
            segments.push("");
        }
    }
    Ok(url)
}

fn truncate_message(mut message: String) -> String {
    const MAX: usize = 512;
    if message.len() > MAX {
        let mut end = MAX;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    message
}
