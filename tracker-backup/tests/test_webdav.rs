//! WebDAV store against a minimal in-process WebDAV server.
//!
//! The server keeps files and collections in memory, answers PUT with 409 when the
//! parent collection is missing (like most real servers), and records every request.

mod common;

use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::Arc,
};

use bytes::Bytes;
use common::*;
use parking_lot::Mutex;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tracker_backup::prelude::*;

const BASE_PATH: &str = "/dav";

#[derive(Debug, Default)]
struct DavState {
    files: HashMap<String, Vec<u8>>,
    collections: HashSet<String>,
    requests: Vec<(String, String)>,
    authorization: Vec<Option<String>>,
    fail_status: Option<u16>,
}

impl DavState {
    fn apply(&mut self, method: &str, path: &str, body: Vec<u8>) -> (u16, Vec<u8>) {
        self.requests.push((method.to_string(), path.to_string()));
        if let Some(status) = self.fail_status {
            return (status, b"server exploded".to_vec());
        }
        match method {
            "PUT" => {
                let parent = path.rsplit_once('/').map_or("", |(parent, _)| parent);
                if !self.collections.contains(parent) {
                    return (409, Vec::new());
                }
                self.files.insert(path.to_string(), body);
                (201, Vec::new())
            }
            "GET" => match self.files.get(path) {
                Some(data) => (200, data.clone()),
                None => (404, Vec::new()),
            },
            "HEAD" => (if self.files.contains_key(path) { 200 } else { 404 }, Vec::new()),
            "DELETE" => match self.files.remove(path) {
                Some(_) => (204, Vec::new()),
                None => (404, Vec::new()),
            },
            "MKCOL" => {
                let dir = path.trim_end_matches('/');
                let parent = dir.rsplit_once('/').map_or("", |(parent, _)| parent);
                if self.collections.contains(dir) {
                    (405, Vec::new())
                } else if !self.collections.contains(parent) {
                    (409, Vec::new())
                } else {
                    self.collections.insert(dir.to_string());
                    (201, Vec::new())
                }
            }
            _ => (405, Vec::new()),
        }
    }
}

struct DavServer {
    addr: SocketAddr,
    state: Arc<Mutex<DavState>>,
}

impl DavServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(DavState::default()));
        state.lock().collections.insert(BASE_PATH.to_string());
        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let state = shared.clone();
                tokio::spawn(async move {
                    let _ = handle(socket, state).await;
                });
            }
        });
        Self { addr, state }
    }

    fn url(&self) -> String {
        format!("http://{}{BASE_PATH}", self.addr)
    }

    fn store(&self) -> WebDavStore {
        WebDavStore::new(
            WebDavConfig::new(self.url()).credentials(WebDavCredentials::new("me", "secret")),
        )
        .unwrap()
    }

    fn requests(&self) -> Vec<(String, String)> {
        self.state.lock().requests.clone()
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

async fn handle(mut socket: TcpStream, state: Arc<Mutex<DavState>>) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = find_header_end(&buf) {
            break end;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let mut content_length = 0usize;
    let mut authorization = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.trim().parse().unwrap_or(0),
                "authorization" => authorization = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }

    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    let (status, response_body) = {
        let mut state = state.lock();
        state.authorization.push(authorization);
        state.apply(&method, &path, body)
    };
    let send_body = method != "HEAD";
    let length = if send_body { response_body.len() } else { 0 };
    let response_head = format!(
        "HTTP/1.1 {status} Status\r\ncontent-length: {length}\r\nconnection: close\r\n\r\n"
    );
    socket.write_all(response_head.as_bytes()).await?;
    if send_body {
        socket.write_all(&response_body).await?;
    }
    socket.shutdown().await
}

#[tokio::test]
#[test_log::test]
async fn test_backup_and_restore_over_webdav() {
    let server = DavServer::start().await;
    let store = Arc::new(server.store());
    let engine = BackupEngine::new(
        store.clone(),
        BackupConfig::default().root("Tracker Backups"),
    );

    let report = engine.commit(&sample_items(), true).await.unwrap();
    assert!(
        server
            .requests()
            .iter()
            .any(|(method, path)| method == "MKCOL" && path == "/dav/Tracker%20Backups/")
    );
    let metrics = store.metrics_snapshot();
    assert_eq!(metrics.collections_created, 3);
    assert!(metrics.bytes_sent >= report.entry.size.unwrap_or_default());

    let restorable = engine.list_restorable().await;
    assert_eq!(entry_ids(&restorable), [report.entry.id.as_str()]);

    let collection = LocalCollection::default();
    engine
        .restore(&restorable[0], RestoreMode::Overwrite, &collection)
        .await
        .unwrap();
    assert_eq!(collection.snapshot(), sample_items());

    let auth = server.state.lock().authorization.clone();
    assert!(
        auth.iter()
            .all(|header| header.as_deref() == Some("Basic bWU6c2VjcmV0"))
    );
}

#[tokio::test]
#[test_log::test]
async fn test_missing_paths() {
    let server = DavServer::start().await;
    let store = server.store();

    assert!(!store.exists("Tracker/manifest.json").await.unwrap());
    store.delete("Tracker/manifest.json").await.unwrap();
    let err = store.download("Tracker/manifest.json").await.unwrap_err();
    assert!(matches!(err, BackupError::NotFound { .. }));
}

#[tokio::test]
#[test_log::test]
async fn test_upload_into_existing_collection_needs_no_mkcol() {
    let server = DavServer::start().await;
    let store = server.store();

    store
        .upload("note.txt", Bytes::from_static(b"hello"))
        .await
        .unwrap();
    assert!(store.exists("note.txt").await.unwrap());
    assert_eq!(
        store.download("note.txt").await.unwrap(),
        Bytes::from_static(b"hello")
    );
    assert!(!server.requests().iter().any(|(method, _)| method == "MKCOL"));
}

#[tokio::test]
#[test_log::test]
async fn test_server_error_is_remote_error() {
    let server = DavServer::start().await;
    let store = server.store();
    server.state.lock().fail_status = Some(500);

    match store.download("Tracker/manifest.json").await {
        Err(BackupError::Remote {
            code,
            method,
            message,
            ..
        }) => {
            assert_eq!(code, 500);
            assert_eq!(method, "GET");
            assert_eq!(message, "server exploded");
        }
        other => panic!("expected remote error, got {other:?}"),
    }
    let err = store.exists("Tracker/manifest.json").await.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(store.metrics_snapshot().errors, 2);
}

#[tokio::test]
#[test_log::test]
async fn test_unreachable_server_is_http_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let store = WebDavStore::new(WebDavConfig::new(format!("http://{addr}/dav"))).unwrap();
    let err = store.exists("anything").await.unwrap_err();
    assert!(matches!(err, BackupError::Http { .. }));
}
