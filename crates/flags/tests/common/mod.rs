#![allow(dead_code)]

use serde_json::{Value, json};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use vercel_flags_core::FlagsOptions;

pub const SDK_KEY: &str = "vf_test_key";

/// A datafile with a boolean flag paused on `true`, a targeted string flag,
/// and a segment-gated flag.
pub fn datafile_json(config_updated_at: i64) -> Value {
    json!({
        "projectId": "prj_test",
        "environment": "production",
        "definitions": {
            "bool-flag": {
                "variants": [false, true],
                "environments": {"production": 1}
            },
            "string-flag": {
                "variants": ["default", "targeted"],
                "environments": {
                    "production": {
                        "targets": [{}, {"user": {"id": ["user-123"]}}],
                        "fallthrough": 0
                    }
                }
            },
            "segment-flag": {
                "variants": [false, true],
                "environments": {
                    "production": {
                        "rules": [
                            {"conditions": [["segment", "ONE_OF", ["segment1"]]], "outcome": 1}
                        ],
                        "fallthrough": 0
                    }
                }
            }
        },
        "segments": {
            "segment1": {"include": {"user": {"id": ["uid1"]}}}
        },
        "configUpdatedAt": config_updated_at,
        "digest": format!("digest-{config_updated_at}"),
        "revision": "r1"
    })
}

/// One NDJSON stream line carrying a datafile.
pub fn datafile_message(config_updated_at: i64) -> String {
    json!({"type": "datafile", "data": datafile_json(config_updated_at)}).to_string()
}

/// Writes a bundled-definitions artifact mapping `sdk_key` to `datafile`.
pub fn bundle_artifact(sdk_key: &str, datafile: Value) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", json!({ sdk_key: datafile })).unwrap();
    file
}

/// Client options pointed at a test server, with a short init timeout so
/// fallback paths settle quickly.
pub fn test_options(host: &str) -> FlagsOptions {
    FlagsOptions::new()
        .with_host(host)
        .with_build_step(false)
        .with_init_timeout(Duration::from_millis(500))
        .without_tracking()
        .with_bundle_path("/nonexistent/bundle.json")
}

pub fn entities(value: Value) -> vercel_flags_core::Entities {
    serde_json::from_value(value).unwrap()
}

const STREAM_RESPONSE_HEAD: &str =
    "HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\nconnection: close\r\n\r\n";

/// A minimal push-capable NDJSON stream endpoint. Every accepted connection
/// gets the response head, then every broadcast chunk as it is pushed; the
/// connection stays open until the server is dropped.
#[derive(Clone)]
pub struct StreamServer {
    addr: SocketAddr,
    chunks: broadcast::Sender<Vec<u8>>,
    connections: Arc<AtomicUsize>,
}

impl StreamServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (chunks, _) = broadcast::channel::<Vec<u8>>(64);
        let connections = Arc::new(AtomicUsize::new(0));

        let sender = chunks.clone();
        let counter = connections.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut receiver = sender.subscribe();
                tokio::spawn(async move {
                    let mut head = [0u8; 1024];
                    let _ = socket.read(&mut head).await;
                    if socket.write_all(STREAM_RESPONSE_HEAD.as_bytes()).await.is_err() {
                        return;
                    }
                    let _ = socket.flush().await;
                    while let Ok(chunk) = receiver.recv().await {
                        if socket.write_all(&chunk).await.is_err() {
                            return;
                        }
                        let _ = socket.flush().await;
                    }
                });
            }
        });

        Self {
            addr,
            chunks,
            connections,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Pushes one newline-terminated NDJSON line to all connections.
    pub fn push_line(&self, line: &str) {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        let _ = self.chunks.send(bytes);
    }

    /// Pushes raw bytes without a newline, to exercise partial-line
    /// buffering across chunk boundaries.
    pub fn push_raw(&self, bytes: &[u8]) {
        let _ = self.chunks.send(bytes.to_vec());
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// A server that accepts, completes the HTTP response head, and immediately
/// closes - the reconnect-storm shape.
pub struct ClosingServer {
    addr: SocketAddr,
    accepts: Arc<AtomicUsize>,
}

impl ClosingServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepts = Arc::new(AtomicUsize::new(0));

        let counter = accepts.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut head = [0u8; 1024];
                    let _ = socket.read(&mut head).await;
                    let _ = socket.write_all(STREAM_RESPONSE_HEAD.as_bytes()).await;
                    let _ = socket.flush().await;
                    // dropping the socket closes the connection right away
                });
            }
        });

        Self { addr, accepts }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn accept_count(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }
}

/// Polls until `check` passes or the deadline lapses.
pub async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}
