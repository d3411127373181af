//! Long-lived stream subscription.
//!
//! One background task per client alternates between holding an NDJSON
//! response body open and backing off before the next attempt. The task's
//! only blocking points are the body read and the retry sleep; both unblock
//! when the cancel signal flips.

use super::{Endpoints, UpdateSink, USER_AGENT};
use crate::error::FlagsError;
use flags_evaluation_engine::Datafile;
use rand::Rng;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, sleep};
use tokio_stream::StreamExt;
use tracing::{debug, error, warn};

/// The subscription gives up for good after this many consecutive failed
/// attempts without a datafile.
pub(crate) const MAX_RETRY_COUNT: u32 = 15;

/// Two consecutive connect attempts are never closer than this, regardless
/// of backoff. A server that accepts and immediately closes would otherwise
/// reconnect in a tight loop.
pub(crate) const MIN_RECONNECT_GAP: Duration = Duration::from_secs(1);

const MAX_BACKOFF_MS: u64 = 60_000;
const JITTER_MS: u64 = 1_000;

type InitSender = oneshot::Sender<Result<(), FlagsError>>;

/// One message per NDJSON line.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamMessage {
    Datafile { data: Box<Datafile> },
    Ping,
}

enum ConnectOutcome {
    AuthFailed,
    Cancelled,
    Disconnected,
}

pub(crate) struct StreamSource {
    http: reqwest::Client,
    endpoints: Endpoints,
    sink: Arc<dyn UpdateSink>,
    cancel: watch::Receiver<bool>,
    connected: Arc<AtomicBool>,
    auth_failed: Arc<AtomicBool>,
}

impl StreamSource {
    pub fn new(
        http: reqwest::Client,
        endpoints: Endpoints,
        sink: Arc<dyn UpdateSink>,
        cancel: watch::Receiver<bool>,
        connected: Arc<AtomicBool>,
        auth_failed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            http,
            endpoints,
            sink,
            cancel,
            connected,
            auth_failed,
        }
    }

    /// Spawns the subscription task. The returned receiver resolves on the
    /// first installed datafile, or with an error on auth failure; it is
    /// dropped (closing with a receive error) when the task gives up.
    /// Recoverable errors never resolve it - the loop keeps retrying while
    /// callers race their own timeout.
    pub fn start(self) -> oneshot::Receiver<Result<(), FlagsError>> {
        let (init_tx, init_rx) = oneshot::channel();
        tokio::spawn(async move {
            self.run(init_tx).await;
        });
        init_rx
    }

    async fn run(self, init_tx: InitSender) {
        let mut init_tx = Some(init_tx);
        let mut retry_count: u32 = 0;
        let mut last_attempt: Option<Instant> = None;

        loop {
            if *self.cancel.borrow() {
                break;
            }

            if let Some(previous) = last_attempt {
                let since = previous.elapsed();
                if since < MIN_RECONNECT_GAP && self.sleep_cancelled(MIN_RECONNECT_GAP - since).await
                {
                    break;
                }
            }
            last_attempt = Some(Instant::now());

            let outcome = self
                .connect_and_read(&mut init_tx, &mut retry_count)
                .await;
            self.connected.store(false, Ordering::SeqCst);

            match outcome {
                ConnectOutcome::AuthFailed => {
                    error!("stream authentication failed; giving up");
                    self.auth_failed.store(true, Ordering::SeqCst);
                    if let Some(tx) = init_tx.take() {
                        let _ = tx.send(Err(FlagsError::StreamAuthFailed));
                    }
                    break;
                }
                ConnectOutcome::Cancelled => break,
                ConnectOutcome::Disconnected => {
                    retry_count += 1;
                    if retry_count > MAX_RETRY_COUNT {
                        error!(
                            attempts = retry_count,
                            "stream retries exhausted; subscription stopped"
                        );
                        break;
                    }
                    let delay = backoff_delay(retry_count);
                    debug!(attempt = retry_count, delay_ms = delay.as_millis() as u64, "stream reconnect scheduled");
                    if !delay.is_zero() && self.sleep_cancelled(delay).await {
                        break;
                    }
                }
            }
        }
    }

    async fn connect_and_read(
        &self,
        init_tx: &mut Option<InitSender>,
        retry_count: &mut u32,
    ) -> ConnectOutcome {
        let request = self
            .http
            .get(self.endpoints.stream_url())
            .bearer_auth(&self.endpoints.sdk_key)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header("X-Retry-Attempt", retry_count.to_string())
            .send();

        let response = tokio::select! {
            result = request => match result {
                Ok(response) => response,
                Err(error) => {
                    warn!(%error, "stream connection failed");
                    return ConnectOutcome::Disconnected;
                }
            },
            _ = cancelled(&self.cancel) => return ConnectOutcome::Cancelled,
        };

        if response.status() == StatusCode::UNAUTHORIZED {
            return ConnectOutcome::AuthFailed;
        }
        if !response.status().is_success() {
            warn!(status = response.status().as_u16(), "stream endpoint returned an error");
            return ConnectOutcome::Disconnected;
        }

        debug!("stream connected");
        self.connected.store(true, Ordering::SeqCst);

        let mut body = response.bytes_stream();
        // Lines can straddle chunk boundaries; carry the partial tail over.
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let chunk = tokio::select! {
                chunk = body.next() => chunk,
                _ = cancelled(&self.cancel) => return ConnectOutcome::Cancelled,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=newline).collect();
                        self.handle_line(&line, init_tx, retry_count).await;
                    }
                }
                Some(Err(error)) => {
                    warn!(%error, "stream read failed");
                    return ConnectOutcome::Disconnected;
                }
                None => {
                    if !buffer.is_empty() {
                        let line = std::mem::take(&mut buffer);
                        self.handle_line(&line, init_tx, retry_count).await;
                    }
                    debug!("stream ended");
                    return ConnectOutcome::Disconnected;
                }
            }
        }
    }

    async fn handle_line(
        &self,
        line: &[u8],
        init_tx: &mut Option<InitSender>,
        retry_count: &mut u32,
    ) {
        let Ok(text) = std::str::from_utf8(line) else {
            debug!("skipping non-UTF-8 stream line");
            return;
        };
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        match serde_json::from_str::<StreamMessage>(text) {
            Ok(StreamMessage::Datafile { data }) => {
                *retry_count = 0;
                let installed = self.sink.try_update(*data).await;
                if installed {
                    if let Some(tx) = init_tx.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
            }
            Ok(StreamMessage::Ping) => {
                debug!("stream ping");
            }
            Err(error) => {
                debug!(%error, "skipping unrecognized stream message");
            }
        }
    }

    /// Sleeps for `duration`; returns `true` when cancelled first.
    async fn sleep_cancelled(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = sleep(duration) => false,
            _ = cancelled(&self.cancel) => true,
        }
    }
}

/// Resolves once the cancel signal flips (or its sender is gone).
async fn cancelled(cancel: &watch::Receiver<bool>) {
    let mut cancel = cancel.clone();
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}

/// `backoff(1) = 0`, then `min(1000 * 2^(n-2), 60000)` plus up to a second
/// of jitter.
fn backoff_delay(retry_count: u32) -> Duration {
    if retry_count <= 1 {
        return Duration::ZERO;
    }
    let exponent = (retry_count - 2).min(16);
    let base = 1_000u64.saturating_mul(1u64 << exponent).min(MAX_BACKOFF_MS);
    let jitter = rand::rng().random_range(0..JITTER_MS);
    Duration::from_millis(base + jitter)
}
