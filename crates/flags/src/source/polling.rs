//! Periodic datafile polling.
//!
//! Runs only when streaming is disabled. The first fetch happens
//! immediately and settles the init signal; each subsequent fetch is
//! scheduled `interval` after the previous one completes, so slow responses
//! never stack requests.

use super::remote::fetch_datafile;
use super::{Endpoints, UpdateSink};
use crate::error::FlagsError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::sleep;
use tracing::{debug, error, warn};

type InitSender = oneshot::Sender<Result<(), FlagsError>>;

pub(crate) struct PollingSource {
    http: reqwest::Client,
    endpoints: Endpoints,
    sink: Arc<dyn UpdateSink>,
    interval: Duration,
    cancel: watch::Receiver<bool>,
    auth_failed: Arc<AtomicBool>,
}

impl PollingSource {
    pub fn new(
        http: reqwest::Client,
        endpoints: Endpoints,
        sink: Arc<dyn UpdateSink>,
        interval: Duration,
        cancel: watch::Receiver<bool>,
        auth_failed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            http,
            endpoints,
            sink,
            interval,
            cancel,
            auth_failed,
        }
    }

    /// Spawns the polling task. The returned receiver settles after the
    /// first fetch: `Ok` on success, the error when it fails. Later fetch
    /// errors are logged and the loop continues.
    pub fn start(self) -> oneshot::Receiver<Result<(), FlagsError>> {
        let (init_tx, init_rx) = oneshot::channel();
        tokio::spawn(async move {
            self.run(init_tx).await;
        });
        init_rx
    }

    async fn run(mut self, init_tx: InitSender) {
        let mut init_tx = Some(init_tx);

        loop {
            if *self.cancel.borrow() {
                break;
            }

            match fetch_datafile(&self.http, &self.endpoints, Some(self.cancel.clone())).await {
                Ok(datafile) => {
                    // A stop observed during the fetch must not surface as
                    // an update.
                    if *self.cancel.borrow() {
                        break;
                    }
                    self.sink.try_update(datafile).await;
                    if let Some(tx) = init_tx.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
                Err(FlagsError::Aborted) => break,
                Err(FlagsError::StreamAuthFailed) => {
                    error!("polling authentication failed; poller stopped");
                    self.auth_failed.store(true, Ordering::SeqCst);
                    if let Some(tx) = init_tx.take() {
                        let _ = tx.send(Err(FlagsError::StreamAuthFailed));
                    }
                    break;
                }
                Err(error) => {
                    warn!(%error, "datafile poll failed");
                    if let Some(tx) = init_tx.take() {
                        let _ = tx.send(Err(error));
                    }
                }
            }

            debug!(interval_ms = self.interval.as_millis() as u64, "next poll scheduled");
            let stopped = tokio::select! {
                _ = sleep(self.interval) => false,
                _ = self.cancel.wait_for(|cancelled| *cancelled) => true,
            };
            if stopped {
                break;
            }
        }
        debug!("poller stopped");
    }
}
