//! Configuration controller.
//!
//! The controller is the single writer of the current datafile. Sources
//! (stream, poller, bundled snapshot, remote fetch, caller-provided
//! datafile) produce candidates; the controller installs one only when it is
//! strictly fresher than what is already visible to callers.
//!
//! Instance states: uninitialized -> initializing (first `initialize`) ->
//! ready, and ready -> closed on `shutdown`. A failed initialization leaves
//! the instance uninitialized so a later call can retry.

use crate::error::FlagsError;
use crate::metrics::{
    CacheAction, CacheStatus, ConfigOrigin, ConnectionState, DatafileMetrics, Mode,
};
use crate::options::FlagsOptions;
use crate::source::bundled::{BundleState, BundledSource};
use crate::source::polling::PollingSource;
use crate::source::remote::fetch_datafile;
use crate::source::stream::StreamSource;
use crate::source::{Endpoints, UpdateSink};
use async_trait::async_trait;
use flags_evaluation_engine::Datafile;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, warn};

struct Installed {
    datafile: Arc<Datafile>,
    origin: ConfigOrigin,
}

/// Result of one datafile read: the current snapshot plus its observability
/// attributes. Never triggers network work.
pub(crate) struct DatafileRead {
    pub datafile: Option<Arc<Datafile>>,
    pub first_read: bool,
    pub metrics: DatafileMetrics,
}

/// Cheaply cloneable; clones share all state. Sources hold a clone as their
/// update sink.
#[derive(Clone)]
pub(crate) struct Controller {
    http: reqwest::Client,
    endpoints: Endpoints,
    options: Arc<FlagsOptions>,
    build_step: bool,
    mode: Mode,
    bundled: Arc<BundledSource>,
    current: Arc<RwLock<Option<Installed>>>,
    ready: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    first_read_done: Arc<AtomicBool>,
    /// Serializes initialization; concurrent callers wait here instead of
    /// duplicating source startup.
    init_lock: Arc<Mutex<()>>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
    stream_connected: Arc<AtomicBool>,
    auth_failed: Arc<AtomicBool>,
}

impl Controller {
    pub fn new(
        http: reqwest::Client,
        endpoints: Endpoints,
        options: FlagsOptions,
        auth_failed: Arc<AtomicBool>,
    ) -> Self {
        let build_step = options.build_step_enabled();
        let mode = if build_step {
            Mode::Build
        } else if options.streaming {
            Mode::Streaming
        } else if options.poll_interval.is_some() {
            Mode::Polling
        } else {
            Mode::Offline
        };
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let bundled = Arc::new(BundledSource::new(
            options.bundle_path(),
            endpoints.sdk_key.clone(),
        ));
        Self {
            http,
            endpoints,
            options: Arc::new(options),
            build_step,
            mode,
            bundled,
            current: Arc::new(RwLock::new(None)),
            ready: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
            first_read_done: Arc::new(AtomicBool::new(false)),
            init_lock: Arc::new(Mutex::new(())),
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
            stream_connected: Arc::new(AtomicBool::new(false)),
            auth_failed,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    fn connection_state(&self) -> ConnectionState {
        if self.stream_connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Whether reads follow a live subscription.
    pub fn cache_action(&self) -> CacheAction {
        if self.mode == Mode::Streaming && !self.auth_failed.load(Ordering::SeqCst) {
            CacheAction::Following
        } else {
            CacheAction::None
        }
    }

    /// Brings the controller to `ready`. Concurrent callers coalesce on one
    /// initialization; all of them observe its outcome. Always resolves once
    /// the configured sources have either delivered, timed out into a
    /// fallback, or left the controller empty - evaluations then see a
    /// defined "no data" error rather than a hang.
    pub async fn initialize(&self) -> Result<(), FlagsError> {
        if self.is_closed() {
            return Err(FlagsError::Closed);
        }
        if self.is_ready() {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        if self.is_ready() {
            return Ok(());
        }
        let result = self.do_initialize().await;
        if result.is_ok() {
            self.ready.store(true, Ordering::SeqCst);
        }
        result
    }

    async fn do_initialize(&self) -> Result<(), FlagsError> {
        // Fast path: a caller-provided datafile is authoritative right away;
        // live sources catch up in the background.
        if let Some(datafile) = self.options.datafile.clone() {
            self.install_if_fresher(datafile, ConfigOrigin::InMemory)
                .await;
            self.start_live_sources();
            return Ok(());
        }

        if self.build_step {
            return self.initialize_build_step().await;
        }

        if self.options.streaming {
            let init_rx = self.spawn_stream();
            match tokio::time::timeout(self.options.init_timeout, init_rx).await {
                Ok(Ok(Ok(()))) => {
                    debug!("stream delivered the initial datafile");
                }
                Ok(Ok(Err(error))) => {
                    warn!(%error, "stream initialization failed; installing fallback");
                    self.install_fallback().await;
                }
                Ok(Err(_)) => {
                    warn!("stream stopped before delivering a datafile; installing fallback");
                    self.install_fallback().await;
                }
                Err(_) => {
                    warn!(
                        timeout_ms = self.options.init_timeout.as_millis() as u64,
                        "stream initialization timed out; installing fallback while it retries"
                    );
                    self.install_fallback().await;
                }
            }
            return Ok(());
        }

        if let Some(interval) = self.options.poll_interval {
            let poller = PollingSource::new(
                self.http.clone(),
                self.endpoints.clone(),
                Arc::new(self.clone()),
                interval,
                self.cancel_rx.clone(),
                self.auth_failed.clone(),
            );
            let init_rx = poller.start();
            match tokio::time::timeout(self.options.init_timeout, init_rx).await {
                Ok(Ok(Ok(()))) => {
                    debug!("poller delivered the initial datafile");
                }
                Ok(Ok(Err(error))) => {
                    warn!(%error, "first poll failed; installing fallback");
                    self.install_fallback().await;
                }
                Ok(Err(_)) => {
                    warn!("poller stopped before delivering a datafile; installing fallback");
                    self.install_fallback().await;
                }
                Err(_) => {
                    warn!("first poll timed out; installing fallback");
                    self.install_fallback().await;
                }
            }
            return Ok(());
        }

        // No live source configured: bundled snapshot or nothing.
        self.install_fallback().await;
        Ok(())
    }

    async fn initialize_build_step(&self) -> Result<(), FlagsError> {
        let load = self.bundled.load().await;
        if load.state == BundleState::Ok {
            if let Some(datafile) = load.definitions.clone() {
                self.install_if_fresher(datafile, ConfigOrigin::Embedded)
                    .await;
                return Ok(());
            }
        }

        debug!("no bundled definitions during build step; fetching once");
        match fetch_datafile(&self.http, &self.endpoints, Some(self.cancel_rx.clone())).await {
            Ok(datafile) => {
                self.install_if_fresher(datafile, ConfigOrigin::Remote).await;
            }
            Err(FlagsError::StreamAuthFailed) => {
                warn!("datafile fetch rejected the SDK key during build step");
                self.auth_failed.store(true, Ordering::SeqCst);
            }
            Err(error) => {
                warn!(%error, "build-step fetch failed; proceeding without flag definitions");
            }
        }
        Ok(())
    }

    fn spawn_stream(&self) -> tokio::sync::oneshot::Receiver<Result<(), FlagsError>> {
        let stream = StreamSource::new(
            self.http.clone(),
            self.endpoints.clone(),
            Arc::new(self.clone()),
            self.cancel_rx.clone(),
            self.stream_connected.clone(),
            self.auth_failed.clone(),
        );
        stream.start()
    }

    /// Background start of stream or poller after the fast path installed a
    /// caller-provided datafile. Their init signals are intentionally
    /// dropped; updates flow through `try_update` as they arrive.
    fn start_live_sources(&self) {
        if self.options.streaming {
            drop(self.spawn_stream());
        } else if let Some(interval) = self.options.poll_interval {
            let poller = PollingSource::new(
                self.http.clone(),
                self.endpoints.clone(),
                Arc::new(self.clone()),
                interval,
                self.cancel_rx.clone(),
                self.auth_failed.clone(),
            );
            drop(poller.start());
        }
    }

    async fn install_fallback(&self) {
        let load = self.bundled.load().await;
        match &load.state {
            BundleState::Ok => {
                if let Some(datafile) = load.definitions.clone() {
                    self.install_if_fresher(datafile, ConfigOrigin::Embedded)
                        .await;
                }
            }
            state => {
                warn!(
                    ?state,
                    "no bundled fallback available; proceeding without flag definitions"
                );
            }
        }
    }

    /// Installs `incoming` unless the currently-installed datafile is at
    /// least as fresh. A current datafile without a parseable freshness
    /// token may be overwritten by anything; an incoming one without a token
    /// never overwrites a tokened current.
    async fn install_if_fresher(&self, incoming: Datafile, origin: ConfigOrigin) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut current = self.current.write().await;
        let accept = match current.as_ref() {
            None => true,
            Some(installed) => match (
                installed.datafile.config_updated_at,
                incoming.config_updated_at,
            ) {
                (None, _) => true,
                (Some(current_at), Some(incoming_at)) => incoming_at > current_at,
                (Some(_), None) => false,
            },
        };
        if accept {
            debug!(
                config_updated_at = ?incoming.config_updated_at,
                ?origin,
                "installed datafile"
            );
            *current = Some(Installed {
                datafile: Arc::new(incoming),
                origin,
            });
        } else {
            debug!(
                incoming = ?incoming.config_updated_at,
                "discarded stale datafile"
            );
        }
        accept
    }

    /// The currently-installed datafile and its read attributes.
    pub async fn read(&self) -> DatafileRead {
        let current = self.current.read().await;
        let first_read = !self.first_read_done.swap(true, Ordering::SeqCst);
        let connection_state = self.connection_state();
        let (datafile, origin) = match current.as_ref() {
            Some(installed) => (Some(installed.datafile.clone()), Some(installed.origin)),
            None => (None, None),
        };
        let cache_status = match &datafile {
            None => CacheStatus::Miss,
            Some(_) => {
                if !first_read
                    && self.mode == Mode::Streaming
                    && connection_state == ConnectionState::Disconnected
                {
                    CacheStatus::Stale
                } else {
                    CacheStatus::Hit
                }
            }
        };
        DatafileRead {
            datafile,
            first_read,
            metrics: DatafileMetrics {
                origin,
                cache_status,
                connection_state,
                mode: self.mode,
            },
        }
    }

    /// The freshest datafile obtainable right now: the installed one while
    /// the stream is connected, otherwise a one-shot remote fetch. During
    /// the build step this is the initialization result.
    pub async fn get_datafile(
        &self,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<(Arc<Datafile>, DatafileMetrics), FlagsError> {
        if self.is_closed() {
            return Err(FlagsError::Closed);
        }

        if self.build_step {
            self.initialize().await?;
            let read = self.read().await;
            return read
                .datafile
                .map(|datafile| (datafile, read.metrics))
                .ok_or(FlagsError::NoDefinitionsAvailable);
        }

        if self.connection_state() == ConnectionState::Connected {
            let read = self.read().await;
            if let Some(datafile) = read.datafile {
                return Ok((datafile, read.metrics));
            }
        }

        let cancel = cancel.unwrap_or_else(|| self.cancel_rx.clone());
        let datafile = match fetch_datafile(&self.http, &self.endpoints, Some(cancel)).await {
            Ok(datafile) => datafile,
            Err(FlagsError::StreamAuthFailed) => {
                self.auth_failed.store(true, Ordering::SeqCst);
                return Err(FlagsError::StreamAuthFailed);
            }
            Err(error) => return Err(error),
        };
        let metrics = DatafileMetrics {
            origin: Some(ConfigOrigin::Remote),
            cache_status: CacheStatus::Miss,
            connection_state: self.connection_state(),
            mode: self.mode,
        };
        Ok((Arc::new(datafile), metrics))
    }

    /// The bundled snapshot, never touching the network.
    pub async fn get_fallback_datafile(&self) -> Result<Datafile, FlagsError> {
        self.bundled.fallback_datafile().await
    }

    /// Stops sources and drops the current datafile. Returns `true` on the
    /// first call; later calls are no-ops.
    pub async fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.cancel_tx.send(true);
        self.stream_connected.store(false, Ordering::SeqCst);
        *self.current.write().await = None;
        debug!("controller closed");
        true
    }
}

#[async_trait]
impl UpdateSink for Controller {
    async fn try_update(&self, datafile: Datafile) -> bool {
        self.install_if_fresher(datafile, ConfigOrigin::InMemory).await
    }
}
