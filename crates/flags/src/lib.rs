//! # Vercel Flags Core SDK
//!
//! Server-side feature flag evaluation: a client that keeps a current flag
//! configuration (the *datafile*) warm through a streaming subscription,
//! polling, bundled snapshots, or a caller-provided datafile, and evaluates
//! flags against it deterministically.
//!
//! `evaluate` stays correct, fast and cheap even while the configuration
//! source is slow, temporarily unavailable, or being rolled out: transient
//! source failures are retried with bounded backoff, an authentication
//! failure falls back to bundled definitions, and installed configuration
//! only ever moves forward in freshness.
//!
//! ## Example
//!
//! ```rust,no_run
//! use vercel_flags_core::{FlagsClient, FlagsOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = FlagsClient::new("vf_your_sdk_key", FlagsOptions::default()).unwrap();
//!
//!     let entities = serde_json::from_value(json!({
//!         "user": {"id": "user-123"}
//!     }))
//!     .unwrap();
//!
//!     let result = client
//!         .evaluate("checkout-redesign", Some(json!(false)), Some(&entities))
//!         .await
//!         .unwrap();
//!     println!("enabled: {:?}", result.as_bool());
//!
//!     client.shutdown().await;
//! }
//! ```
//!
//! ## Configuration sources
//!
//! | Source | When |
//! |--------|------|
//! | Stream (`/v1/stream`) | Default; long-lived NDJSON subscription with retry and backoff. |
//! | Polling (`/v1/datafile`) | When streaming is disabled and a poll interval is set. |
//! | Bundled snapshot | Build steps and fallback when live sources are unavailable. |
//! | Caller-provided datafile | Installed immediately at initialization. |
//! | Remote fetch | One-shot, for `get_datafile` and build steps without a bundle. |
//!
//! Clients in the same process are fully independent; nothing is shared
//! between instances.

mod controller;
pub mod error;
pub mod metrics;
mod options;
mod sdk_key;
mod source;
mod track;

pub use error::FlagsError;
pub use flags_evaluation_engine::{
    Datafile, Entities, ErrorCode, FlagDefinition, OutcomeKind, Reason, Segment,
};
pub use metrics::{
    CacheAction, CacheStatus, ConfigOrigin, ConnectionState, DatafileMetrics, EvaluationMetrics,
    Mode,
};
pub use options::FlagsOptions;

use crate::controller::Controller;
use crate::source::Endpoints;
use crate::track::{UsageEvent, UsageTracker};
use flags_evaluation_engine::{Evaluation, evaluate};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, instrument};

const DEFAULT_ENVIRONMENT: &str = "production";
const NO_DEFINITIONS_MESSAGE: &str = "No flag definitions available";

/// Environment variable read by [`default_client`].
const SDK_KEY_ENV: &str = "FLAGS";

/// One evaluated flag: the value, why it was chosen, and read/evaluation
/// observability.
#[derive(Debug, Clone)]
pub struct FlagEvaluation {
    pub value: Option<Value>,
    pub reason: Reason,
    pub outcome_type: Option<OutcomeKind>,
    pub error_message: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub metrics: EvaluationMetrics,
}

impl FlagEvaluation {
    pub fn is_error(&self) -> bool {
        self.reason == Reason::Error
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_ref().and_then(Value::as_bool)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.value.as_ref().and_then(Value::as_i64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_ref().and_then(Value::as_f64)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value.as_ref().and_then(Value::as_str)
    }
}

/// A datafile obtained through [`FlagsClient::get_datafile`], with the
/// attributes of the read that produced it.
#[derive(Debug, Clone)]
pub struct DatafileSnapshot {
    pub datafile: Datafile,
    pub metrics: DatafileMetrics,
}

/// The feature-flags client.
///
/// Construction validates the SDK key and options but performs no I/O;
/// configuration sources start lazily on the first `evaluate` (or an
/// explicit [`Self::initialize`]).
pub struct FlagsClient {
    sdk_key: String,
    controller: Controller,
    tracker: UsageTracker,
}

impl FlagsClient {
    /// Creates a client from a bare SDK key (`vf_…`) or a
    /// `flags:…&sdkKey=vf_…` connection string.
    #[instrument(skip(key_or_connection_string, options))]
    pub fn new(key_or_connection_string: &str, options: FlagsOptions) -> Result<Self, FlagsError> {
        let sdk_key = sdk_key::parse_sdk_key(key_or_connection_string)?;
        options.validate()?;

        let http = reqwest::Client::builder()
            .build()
            .map_err(|error| FlagsError::Http(error.to_string()))?;
        let endpoints = Endpoints::new(options.host.clone(), sdk_key.clone());
        let auth_failed = Arc::new(AtomicBool::new(false));
        let tracker = UsageTracker::new(
            http.clone(),
            endpoints.clone(),
            options.tracking,
            auth_failed.clone(),
        );
        let controller = Controller::new(http, endpoints, options, auth_failed);
        debug!(mode = ?controller.mode(), "flags client created");

        Ok(Self {
            sdk_key,
            controller,
            tracker,
        })
    }

    /// The resolved SDK key this client authenticates with.
    pub fn sdk_key(&self) -> &str {
        &self.sdk_key
    }

    /// Starts the configured sources and waits for the first configuration
    /// (or its timeout fallback). Called implicitly by `evaluate`.
    pub async fn initialize(&self) -> Result<(), FlagsError> {
        self.controller.initialize().await
    }

    /// Evaluates one flag under the given entities.
    ///
    /// Evaluation problems (unknown flag, misconfigured definition) come
    /// back inside the [`FlagEvaluation`] with `reason == Error`. The only
    /// rejection here is the no-data case: when every source failed to
    /// produce a datafile and no `default_value` was supplied, this returns
    /// [`FlagsError::NoDefinitionsAvailable`].
    pub async fn evaluate(
        &self,
        flag_key: &str,
        default_value: Option<Value>,
        entities: Option<&Entities>,
    ) -> Result<FlagEvaluation, FlagsError> {
        let was_ready = self.controller.is_ready();
        let read_start = Instant::now();
        self.controller.initialize().await?;
        let read = self.controller.read().await;
        let read_ms = millis(read_start);

        let Some(datafile) = read.datafile else {
            if let Some(default) = default_value {
                return Ok(FlagEvaluation {
                    value: Some(default),
                    reason: Reason::Error,
                    outcome_type: None,
                    error_message: Some(NO_DEFINITIONS_MESSAGE.to_string()),
                    error_code: None,
                    metrics: EvaluationMetrics {
                        evaluation_ms: 0.0,
                        read_ms,
                        datafile: read.metrics,
                    },
                });
            }
            return Err(FlagsError::NoDefinitionsAvailable);
        };

        let environment = datafile
            .environment
            .as_deref()
            .unwrap_or(DEFAULT_ENVIRONMENT);

        let evaluation_start = Instant::now();
        let result = match datafile.definitions.get(flag_key) {
            Some(definition) => evaluate(
                definition,
                environment,
                entities,
                Some(&datafile.segments),
                default_value.as_ref(),
            ),
            None => Evaluation::error(
                format!("flag \"{flag_key}\" was not found"),
                Some(ErrorCode::FlagNotFound),
                default_value.as_ref(),
            ),
        };
        let evaluation_ms = millis(evaluation_start);

        self.tracker
            .record(UsageEvent {
                cache_status: read.metrics.cache_status,
                config_origin: read.metrics.origin,
                cache_action: self.controller.cache_action(),
                cache_is_first_read: read.first_read,
                cache_is_blocking: !was_ready,
                duration: read_ms as u64,
                config_updated_at: datafile.config_updated_at,
                reason: Some(result.reason),
                outcome_type: result.outcome_kind,
                ..UsageEvent::default()
            })
            .await;

        Ok(FlagEvaluation {
            value: result.value,
            reason: result.reason,
            outcome_type: result.outcome_kind,
            error_message: result.error_message,
            error_code: result.error_code,
            metrics: EvaluationMetrics {
                evaluation_ms,
                read_ms,
                datafile: read.metrics,
            },
        })
    }

    /// The freshest datafile obtainable right now. Prefers the installed
    /// datafile while the stream is connected; otherwise fetches once from
    /// the datafile endpoint.
    pub async fn get_datafile(&self) -> Result<DatafileSnapshot, FlagsError> {
        let (datafile, metrics) = self.controller.get_datafile(None).await?;
        Ok(DatafileSnapshot {
            datafile: (*datafile).clone(),
            metrics,
        })
    }

    /// Like [`Self::get_datafile`], aborting the underlying request when
    /// `signal` flips to `true`.
    pub async fn get_datafile_with_signal(
        &self,
        signal: watch::Receiver<bool>,
    ) -> Result<DatafileSnapshot, FlagsError> {
        let (datafile, metrics) = self.controller.get_datafile(Some(signal)).await?;
        Ok(DatafileSnapshot {
            datafile: (*datafile).clone(),
            metrics,
        })
    }

    /// The bundled snapshot for this SDK key. Never performs network I/O;
    /// errors name exactly what was missing.
    pub async fn get_fallback_datafile(&self) -> Result<Datafile, FlagsError> {
        self.controller.get_fallback_datafile().await
    }

    /// Stops all sources, flushes buffered usage events, and drops the
    /// current datafile. Idempotent; never fails.
    pub async fn shutdown(&self) {
        if !self.controller.shutdown().await {
            return;
        }
        self.tracker.flush().await;
    }
}

impl std::fmt::Debug for FlagsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlagsClient")
            .field("mode", &self.controller.mode())
            .field("ready", &self.controller.is_ready())
            .field("closed", &self.controller.is_closed())
            .finish()
    }
}

static DEFAULT_CLIENT: Lazy<std::sync::Mutex<Option<Arc<FlagsClient>>>> =
    Lazy::new(|| std::sync::Mutex::new(None));

/// The process-wide default client, constructed lazily from the `FLAGS`
/// environment variable (a bare key or a connection string).
pub fn default_client() -> Result<Arc<FlagsClient>, FlagsError> {
    let mut slot = DEFAULT_CLIENT
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(client) = slot.as_ref() {
        return Ok(client.clone());
    }
    let key = std::env::var(SDK_KEY_ENV).map_err(|_| {
        FlagsError::MissingSdkKey(format!("the {SDK_KEY_ENV} environment variable is not set"))
    })?;
    let client = Arc::new(FlagsClient::new(&key, FlagsOptions::default())?);
    *slot = Some(client.clone());
    Ok(client)
}

/// Drops the memoized default client so the next [`default_client`] call
/// re-reads the environment. Test hook only.
#[doc(hidden)]
pub fn reset_default_client() {
    let mut slot = DEFAULT_CLIENT
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = None;
}

fn millis(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1_000.0
}
