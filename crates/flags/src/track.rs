//! Usage tracking.
//!
//! Every read of the current datafile produces one `FLAGS_CONFIG_READ`
//! event. Events accumulate in a buffer that is flushed on shutdown, or
//! early when the buffer grows past a threshold. After any authentication
//! failure the SDK key is presumed invalid and tracking stops entirely.

use crate::metrics::{CacheAction, CacheStatus, ConfigOrigin};
use crate::source::{Endpoints, USER_AGENT};
use flags_evaluation_engine::{OutcomeKind, Reason};
use reqwest::StatusCode;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Buffer size that triggers an early flush.
const FLUSH_THRESHOLD: usize = 100;

const CONFIG_READ_EVENT: &str = "FLAGS_CONFIG_READ";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UsageEvent {
    pub event_type: &'static str,
    pub cache_status: CacheStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_origin: Option<ConfigOrigin>,
    pub cache_action: CacheAction,
    pub cache_is_first_read: bool,
    pub cache_is_blocking: bool,
    /// Read duration in milliseconds.
    pub duration: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_updated_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_type: Option<OutcomeKind>,
}

impl Default for UsageEvent {
    fn default() -> Self {
        Self {
            event_type: CONFIG_READ_EVENT,
            cache_status: CacheStatus::Miss,
            config_origin: None,
            cache_action: CacheAction::None,
            cache_is_first_read: false,
            cache_is_blocking: false,
            duration: 0,
            config_updated_at: None,
            reason: None,
            outcome_type: None,
        }
    }
}

pub(crate) struct UsageTracker {
    http: reqwest::Client,
    endpoints: Endpoints,
    enabled: bool,
    /// Shared with the sources; set on any HTTP 401.
    suppressed: Arc<AtomicBool>,
    buffer: Mutex<Vec<UsageEvent>>,
}

impl UsageTracker {
    pub fn new(
        http: reqwest::Client,
        endpoints: Endpoints,
        enabled: bool,
        suppressed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            http,
            endpoints,
            enabled,
            suppressed,
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub async fn record(&self, event: UsageEvent) {
        if !self.enabled || self.suppressed.load(Ordering::SeqCst) {
            return;
        }
        let batch = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(event);
            if buffer.len() >= FLUSH_THRESHOLD {
                Some(std::mem::take(&mut *buffer))
            } else {
                None
            }
        };
        if let Some(batch) = batch {
            self.send(batch).await;
        }
    }

    /// Drains and posts the buffer. A no-op when tracking is disabled or
    /// suppressed, or when nothing has accumulated.
    pub async fn flush(&self) {
        if !self.enabled || self.suppressed.load(Ordering::SeqCst) {
            return;
        }
        let batch = std::mem::take(&mut *self.buffer.lock().await);
        if batch.is_empty() {
            return;
        }
        self.send(batch).await;
    }

    async fn send(&self, batch: Vec<UsageEvent>) {
        debug!(events = batch.len(), "flushing usage events");
        let response = self
            .http
            .post(self.endpoints.ingest_url())
            .bearer_auth(&self.endpoints.sdk_key)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .json(&batch)
            .send()
            .await;

        match response {
            Ok(response) if response.status() == StatusCode::UNAUTHORIZED => {
                warn!("ingest rejected the SDK key; usage tracking suppressed");
                self.suppressed.store(true, Ordering::SeqCst);
            }
            Ok(response) if !response.status().is_success() => {
                warn!(status = response.status().as_u16(), "usage flush failed");
            }
            Ok(_) => {}
            Err(error) => {
                warn!(%error, "usage flush failed");
            }
        }
    }
}
