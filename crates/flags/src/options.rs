//! Client configuration.
//!
//! Options can be set explicitly or picked up from the environment; explicit
//! values win. Environment variables are read once, when the options (and
//! the client holding them) are constructed.

use crate::error::FlagsError;
use flags_evaluation_engine::Datafile;
use std::path::PathBuf;
use std::time::Duration;

pub(crate) const DEFAULT_HOST: &str = "https://flags.vercel.com";
pub(crate) const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_millis(3000);
pub(crate) const MIN_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_BUNDLE_PATH: &str = ".vercel/flags-bundle.json";

/// Configuration options for a [`crate::FlagsClient`].
#[derive(Debug, Clone)]
pub struct FlagsOptions {
    /// Base URL of the flags service.
    pub host: String,
    /// Keep a long-lived stream subscription open (default). When enabled,
    /// polling is never started.
    pub streaming: bool,
    /// Poll the datafile endpoint at this interval instead of streaming.
    /// Must be at least 30 seconds.
    pub poll_interval: Option<Duration>,
    /// How long `initialize` waits for the first streamed or polled datafile
    /// before installing the best available fallback.
    pub init_timeout: Duration,
    /// A caller-provided datafile, installed immediately at initialization.
    pub datafile: Option<Datafile>,
    /// Force the build-step path on or off. When unset, `CI=1` or
    /// `NEXT_PHASE=phase-production-build` enables it.
    pub build_step: Option<bool>,
    /// Location of the bundled-definitions artifact. Defaults to
    /// `FLAGS_BUNDLE_PATH` or `.vercel/flags-bundle.json`.
    pub bundle_path: Option<PathBuf>,
    /// Report `FLAGS_CONFIG_READ` usage events to the ingest endpoint.
    pub tracking: bool,
}

impl Default for FlagsOptions {
    fn default() -> Self {
        Self {
            host: std::env::var("FLAGS_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            streaming: true,
            poll_interval: None,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            datafile: None,
            build_step: None,
            bundle_path: std::env::var("FLAGS_BUNDLE_PATH").ok().map(PathBuf::from),
            tracking: true,
        }
    }
}

impl FlagsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Disables the stream subscription.
    pub fn without_streaming(mut self) -> Self {
        self.streaming = false;
        self
    }

    /// Polls the datafile endpoint at `interval`. Polling only runs when
    /// streaming is disabled; combine with [`Self::without_streaming`].
    pub fn with_polling(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn with_datafile(mut self, datafile: Datafile) -> Self {
        self.datafile = Some(datafile);
        self
    }

    pub fn with_build_step(mut self, enabled: bool) -> Self {
        self.build_step = Some(enabled);
        self
    }

    pub fn with_bundle_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.bundle_path = Some(path.into());
        self
    }

    pub fn without_tracking(mut self) -> Self {
        self.tracking = false;
        self
    }

    /// Validation performed at client construction.
    pub(crate) fn validate(&self) -> Result<(), FlagsError> {
        if let Some(interval) = self.poll_interval {
            if interval < MIN_POLL_INTERVAL {
                return Err(FlagsError::InvalidOption(format!(
                    "poll interval must be at least {}s, got {}ms",
                    MIN_POLL_INTERVAL.as_secs(),
                    interval.as_millis()
                )));
            }
        }
        Ok(())
    }

    /// Resolves the build-step switch, reading the environment when no
    /// explicit override is set.
    pub(crate) fn build_step_enabled(&self) -> bool {
        if let Some(explicit) = self.build_step {
            return explicit;
        }
        std::env::var("CI").map(|v| v == "1").unwrap_or(false)
            || std::env::var("NEXT_PHASE")
                .map(|v| v == "phase-production-build")
                .unwrap_or(false)
    }

    pub(crate) fn bundle_path(&self) -> PathBuf {
        self.bundle_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BUNDLE_PATH))
    }
}
