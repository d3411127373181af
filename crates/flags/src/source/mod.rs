//! Datafile sources.
//!
//! Each source produces candidate datafiles and hands them to the controller
//! through [`UpdateSink::try_update`]; only the controller decides whether a
//! candidate is installed. Sources own their own retry state and background
//! tasks.

pub(crate) mod bundled;
pub(crate) mod polling;
pub(crate) mod remote;
pub(crate) mod stream;

use async_trait::async_trait;
use flags_evaluation_engine::Datafile;

pub(crate) const USER_AGENT: &str = concat!("VercelFlagsCore/", env!("CARGO_PKG_VERSION"));

/// Receiver of candidate datafiles. Implemented by the controller; test
/// doubles implement it to observe source behavior in isolation.
#[async_trait]
pub(crate) trait UpdateSink: Send + Sync {
    /// Returns `true` when the candidate was installed.
    async fn try_update(&self, datafile: Datafile) -> bool;
}

/// Resolved service endpoints plus the credential they are called with.
#[derive(Debug, Clone)]
pub(crate) struct Endpoints {
    host: String,
    pub sdk_key: String,
}

impl Endpoints {
    pub fn new(host: impl Into<String>, sdk_key: impl Into<String>) -> Self {
        let mut host = host.into();
        while host.ends_with('/') {
            host.pop();
        }
        Self {
            host,
            sdk_key: sdk_key.into(),
        }
    }

    pub fn stream_url(&self) -> String {
        format!("{}/v1/stream", self.host)
    }

    pub fn datafile_url(&self) -> String {
        format!("{}/v1/datafile", self.host)
    }

    pub fn ingest_url(&self) -> String {
        format!("{}/v1/ingest", self.host)
    }
}
