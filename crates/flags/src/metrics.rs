//! Observability attributes attached to datafile reads and evaluations.
//!
//! These are derived at read time and never persisted; they mirror what the
//! ingest endpoint expects on usage events.

use serde::Serialize;

/// Whether a read was served from an installed datafile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStatus {
    Hit,
    Miss,
    Stale,
}

/// Where the served configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigOrigin {
    /// Installed by the stream, the poller, or a caller-provided datafile.
    InMemory,
    /// Loaded from the bundled-definitions artifact.
    Embedded,
    /// Fetched on demand from the datafile endpoint.
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// How the client sources configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Streaming,
    Polling,
    Build,
    Offline,
}

/// Relationship of a read to live updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheAction {
    None,
    Following,
}

/// Attributes of one datafile read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatafileMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<ConfigOrigin>,
    pub cache_status: CacheStatus,
    pub connection_state: ConnectionState,
    pub mode: Mode,
}

/// Timings and read attributes attached to an evaluation result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationMetrics {
    /// Time spent inside the evaluator, in milliseconds.
    pub evaluation_ms: f64,
    /// Time spent obtaining the datafile (including lazy init), in ms.
    pub read_ms: f64,
    #[serde(flatten)]
    pub datafile: DatafileMetrics,
}
