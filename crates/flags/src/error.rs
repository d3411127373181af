use thiserror::Error;

/// Errors surfaced by the flags client.
///
/// Evaluation-level problems (unknown flag, misconfigured definition) are
/// returned inside [`crate::FlagEvaluation`], never as an `Err`; this enum
/// covers construction, source, and fallback failures.
#[derive(Error, Debug)]
pub enum FlagsError {
    /// Construction was attempted with an empty or malformed SDK key.
    #[error("missing or invalid SDK key: {0}")]
    MissingSdkKey(String),

    /// A client option failed validation at construction.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// Every configured source failed to produce a datafile.
    #[error("No flag definitions available")]
    NoDefinitionsAvailable,

    /// No bundled-definitions artifact exists at the configured path.
    #[error("no bundled flag definitions artifact found")]
    FallbackNotFound,

    /// The bundled artifact exists but holds no entry for this SDK key.
    #[error("bundled flag definitions have no entry for this SDK key")]
    FallbackEntryNotFound,

    /// The bundled artifact could not be read or parsed.
    #[error("failed to read bundled flag definitions: {0}")]
    UnexpectedBundled(String),

    /// The server rejected the SDK key (HTTP 401). Fatal for the
    /// subscription; evaluations fall back to bundled or provided data.
    #[error("authentication failed: the SDK key was rejected")]
    StreamAuthFailed,

    /// A transport or protocol failure outside the retry loop.
    #[error("request failed: {0}")]
    Http(String),

    /// The operation was cancelled by a shutdown or a caller-supplied signal.
    #[error("operation aborted")]
    Aborted,

    /// The client has been shut down.
    #[error("client is shut down")]
    Closed,
}

impl From<reqwest::Error> for FlagsError {
    fn from(error: reqwest::Error) -> Self {
        FlagsError::Http(error.to_string())
    }
}
