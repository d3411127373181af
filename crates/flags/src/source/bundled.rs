//! Bundled definitions: a point-in-time snapshot produced by a prepare step.
//!
//! The artifact is a JSON file mapping SDK keys to datafile-shaped
//! snapshots. Loading is deferred until the first read and memoized for the
//! lifetime of the client; the artifact is read-only.

use crate::error::FlagsError;
use flags_evaluation_engine::Datafile;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BundleState {
    Ok,
    MissingFile,
    MissingEntry,
    UnexpectedError(String),
}

#[derive(Debug, Clone)]
pub(crate) struct BundleLoad {
    pub state: BundleState,
    pub definitions: Option<Datafile>,
}

pub(crate) struct BundledSource {
    path: PathBuf,
    sdk_key: String,
    loaded: OnceCell<BundleLoad>,
}

impl BundledSource {
    pub fn new(path: PathBuf, sdk_key: impl Into<String>) -> Self {
        Self {
            path,
            sdk_key: sdk_key.into(),
            loaded: OnceCell::new(),
        }
    }

    /// Loads the artifact on first use; later calls return the memoized
    /// result. Never performs network I/O.
    pub async fn load(&self) -> &BundleLoad {
        self.loaded
            .get_or_init(|| async { self.read().await })
            .await
    }

    /// The bundled snapshot, or the matching named error.
    pub async fn fallback_datafile(&self) -> Result<Datafile, FlagsError> {
        let load = self.load().await;
        match &load.state {
            BundleState::Ok => load
                .definitions
                .clone()
                .ok_or(FlagsError::FallbackEntryNotFound),
            BundleState::MissingFile => Err(FlagsError::FallbackNotFound),
            BundleState::MissingEntry => Err(FlagsError::FallbackEntryNotFound),
            BundleState::UnexpectedError(message) => {
                Err(FlagsError::UnexpectedBundled(message.clone()))
            }
        }
    }

    async fn read(&self) -> BundleLoad {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no bundled definitions artifact");
                return BundleLoad {
                    state: BundleState::MissingFile,
                    definitions: None,
                };
            }
            Err(error) => {
                warn!(path = %self.path.display(), %error, "failed to read bundled definitions");
                return BundleLoad {
                    state: BundleState::UnexpectedError(error.to_string()),
                    definitions: None,
                };
            }
        };

        // The artifact maps SDK keys to snapshots; unrelated entries are
        // tolerated as long as this client's entry parses.
        let entries: HashMap<String, Value> = match serde_json::from_str(&contents) {
            Ok(entries) => entries,
            Err(error) => {
                warn!(path = %self.path.display(), %error, "malformed bundled definitions");
                return BundleLoad {
                    state: BundleState::UnexpectedError(error.to_string()),
                    definitions: None,
                };
            }
        };

        let Some(entry) = entries.get(&self.sdk_key) else {
            debug!(path = %self.path.display(), "bundled definitions have no entry for this SDK key");
            return BundleLoad {
                state: BundleState::MissingEntry,
                definitions: None,
            };
        };

        match serde_json::from_value::<Datafile>(entry.clone()) {
            Ok(datafile) => {
                debug!(
                    definitions = datafile.definitions.len(),
                    "loaded bundled definitions"
                );
                BundleLoad {
                    state: BundleState::Ok,
                    definitions: Some(datafile),
                }
            }
            Err(error) => BundleLoad {
                state: BundleState::UnexpectedError(error.to_string()),
                definitions: None,
            },
        }
    }
}
