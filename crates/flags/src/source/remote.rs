//! One-shot datafile fetch.
//!
//! Used during the build step when no bundled definitions exist, and by
//! `get_datafile` when no live subscription is connected.

use super::{Endpoints, USER_AGENT};
use crate::error::FlagsError;
use flags_evaluation_engine::Datafile;
use reqwest::StatusCode;
use tokio::sync::watch;
use tracing::debug;

/// Fetches the full datafile once. A `cancel` receiver aborts the in-flight
/// request when its value flips to `true`.
pub(crate) async fn fetch_datafile(
    http: &reqwest::Client,
    endpoints: &Endpoints,
    cancel: Option<watch::Receiver<bool>>,
) -> Result<Datafile, FlagsError> {
    match cancel {
        Some(mut cancel) => {
            tokio::select! {
                result = fetch(http, endpoints) => result,
                _ = cancel.wait_for(|cancelled| *cancelled) => Err(FlagsError::Aborted),
            }
        }
        None => fetch(http, endpoints).await,
    }
}

async fn fetch(http: &reqwest::Client, endpoints: &Endpoints) -> Result<Datafile, FlagsError> {
    debug!(url = %endpoints.datafile_url(), "fetching datafile");
    let response = http
        .get(endpoints.datafile_url())
        .bearer_auth(&endpoints.sdk_key)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await?;

    match response.status() {
        StatusCode::UNAUTHORIZED => Err(FlagsError::StreamAuthFailed),
        status if !status.is_success() => Err(FlagsError::Http(format!(
            "datafile endpoint returned {status}"
        ))),
        _ => {
            let datafile = response.json::<Datafile>().await?;
            debug!(
                config_updated_at = ?datafile.config_updated_at,
                definitions = datafile.definitions.len(),
                "fetched datafile"
            );
            Ok(datafile)
        }
    }
}
