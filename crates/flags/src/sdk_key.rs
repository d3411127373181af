//! SDK key validation and connection-string parsing.
//!
//! Two forms are accepted: a bare key (`vf_…`) and a connection string
//! (`flags:<k>=<v>&…&sdkKey=vf_…`). The connection-string form carries the
//! embedded `sdkKey` value through as-is, so legacy keys without the `vf_`
//! prefix keep working when delivered that way.

use crate::error::FlagsError;

pub(crate) const SDK_KEY_PREFIX: &str = "vf_";
pub(crate) const CONNECTION_SCHEME: &str = "flags:";

/// Extracts the SDK key from either accepted form.
pub(crate) fn parse_sdk_key(input: &str) -> Result<String, FlagsError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(FlagsError::MissingSdkKey(
            "SDK key must be a non-empty string".to_string(),
        ));
    }

    if let Some(query) = trimmed.strip_prefix(CONNECTION_SCHEME) {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key == "sdkKey" && !value.is_empty() {
                return Ok(value.into_owned());
            }
        }
        return Err(FlagsError::MissingSdkKey(
            "connection string does not contain an sdkKey entry".to_string(),
        ));
    }

    if is_bare_key(trimmed) {
        return Ok(trimmed.to_string());
    }

    Err(FlagsError::MissingSdkKey(format!(
        "expected a key starting with \"{SDK_KEY_PREFIX}\" or a \"{CONNECTION_SCHEME}\" connection string"
    )))
}

fn is_bare_key(input: &str) -> bool {
    input.starts_with(SDK_KEY_PREFIX)
        && input.len() > SDK_KEY_PREFIX.len()
        && !input.contains(char::is_whitespace)
}
