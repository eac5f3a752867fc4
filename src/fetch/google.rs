//! Shared handling of Google API responses (YouTube Data, Calendar).
//!
//! Both APIs report failures as `{"error": {"code": 404, "message": ...}}`,
//! sometimes with a 200 status from intermediaries, so the envelope is
//! checked before the status.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::FetchError;

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ErrorItem {
    #[serde(default)]
    reason: String,
}

/// 403 reasons that mean "slow down", not "bad key".
const RATE_LIMIT_REASONS: &[&str] = &[
    "quotaExceeded",
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "dailyLimitExceeded",
];

pub fn parse_body<T: DeserializeOwned>(
    provider: &'static str,
    source: &str,
    status: StatusCode,
    body: &str,
) -> Result<T, FetchError> {
    if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(body) {
        if let Some(item) = env
            .error
            .errors
            .iter()
            .find(|i| RATE_LIMIT_REASONS.contains(&i.reason.as_str()))
        {
            return Err(FetchError::Transient(format!(
                "{provider} {}: {}",
                item.reason, env.error.message
            )));
        }
        let code = StatusCode::from_u16(env.error.code).unwrap_or(status);
        let code = if code.is_success() { status } else { code };
        return Err(FetchError::from_status(provider, source, code, env.error.message));
    }
    if !status.is_success() {
        return Err(FetchError::from_status(
            provider,
            source,
            status,
            body.chars().take(200).collect::<String>(),
        ));
    }
    serde_json::from_str(body).map_err(|e| FetchError::Malformed(format!("{provider}: {e}")))
}
