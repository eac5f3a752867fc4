//! Error types callers branch on.
//!
//! Plumbing (IO, config parsing, persistence) stays on `anyhow`; the enums
//! here exist where the caller reacts differently per variant: the poll
//! cycle treats a missing source differently from a flaky network, and a
//! command reply depends on why the command was refused.

use thiserror::Error;

/// Failure while pulling events from an upstream source.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Upstream says the source does not exist (HTTP 404 or equivalent).
    #[error("source `{0}` not found upstream")]
    NotFound(String),

    /// Network error, rate limit or 5xx. Retried next cycle.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// No API key configured for this provider.
    #[error("missing credentials for {0}")]
    MissingCredentials(&'static str),

    /// Key present but rejected upstream.
    #[error("credentials rejected by {provider}: {message}")]
    Unauthorized {
        provider: &'static str,
        message: String,
    },

    /// Upstream answered with something we could not parse.
    #[error("malformed upstream payload: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound(_))
    }

    /// Errors that come from our own setup rather than the upstream service.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FetchError::MissingCredentials(_) | FetchError::Unauthorized { .. }
        )
    }

    /// Map a non-success HTTP status to the matching variant.
    pub fn from_status(
        provider: &'static str,
        source: &str,
        status: reqwest::StatusCode,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        match status.as_u16() {
            404 => FetchError::NotFound(source.to_string()),
            401 | 403 => FetchError::Unauthorized { provider, message },
            _ => FetchError::Transient(format!("{provider} HTTP {status}: {message}")),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Malformed(e.to_string())
        } else {
            FetchError::Transient(e.to_string())
        }
    }
}

/// Failure delivering one rendered message to one destination.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("missing permission to post to `{0}`")]
    Forbidden(String),

    #[error("destination `{0}` no longer exists")]
    NotFound(String),

    #[error("no sink configured for destination `{0}`")]
    UnknownDestination(String),

    #[error("delivery transport error: {0}")]
    Transport(String),
}

/// User-facing reasons an administrative command was refused.
///
/// The `Display` text is what the invoker sees.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("You don't have permission to do that.")]
    PermissionDenied,

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Unknown command `{0}`.")]
    UnknownCommand(String),

    #[error("I don't know how to follow `{0}`. Use youtube:, calendar:, rss: or community:.")]
    UnknownSource(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unable to find a source matching `{0}`.")]
    SourceNotFound(String),

    #[error("The upstream service is not responding right now. Try again later.")]
    Upstream(String),

    #[error("This destination is not configured to receive updates from `{0}`.")]
    NotSubscribed(String),

    #[error("You can't have more than {0} sources set up for one destination.")]
    LimitReached(usize),

    #[error("Interval must be at least 1 minute.")]
    IntervalTooShort,

    #[error("Interval can't be longer than {0} minutes.")]
    IntervalTooLong(u64),

    #[error("`{0}` answered, but not with a feed I can read.")]
    Unreadable(String),

    #[error("Internal error, check the logs.")]
    Internal(#[from] anyhow::Error),
}

impl CommandError {
    /// Translate a fetch failure hit while validating a new source.
    pub fn from_fetch(source: &str, e: FetchError) -> Self {
        match e {
            FetchError::NotFound(_) => CommandError::SourceNotFound(source.to_string()),
            FetchError::MissingCredentials(provider) => CommandError::Configuration(format!(
                "no API key set up for {provider}; ask the bot owner to configure it"
            )),
            FetchError::Unauthorized { provider, .. } => CommandError::Configuration(format!(
                "the {provider} API key was rejected"
            )),
            FetchError::Transient(msg) => CommandError::Upstream(msg),
            FetchError::Malformed(msg) => {
                tracing::debug!(source, error = %msg, "unreadable upstream payload");
                CommandError::Unreadable(source.to_string())
            }
        }
    }

    /// Whether the invoker (as opposed to the service) caused the error.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, CommandError::Internal(_) | CommandError::Upstream(_))
    }
}
