// src/config/credentials.rs
use serde::{Deserialize, Serialize};
use std::env;

/// API keys for the Google-backed fetchers.
///
/// A value of `"ENV"` means: read from `YOUTUBE_API_KEY` / `GOOGLE_API_KEY`.
/// An absent value also falls back to the env var, but silently; the
/// fetcher then reports missing credentials when it is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    #[serde(default)]
    pub youtube_api_key: Option<String>,
    #[serde(default)]
    pub google_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub user: String,
    pub pass: String,
    pub from: String,
}

pub(crate) fn is_env_marker(v: &str) -> bool {
    v.trim().eq_ignore_ascii_case("env")
}

fn required_env(var: &str) -> anyhow::Result<String> {
    env::var(var).map_err(|_| anyhow::anyhow!("Missing {var} env var"))
}

fn resolve_key(value: Option<String>, var: &str) -> anyhow::Result<Option<String>> {
    match value {
        Some(v) if is_env_marker(&v) => required_env(var).map(Some),
        Some(v) if v.trim().is_empty() => Ok(None),
        Some(v) => Ok(Some(v.trim().to_string())),
        None => Ok(env::var(var).ok().filter(|v| !v.trim().is_empty())),
    }
}

impl Credentials {
    pub fn resolve(self) -> anyhow::Result<Self> {
        Ok(Self {
            youtube_api_key: resolve_key(self.youtube_api_key, "YOUTUBE_API_KEY")?,
            google_api_key: resolve_key(self.google_api_key, "GOOGLE_API_KEY")?,
        })
    }
}

impl SmtpConfig {
    pub fn resolve(self) -> anyhow::Result<Self> {
        let pick = |v: String, var: &str| {
            if is_env_marker(&v) {
                required_env(var)
            } else {
                Ok(v)
            }
        };
        Ok(Self {
            host: pick(self.host, "SMTP_HOST")?,
            port: self.port,
            user: pick(self.user, "SMTP_USER")?,
            pass: pick(self.pass, "SMTP_PASS")?,
            from: pick(self.from, "SMTP_FROM")?,
        })
    }
}
