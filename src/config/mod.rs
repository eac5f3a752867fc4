// src/config/mod.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod credentials;

pub use credentials::{Credentials, SmtpConfig};

const ENV_PATH: &str = "FEEDWATCH_CONFIG_PATH";
const ENV_INTERVAL: &str = "FEEDWATCH_POLL_INTERVAL_SECS";
const ENV_STATE: &str = "FEEDWATCH_STATE_PATH";
const FALLBACK_PATH: &str = "config/feedwatch.toml";

fn default_poll_interval_secs() -> u64 {
    300
}
fn default_state_path() -> PathBuf {
    PathBuf::from("state/feedwatch.json")
}
fn default_max_subscriptions() -> usize {
    5
}
fn default_http_timeout_secs() -> u64 {
    10
}

/// Where notifications for a destination id go.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DestinationConfig {
    DiscordWebhook { url: String },
    SlackWebhook { url: String },
    Email { to: String },
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Default time between poll cycles; the `interval` command overrides it
    /// at runtime.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions_per_destination: usize,
    /// Drop sources whose upstream reports "not found". Off by default: a
    /// transient 404 would otherwise lose every subscription.
    #[serde(default)]
    pub prune_missing_sources: bool,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    #[serde(default)]
    pub destinations: BTreeMap<String, DestinationConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            state_path: default_state_path(),
            max_subscriptions_per_destination: default_max_subscriptions(),
            prune_missing_sources: false,
            http_timeout_secs: default_http_timeout_secs(),
            credentials: Credentials::default(),
            smtp: None,
            destinations: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn parse(s: &str) -> Result<Self> {
        let cfg: AppConfig = toml::from_str(s).context("parsing feedwatch config")?;
        Ok(cfg)
    }

    /// Load, resolve secrets, apply env overrides and validate.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::parse(&content)?.finish()
    }

    /// Load using env var + fallbacks:
    /// 1) $FEEDWATCH_CONFIG_PATH
    /// 2) config/feedwatch.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
        let fallback = PathBuf::from(FALLBACK_PATH);
        if fallback.exists() {
            return Self::load_from(&fallback);
        }
        Self::default().finish()
    }

    fn finish(mut self) -> Result<Self> {
        self.credentials = self.credentials.resolve()?;
        self.smtp = self.smtp.map(SmtpConfig::resolve).transpose()?;
        self.apply_env_overrides()?;
        self.validate()?;
        Ok(self)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var(ENV_INTERVAL) {
            self.poll_interval_secs = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_INTERVAL} must be a number of seconds"))?;
        }
        if let Ok(v) = std::env::var(ENV_STATE) {
            if !v.trim().is_empty() {
                self.state_path = PathBuf::from(v.trim());
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be at least 1");
        }
        if self.http_timeout_secs == 0 {
            bail!("http_timeout_secs must be at least 1");
        }
        for (id, dest) in &self.destinations {
            match dest {
                DestinationConfig::Email { .. } if self.smtp.is_none() => {
                    bail!("destination {id} is e-mail but [smtp] is not configured")
                }
                DestinationConfig::DiscordWebhook { url } | DestinationConfig::SlackWebhook { url }
                    if !url.starts_with("https://") && !url.starts_with("http://") =>
                {
                    bail!("destination {id} has an invalid webhook url")
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    const SAMPLE: &str = r#"
poll_interval_secs = 120
state_path = "data/state.json"
prune_missing_sources = true

[credentials]
youtube_api_key = "abc"

[destinations.announcements]
type = "discord_webhook"
url = "https://discord.com/api/webhooks/1/x"

[destinations.ops]
type = "log"
"#;

    fn clear_env() {
        for v in [ENV_PATH, ENV_INTERVAL, ENV_STATE, "YOUTUBE_API_KEY", "GOOGLE_API_KEY"] {
            env::remove_var(v);
        }
    }

    #[test]
    fn parses_full_document() {
        let cfg = AppConfig::parse(SAMPLE).unwrap();
        assert_eq!(cfg.poll_interval_secs, 120);
        assert_eq!(cfg.max_subscriptions_per_destination, 5);
        assert!(cfg.prune_missing_sources);
        assert_eq!(cfg.credentials.youtube_api_key.as_deref(), Some("abc"));
        assert_eq!(cfg.destinations["ops"], DestinationConfig::Log);
        assert!(matches!(
            cfg.destinations["announcements"],
            DestinationConfig::DiscordWebhook { .. }
        ));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = AppConfig {
            poll_interval_secs: 0,
            ..AppConfig::default()
        };
        assert!(cfg.validate().is_err());

        cfg.poll_interval_secs = 60;
        cfg.destinations
            .insert("mail".into(), DestinationConfig::Email { to: "a@b.c".into() });
        assert!(cfg.validate().unwrap_err().to_string().contains("smtp"));
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        clear_env();

        // No file anywhere: defaults.
        let cfg = AppConfig::load_default().unwrap();
        assert_eq!(cfg, AppConfig::default());

        // Fallback path.
        fs::create_dir_all(tmp.path().join("config")).unwrap();
        fs::write(tmp.path().join(FALLBACK_PATH), "poll_interval_secs = 42").unwrap();
        assert_eq!(AppConfig::load_default().unwrap().poll_interval_secs, 42);

        // Env path wins, env overrides apply on top.
        let p = tmp.path().join("other.toml");
        fs::write(&p, SAMPLE).unwrap();
        env::set_var(ENV_PATH, p.display().to_string());
        env::set_var(ENV_INTERVAL, "7");
        env::set_var(ENV_STATE, "/tmp/fw.json");
        let cfg = AppConfig::load_default().unwrap();
        assert_eq!(cfg.poll_interval_secs, 7);
        assert_eq!(cfg.state_path, PathBuf::from("/tmp/fw.json"));

        env::set_var(ENV_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(AppConfig::load_default().is_err());

        clear_env();
        env::set_current_dir(&old).unwrap();
    }
}
