//! # Administrative commands
//! Text commands that add, remove and list subscriptions, plus a few owner
//! knobs. Parsing is separate from execution so the HTTP surface and tests
//! can drive either half.
//!
//! A command either succeeds completely or leaves the store untouched; the
//! store is locked only for the final read-modify-write.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dedup;
use crate::error::CommandError;
use crate::fetch::Fetchers;
use crate::model::{SeenRecord, SourceRecord, SourceRef, Subscription};
use crate::store::Store;

const USAGE_ADD: &str = "add <source> [#destination] [@role]";
const USAGE_REMOVE: &str = "remove <source> [#destination]";
const USAGE_SHOWCOMMENTS: &str = "showcomments <source> [#destination] <on|off>";
const USAGE_INTERVAL: &str = "interval <minutes>";
/// One week.
const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;
const USAGE_RESET: &str = "reset <source>";

/// Who is running a command, and from where. The host's permission model
/// decides the flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoker {
    pub user_id: String,
    /// Destination the command was issued from; the default target.
    pub destination: String,
    #[serde(default)]
    pub can_manage: bool,
    #[serde(default)]
    pub is_owner: bool,
}

impl Invoker {
    fn may_manage(&self) -> bool {
        self.can_manage || self.is_owner
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub lines: Vec<String>,
}

impl Reply {
    fn line(s: impl Into<String>) -> Self {
        Self {
            lines: vec![s.into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add {
        source: String,
        destination: Option<String>,
        role: Option<String>,
    },
    Remove {
        source: String,
        destination: Option<String>,
    },
    List {
        destination: Option<String>,
    },
    ListAll,
    ShowComments {
        source: String,
        destination: Option<String>,
        on: bool,
    },
    Interval {
        minutes: u64,
    },
    Reset {
        source: String,
    },
    Help,
}

/// `#123` or `<#123>`.
fn destination_token(t: &str) -> Option<String> {
    let inner = t
        .strip_prefix("<#")
        .and_then(|r| r.strip_suffix('>'))
        .or_else(|| t.strip_prefix('#'))?;
    (!inner.is_empty()).then(|| inner.to_string())
}

/// `@123` or `<@&123>`.
fn role_token(t: &str) -> Option<String> {
    let inner = t
        .strip_prefix("<@&")
        .and_then(|r| r.strip_suffix('>'))
        .or_else(|| t.strip_prefix('@'))?;
    (!inner.is_empty()).then(|| inner.to_string())
}

fn switch_token(t: &str) -> Option<bool> {
    match t.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "enable" => Some(true),
        "off" | "false" | "no" | "disable" => Some(false),
        _ => None,
    }
}

impl Command {
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        let mut words = text.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(Command::Help);
        };
        let args: Vec<&str> = words.collect();

        match name.to_ascii_lowercase().as_str() {
            "add" => {
                let (source, rest) = args.split_first().ok_or(CommandError::Usage(USAGE_ADD))?;
                let mut destination = None;
                let mut role = None;
                for t in rest {
                    if let Some(d) = destination_token(t).filter(|_| destination.is_none()) {
                        destination = Some(d);
                    } else if let Some(r) = role_token(t).filter(|_| role.is_none()) {
                        role = Some(r);
                    } else {
                        return Err(CommandError::Usage(USAGE_ADD));
                    }
                }
                Ok(Command::Add {
                    source: source.to_string(),
                    destination,
                    role,
                })
            }
            "remove" | "rm" | "del" | "delete" => match args.as_slice() {
                [source] => Ok(Command::Remove {
                    source: source.to_string(),
                    destination: None,
                }),
                [source, dest] => Ok(Command::Remove {
                    source: source.to_string(),
                    destination: Some(
                        destination_token(dest).ok_or(CommandError::Usage(USAGE_REMOVE))?,
                    ),
                }),
                _ => Err(CommandError::Usage(USAGE_REMOVE)),
            },
            "list" => match args.as_slice() {
                [] => Ok(Command::List { destination: None }),
                [dest] => Ok(Command::List {
                    destination: Some(
                        destination_token(dest).ok_or(CommandError::Usage("list [#destination]"))?,
                    ),
                }),
                _ => Err(CommandError::Usage("list [#destination]")),
            },
            "listall" => Ok(Command::ListAll),
            "showcomments" => {
                let usage = CommandError::Usage(USAGE_SHOWCOMMENTS);
                let (source, destination, switch) = match args.as_slice() {
                    [source, switch] => (*source, None, *switch),
                    [source, dest, switch] => {
                        (*source, Some(destination_token(dest).ok_or(usage)?), *switch)
                    }
                    _ => return Err(usage),
                };
                Ok(Command::ShowComments {
                    source: source.to_string(),
                    destination,
                    on: switch_token(switch).ok_or(CommandError::Usage(USAGE_SHOWCOMMENTS))?,
                })
            }
            "interval" => match args.as_slice() {
                [m] => Ok(Command::Interval {
                    minutes: m.parse().map_err(|_| CommandError::Usage(USAGE_INTERVAL))?,
                }),
                _ => Err(CommandError::Usage(USAGE_INTERVAL)),
            },
            "reset" => match args.as_slice() {
                [source] => Ok(Command::Reset {
                    source: source.to_string(),
                }),
                _ => Err(CommandError::Usage(USAGE_RESET)),
            },
            "help" => Ok(Command::Help),
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }
}

pub struct CommandContext {
    store: Arc<Store>,
    fetchers: Fetchers,
    max_per_destination: usize,
}

impl CommandContext {
    pub fn new(store: Arc<Store>, fetchers: Fetchers, max_per_destination: usize) -> Self {
        Self {
            store,
            fetchers,
            max_per_destination,
        }
    }

    /// Parse and execute in one go.
    pub async fn run(&self, invoker: &Invoker, text: &str) -> Result<Reply, CommandError> {
        let cmd = Command::parse(text)?;
        let out = self.execute(invoker, cmd).await;
        match &out {
            Ok(_) => tracing::info!(user = %invoker.user_id, destination = %invoker.destination, command = text, "command ok"),
            Err(e) if e.is_client_error() => {
                tracing::debug!(user = %invoker.user_id, command = text, error = %e, "command refused")
            }
            Err(e) => tracing::warn!(user = %invoker.user_id, command = text, error = ?e, "command failed"),
        }
        out
    }

    pub async fn execute(&self, invoker: &Invoker, cmd: Command) -> Result<Reply, CommandError> {
        match cmd {
            Command::Add {
                source,
                destination,
                role,
            } => {
                require(invoker.may_manage())?;
                let dest = destination.unwrap_or_else(|| invoker.destination.clone());
                self.add(invoker, &source, dest, role).await
            }
            Command::Remove {
                source,
                destination,
            } => {
                require(invoker.may_manage())?;
                let dest = destination.unwrap_or_else(|| invoker.destination.clone());
                self.remove(&source, &dest).await
            }
            Command::List { destination } => {
                let dest = destination.unwrap_or_else(|| invoker.destination.clone());
                self.list(&dest).await
            }
            Command::ListAll => self.list_all().await,
            Command::ShowComments {
                source,
                destination,
                on,
            } => {
                require(invoker.may_manage())?;
                let dest = destination.unwrap_or_else(|| invoker.destination.clone());
                self.show_comments(&source, &dest, on).await
            }
            Command::Interval { minutes } => {
                require(invoker.is_owner)?;
                if minutes < 1 {
                    return Err(CommandError::IntervalTooShort);
                }
                if minutes > MAX_INTERVAL_MINUTES {
                    return Err(CommandError::IntervalTooLong(MAX_INTERVAL_MINUTES));
                }
                let secs = minutes * 60;
                self.store.update(|s| s.interval_secs = Some(secs)).await?;
                Ok(Reply::line(format!(
                    "Interval set to {minutes} minute{}.",
                    if minutes == 1 { "" } else { "s" }
                )))
            }
            Command::Reset { source } => {
                require(invoker.is_owner)?;
                let key = self.locate(&source).await?;
                let cleared = self
                    .store
                    .update(|s| {
                        s.sources.get_mut(&key).map(|rec| {
                            let n = rec.seen.len();
                            rec.seen.clear();
                            n
                        })
                    })
                    .await?
                    .ok_or_else(|| CommandError::SourceNotFound(source.clone()))?;
                Ok(Reply::line(format!(
                    "Forgot {cleared} delivered item(s) for {key}; current items will be announced again."
                )))
            }
            Command::Help => Ok(Reply {
                lines: [
                    USAGE_ADD,
                    USAGE_REMOVE,
                    "list [#destination]",
                    "listall",
                    USAGE_SHOWCOMMENTS,
                    USAGE_INTERVAL,
                    USAGE_RESET,
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            }),
        }
    }

    async fn add(
        &self,
        invoker: &Invoker,
        input: &str,
        dest: String,
        role: Option<String>,
    ) -> Result<Reply, CommandError> {
        let parsed = SourceRef::parse(input)?;
        let fetcher = self.fetchers.get(parsed.kind).ok_or_else(|| {
            CommandError::Configuration(format!("{} sources are not enabled", parsed.kind))
        })?;
        let resolved = fetcher
            .resolve(&parsed.id)
            .await
            .map_err(|e| CommandError::from_fetch(input, e))?;
        let source = SourceRef::new(parsed.kind, resolved.id);
        let key = source.key();

        // A new source is fetched once: this validates it and its current
        // items become the baseline, so the backlog is not announced.
        let baseline: Option<SeenRecord> = if self.store.source(&key).await.is_none() {
            let events = fetcher
                .fetch(&source.id)
                .await
                .map_err(|e| CommandError::from_fetch(input, e))?;
            Some(dedup::processed_ids(&events).into_iter().collect())
        } else {
            None
        };

        let limit = (!invoker.is_owner).then_some(self.max_per_destination);
        let label = resolved.label;
        let (created, name) = self
            .store
            .update(|s| {
                let already = s
                    .sources
                    .get(&key)
                    .is_some_and(|r| r.subscription(&dest).is_some());
                if let Some(max) = limit {
                    if !already && s.subscription_count(&dest) >= max {
                        return Err(CommandError::LimitReached(max));
                    }
                }

                let created = !s.sources.contains_key(&key);
                let rec = s.sources.entry(key.clone()).or_insert_with(|| {
                    let mut rec = SourceRecord::new(source.clone(), label.clone());
                    rec.seen = baseline.unwrap_or_default();
                    rec
                });
                match rec.subscription_mut(&dest) {
                    Some(sub) => sub.role = role.clone().filter(|r| !r.is_empty()),
                    None => rec.upsert(Subscription::new(dest.clone()).with_role(role.clone())),
                }
                Ok((created, rec.display_name()))
            })
            .await??;

        tracing::info!(source = %key, destination = %dest, created, "subscription added");
        let mut line = format!("Updates from {name} will be posted to {dest}");
        if let Some(r) = &role {
            line.push_str(&format!(" mentioning role {r}"));
        }
        line.push('.');
        Ok(Reply::line(line))
    }

    async fn remove(&self, input: &str, dest: &str) -> Result<Reply, CommandError> {
        let key = self.locate(input).await?;
        let outcome = self
            .store
            .update(|s| {
                let Some(rec) = s.sources.get_mut(&key) else {
                    return None;
                };
                if !rec.unsubscribe(dest) {
                    return None;
                }
                let emptied = rec.subscriptions.is_empty();
                if emptied {
                    s.sources.remove(&key);
                }
                Some(emptied)
            })
            .await?
            .ok_or_else(|| CommandError::NotSubscribed(input.to_string()))?;

        tracing::info!(source = %key, destination = %dest, source_removed = outcome, "subscription removed");
        Ok(Reply::line(format!(
            "Updates from {key} will no longer be posted to {dest}."
        )))
    }

    async fn list(&self, dest: &str) -> Result<Reply, CommandError> {
        let lines: Vec<String> = self
            .store
            .sources()
            .await
            .into_iter()
            .filter_map(|rec| {
                let sub = rec.subscription(dest)?;
                let mut line = format!("- {}", rec.display_name());
                if let Some(r) = &sub.role {
                    line.push_str(&format!(" (role {r})"));
                }
                if !sub.show_comments {
                    line.push_str(" [comments off]");
                }
                Some(line)
            })
            .collect();
        if lines.is_empty() {
            return Ok(Reply::line(format!("No sources are set up for {dest}.")));
        }
        Ok(Reply { lines })
    }

    async fn list_all(&self) -> Result<Reply, CommandError> {
        let lines: Vec<String> = self
            .store
            .sources()
            .await
            .into_iter()
            .map(|rec| {
                let dests: Vec<&str> = rec
                    .subscriptions
                    .iter()
                    .map(|s| s.destination.as_str())
                    .collect();
                format!("- {}: {}", rec.display_name(), dests.join(", "))
            })
            .collect();
        if lines.is_empty() {
            return Ok(Reply::line("No sources are set up."));
        }
        Ok(Reply { lines })
    }

    async fn show_comments(&self, input: &str, dest: &str, on: bool) -> Result<Reply, CommandError> {
        let key = self.locate(input).await?;
        self.store
            .update(|s| {
                let sub = s
                    .sources
                    .get_mut(&key)
                    .and_then(|r| r.subscription_mut(dest))
                    .ok_or_else(|| CommandError::NotSubscribed(input.to_string()))?;
                sub.show_comments = on;
                Ok::<_, CommandError>(())
            })
            .await??;
        Ok(Reply::line(format!(
            "Comments from {key} are now {} in {dest}.",
            if on { "shown" } else { "hidden" }
        )))
    }

    /// Key of an existing source. Falls back to the fetcher's resolver so a
    /// channel URL finds the record stored under its channel id.
    async fn locate(&self, input: &str) -> Result<String, CommandError> {
        let parsed = SourceRef::parse(input)?;
        let key = parsed.key();
        if self.store.source(&key).await.is_some() {
            return Ok(key);
        }
        let Some(fetcher) = self.fetchers.get(parsed.kind) else {
            return Err(CommandError::SourceNotFound(input.to_string()));
        };
        let resolved = fetcher
            .resolve(&parsed.id)
            .await
            .map_err(|e| CommandError::from_fetch(input, e))?;
        let key = SourceRef::new(parsed.kind, resolved.id).key();
        if self.store.source(&key).await.is_some() {
            Ok(key)
        } else {
            Err(CommandError::SourceNotFound(input.to_string()))
        }
    }
}

fn require(allowed: bool) -> Result<(), CommandError> {
    if allowed {
        Ok(())
    } else {
        Err(CommandError::PermissionDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_add_with_mentions_in_any_order() {
        assert_eq!(
            Command::parse("add yt:UC123 <@&77> <#42>").unwrap(),
            Command::Add {
                source: "yt:UC123".into(),
                destination: Some("42".into()),
                role: Some("77".into()),
            }
        );
        assert_eq!(
            Command::parse("ADD rss:https://x/feed").unwrap(),
            Command::Add {
                source: "rss:https://x/feed".into(),
                destination: None,
                role: None,
            }
        );
        assert!(matches!(Command::parse("add"), Err(CommandError::Usage(_))));
        assert!(matches!(
            Command::parse("add x bogus"),
            Err(CommandError::Usage(_))
        ));
    }

    #[test]
    fn parses_aliases_and_switches() {
        assert!(matches!(Command::parse("rm a #b"), Ok(Command::Remove { destination: Some(d), .. }) if d == "b"));
        assert!(matches!(Command::parse("delete a"), Ok(Command::Remove { destination: None, .. })));
        assert_eq!(
            Command::parse("showcomments community:bts off").unwrap(),
            Command::ShowComments {
                source: "community:bts".into(),
                destination: None,
                on: false,
            }
        );
        assert!(matches!(
            Command::parse("showcomments x maybe"),
            Err(CommandError::Usage(_))
        ));
        assert_eq!(Command::parse("interval 5").unwrap(), Command::Interval { minutes: 5 });
        assert!(matches!(Command::parse("interval soon"), Err(CommandError::Usage(_))));
        assert_eq!(Command::parse("").unwrap(), Command::Help);
        assert!(matches!(
            Command::parse("dance"),
            Err(CommandError::UnknownCommand(c)) if c == "dance"
        ));
    }

    #[test]
    fn token_forms() {
        assert_eq!(destination_token("<#1>").as_deref(), Some("1"));
        assert_eq!(destination_token("#ops").as_deref(), Some("ops"));
        assert_eq!(destination_token("#"), None);
        assert_eq!(role_token("<@&9>").as_deref(), Some("9"));
        assert_eq!(role_token("@mods").as_deref(), Some("mods"));
        assert_eq!(role_token("mods"), None);
    }
}
