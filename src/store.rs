//! # Seen-Store
//! Durable record of sources, their subscriptions and the ids already
//! delivered. One JSON document on disk, guarded by an async mutex.
//!
//! Mutations go through [`Store::update`], which applies the change to a
//! copy, persists it and only then swaps it in, so a failed write leaves the
//! in-memory state untouched.
//!
//! [`Store::mark_seen`] is the exception: delivered ids are committed in
//! memory first and the write is best effort. A failed write marks the
//! state dirty and the next write (or [`Store::flush`]) retries it, so a
//! broken disk never turns into repeated notifications. There is no
//! cross-process locking; one process owns the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::Mutex};

use crate::model::{SourceRecord, SourceRef, Subscription};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Poll interval set through the `interval` command.
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceRecord>,
}

impl PersistedState {
    /// Repair what a hand-edited or older file may contain: records stored
    /// under the wrong key, duplicate subscriptions, empty sources.
    pub fn validated(self) -> Self {
        let mut sources = BTreeMap::new();
        for (key, mut rec) in self.sources {
            let canonical = SourceRef::new(rec.source.kind, rec.source.id.clone());
            if canonical.key() != key {
                tracing::warn!(stored = %key, canonical = %canonical.key(), "re-keying source record");
            }
            rec.source = canonical;

            let mut subs: Vec<Subscription> = Vec::with_capacity(rec.subscriptions.len());
            for sub in rec.subscriptions.drain(..) {
                if sub.destination.trim().is_empty() {
                    continue;
                }
                match subs.iter_mut().find(|s| s.destination == sub.destination) {
                    Some(existing) => *existing = sub,
                    None => subs.push(sub),
                }
            }
            rec.subscriptions = subs;

            if rec.subscriptions.is_empty() {
                tracing::warn!(source = %rec.source, "dropping source without subscriptions");
                continue;
            }
            sources.insert(rec.source.key(), rec);
        }
        let interval_secs = self.interval_secs.filter(|s| *s > 0);
        Self {
            interval_secs,
            sources,
        }
    }

    /// Number of sources a destination is subscribed to.
    pub fn subscription_count(&self, destination: &str) -> usize {
        self.sources
            .values()
            .filter(|r| r.subscription(destination).is_some())
            .count()
    }
}

pub struct Store {
    path: Option<PathBuf>,
    state: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    state: PersistedState,
    /// In-memory state is ahead of the file.
    dirty: bool,
}

impl Inner {
    fn new(state: PersistedState) -> Mutex<Self> {
        Mutex::new(Self {
            state,
            dirty: false,
        })
    }
}

impl Store {
    /// Non-persistent store (tests, dry runs).
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(Inner::default()),
        }
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            path: None,
            state: Inner::new(state.validated()),
        }
    }

    /// Load from `path`; a missing file is an empty state.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match fs::read_to_string(&path).await {
            Ok(s) => serde_json::from_str::<PersistedState>(&s)
                .with_context(|| format!("parsing state file {}", path.display()))?
                .validated(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading state file {}", path.display()))
            }
        };
        tracing::info!(path = %path.display(), sources = state.sources.len(), "state loaded");
        Ok(Self {
            path: Some(path),
            state: Inner::new(state),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn snapshot(&self) -> PersistedState {
        self.state.lock().await.state.clone()
    }

    pub async fn sources(&self) -> Vec<SourceRecord> {
        self.state.lock().await.state.sources.values().cloned().collect()
    }

    pub async fn source(&self, key: &str) -> Option<SourceRecord> {
        self.state.lock().await.state.sources.get(key).cloned()
    }

    pub async fn subscriptions(&self, key: &str) -> Option<Vec<Subscription>> {
        self.state
            .lock()
            .await
            .state
            .sources
            .get(key)
            .map(|r| r.subscriptions.clone())
    }

    pub async fn interval_override(&self) -> Option<Duration> {
        self.state
            .lock()
            .await
            .state
            .interval_secs
            .map(Duration::from_secs)
    }

    /// Whether the in-memory state still has to reach the file.
    pub async fn is_dirty(&self) -> bool {
        self.state.lock().await.dirty
    }

    /// Atomic read-modify-write: `f` runs on a copy which is persisted and
    /// then swapped in. A pending dirty state is written along with it.
    pub async fn update<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut PersistedState) -> R,
    {
        let mut guard = self.state.lock().await;
        let mut next = guard.state.clone();
        let out = f(&mut next);
        if next != guard.state {
            if let Some(path) = &self.path {
                write_state(path, &next).await?;
            }
            guard.state = next;
            guard.dirty = false;
        } else if guard.dirty {
            self.persist(&mut guard).await;
        }
        Ok(out)
    }

    /// Append delivered ids to a source's seen-record. Returns `false` if
    /// the source was removed in the meantime (it is not recreated).
    ///
    /// The ids are kept in memory even when the write fails; the error is
    /// still returned so the caller can report it.
    pub async fn mark_seen(&self, key: &str, ids: Vec<String>) -> Result<bool> {
        let mut guard = self.state.lock().await;
        let Some(rec) = guard.state.sources.get_mut(key) else {
            return Ok(false);
        };
        let added = rec.seen.extend(ids);
        if added == 0 && !guard.dirty {
            return Ok(true);
        }
        guard.dirty = true;
        if let Some(path) = &self.path {
            write_state(path, &guard.state)
                .await
                .with_context(|| format!("persisting seen ids for {key}"))?;
        }
        guard.dirty = false;
        Ok(true)
    }

    /// Retry a write that failed earlier. No-op when the file is current.
    pub async fn flush(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        if !guard.dirty {
            return Ok(());
        }
        if let Some(path) = &self.path {
            write_state(path, &guard.state).await?;
        }
        guard.dirty = false;
        Ok(())
    }

    async fn persist(&self, inner: &mut Inner) {
        let Some(path) = &self.path else {
            inner.dirty = false;
            return;
        };
        match write_state(path, &inner.state).await {
            Ok(()) => inner.dirty = false,
            Err(e) => tracing::warn!(path = %path.display(), error = ?e, "state still not persisted"),
        }
    }

    pub async fn remove_source(&self, key: &str) -> Result<Option<SourceRecord>> {
        self.update(|state| state.sources.remove(key)).await
    }
}

async fn write_state(path: &Path, state: &PersistedState) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating state dir {}", dir.display()))?;
    }
    let body = serde_json::to_vec_pretty(state).context("serializing state")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}
