// tests/store_persist.rs
//
// Seen-store persistence on a real filesystem (tempdir).

use std::fs;
use std::sync::Arc;

use chrono::Utc;

use feedwatch::engine::{Engine, EnginePolicy};
use feedwatch::fetch::providers::fixture::StaticFetcher;
use feedwatch::fetch::Fetchers;
use feedwatch::model::{Event, SourceKind, SourceRecord, SourceRef, Subscription};
use feedwatch::notify::memory::MemoryOutbox;
use feedwatch::store::Store;

fn record(name: &str, dest: &str) -> SourceRecord {
    let mut rec = SourceRecord::new(SourceRef::new(SourceKind::Rss, name), Some("Blog".into()));
    rec.upsert(Subscription::new(dest).with_role(Some("42".into())));
    rec
}

#[tokio::test]
async fn missing_file_is_empty_state_and_writes_create_it() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("nested/dir/state.json");

    let store = Store::open(&path).await.unwrap();
    assert!(store.sources().await.is_empty());
    assert!(!path.exists(), "opening alone must not write");

    let rec = record("https://blog/feed", "chat");
    store
        .update(|s| {
            s.sources.insert(rec.source.key(), rec);
        })
        .await
        .unwrap();
    assert!(path.exists());
    assert!(!path.with_extension("json.tmp").exists());
}

#[tokio::test]
async fn state_survives_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("state.json");
    let key;
    {
        let store = Store::open(&path).await.unwrap();
        let rec = record("https://blog/feed", "chat");
        key = rec.source.key();
        store
            .update(|s| {
                s.interval_secs = Some(120);
                s.sources.insert(rec.source.key(), rec);
            })
            .await
            .unwrap();
        assert!(store
            .mark_seen(&key, vec!["a".into(), "b".into()])
            .await
            .unwrap());
    }

    let store = Store::open(&path).await.unwrap();
    let rec = store.source(&key).await.unwrap();
    assert_eq!(rec.label.as_deref(), Some("Blog"));
    assert_eq!(rec.seen.len(), 2);
    assert!(rec.seen.contains("a"));
    assert_eq!(rec.subscription("chat").unwrap().role.as_deref(), Some("42"));
    assert_eq!(
        store.interval_override().await,
        Some(std::time::Duration::from_secs(120))
    );
}

#[tokio::test]
async fn mark_seen_does_not_resurrect_removed_source() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("state.json");
    let store = Store::open(&path).await.unwrap();
    let rec = record("https://blog/feed", "chat");
    let key = rec.source.key();
    store
        .update(|s| {
            s.sources.insert(rec.source.key(), rec);
        })
        .await
        .unwrap();

    assert!(store.remove_source(&key).await.unwrap().is_some());
    assert!(!store.mark_seen(&key, vec!["x".into()]).await.unwrap());

    let reopened = Store::open(&path).await.unwrap();
    assert!(reopened.source(&key).await.is_none());
}

#[tokio::test]
async fn hand_edited_file_is_repaired_on_load() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("state.json");
    fs::write(
        &path,
        r#"{
          "interval_secs": 0,
          "sources": {
            "wrong-key": {
              "source": {"kind": "community", "id": "BTS"},
              "subscriptions": [
                {"destination": "chat"},
                {"destination": "chat", "role": "7", "show_comments": false}
              ],
              "seen": ["p1"]
            },
            "rss:https://empty": {
              "source": {"kind": "rss", "id": "https://empty"},
              "subscriptions": []
            }
          }
        }"#,
    )
    .unwrap();

    let store = Store::open(&path).await.unwrap();
    let state = store.snapshot().await;
    assert_eq!(state.interval_secs, None);
    assert_eq!(state.sources.len(), 1);
    let rec = &state.sources["community:bts"];
    assert_eq!(rec.subscriptions.len(), 1);
    assert_eq!(rec.subscriptions[0].role.as_deref(), Some("7"));
    assert!(!rec.subscriptions[0].show_comments);
    assert!(rec.seen.contains("p1"));
}

#[tokio::test]
async fn corrupt_file_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("state.json");
    fs::write(&path, "{ not json").unwrap();
    assert!(Store::open(&path).await.is_err());
}

#[tokio::test]
async fn unwritable_state_dir_does_not_repeat_deliveries() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("state");
    let path = dir.join("s.json");
    let store = Arc::new(Store::open(&path).await.unwrap());

    let mut rec = SourceRecord::new(SourceRef::new(SourceKind::Community, "x"), None);
    rec.upsert(Subscription::new("chat"));
    store
        .update(|s| {
            s.sources.insert(rec.source.key(), rec);
        })
        .await
        .unwrap();

    // The state dir turns into a plain file: every write now fails.
    fs::remove_dir_all(&dir).unwrap();
    fs::write(&dir, "not a dir").unwrap();

    let feed = Arc::new(StaticFetcher::new("community"));
    feed.push_event("x", Event::announcement("e1", "hello"));
    let outbox = Arc::new(MemoryOutbox::new());
    let engine = Engine::new(
        store.clone(),
        Fetchers::new().with(SourceKind::Community, feed),
        outbox.clone(),
        EnginePolicy::default(),
    );

    for cycle in 0..3 {
        let report = engine.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.store_failures, 1, "cycle {cycle}");
        assert_eq!(outbox.delivered_to("chat").len(), 1, "cycle {cycle}");
    }
    assert!(store.is_dirty().await);
    assert!(store.source("community:x").await.unwrap().seen.contains("e1"));

    // Once the disk is back, the next cycle writes the pending state.
    fs::remove_file(&dir).unwrap();
    let report = engine.run_cycle(Utc::now()).await.unwrap();
    assert_eq!(report.store_failures, 0);
    assert!(!store.is_dirty().await);

    let reopened = Store::open(&path).await.unwrap();
    assert!(reopened.source("community:x").await.unwrap().seen.contains("e1"));
}

#[tokio::test]
async fn failed_command_write_leaves_memory_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("state");
    let store = Store::open(dir.join("s.json")).await.unwrap();
    fs::write(&dir, "not a dir").unwrap();

    let rec = record("https://blog/feed", "chat");
    let res = store
        .update(|s| {
            s.sources.insert(rec.source.key(), rec);
        })
        .await;
    assert!(res.is_err());
    assert!(store.sources().await.is_empty());
    assert!(!store.is_dirty().await);
}
