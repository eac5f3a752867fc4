// tests/scheduler.rs
//
// Periodic loop behaviour with tiny real intervals.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use feedwatch::scheduler::{ready_signal, spawn_periodic, PeriodicWork, PollController};

/// Counts runs; fails on every even run and panics on the third.
#[derive(Default)]
struct Flaky {
    runs: AtomicUsize,
}

#[async_trait]
impl PeriodicWork for Flaky {
    async fn run(&self) -> anyhow::Result<()> {
        let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        if n == 3 {
            panic!("boom");
        }
        if n % 2 == 0 {
            anyhow::bail!("run {n} failed");
        }
        Ok(())
    }

    async fn interval(&self) -> Duration {
        Duration::from_millis(5)
    }
}

/// Never finishes a run on its own.
#[derive(Default)]
struct Hang {
    started: AtomicUsize,
    finished: AtomicUsize,
}

#[async_trait]
impl PeriodicWork for Hang {
    async fn run(&self) -> anyhow::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn interval(&self) -> Duration {
        Duration::from_millis(5)
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn loop_survives_errors_and_panics() {
    let work = Arc::new(Flaky::default());
    let (_tx, rx) = ready_signal(true);
    let handle = spawn_periodic("test", rx, work.clone());

    wait_until(|| work.runs.load(Ordering::SeqCst) >= 6).await;
    assert!(!handle.is_finished());
    handle.abort();
}

#[tokio::test]
async fn waits_for_readiness() {
    let work = Arc::new(Flaky::default());
    let (tx, rx) = ready_signal(false);
    let handle = spawn_periodic("test", rx, work.clone());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(work.runs.load(Ordering::SeqCst), 0);

    tx.send(true).unwrap();
    wait_until(|| work.runs.load(Ordering::SeqCst) >= 1).await;
    handle.abort();
}

#[tokio::test]
async fn dropped_readiness_signal_stops_the_loop() {
    let work = Arc::new(Flaky::default());
    let (tx, rx) = ready_signal(false);
    let handle = spawn_periodic("test", rx, work.clone());
    drop(tx);
    handle.await.unwrap();
    assert_eq!(work.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stopping_the_controller_aborts_the_inflight_cycle() {
    let work = Arc::new(Hang::default());
    let (_tx, rx) = ready_signal(true);
    let mut ctl = PollController::new("test", work.clone(), rx);

    assert!(!ctl.is_running());
    assert!(ctl.start());
    assert!(!ctl.start(), "second start is a no-op");
    wait_until(|| work.started.load(Ordering::SeqCst) == 1).await;

    assert!(ctl.stop());
    assert!(!ctl.is_running());
    assert!(!ctl.stop());

    // The child cycle is gone too: restarting begins a fresh run.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(ctl.start());
    wait_until(|| work.started.load(Ordering::SeqCst) == 2).await;
    drop(ctl);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(work.finished.load(Ordering::SeqCst), 0);
    assert_eq!(Arc::strong_count(&work), 1, "all tasks released the work");
}
