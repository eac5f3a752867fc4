//! # Scheduler
//! Drives a [`PeriodicWork`] forever: wait for readiness, run one cycle in a
//! child task, sleep, repeat. A failing or panicking cycle is logged and the
//! loop carries on.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

#[async_trait]
pub trait PeriodicWork: Send + Sync + 'static {
    async fn run(&self) -> anyhow::Result<()>;

    /// Sleep before the next run. Read after every run.
    async fn interval(&self) -> Duration;
}

/// Readiness gate for [`spawn_periodic`]; flip the sender to `true` once the
/// host is connected.
pub fn ready_signal(ready: bool) -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(ready)
}

/// Aborts the wrapped task when dropped, so cancelling the loop also cancels
/// the cycle it is waiting on.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

pub fn spawn_periodic(
    name: &'static str,
    mut ready: watch::Receiver<bool>,
    work: Arc<dyn PeriodicWork>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if ready.wait_for(|r| *r).await.is_err() {
            tracing::warn!(task = name, "readiness signal dropped before ready; not starting");
            return;
        }
        tracing::info!(task = name, "periodic task started");

        loop {
            let cycle = AbortOnDrop(tokio::spawn({
                let work = work.clone();
                async move { work.run().await }
            }));
            match cycle.await {
                Ok(Ok(())) => tracing::debug!(task = name, "cycle finished"),
                Ok(Err(e)) => tracing::warn!(task = name, error = ?e, "cycle failed"),
                Err(e) if e.is_panic() => tracing::error!(task = name, "cycle panicked"),
                Err(e) => tracing::warn!(task = name, error = %e, "cycle cancelled"),
            }

            let pause = work.interval().await;
            tokio::time::sleep(pause).await;
        }
    })
}

/// Owns the poll loop. Dropping the controller stops it.
pub struct PollController {
    name: &'static str,
    work: Arc<dyn PeriodicWork>,
    ready: watch::Receiver<bool>,
    handle: Option<JoinHandle<()>>,
}

impl PollController {
    pub fn new(
        name: &'static str,
        work: Arc<dyn PeriodicWork>,
        ready: watch::Receiver<bool>,
    ) -> Self {
        Self {
            name,
            work,
            ready,
            handle: None,
        }
    }

    /// Returns false if the loop is already running.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        self.handle = Some(spawn_periodic(
            self.name,
            self.ready.clone(),
            self.work.clone(),
        ));
        true
    }

    /// Returns false if nothing was running.
    pub fn stop(&mut self) -> bool {
        match self.handle.take() {
            Some(h) => {
                let was_running = !h.is_finished();
                h.abort();
                tracing::info!(task = self.name, "periodic task stopped");
                was_running
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for PollController {
    fn drop(&mut self) {
        if let Some(h) = self.handle.take() {
            h.abort();
        }
    }
}
