//! uiexec: the single-threaded cooperative executor that hosts a
//! session's embedded script runtime.
//!
//! The scripting VM is not thread-safe, so all operations on it — inbound
//! message handling, timer callbacks, hot-reload re-execution — are
//! serialized through one `mpsc` channel onto one dedicated task, the
//! same "serialize access via a channel to an owned resource" shape the
//! session-level dispatcher uses for per-device command routing. `R` is
//! left generic here: this crate knows nothing about the concrete script
//! engine, only that it is some `Send`-able owned value jobs run against.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub mod modules;

pub use modules::{ModuleTracker, RegisteredItem, RegistryKind};

pub type TimerId = u64;

type Job<R> = Box<dyn FnOnce(&mut ExecutorState<R>) + Send>;

struct ExecutorState<R> {
    runtime: R,
    job_tx: mpsc::Sender<Job<R>>,
    timers: HashMap<TimerId, JoinHandle<()>>,
    next_timer: TimerId,
}

/// A handle to a running executor task. Cloning shares the same
/// underlying task; dropping every clone lets the task's channel close
/// and the task exit.
#[derive(Clone)]
pub struct Executor<R> {
    job_tx: mpsc::Sender<Job<R>>,
}

impl<R: Send + 'static> Executor<R> {
    pub fn spawn(runtime: R) -> Self {
        let (job_tx, mut job_rx) = mpsc::channel::<Job<R>>(1024);
        let mut state = ExecutorState {
            runtime,
            job_tx: job_tx.clone(),
            timers: HashMap::new(),
            next_timer: 1,
        };
        tokio::spawn(async move {
            while let Some(job) = job_rx.recv().await {
                job(&mut state);
            }
            debug!(pending_timers = state.timers.len(), "executor task shutting down");
            for (_, handle) in state.timers.drain() {
                handle.abort();
            }
        });
        Self { job_tx }
    }

    /// Runs `f` against the owned runtime value and waits for it to
    /// complete. This is the only synchronous entry point: everything
    /// else (timers) is expressed in terms of this.
    pub async fn run<F, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&mut R) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self
            .job_tx
            .send(Box::new(move |state: &mut ExecutorState<R>| {
                let out = f(&mut state.runtime);
                let _ = reply_tx.send(out);
            }))
            .await;
        if sent.is_err() {
            return None;
        }
        reply_rx.await.ok()
    }

    /// `setImmediate`: queues `f` to run in the next dispatcher turn.
    pub async fn set_immediate<F>(&self, f: F)
    where
        F: FnOnce(&mut R) + Send + 'static,
    {
        let _ = self
            .job_tx
            .send(Box::new(move |state: &mut ExecutorState<R>| {
                f(&mut state.runtime);
            }))
            .await;
    }

    /// `setTimeout`: fires `f` once after `delay`.
    pub async fn set_timeout<F>(&self, delay: Duration, f: F) -> Option<TimerId>
    where
        F: FnOnce(&mut R) + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self
            .job_tx
            .send(Box::new(move |state: &mut ExecutorState<R>| {
                let id = state.next_timer;
                state.next_timer += 1;
                let job_tx = state.job_tx.clone();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = job_tx
                        .send(Box::new(move |state: &mut ExecutorState<R>| {
                            state.timers.remove(&id);
                            f(&mut state.runtime);
                        }))
                        .await;
                });
                state.timers.insert(id, handle);
                let _ = reply_tx.send(id);
            }))
            .await;
        if sent.is_err() {
            return None;
        }
        reply_rx.await.ok()
    }

    /// `setInterval`: repeats `f` every `period` until cancelled or the
    /// executor shuts down. `f` is cloned once per tick via `Arc`.
    pub async fn set_interval<F>(&self, period: Duration, f: F) -> Option<TimerId>
    where
        F: Fn(&mut R) + Send + Sync + 'static,
    {
        use std::sync::Arc;
        let f = Arc::new(f);
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self
            .job_tx
            .send(Box::new(move |state: &mut ExecutorState<R>| {
                let id = state.next_timer;
                state.next_timer += 1;
                let job_tx = state.job_tx.clone();
                let handle = tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(period);
                    ticker.tick().await; // first tick fires immediately; skip it
                    loop {
                        ticker.tick().await;
                        let f = f.clone();
                        if job_tx
                            .send(Box::new(move |state: &mut ExecutorState<R>| {
                                f(&mut state.runtime);
                            }))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                });
                state.timers.insert(id, handle);
                let _ = reply_tx.send(id);
            }))
            .await;
        if sent.is_err() {
            return None;
        }
        reply_rx.await.ok()
    }

    /// `clear*`: idempotent cancel. Clearing an unknown or
    /// already-cleared handle is a no-op.
    pub async fn clear(&self, id: TimerId) {
        let _ = self
            .job_tx
            .send(Box::new(move |state: &mut ExecutorState<R>| {
                if let Some(handle) = state.timers.remove(&id) {
                    handle.abort();
                } else {
                    warn!(timer_id = id, "clear on unknown or already-cleared timer");
                }
            }))
            .await;
    }
}
