//! Bounded-concurrency dispatcher over one backlog
//!
//! Pushing a job enqueues it and, when a worker slot is free, spawns a worker
//! task. Each worker keeps claiming the next queued job after finishing one
//! and exits once the backlog is empty, so the number of live workers never
//! exceeds the configured concurrency and no idle workers linger.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use super::config::{ErrorHandler, QueueConfig};
use super::error::QueueError;
use crate::arena::ArenaQueue;
use crate::job::{Caller, Job, JobError};

/// How often `stop` re-checks whether the queue has drained
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

const INITIAL_BACKLOG_CAPACITY: usize = 8;

/// Lifecycle of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// Accepting jobs and spawning workers
    Open,
    /// Stopped; queued and running jobs are still finishing
    Stopping,
    /// Stopped with nothing queued or running
    Drained,
}

struct State {
    backlog: ArenaQueue<Job>,
    max_concurrency: usize,
    cur_concurrency: usize,
    stopped: bool,
}

impl State {
    /// Take a worker slot and the next job, if both are available.
    fn claim(&mut self) -> Option<Job> {
        if self.cur_concurrency >= self.max_concurrency {
            return None;
        }
        let job = self.backlog.pop()?;
        self.cur_concurrency += 1;
        Some(job)
    }

    fn pending(&self) -> usize {
        self.backlog.len() + self.cur_concurrency
    }
}

struct Shared {
    id: String,
    timeout: Duration,
    caller: Caller,
    on_error: Option<ErrorHandler>,
    runtime: Handle,
    state: Mutex<State>,
}

impl Shared {
    /// Enqueue `job` and claim a slot for a new worker if one is free.
    fn admit(&self, job: Job) -> Option<Job> {
        let mut state = self.state.lock();
        if state.stopped {
            drop(state);
            debug!(queue_id = %self.id, "queue is stopped, dropping job");
            return None;
        }
        state.backlog.push(job);
        state.claim()
    }

    /// Give back a finished worker's slot and claim the next job for it.
    fn release_and_claim(&self) -> Option<Job> {
        let mut state = self.state.lock();
        state.cur_concurrency -= 1;
        state.claim()
    }

    /// Set the stopped latch; `false` if it was already set.
    fn latch(&self) -> bool {
        let mut state = self.state.lock();
        !std::mem::replace(&mut state.stopped, true)
    }

    fn pending(&self) -> usize {
        self.state.lock().pending()
    }

    fn report(&self, err: JobError) {
        match &self.on_error {
            Some(handler) => handler(err),
            None => error!(queue_id = %self.id, error = %err, "job failed"),
        }
    }

    fn spawn_worker(self: &Arc<Self>, job: Job) {
        trace!(queue_id = %self.id, "spawning worker");
        let shared = Arc::clone(self);
        self.runtime.spawn(async move { shared.run_worker(job).await });
    }

    async fn run_worker(self: Arc<Self>, mut job: Job) {
        loop {
            let slot = SlotGuard::hold(&self);
            if let Err(err) = self.caller.call(job).await {
                self.report(err);
            }

            match slot.release() {
                Some(next) => job = next,
                None => break,
            }
        }
        trace!(queue_id = %self.id, "worker exited");
    }
}

/// A worker slot held while one job runs
///
/// If the job unwinds (recovery disabled) or the task is dropped mid-job, the
/// guard still returns the slot
/// and hands any queued work to a fresh worker.
struct SlotGuard<'a> {
    shared: &'a Arc<Shared>,
    held: bool,
}

impl<'a> SlotGuard<'a> {
    fn hold(shared: &'a Arc<Shared>) -> Self {
        Self { shared, held: true }
    }

    fn release(mut self) -> Option<Job> {
        self.held = false;
        self.shared.release_and_claim()
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        warn!(
            queue_id = %self.shared.id,
            "worker dropped while running a job, releasing its slot"
        );
        if let Some(next) = self.shared.release_and_claim() {
            self.shared.spawn_worker(next);
        }
    }
}

/// A single bounded-concurrency job queue
///
/// Cloning yields another handle to the same queue.
///
/// # Example
///
/// ```
/// use runq::{Job, QueueConfig, SingleQueue};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), runq::QueueError> {
/// let queue = SingleQueue::new(QueueConfig::new().with_concurrency(2))?;
///
/// for i in 0..10 {
///     queue.push(Job::new(async move {
///         println!("job {i}");
///     }));
/// }
///
/// queue.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SingleQueue {
    shared: Arc<Shared>,
}

impl SingleQueue {
    /// Create a queue on the current tokio runtime
    pub fn new(config: QueueConfig) -> Result<Self, QueueError> {
        let runtime = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;
        Self::with_runtime(config, runtime)
    }

    /// Create a queue whose workers run on `runtime`
    pub fn with_runtime(config: QueueConfig, runtime: Handle) -> Result<Self, QueueError> {
        config.validate()?;
        Ok(Self::build(
            format!("queue-{}", Uuid::now_v7()),
            &config,
            runtime,
        ))
    }

    pub(crate) fn build(id: String, config: &QueueConfig, runtime: Handle) -> Self {
        let state = State {
            backlog: ArenaQueue::with_capacity(INITIAL_BACKLOG_CAPACITY),
            max_concurrency: config.concurrency,
            cur_concurrency: 0,
            stopped: false,
        };

        Self {
            shared: Arc::new(Shared {
                id,
                timeout: config.timeout,
                caller: Caller::from_recovery(config.recovery),
                on_error: config.on_error.clone(),
                runtime,
                state: Mutex::new(state),
            }),
        }
    }

    /// Identifier used in log events
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Submit a job; silently dropped once the queue is stopped
    pub fn push(&self, job: Job) {
        if let Some(first) = self.shared.admit(job) {
            self.shared.spawn_worker(first);
        }
    }

    /// Number of jobs waiting for a worker (running jobs excluded)
    pub fn len(&self) -> usize {
        self.shared.state.lock().backlog.len()
    }

    /// Check whether no jobs are waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of jobs currently running
    pub fn running(&self) -> usize {
        self.shared.state.lock().cur_concurrency
    }

    /// Maximum number of concurrently running jobs
    pub fn concurrency(&self) -> usize {
        self.shared.state.lock().max_concurrency
    }

    /// Current lifecycle state
    pub fn status(&self) -> QueueStatus {
        let state = self.shared.state.lock();
        match (state.stopped, state.pending()) {
            (false, _) => QueueStatus::Open,
            (true, 0) => QueueStatus::Drained,
            (true, _) => QueueStatus::Stopping,
        }
    }

    /// Stop accepting jobs and wait for the backlog to drain
    ///
    /// Waits at most the configured timeout. Running jobs are never
    /// cancelled; on timeout they keep finishing in the background.
    pub async fn stop(&self) -> Result<(), QueueError> {
        self.stop_with(CancellationToken::new()).await
    }

    /// Like [`stop`](Self::stop), but also gives up when `cancel` fires
    pub async fn stop_with(&self, cancel: CancellationToken) -> Result<(), QueueError> {
        let deadline = Instant::now() + self.shared.timeout;
        self.drain(deadline, &cancel).await
    }

    #[instrument(skip_all, fields(queue_id = %self.shared.id))]
    pub(crate) async fn drain(
        &self,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError> {
        if !self.shared.latch() {
            debug!("queue already stopped");
            return Ok(());
        }

        info!(pending = self.shared.pending(), "stopping queue");

        let mut ticker = tokio::time::interval(DRAIN_POLL_INTERVAL);
        let expired = tokio::time::sleep_until(deadline);
        tokio::pin!(expired);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.shared.pending() == 0 {
                        info!("queue drained");
                        return Ok(());
                    }
                }
                _ = &mut expired => {
                    let pending = self.shared.pending();
                    if pending == 0 {
                        return Ok(());
                    }
                    warn!(pending, "stop timed out before the queue drained");
                    return Err(QueueError::StopTimeout { pending });
                }
                _ = cancel.cancelled() => {
                    let pending = self.shared.pending();
                    if pending == 0 {
                        return Ok(());
                    }
                    warn!(pending, "stop cancelled before the queue drained");
                    return Err(QueueError::StopCancelled { pending });
                }
            }
        }
    }
}

impl std::fmt::Debug for SingleQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("SingleQueue")
            .field("id", &self.shared.id)
            .field("queued", &state.backlog.len())
            .field("running", &state.cur_concurrency)
            .field("max_concurrency", &state.max_concurrency)
            .field("stopped", &state.stopped)
            .finish()
    }
}
