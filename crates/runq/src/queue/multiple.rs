//! Sharded queue
//!
//! Spreads jobs over independent [`SingleQueue`] shards, each with its own
//! lock, so heavy producers contend on one shard's lock instead of a single
//! shared one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

use super::config::QueueConfig;
use super::error::QueueError;
use super::single::SingleQueue;
use crate::job::Job;

/// A queue partitioned into power-of-two shards
///
/// Jobs pushed without a key are spread round-robin. Jobs pushed with a key
/// always land on shard `key & (shard_count - 1)`, so jobs sharing a key keep
/// their submission order when the per-shard concurrency is 1.
///
/// # Example
///
/// ```
/// use runq::{Job, MultipleQueue, QueueConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), runq::QueueError> {
/// let queue = MultipleQueue::new(QueueConfig::new().with_sharding(4).with_concurrency(1))?;
///
/// let user_id = 1234_i64;
/// queue.push_keyed(user_id, Job::new(async { /* first */ }));
/// queue.push_keyed(user_id, Job::new(async { /* runs after first */ }));
///
/// queue.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MultipleQueue {
    id: String,
    timeout: Duration,
    serial: AtomicU64,
    shards: Vec<SingleQueue>,
}

impl MultipleQueue {
    /// Create a sharded queue on the current tokio runtime
    pub fn new(config: QueueConfig) -> Result<Self, QueueError> {
        let runtime = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;
        Self::with_runtime(config, runtime)
    }

    /// Create a sharded queue whose workers run on `runtime`
    pub fn with_runtime(config: QueueConfig, runtime: Handle) -> Result<Self, QueueError> {
        config.validate()?;

        let id = format!("queue-{}", Uuid::now_v7());
        let shards = (0..config.shard_count())
            .map(|i| SingleQueue::build(format!("{id}/shard-{i}"), &config, runtime.clone()))
            .collect();

        Ok(Self {
            id,
            timeout: config.timeout,
            serial: AtomicU64::new(0),
            shards,
        })
    }

    /// Identifier used in log events
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Access a single shard
    pub fn shard(&self, index: usize) -> Option<&SingleQueue> {
        self.shards.get(index)
    }

    /// Index of the shard that jobs pushed with `key` go to
    pub fn shard_for_key(&self, key: i64) -> usize {
        (key as u64 & self.mask()) as usize
    }

    /// Submit a job to the next shard in round-robin order
    pub fn push(&self, job: Job) {
        let index = (self.serial.fetch_add(1, Ordering::Relaxed) & self.mask()) as usize;
        self.shards[index].push(job);
    }

    /// Submit a job to the shard selected by `key`
    pub fn push_keyed(&self, key: i64, job: Job) {
        self.shards[self.shard_for_key(key)].push(job);
    }

    /// Jobs waiting across all shards
    ///
    /// Shards are read one after another, so this is not an atomic snapshot.
    pub fn len(&self) -> usize {
        self.shards.iter().map(SingleQueue::len).sum()
    }

    /// Check whether no jobs are waiting on any shard
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(SingleQueue::is_empty)
    }

    /// Jobs running across all shards
    pub fn running(&self) -> usize {
        self.shards.iter().map(SingleQueue::running).sum()
    }

    /// Stop every shard and wait for all of them to drain
    pub async fn stop(&self) -> Result<(), QueueError> {
        self.stop_with(CancellationToken::new()).await
    }

    /// Like [`stop`](Self::stop), but also gives up when `cancel` fires
    ///
    /// All shards share one deadline. Returns the first shard error, in
    /// shard order.
    #[instrument(skip_all, fields(queue_id = %self.id, shards = self.shards.len()))]
    pub async fn stop_with(&self, cancel: CancellationToken) -> Result<(), QueueError> {
        let deadline = Instant::now() + self.timeout;
        info!("stopping all shards");

        let results = join_all(
            self.shards
                .iter()
                .map(|shard| shard.drain(deadline, &cancel)),
        )
        .await;

        match results.into_iter().find_map(Result::err) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn mask(&self) -> u64 {
        self.shards.len() as u64 - 1
    }
}
