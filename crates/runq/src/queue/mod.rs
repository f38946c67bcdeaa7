//! Bounded-concurrency job queues
//!
//! This module provides:
//! - [`SingleQueue`] - One backlog served by at most `concurrency` workers
//! - [`MultipleQueue`] - Power-of-two shards of single queues
//! - [`Queue`] - The interface both implement, built by [`new_queue`]
//! - [`QueueConfig`] - Concurrency, sharding, stop timeout and recovery settings
//!
//! # Architecture
//!
//! ```text
//!            push(job) / push_keyed(key, job)
//!                          │
//!                          ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      MultipleQueue                           │
//! │   serial & (n-1)  or  key & (n-1)  selects a shard           │
//! └─────────────────────────────────────────────────────────────┘
//!          │                   │                    │
//!          ▼                   ▼                    ▼
//! ┌─────────────────┐ ┌─────────────────┐  ┌─────────────────┐
//! │  SingleQueue 0  │ │  SingleQueue 1  │  │ SingleQueue n-1 │
//! │ Mutex<backlog,  │ │      ...        │  │      ...        │
//! │   running/max>  │ │                 │  │                 │
//! └────────┬────────┘ └─────────────────┘  └─────────────────┘
//!          │ spawn when running < max
//!          ▼
//!   worker: run job → release slot + claim next → repeat or exit
//! ```
//!
//! # Example
//!
//! ```
//! use runq::{new_queue, Job, QueueConfig};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), runq::QueueError> {
//! let queue = new_queue(
//!     QueueConfig::new()
//!         .with_concurrency(4)
//!         .with_timeout(Duration::from_secs(5))
//!         .with_recovery(true),
//! )?;
//!
//! queue.push(Job::new(async {
//!     // work
//! }));
//!
//! // Graceful shutdown
//! queue.stop().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod multiple;
mod single;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use config::{ErrorHandler, QueueConfig, DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT, MAX_SHARDS};
pub use error::QueueError;
pub use multiple::MultipleQueue;
pub use single::{QueueStatus, SingleQueue};

use crate::job::Job;

/// A job queue
#[async_trait]
pub trait Queue: Send + Sync {
    /// Submit a job; dropped without error once the queue is stopped
    fn push(&self, job: Job);

    /// Submit a job routed by `key`; the key is ignored by unsharded queues
    fn push_keyed(&self, key: i64, job: Job);

    /// Jobs waiting for a worker
    fn len(&self) -> usize;

    /// Check whether no jobs are waiting
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Jobs currently running
    fn running(&self) -> usize;

    /// Stop accepting jobs and wait, up to the configured timeout, for the
    /// queue to drain
    async fn stop(&self) -> Result<(), QueueError> {
        self.stop_with(CancellationToken::new()).await
    }

    /// Like [`stop`](Queue::stop), but also gives up when `cancel` fires
    async fn stop_with(&self, cancel: CancellationToken) -> Result<(), QueueError>;
}

#[async_trait]
impl Queue for SingleQueue {
    fn push(&self, job: Job) {
        SingleQueue::push(self, job)
    }

    fn push_keyed(&self, _key: i64, job: Job) {
        SingleQueue::push(self, job)
    }

    fn len(&self) -> usize {
        SingleQueue::len(self)
    }

    fn running(&self) -> usize {
        SingleQueue::running(self)
    }

    async fn stop_with(&self, cancel: CancellationToken) -> Result<(), QueueError> {
        SingleQueue::stop_with(self, cancel).await
    }
}

#[async_trait]
impl Queue for MultipleQueue {
    fn push(&self, job: Job) {
        MultipleQueue::push(self, job)
    }

    fn push_keyed(&self, key: i64, job: Job) {
        MultipleQueue::push_keyed(self, key, job)
    }

    fn len(&self) -> usize {
        MultipleQueue::len(self)
    }

    fn running(&self) -> usize {
        MultipleQueue::running(self)
    }

    async fn stop_with(&self, cancel: CancellationToken) -> Result<(), QueueError> {
        MultipleQueue::stop_with(self, cancel).await
    }
}

/// Build a queue on the current tokio runtime
///
/// A sharding of 0 or 1 yields a [`SingleQueue`]; anything larger yields a
/// [`MultipleQueue`] with the shard count rounded up to a power of two.
pub fn new_queue(config: QueueConfig) -> Result<Arc<dyn Queue>, QueueError> {
    config.validate()?;
    if config.shard_count() > 1 {
        Ok(Arc::new(MultipleQueue::new(config)?))
    } else {
        Ok(Arc::new(SingleQueue::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_queue_picks_single() {
        let queue = new_queue(QueueConfig::new().with_sharding(1)).unwrap();
        let gate = CancellationToken::new();
        let g = gate.clone();
        queue.push_keyed(99, Job::new(async move { g.cancelled().await }));

        assert_eq!(queue.running(), 1);
        gate.cancel();
        assert!(queue.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_new_queue_picks_sharded() {
        let queue = new_queue(QueueConfig::new().with_sharding(3).with_concurrency(1)).unwrap();
        let gate = CancellationToken::new();
        for _ in 0..8 {
            let g = gate.clone();
            queue.push(Job::new(async move { g.cancelled().await }));
        }

        // One running job per shard, the rest queued
        assert_eq!(queue.running(), 4);
        assert_eq!(queue.len(), 4);

        gate.cancel();
        assert!(queue.stop().await.is_ok());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_new_queue_rejects_oversized_sharding() {
        let config: QueueConfig =
            serde_json::from_str(r#"{"sharding": 18446744073709551615}"#).unwrap();
        assert!(matches!(
            new_queue(config),
            Err(QueueError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_new_queue_outside_runtime() {
        assert!(matches!(
            new_queue(QueueConfig::default()),
            Err(QueueError::NoRuntime)
        ));
    }
}
