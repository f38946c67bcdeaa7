//! # Runq
//!
//! An in-process job queue that runs asynchronous jobs with bounded concurrency.
//!
//! ## Features
//!
//! - **Bounded concurrency**: At most `concurrency` jobs run at once; excess jobs wait in a FIFO backlog
//! - **Self-scheduling workers**: Workers are spawned on demand and exit when the backlog is empty
//! - **Sharding**: Spread lock contention over power-of-two shards, with optional key affinity
//! - **Graceful stop**: Drain queued and running jobs, bounded by a timeout or a cancellation token
//! - **Panic recovery**: Optionally turn job panics into errors with the panic-site frames
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  new_queue(QueueConfig)                      │
//! │      (SingleQueue when sharding <= 1, else MultipleQueue)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SingleQueue shard                       │
//! │  (Mutex: ArenaQueue<Job> backlog, running / max counters)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Workers                              │
//! │  (tokio tasks; Caller runs each job, direct or recovering)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use runq::prelude::*;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), QueueError> {
//! let queue = new_queue(QueueConfig::new().with_concurrency(4).with_sharding(2))?;
//! let done = Arc::new(AtomicUsize::new(0));
//!
//! for _ in 0..100 {
//!     let done = Arc::clone(&done);
//!     queue.push(Job::from_fn(move || {
//!         done.fetch_add(1, Ordering::SeqCst);
//!     }));
//! }
//!
//! queue.stop().await?;
//! assert_eq!(done.load(Ordering::SeqCst), 100);
//! # Ok(())
//! # }
//! ```

pub mod arena;
pub mod job;
pub mod queue;

/// Prelude for common imports
pub mod prelude {
    pub use crate::job::{IntoJobResult, Job, JobError, JobResult};
    pub use crate::queue::{
        new_queue, MultipleQueue, Queue, QueueConfig, QueueError, QueueStatus, SingleQueue,
    };
}

// Re-export key types at crate root
pub use arena::ArenaQueue;
pub use job::{Caller, Frame, IntoJobResult, Job, JobError, JobResult, PanicError};
pub use queue::{
    new_queue, ErrorHandler, MultipleQueue, Queue, QueueConfig, QueueError, QueueStatus,
    SingleQueue, DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT, MAX_SHARDS,
};
