//! Job definition
//!
//! A [`Job`] is a boxed, zero-argument unit of asynchronous work.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;

use super::caller::PanicError;

/// Result of running a single job
pub type JobResult = Result<(), JobError>;

/// Errors produced by a job body
#[derive(Debug, Error)]
pub enum JobError {
    /// The job returned an error of its own
    #[error("job failed: {0}")]
    Failed(#[from] anyhow::Error),

    /// The job panicked and the panic was recovered
    #[error("job panicked: {0}")]
    Panicked(PanicError),
}

impl JobError {
    /// Create a failure from a plain message
    pub fn failed(msg: impl Into<String>) -> Self {
        JobError::Failed(anyhow::Error::msg(msg.into()))
    }

    /// Check whether the error came from a recovered panic
    pub fn is_panic(&self) -> bool {
        matches!(self, JobError::Panicked(_))
    }
}

/// Output types a job body may finish with
///
/// Implemented for `()` and for `Result<(), E>` where `E` converts into
/// [`anyhow::Error`], so both infallible and fallible bodies can be queued.
pub trait IntoJobResult {
    /// Convert the body's output into a [`JobResult`]
    fn into_job_result(self) -> JobResult;
}

impl IntoJobResult for () {
    fn into_job_result(self) -> JobResult {
        Ok(())
    }
}

impl<E> IntoJobResult for Result<(), E>
where
    E: Into<anyhow::Error>,
{
    fn into_job_result(self) -> JobResult {
        self.map_err(|e| JobError::Failed(e.into()))
    }
}

/// A unit of work accepted by a queue
///
/// # Example
///
/// ```
/// use runq::Job;
///
/// let job = Job::new(async {
///     // do some work
/// });
///
/// let fallible = Job::new(async {
///     anyhow::ensure!(1 + 1 == 2, "arithmetic is broken");
///     Ok::<(), anyhow::Error>(())
/// });
///
/// let blocking = Job::from_fn(|| println!("runs inline on a worker"));
///
/// let with_args = Job::with_args(42_u64, |n| async move {
///     println!("got {n}");
/// });
/// # drop((job, fallible, blocking, with_args));
/// ```
pub struct Job {
    body: BoxFuture<'static, JobResult>,
}

impl Job {
    /// Create a job from a future
    pub fn new<F>(fut: F) -> Self
    where
        F: Future + Send + 'static,
        F::Output: IntoJobResult,
    {
        Self {
            body: fut
                .map(<F::Output as IntoJobResult>::into_job_result)
                .boxed(),
        }
    }

    /// Create a job from a synchronous closure
    ///
    /// The closure runs directly on the worker task, so it should not block
    /// for long.
    pub fn from_fn<F, R>(f: F) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
        R: IntoJobResult,
    {
        Self::new(async move { f() })
    }

    /// Create a job that hands `args` to `handler` when it runs
    pub fn with_args<A, F, Fut>(args: A, handler: F) -> Self
    where
        A: Send + 'static,
        F: FnOnce(A) -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoJobResult,
    {
        Self::new(async move { handler(args).await })
    }

    /// Run the job body to completion
    pub async fn run(self) -> JobResult {
        self.body.await
    }

    pub(crate) fn into_body(self) -> BoxFuture<'static, JobResult> {
        self.body
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").finish_non_exhaustive()
    }
}
