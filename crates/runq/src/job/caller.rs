//! Job invocation with optional panic recovery
//!
//! [`Caller::Recovering`] turns a panicking job into a [`JobError::Panicked`]
//! carrying the panic message and the stack frames at the panic site. The
//! trace is captured by a chained panic hook that only records while a
//! recovering poll is on the current thread; other panics pass through to
//! the previously installed hook untouched.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;

use super::definition::{Job, JobError, JobResult};

/// Symbol prefixes of frames that belong to the runtime rather than the job
const RUNTIME_FRAME_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "tokio::",
    "futures::",
    "futures_core::",
    "futures_util::",
    "runq::job::caller::",
    "runq::queue::",
    "__rust",
    "rust_begin_unwind",
    "rust_panic",
];

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static LAST_TRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// How a worker invokes each job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    /// Await the job; a panic unwinds out of the worker
    Direct,
    /// Catch panics and report them as [`JobError::Panicked`]
    Recovering,
}

impl Caller {
    /// Pick the caller for a queue's recovery setting
    pub fn from_recovery(recovery: bool) -> Self {
        if recovery {
            install_panic_hook();
            Caller::Recovering
        } else {
            Caller::Direct
        }
    }

    /// Run `job` to completion
    pub async fn call(&self, job: Job) -> JobResult {
        match self {
            Caller::Direct => job.run().await,
            Caller::Recovering => {
                let body = Capturing {
                    body: job.into_body(),
                };
                match AssertUnwindSafe(body).catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => {
                        let trace = LAST_TRACE.with(|slot| slot.borrow_mut().take());
                        Err(JobError::Panicked(PanicError::new(payload, trace)))
                    }
                }
            }
        }
    }
}

/// A recovered panic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicError {
    /// Panic payload rendered as text
    pub message: String,
    /// Frames at the panic site, runtime frames removed
    pub frames: Vec<Frame>,
}

/// A single stack frame of a [`PanicError`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Demangled symbol name
    pub symbol: String,
    /// `file:line:column`, when debug info is available
    pub location: Option<String>,
}

impl PanicError {
    fn new(payload: Box<dyn Any + Send>, trace: Option<Backtrace>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_string()
        };

        let frames = trace
            .map(|t| parse_frames(&t.to_string()))
            .unwrap_or_default();

        Self { message, frames }
    }
}

impl fmt::Display for PanicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fatal error: {}", self.message)?;
        for frame in &self.frames {
            match &frame.location {
                Some(location) => write!(f, "\ncaller: {}, at {}", frame.symbol, location)?,
                None => write!(f, "\ncaller: {}", frame.symbol)?,
            }
        }
        Ok(())
    }
}

impl std::error::Error for PanicError {}

/// Parse the `Display` output of a [`Backtrace`] and drop runtime frames
fn parse_frames(rendered: &str) -> Vec<Frame> {
    let mut frames: Vec<Frame> = Vec::new();

    for line in rendered.lines().map(str::trim) {
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                frame.location.get_or_insert_with(|| location.to_string());
            }
            continue;
        }

        if let Some((index, symbol)) = line.split_once(": ") {
            if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) {
                frames.push(Frame {
                    symbol: symbol.to_string(),
                    location: None,
                });
            }
        }
    }

    frames.retain(|frame| !is_runtime_frame(&frame.symbol));
    frames
}

fn is_runtime_frame(symbol: &str) -> bool {
    let symbol = symbol.trim_start_matches('<');
    RUNTIME_FRAME_PREFIXES
        .iter()
        .any(|prefix| symbol.starts_with(prefix))
}

fn install_panic_hook() {
    static INSTALL: Once = Once::new();

    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                let trace = Backtrace::force_capture();
                LAST_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            } else {
                previous(info);
            }
        }));
    });
}

/// Marks the current thread as polling a recovering job
struct CaptureGuard {
    was_capturing: bool,
}

impl CaptureGuard {
    fn enter() -> Self {
        let was_capturing = CAPTURING.with(|flag| flag.replace(true));
        Self { was_capturing }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        CAPTURING.with(|flag| flag.set(self.was_capturing));
    }
}

struct Capturing {
    body: BoxFuture<'static, JobResult>,
}

impl Future for Capturing {
    type Output = JobResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _guard = CaptureGuard::enter();
        self.body.as_mut().poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_code_that_panics() {
        panic!("test");
    }

    #[tokio::test]
    async fn test_recovering_caller_converts_panic() {
        let caller = Caller::from_recovery(true);
        let result = caller.call(Job::from_fn(user_code_that_panics)).await;

        match result {
            Err(JobError::Panicked(err)) => {
                assert_eq!(err.message, "test");
                assert!(err.to_string().starts_with("fatal error: test"));
                assert!(err
                    .frames
                    .iter()
                    .all(|frame| !is_runtime_frame(&frame.symbol)));
            }
            other => panic!("expected a recovered panic, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recovering_caller_formats_owned_payload() {
        let caller = Caller::from_recovery(true);
        let code = 42;
        let result = caller
            .call(Job::from_fn::<_, ()>(move || panic!("code {code}")))
            .await;

        let err = result.unwrap_err();
        assert!(err.is_panic());
        assert!(err.to_string().contains("fatal error: code 42"));
    }

    #[tokio::test]
    async fn test_recovering_caller_passes_job_errors_through() {
        let caller = Caller::from_recovery(true);
        let result = caller
            .call(Job::new(async { Err::<(), _>(anyhow::anyhow!("nope")) }))
            .await;

        assert!(matches!(result, Err(JobError::Failed(_))));
    }

    #[tokio::test]
    async fn test_direct_caller_propagates_panic() {
        let handle = tokio::spawn(async {
            Caller::Direct
                .call(Job::from_fn::<_, ()>(|| panic!("not recovered")))
                .await
        });

        let err = handle.await.unwrap_err();
        assert!(err.is_panic());
    }

    #[test]
    fn test_parse_frames_filters_runtime() {
        let rendered = "\
   0: std::backtrace::Backtrace::force_capture
             at /rustc/abc/library/std/src/backtrace.rs:312:9
   1: runq::job::caller::install_panic_hook::{{closure}}
             at ./src/job/caller.rs:170:29
   2: myapp::billing::charge
             at ./src/billing.rs:42:5
   3: <core::pin::Pin<P> as core::future::future::Future>::poll
             at /rustc/abc/library/core/src/future/future.rs:124:9
   4: myapp::main::{{closure}}
   5: tokio::runtime::task::harness::poll_future
";

        let frames = parse_frames(rendered);
        assert_eq!(
            frames,
            vec![
                Frame {
                    symbol: "myapp::billing::charge".into(),
                    location: Some("./src/billing.rs:42:5".into()),
                },
                Frame {
                    symbol: "myapp::main::{{closure}}".into(),
                    location: None,
                },
            ]
        );
    }

    #[test]
    fn test_display_lists_frames() {
        let err = PanicError {
            message: "boom".into(),
            frames: vec![Frame {
                symbol: "app::work".into(),
                location: Some("src/lib.rs:1:1".into()),
            }],
        };
        assert_eq!(
            err.to_string(),
            "fatal error: boom\ncaller: app::work, at src/lib.rs:1:1"
        );
    }
}
