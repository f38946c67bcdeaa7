//! Jobs and how workers invoke them
//!
//! This module provides:
//! - [`Job`] - A boxed unit of asynchronous work
//! - [`Caller`] - Direct or panic-recovering invocation
//! - [`JobError`] / [`PanicError`] - Failures reported by job bodies

mod caller;
mod definition;

pub use caller::{Caller, Frame, PanicError};
pub use definition::{IntoJobResult, Job, JobError, JobResult};
