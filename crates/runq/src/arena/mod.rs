//! Arena-indexed data structures
//!
//! - [`ArenaQueue`] - FIFO queue with handle-linked slots and a free list

mod queue;

pub use queue::{ArenaQueue, Iter};
