//! Fixed-size worker pool whose results are delivered strictly in input
//! order, each exactly once, without busy-waiting.
//!
//! # Use case
//!
//! Suppose we have a sequence of inputs and some expensive, independent
//! computation to perform on each one. Running the computations in parallel
//! means they finish in an unpredictable order, but whoever consumes the
//! results wants them in the order the inputs came in. Collecting everything
//! and sorting at the end delays all output until the slowest item is done.
//!
//! # Objective
//!
//!   - We have an ordered sequence of inputs at positions 1..=M.
//!
//!   - A fixed pool of N workers pulls inputs from a shared queue and
//!     computes results in parallel, finishing in any order.
//!
//!   - A single consumer receives result 1, then result 2, etc. Each result
//!     is delivered as soon as it and every result before it are ready.
//!
//!   - If a result can never arrive, the consumer finds out and reports which
//!     positions are missing instead of waiting forever.
//!
//! # Example
//!
//! ```
//! use seqpool::{Console, Pipeline};
//!
//! fn main() -> seqpool::Result<()> {
//!     let pipeline = Pipeline::builder().workers(5).build()?;
//!
//!     // Prints "1 = 1" through "100 = 10000" in order.
//!     let report = pipeline.try_run(
//!         1..=100u64,
//!         |n| n.checked_mul(n).ok_or("overflow"),
//!         Console::stdout(),
//!     )?;
//!     assert!(report.is_success());
//!     Ok(())
//! }
//! ```
//!
//! The building blocks are usable on their own: [`Sequencer`] is the ordered
//! result buffer, [`WorkerPool`] runs the workers, and [`Pipeline`] wires
//! them together around a task queue.

mod error;
mod pipeline;
mod pool;
mod sequencer;
mod sink;
mod sync;
mod task;

pub use crate::error::{Error, Result};
pub use crate::pipeline::{Failure, Pipeline, PipelineBuilder, Report};
pub use crate::pool::{Running, TaskSource, WorkerPool};
pub use crate::sequencer::{DrainStats, Sequencer};
pub use crate::sink::{Console, Sink};
pub use crate::task::Task;
