use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failure of a pipeline run or of a sequencer drain.
#[derive(Debug, Error)]
pub enum Error {
    /// A worker pool was requested with zero workers.
    #[error("worker pool needs at least one worker")]
    NoWorkers,

    /// A sequencer was created expecting zero results.
    #[error("sequencer needs at least one position to deliver")]
    EmptySequence,

    /// Every producer finished but the result for `next` never arrived.
    ///
    /// `missing` holds every undelivered position that was not buffered at
    /// the time the drain gave up, in ascending order.
    #[error("incomplete sequence: position {next} never arrived ({} missing)", .missing.len())]
    Incomplete { next: usize, missing: Vec<usize> },

    /// The drain deadline passed while waiting for `next`.
    #[error("timed out after {waited:?} waiting for position {next}")]
    Timeout { next: usize, waited: Duration },

    /// A second consumer tried to drain a sequencer that is already being
    /// drained.
    #[error("sequencer is already being drained")]
    AlreadyDraining,

    /// A worker thread panicked while processing a task.
    #[error("worker {worker} panicked: {message}")]
    WorkerPanicked { worker: usize, message: String },

    /// The operating system refused to start a thread.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
