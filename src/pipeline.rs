use crate::error::Result;
use crate::pool::WorkerPool;
use crate::sequencer::Sequencer;
use crate::sink::Sink;
use crate::task::Task;
use std::convert::Infallible;
use std::fmt::{self, Display};
use std::panic::resume_unwind;
use std::thread;
use std::time::Duration;

/// Runs a transform over a sequence of inputs on a fixed pool of workers and
/// delivers the results in input order.
///
/// ```
/// use seqpool::Pipeline;
///
/// let pipeline = Pipeline::builder().workers(4).build().unwrap();
///
/// let mut squares = Vec::new();
/// let report = pipeline
///     .run(1..=10u64, |n| n * n, |position: usize, square: u64| {
///         squares.push((position, square));
///     })
///     .unwrap();
///
/// assert_eq!(report.delivered, 10);
/// assert_eq!(squares[2], (3, 9));
/// assert_eq!(squares[9], (10, 100));
/// ```
#[derive(Clone, Debug)]
pub struct Pipeline {
    pool: WorkerPool,
    queue_capacity: Option<usize>,
    drain_timeout: Option<Duration>,
}

/// Configures and builds a [`Pipeline`].
#[derive(Clone, Debug)]
pub struct PipelineBuilder {
    workers: usize,
    queue_capacity: Option<usize>,
    drain_timeout: Option<Duration>,
}

/// Summary of a completed run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Report {
    /// Number of results delivered to the sink, failures included.
    pub delivered: usize,
    /// Positions whose transform failed, in position order.
    pub failures: Vec<Failure>,
    /// Number of times the consumer waited for a result that was not ready.
    pub suspensions: usize,
    /// Number of tasks each worker processed, indexed by worker number minus
    /// one.
    pub per_worker: Vec<usize>,
}

/// A position whose transform returned an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    pub position: usize,
    pub message: String,
}

impl Display for Failure {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "position {}: {}", self.position, self.message)
    }
}

impl Report {
    /// Whether every position produced a successful result.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        PipelineBuilder {
            workers: num_cpus::get(),
            queue_capacity: None,
            drain_timeout: None,
        }
    }
}

impl PipelineBuilder {
    /// Sets the number of worker threads. Defaults to the number of CPUs.
    pub fn workers(self, workers: usize) -> Self {
        PipelineBuilder { workers, ..self }
    }

    /// Bounds the task queue.
    ///
    /// By default the queue is unbounded and every input is enqueued up
    /// front. With a capacity, enqueueing blocks while the queue is full.
    pub fn queue_capacity(self, capacity: usize) -> Self {
        PipelineBuilder {
            queue_capacity: Some(capacity),
            ..self
        }
    }

    /// Gives up on a run whose consumer waits longer than `timeout` for a
    /// single result. By default the consumer waits indefinitely.
    ///
    /// Once the consumer gives up, no further tasks are queued or started.
    /// The run still waits for transforms that are already in progress
    /// before it returns [`Error::Timeout`].
    ///
    /// [`Error::Timeout`]: crate::Error::Timeout
    pub fn drain_timeout(self, timeout: Duration) -> Self {
        PipelineBuilder {
            drain_timeout: Some(timeout),
            ..self
        }
    }

    /// Builds the pipeline, rejecting a worker count of zero.
    pub fn build(self) -> Result<Pipeline> {
        Ok(Pipeline {
            pool: WorkerPool::new(self.workers)?,
            queue_capacity: self.queue_capacity,
            drain_timeout: self.drain_timeout,
        })
    }
}

impl Pipeline {
    /// Returns a builder with default settings.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Number of worker threads each run uses.
    pub fn workers(&self) -> usize {
        self.pool.workers()
    }

    /// Runs an infallible `transform` over `inputs`.
    ///
    /// `sink` receives `(position, output)` for positions 1 through the
    /// number of inputs, strictly in order.
    pub fn run<I, O, F, S>(
        &self,
        inputs: impl IntoIterator<Item = I>,
        transform: F,
        mut sink: S,
    ) -> Result<Report>
    where
        I: Send,
        O: Send,
        F: Fn(I) -> O + Sync,
        S: Sink<O> + Send,
    {
        self.try_run(
            inputs,
            |input| Ok::<O, Infallible>(transform(input)),
            move |position: usize, output: std::result::Result<O, Infallible>| match output {
                Ok(output) => sink.emit(position, output),
                Err(never) => match never {},
            },
        )
    }

    /// Runs a fallible `transform` over `inputs`.
    ///
    /// A failed transform does not stop the run. Its error is delivered to
    /// `sink` at its position like any other result and is listed in
    /// [`Report::failures`].
    ///
    /// The run fails with [`Error::WorkerPanicked`] if a worker panics, and
    /// with [`Error::Incomplete`] or [`Error::Timeout`] if the consumer could
    /// not deliver every position. If the sink panics, the panic is
    /// propagated to the caller.
    ///
    /// [`Error::WorkerPanicked`]: crate::Error::WorkerPanicked
    /// [`Error::Incomplete`]: crate::Error::Incomplete
    /// [`Error::Timeout`]: crate::Error::Timeout
    pub fn try_run<I, O, E, F, S>(
        &self,
        inputs: impl IntoIterator<Item = I>,
        transform: F,
        mut sink: S,
    ) -> Result<Report>
    where
        I: Send,
        O: Send,
        E: Display + Send,
        F: Fn(I) -> std::result::Result<O, E> + Sync,
        S: Sink<std::result::Result<O, E>> + Send,
    {
        let inputs: Vec<I> = inputs.into_iter().collect();
        let total = inputs.len();
        if total == 0 {
            log::debug!("nothing to run");
            return Ok(Report::default());
        }

        log::debug!(
            "running {} task(s) on {} worker(s)",
            total,
            self.pool.workers(),
        );
        let sequencer = Sequencer::new(total)?;
        let sequencer = &sequencer;
        let transform = &transform;
        let drain_timeout = self.drain_timeout;

        thread::scope(|scope| -> Result<Report> {
            let (sender, source) = match self.queue_capacity {
                Some(capacity) => crossbeam_channel::bounded(capacity),
                None => crossbeam_channel::unbounded(),
            };

            let workers = self.pool.spawn_scoped(scope, &source, sequencer, transform)?;
            drop(source);

            let consumer = thread::Builder::new()
                .name("seqpool-consumer".to_owned())
                .spawn_scoped(scope, move || {
                    let mut failures = Vec::new();
                    let recording = |position: usize, output: std::result::Result<O, E>| {
                        if let Err(error) = &output {
                            failures.push(Failure {
                                position,
                                message: error.to_string(),
                            });
                        }
                        sink.emit(position, output);
                    };
                    let drain = match drain_timeout {
                        Some(timeout) => sequencer.drain_in_order_timeout(recording, timeout),
                        None => sequencer.drain_in_order(recording),
                    };
                    drain.map(|drain| (drain, failures))
                })?;

            for (index, input) in inputs.into_iter().enumerate() {
                if sequencer.is_abandoned() {
                    log::debug!("consumer gave up, stopped queueing at position {}", index + 1);
                    break;
                }
                if sender.send(Task::new(index + 1, input)).is_err() {
                    log::warn!("every worker exited before all tasks were queued");
                    break;
                }
            }
            drop(sender);

            let produced = workers.join();
            sequencer.finish();
            let consumed = match consumer.join() {
                Ok(consumed) => consumed,
                Err(payload) => resume_unwind(payload),
            };

            let per_worker = produced?;
            let (drain, failures) = consumed?;
            for failure in &failures {
                log::debug!("{}", failure);
            }
            Ok(Report {
                delivered: drain.delivered,
                suspensions: drain.suspensions,
                failures,
                per_worker,
            })
        })
    }
}
