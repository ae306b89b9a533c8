use crate::error::{Error, Result};
use crate::sequencer::Sequencer;
use crate::task::Task;
use crossbeam_channel::Receiver;
use std::any::Any;
use std::thread::{self, Scope, ScopedJoinHandle};

/// Shared queue that workers pull tasks from.
///
/// Any number of workers may hold a clone of the receiver. Once every sender
/// has been dropped and the queued tasks are consumed, each worker sees the
/// end of the stream and exits.
pub type TaskSource<I> = Receiver<Task<I>>;

/// Fixed-size pool of worker threads.
///
/// The pool size is set once at construction. Workers pull tasks from a
/// [`TaskSource`], apply the transform, and store every outcome, successful
/// or not, into a [`Sequencer`] at the task's position.
#[derive(Copy, Clone, Debug)]
pub struct WorkerPool {
    workers: usize,
}

/// Workers started by [`WorkerPool::spawn_scoped`].
pub struct Running<'scope> {
    handles: Vec<(usize, ScopedJoinHandle<'scope, usize>)>,
}

impl WorkerPool {
    /// Makes a pool of `workers` threads.
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::NoWorkers);
        }
        Ok(WorkerPool { workers })
    }

    /// Number of worker threads this pool starts.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Body of a single worker.
    ///
    /// Consumes tasks from `source` until it is closed and drained, storing
    /// exactly one outcome per task. A transform error is stored like any
    /// other result so the consumer sees it at the right position. Returns
    /// the number of tasks this worker processed.
    ///
    /// Once the consumer has given up on `sequencer`, the worker stops
    /// pulling tasks. A transform that is already running is not
    /// interrupted.
    pub fn run<I, O, E, F>(
        worker: usize,
        source: &TaskSource<I>,
        sequencer: &Sequencer<std::result::Result<O, E>>,
        transform: &F,
    ) -> usize
    where
        F: Fn(I) -> std::result::Result<O, E>,
    {
        log::trace!("worker {} starting", worker);
        let mut processed = 0;

        for task in source {
            if sequencer.is_abandoned() {
                log::debug!("worker {} stopping, consumer gave up", worker);
                break;
            }
            let (position, input) = task.into_parts();
            let output = transform(input);
            if output.is_err() {
                log::debug!("worker {} failed position {}", worker, position);
            }
            sequencer.store(position, output);
            processed += 1;
        }

        log::trace!("worker {} exiting after {} task(s)", worker, processed);
        processed
    }

    /// Starts every worker on its own named thread inside `scope`.
    ///
    /// Workers are numbered from 1. Each one gets its own handle on `source`;
    /// the caller closes the queue by dropping every sender.
    pub fn spawn_scoped<'scope, 'env, I, O, E, F>(
        &self,
        scope: &'scope Scope<'scope, 'env>,
        source: &TaskSource<I>,
        sequencer: &'env Sequencer<std::result::Result<O, E>>,
        transform: &'env F,
    ) -> Result<Running<'scope>>
    where
        I: Send + 'scope,
        O: Send,
        E: Send,
        F: Fn(I) -> std::result::Result<O, E> + Sync,
    {
        let mut handles = Vec::with_capacity(self.workers);
        for worker in 1..=self.workers {
            let source = source.clone();
            let handle = thread::Builder::new()
                .name(format!("seqpool-worker-{}", worker))
                .spawn_scoped(scope, move || {
                    WorkerPool::run(worker, &source, sequencer, transform)
                })?;
            handles.push((worker, handle));
        }
        Ok(Running { handles })
    }
}

impl<'scope> Running<'scope> {
    /// Waits for every worker to exit.
    ///
    /// Returns the number of tasks each worker processed, indexed by worker
    /// number minus one. All workers are joined even if some of them
    /// panicked; the first panic is then reported as
    /// [`Error::WorkerPanicked`].
    pub fn join(self) -> Result<Vec<usize>> {
        let mut processed = Vec::with_capacity(self.handles.len());
        let mut panicked = None;

        for (worker, handle) in self.handles {
            match handle.join() {
                Ok(count) => processed.push(count),
                Err(payload) => {
                    let message = panic_message(&*payload);
                    log::error!("worker {} panicked: {}", worker, message);
                    processed.push(0);
                    if panicked.is_none() {
                        panicked = Some(Error::WorkerPanicked { worker, message });
                    }
                }
            }
        }

        match panicked {
            Some(error) => Err(error),
            None => Ok(processed),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_owned()
    }
}
