use crate::error::{Error, Result};
use crate::sink::Sink;
use crate::sync::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::thread;
use std::time::{Duration, Instant};

/// Ordered result buffer.
///
/// Any number of producers [`store`] results tagged with their position, in
/// whatever order they finish. A single consumer calling [`drain_in_order`]
/// receives them strictly by position from 1 through `total`, each exactly
/// once. Results that arrive ahead of their turn are buffered until every
/// lower position has been delivered.
///
/// [`store`]: Sequencer::store
/// [`drain_in_order`]: Sequencer::drain_in_order
///
/// # Skeleton
///
/// This example stores 30 results from a pool of 10 threads while the main
/// thread drains them. The output is guaranteed to appear in order by
/// position from 1 through 30.
///
/// ```
/// use seqpool::Sequencer;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// fn main() -> seqpool::Result<()> {
///     let sequencer = Sequencer::new(30)?;
///     let next = AtomicUsize::new(1);
///
///     let mut lines = Vec::new();
///     rayon::scope(|scope| {
///         // Launch 10 producer threads.
///         for _ in 0..10 {
///             scope.spawn(|_| producer(&sequencer, &next));
///         }
///     });
///     sequencer.finish();
///
///     sequencer.drain_in_order(|position: usize, line: String| {
///         assert_eq!(lines.len() + 1, position);
///         lines.push(line);
///     })?;
///     assert_eq!(lines[29], "hello from task #30");
///     Ok(())
/// }
///
/// fn producer(sequencer: &Sequencer<String>, next: &AtomicUsize) {
///     loop {
///         let position = next.fetch_add(1, Ordering::Relaxed);
///         if position > 30 {
///             return;
///         }
///         sequencer.store(position, format!("hello from task #{}", position));
///     }
/// }
/// ```
///
/// # Termination
///
/// The consumer suspends whenever the next position has not arrived yet. A
/// plain store only says "something changed", so the consumer always
/// re-checks before suspending again. Once the producers are done,
/// [`finish`] wakes the consumer for the last time: if its position is still
/// absent the drain fails with [`Error::Incomplete`] instead of waiting
/// forever.
///
/// [`finish`]: Sequencer::finish
///
/// ```
/// use seqpool::{Error, Sequencer};
///
/// let sequencer = Sequencer::new(3).unwrap();
/// sequencer.store(1, 'a');
/// sequencer.store(3, 'c');
/// sequencer.finish();
///
/// let mut out: Vec<(usize, char)> = Vec::new();
/// match sequencer.drain_in_order(&mut out) {
///     Err(Error::Incomplete { next, missing }) => {
///         assert_eq!(next, 2);
///         assert_eq!(missing, [2]);
///     }
///     other => panic!("unexpected {:?}", other),
/// }
/// assert_eq!(out, [(1, 'a')]);
/// ```
pub struct Sequencer<T> {
    state: Mutex<State<T>>,
    changed: Condvar,
}

#[cfg(test)]
struct _Test
where
    Sequencer<String>: Send + Sync;

struct State<T> {
    /// Completed but undelivered results. Never holds a position below
    /// `cursor`.
    pending: HashMap<usize, T>,
    /// Next position to deliver.
    cursor: usize,
    total: usize,
    producers_done: bool,
    draining: bool,
    /// Set while the consumer is suspended.
    waiting: bool,
    /// Set when the last drain gave up before delivering everything.
    abandoned: bool,
}

/// Bookkeeping returned by a successful drain.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Number of results handed to the sink.
    pub delivered: usize,
    /// Number of times the consumer suspended waiting for its next position.
    pub suspensions: usize,
}

/// Releases the single-consumer claim when a drain ends, however it ends.
struct Draining<'a, T> {
    sequencer: &'a Sequencer<T>,
    /// Results taken out of the buffer but not yet handed to the sink.
    burst: VecDeque<(usize, T)>,
}

impl<T> Drop for Draining<'_, T> {
    fn drop(&mut self) {
        let state = &mut *self.sequencer.state.lock();

        // Only a panicking sink leaves anything behind.
        if let Some(&(position, _)) = self.burst.front() {
            state.cursor = position;
        }
        for (position, value) in self.burst.drain(..) {
            state.pending.insert(position, value);
        }

        if thread::panicking() {
            log::warn!("sink panicked after position {}", state.cursor - 1);
            state.abandoned = true;
        }
        state.waiting = false;
        state.draining = false;
    }
}

impl<T> Sequencer<T> {
    /// Makes a sequencer that expects results for positions `1..=total`.
    pub fn new(total: usize) -> Result<Self> {
        if total == 0 {
            return Err(Error::EmptySequence);
        }
        Ok(Sequencer {
            state: Mutex::new(State {
                pending: HashMap::new(),
                cursor: 1,
                total,
                producers_done: false,
                draining: false,
                waiting: false,
                abandoned: false,
            }),
            changed: Condvar::new(),
        })
    }

    /// Buffers the result for `position` and wakes the consumer.
    ///
    /// Safe to call concurrently from any number of threads.
    ///
    /// # Panics
    ///
    /// Each position must be stored exactly once. Panics if `position` is
    /// outside `1..=total`, has already been delivered, or is already
    /// buffered; any of these means tasks were dispatched incorrectly.
    pub fn store(&self, position: usize, value: T) {
        let state = &mut *self.state.lock();

        assert!(
            position >= 1 && position <= state.total,
            "position {} is outside 1..={}",
            position,
            state.total,
        );
        assert!(
            position >= state.cursor,
            "position {} was already delivered",
            position,
        );
        assert!(
            !state.pending.contains_key(&position),
            "position {} was stored twice",
            position,
        );

        state.pending.insert(position, value);
        log::trace!("stored position {}", position);
        self.changed.notify_all();
    }

    /// Signals that no more stores will happen.
    ///
    /// A consumer that is waiting on a position that has not arrived is woken
    /// and fails with [`Error::Incomplete`]. Calling this more than once has
    /// no further effect.
    pub fn finish(&self) {
        self.state.lock().producers_done = true;
        self.changed.notify_all();
    }

    /// Delivers every result to `sink` in position order, blocking as needed.
    ///
    /// Returns once position `total` has been delivered, or with
    /// [`Error::Incomplete`] if [`finish`] was called while the next position
    /// was still missing. Only one drain may run at a time; a concurrent
    /// second call returns [`Error::AlreadyDraining`].
    ///
    /// The sink is called without the internal lock held, so producers keep
    /// storing while output is being written.
    ///
    /// If the sink panics, the result it was handed counts as delivered.
    /// Results that were ready behind it go back into the buffer, so a later
    /// drain picks up exactly where this one stopped.
    ///
    /// [`finish`]: Sequencer::finish
    pub fn drain_in_order<S>(&self, sink: S) -> Result<DrainStats>
    where
        S: Sink<T>,
    {
        self.drain(sink, None)
    }

    /// Like [`drain_in_order`], but fails with [`Error::Timeout`] if no
    /// result becomes deliverable for `timeout`.
    ///
    /// The deadline restarts every time a result is delivered, so a long
    /// sequence of steadily arriving results never times out. After a
    /// timeout, [`is_abandoned`] reports true until the next drain starts.
    ///
    /// [`is_abandoned`]: Sequencer::is_abandoned
    /// [`drain_in_order`]: Sequencer::drain_in_order
    pub fn drain_in_order_timeout<S>(&self, sink: S, timeout: Duration) -> Result<DrainStats>
    where
        S: Sink<T>,
    {
        self.drain(sink, Some(timeout))
    }

    fn drain<S>(&self, mut sink: S, timeout: Option<Duration>) -> Result<DrainStats>
    where
        S: Sink<T>,
    {
        let mut stats = DrainStats::default();

        {
            let mut state = self.state.lock();
            if state.draining {
                return Err(Error::AlreadyDraining);
            }
            state.draining = true;
            state.abandoned = false;
        }

        // Declared before the state guard so the lock is released first on
        // every exit path, unwinding included.
        let mut draining = Draining {
            sequencer: self,
            burst: VecDeque::new(),
        };
        let mut state = self.state.lock();
        let mut progress = Instant::now();

        loop {
            state.take_ready(&mut draining.burst);

            if !draining.burst.is_empty() {
                log::debug!("delivering burst of {} result(s)", draining.burst.len());
                drop(state);
                while let Some((position, value)) = draining.burst.pop_front() {
                    stats.delivered += 1;
                    sink.emit(position, value);
                }
                progress = Instant::now();
                state = self.state.lock();
                continue;
            }

            if state.cursor > state.total {
                return Ok(stats);
            }

            if state.producers_done {
                let missing = state.missing();
                log::warn!(
                    "producers finished but position {} never arrived ({} missing)",
                    state.cursor,
                    missing.len(),
                );
                state.abandoned = true;
                return Err(Error::Incomplete {
                    next: state.cursor,
                    missing,
                });
            }

            let remaining = match timeout {
                None => None,
                Some(timeout) => {
                    let waited = progress.elapsed();
                    if waited >= timeout {
                        log::warn!("gave up waiting for position {}", state.cursor);
                        state.abandoned = true;
                        return Err(Error::Timeout {
                            next: state.cursor,
                            waited,
                        });
                    }
                    Some(timeout - waited)
                }
            };

            stats.suspensions += 1;
            log::debug!("waiting for position {}", state.cursor);
            state.waiting = true;
            state = match remaining {
                None => self.changed.wait(state),
                Some(remaining) => self.changed.wait_timeout(state, remaining),
            };
            state.waiting = false;
        }
    }

    /// Number of positions this sequencer expects.
    pub fn total(&self) -> usize {
        self.state.lock().total
    }

    /// Number of results taken out of the buffer for delivery.
    pub fn delivered(&self) -> usize {
        self.state.lock().cursor - 1
    }

    /// Number of results stored but not yet delivered.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Whether a consumer is currently suspended waiting for its next
    /// position.
    ///
    /// A supervisor can poll this together with [`delivered`] to tell a
    /// consumer that is blocked on a slow producer apart from one that is
    /// busy writing output, for example before deciding to call [`finish`].
    ///
    /// [`delivered`]: Sequencer::delivered
    /// [`finish`]: Sequencer::finish
    pub fn is_waiting(&self) -> bool {
        self.state.lock().waiting
    }

    /// Whether the most recent drain gave up before delivering every
    /// position, by timing out, by finding a result missing, or because its
    /// sink panicked. Producers may check this to skip work nobody will
    /// consume.
    pub fn is_abandoned(&self) -> bool {
        self.state.lock().abandoned
    }

    /// Whether every position has been delivered.
    pub fn is_complete(&self) -> bool {
        let state = self.state.lock();
        state.cursor > state.total
    }
}

impl<T> State<T> {
    /// Moves the contiguous run of ready results starting at `cursor` into
    /// `burst`.
    fn take_ready(&mut self, burst: &mut VecDeque<(usize, T)>) {
        while let Some(value) = self.pending.remove(&self.cursor) {
            burst.push_back((self.cursor, value));
            self.cursor += 1;
        }
    }

    fn missing(&self) -> Vec<usize> {
        (self.cursor..=self.total)
            .filter(|position| !self.pending.contains_key(position))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};

    #[test]
    fn rejects_empty_sequence() {
        assert!(matches!(
            Sequencer::<u8>::new(0),
            Err(Error::EmptySequence)
        ));
    }

    #[test]
    fn reorders_out_of_order_stores() {
        let sequencer = Sequencer::new(5).unwrap();
        for position in [4, 2, 5, 1, 3] {
            sequencer.store(position, position * 10);
        }

        let mut out: Vec<(usize, usize)> = Vec::new();
        let stats = sequencer.drain_in_order(&mut out).unwrap();
        assert_eq!(out, [(1, 10), (2, 20), (3, 30), (4, 40), (5, 50)]);
        assert_eq!(stats.delivered, 5);
        assert!(sequencer.is_complete());
        assert_eq!(sequencer.pending(), 0);
    }

    #[test]
    fn stored_before_drain_needs_no_wait() {
        let sequencer = Sequencer::new(4).unwrap();
        for position in 1..=4 {
            sequencer.store(position, ());
        }

        let stats = sequencer.drain_in_order(|_: usize, ()| {}).unwrap();
        assert_eq!(
            stats,
            DrainStats {
                delivered: 4,
                suspensions: 0,
            },
        );
    }

    #[test]
    fn burst_is_delivered_after_single_wake() {
        let sequencer = Sequencer::new(5).unwrap();
        for position in 2..=5 {
            sequencer.store(position, position);
        }

        thread::scope(|scope| {
            let consumer = scope.spawn(|| {
                let mut out: Vec<(usize, usize)> = Vec::new();
                let stats = sequencer.drain_in_order(&mut out)?;
                Ok::<_, Error>((out, stats))
            });

            while !sequencer.is_waiting() {
                thread::yield_now();
            }
            sequencer.store(1, 1);

            let (out, stats) = consumer.join().unwrap().unwrap();
            assert_eq!(out, [(1, 1), (2, 2), (3, 3), (4, 4), (5, 5)]);
            assert_eq!(stats.delivered, 5);
            assert_eq!(stats.suspensions, 1);
        });
    }

    #[test]
    fn finish_reports_every_missing_position() {
        let sequencer = Sequencer::new(6).unwrap();
        sequencer.store(1, ());
        sequencer.store(3, ());
        sequencer.store(6, ());

        thread::scope(|scope| {
            let consumer = scope.spawn(|| sequencer.drain_in_order(|_: usize, ()| {}));
            sequencer.finish();
            match consumer.join().unwrap() {
                Err(Error::Incomplete { next, missing }) => {
                    assert_eq!(next, 2);
                    assert_eq!(missing, [2, 4, 5]);
                }
                other => panic!("unexpected {:?}", other),
            }
        });
        assert_eq!(sequencer.delivered(), 1);
    }

    #[test]
    fn timeout_aborts_stuck_drain() {
        let sequencer = Sequencer::new(2).unwrap();
        sequencer.store(1, "one");

        let mut out: Vec<(usize, &str)> = Vec::new();
        let result = sequencer.drain_in_order_timeout(&mut out, Duration::from_millis(20));
        match result {
            Err(Error::Timeout { next, waited }) => {
                assert_eq!(next, 2);
                assert!(waited >= Duration::from_millis(20));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(out, [(1, "one")]);
    }

    #[test]
    fn drain_resumes_after_timeout() {
        let sequencer = Sequencer::new(2).unwrap();
        sequencer.store(1, 'x');
        let mut out: Vec<(usize, char)> = Vec::new();
        assert!(sequencer
            .drain_in_order_timeout(&mut out, Duration::from_millis(1))
            .is_err());

        sequencer.store(2, 'y');
        sequencer.drain_in_order(&mut out).unwrap();
        assert_eq!(out, [(1, 'x'), (2, 'y')]);
    }

    #[test]
    fn timeout_restarts_after_each_delivery() {
        let sequencer = Sequencer::new(5).unwrap();

        thread::scope(|scope| {
            let consumer = scope.spawn(|| {
                sequencer.drain_in_order_timeout(|_: usize, ()| {}, Duration::from_millis(200))
            });
            // 5 × 60ms is well past the timeout, but no single gap is.
            for position in 1..=5 {
                thread::sleep(Duration::from_millis(60));
                sequencer.store(position, ());
            }
            let stats = consumer.join().unwrap().unwrap();
            assert_eq!(stats.delivered, 5);
        });
        assert!(!sequencer.is_abandoned());
    }

    #[test]
    fn timeout_marks_sequencer_abandoned() {
        let sequencer = Sequencer::new(2).unwrap();
        sequencer.store(1, ());
        assert!(sequencer
            .drain_in_order_timeout(|_: usize, ()| {}, Duration::from_millis(5))
            .is_err());
        assert!(sequencer.is_abandoned());

        sequencer.store(2, ());
        sequencer.drain_in_order(|_: usize, ()| {}).unwrap();
        assert!(!sequencer.is_abandoned());
    }

    #[test]
    fn panicking_sink_loses_nothing_behind_it() {
        let sequencer = Sequencer::new(3).unwrap();
        sequencer.store(1, "one");
        sequencer.store(2, "two");

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            sequencer.drain_in_order(|_: usize, value: &str| {
                if value == "one" {
                    panic!("sink failed");
                }
            })
        }));
        assert!(result.is_err());
        assert_eq!(sequencer.delivered(), 1);
        assert_eq!(sequencer.pending(), 1);
        assert!(sequencer.is_abandoned());

        sequencer.store(3, "three");
        let mut out: Vec<(usize, &str)> = Vec::new();
        let stats = sequencer.drain_in_order(&mut out).unwrap();
        assert_eq!(out, [(2, "two"), (3, "three")]);
        assert_eq!(stats.delivered, 2);
    }

    #[test]
    fn second_consumer_is_rejected() {
        let sequencer = Sequencer::new(1).unwrap();

        thread::scope(|scope| {
            let consumer = scope.spawn(|| sequencer.drain_in_order(|_: usize, ()| {}));
            while !sequencer.state.lock().draining {
                thread::yield_now();
            }
            assert!(matches!(
                sequencer.drain_in_order(|_: usize, ()| {}),
                Err(Error::AlreadyDraining)
            ));
            sequencer.store(1, ());
            consumer.join().unwrap().unwrap();
        });
    }

    #[test]
    #[should_panic(expected = "stored twice")]
    fn duplicate_pending_store_panics() {
        let sequencer = Sequencer::new(3).unwrap();
        sequencer.store(2, ());
        sequencer.store(2, ());
    }

    #[test]
    #[should_panic(expected = "already delivered")]
    fn store_after_delivery_panics() {
        let sequencer = Sequencer::new(2).unwrap();
        sequencer.store(1, ());
        let _ = sequencer.drain_in_order_timeout(|_: usize, ()| {}, Duration::from_millis(1));
        sequencer.store(1, ());
    }

    #[test]
    #[should_panic(expected = "outside 1..=2")]
    fn store_out_of_range_panics() {
        let sequencer = Sequencer::new(2).unwrap();
        sequencer.store(3, ());
    }
}
