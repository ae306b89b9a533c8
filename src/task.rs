use std::fmt::{self, Debug};

/// Unit of work handed to a worker pool.
///
/// A task pairs an input value with its position, the 1-based index of the
/// input in the original sequence. The position is fixed at creation and
/// determines where the computed result lands in the delivered output,
/// regardless of which worker computes it or when.
///
/// ```
/// use seqpool::Task;
///
/// let task = Task::new(3, "three");
/// assert_eq!(task.position, 3);
/// assert_eq!(task.into_input(), "three");
/// ```
#[readonly::make]
pub struct Task<I> {
    /// Position of this task in the original input order, starting at 1.
    ///
    /// This field is read-only; writing to its value will not compile.
    #[readonly]
    pub position: usize,

    input: I,
}

impl<I> Task<I> {
    /// Creates a task for the input at `position`.
    ///
    /// # Panics
    ///
    /// Panics if `position` is 0. Positions are 1-based.
    pub fn new(position: usize, input: I) -> Self {
        assert!(position >= 1, "task positions start at 1");
        Task { position, input }
    }

    /// Borrows the input.
    pub fn input(&self) -> &I {
        &self.input
    }

    /// Takes ownership of the input, discarding the position.
    pub fn into_input(self) -> I {
        self.input
    }

    /// Splits the task into its position and input.
    pub fn into_parts(self) -> (usize, I) {
        (self.position, self.input)
    }
}

impl<I: Debug> Debug for Task<I> {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter
            .debug_tuple("Task")
            .field(&self.position)
            .field(&self.input)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_keep_position() {
        let task = Task::new(7, vec![1, 2]);
        assert_eq!(task.position, 7);
        assert_eq!(task.input(), &[1, 2]);
        assert_eq!(format!("{:?}", task), "Task(7, [1, 2])");
        assert_eq!(task.into_parts(), (7, vec![1, 2]));
    }

    #[test]
    #[should_panic(expected = "task positions start at 1")]
    fn position_zero_panics() {
        Task::new(0, ());
    }
}
