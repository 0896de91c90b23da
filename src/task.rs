//! Deferred units of work.
//!
//! A [`Task`] is a one-shot, scope-bound unit of work: the source
//! environment's implicit receiver maps here to whatever state the handler
//! closure captures. Running a task returns `Some(hold)` when the handler
//! started asynchronous work it will finish later, or `None` when there is
//! nothing to wait for.
//!
//! [`BatchItem`] is the tagged union of everything a [`Batch`] can contain:
//! a task or a nested batch. Both are driven through the same one-method
//! `run` seam, which is what makes batches nest transparently.

use std::fmt;

use crate::batch::Batch;
use crate::hold::Hold;
use crate::tracing_compat::warn;

type TaskHandler = Box<dyn FnOnce() -> Option<Hold> + Send>;

/// A deferred, one-shot unit of work that may return a [`Hold`] to signal
/// asynchronous completion.
///
/// A handler performing asynchronous work constructs its own hold, returns
/// it, and releases it exactly once when the work completes:
///
/// ```
/// use holdgate::{Hold, Task};
///
/// let mut task = Task::new(|| {
///     let hold = Hold::new();
///     let done = hold.clone();
///     // hand `done` to whatever asynchronous facility finishes the work;
///     // it must call `done.release()` exactly once.
///     done.release();
///     Some(hold)
/// });
/// let hold = task.run().expect("handler returned a hold");
/// assert!(!hold.is_acquired());
/// ```
pub struct Task {
    handler: Option<TaskHandler>,
}

impl Task {
    /// Creates a task from a handler.
    pub fn new<F>(handler: F) -> Self
    where
        F: FnOnce() -> Option<Hold> + Send + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
        }
    }

    /// Creates a task with no handler; running it reports no result.
    #[must_use]
    pub const fn noop() -> Self {
        Self { handler: None }
    }

    /// Runs the handler, consuming it.
    ///
    /// Returns the handler's result; `None` is the "no result" sentinel,
    /// produced when the task has no handler or has already run. A panic in
    /// the handler propagates to the caller unchanged; the task performs no
    /// recovery.
    pub fn run(&mut self) -> Option<Hold> {
        self.handler.take().and_then(|handler| handler())
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

/// One element of a [`Batch`]: a task or a nested batch.
///
/// The variants share a single run seam, so an enclosing batch treats a
/// nested batch exactly like a task whose returned hold is the nested
/// batch's own completion gate.
#[derive(Debug)]
pub enum BatchItem {
    /// A deferred unit of work.
    Task(Task),
    /// A nested batch, awaited through its own hold.
    Batch(Batch),
}

impl BatchItem {
    /// A fire-and-forget step: runs to completion synchronously and holds
    /// nothing open.
    pub fn step<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::Task(Task::new(move || {
            f();
            None
        }))
    }

    /// An asynchronous step: the handler returns the [`Hold`] it will
    /// release when its work completes.
    pub fn gated<F>(f: F) -> Self
    where
        F: FnOnce() -> Hold + Send + 'static,
    {
        Self::Task(Task::new(move || Some(f())))
    }

    /// Runs the element, returning the hold it produced, if any.
    pub(crate) fn run(&mut self) -> Option<Hold> {
        match self {
            Self::Task(task) => task.run(),
            Self::Batch(batch) => match batch.run() {
                Ok(hold) => Some(hold),
                Err(_) => {
                    warn!("nested batch already started; treated as no result");
                    None
                }
            },
        }
    }
}

impl From<Task> for BatchItem {
    fn from(task: Task) -> Self {
        Self::Task(task)
    }
}

impl From<Batch> for BatchItem {
    fn from(batch: Batch) -> Self {
        Self::Batch(batch)
    }
}
