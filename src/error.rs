//! Error types for holdgate.
//!
//! Errors are explicit and typed, never stringly. The surface is small by
//! design: misuse of a gate's reference count, a stale subscription token,
//! and restarting a batch are the only failure modes the primitives
//! themselves can detect. Everything a handler does wrong propagates
//! unchecked through the caller (see [`crate::batch`]).

use thiserror::Error;

/// Error returned by [`Hold::acquire`](crate::Hold::acquire) when the gate
/// has already fully released.
///
/// A [`Hold`](crate::Hold) whose acquisition count has reached zero is
/// terminal: its release notification has fired and can never fire again,
/// so handing out new acquisitions would be a promise the gate cannot keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("hold already fully released")]
pub struct AlreadyReleasedError;

/// Error returned by unsubscribe operations for a token that is unknown
/// or was already removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown or already removed subscription")]
pub struct InvalidSubscription;

/// Error returned by [`Batch::run`](crate::Batch::run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BatchError {
    /// `run()` was called on a batch that has already started.
    ///
    /// A batch drives one cursor over one task list; re-running it would
    /// create a second cursor racing over the same (consumed) tasks.
    #[error("batch has already started")]
    AlreadyStarted,
}
