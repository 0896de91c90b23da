//! Ordered task batches with policy-defined advancement.
//!
//! A [`Batch`] owns an ordered sequence of [`BatchItem`]s and a [`Hold`]
//! representing completion of the whole sequence. Calling [`Batch::run`]
//! returns that hold immediately — never blocking — and the batch then
//! advances an index cursor according to its [`BatchPolicy`]:
//!
//! - [`Concurrent`](BatchPolicy::Concurrent) starts every item back to back
//!   and joins on all produced holds at the end: a barrier, not a chain.
//! - [`Consecutive`](BatchPolicy::Consecutive) starts item *i + 1* only
//!   after item *i*'s produced hold has released: a chain, not a barrier.
//!
//! Item start order is always program order under both policies; only the
//! synchronization between starts differs. [`Batch::cancel`] is advisory:
//! it prevents items that have not started from ever starting but never
//! interrupts in-flight work or force-releases a hold.
//!
//! There are no timeouts: an item whose hold never releases stalls a
//! consecutive batch forever and keeps a concurrent batch's own hold open
//! forever. Hard cancellation must be built into the handler's own
//! hold-release logic.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::BatchError;
use crate::hold::Hold;
use crate::task::BatchItem;
use crate::tracing_compat::{debug, error, trace};

/// Advancement policy for a [`Batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPolicy {
    /// Start every item immediately; join on all produced holds at the end.
    Concurrent,
    /// Start each item only after the previous item's hold has released.
    Consecutive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchPhase {
    Created,
    Running,
    Finished,
}

struct BatchState {
    /// A slot is `None` while its item is being run (checked out) or after
    /// a `Task` has been consumed.
    items: Vec<Option<BatchItem>>,
    cursor: usize,
    hold: Option<Hold>,
    phase: BatchPhase,
}

struct BatchCore {
    policy: BatchPolicy,
    state: Mutex<BatchState>,
}

/// An ordered collection of tasks executed under an advancement policy,
/// exposing a [`Hold`] that tracks completion of the whole sequence.
///
/// `Batch` is a cheap handle: clones share one cursor and task list, so a
/// caller can keep a handle for [`cancel`](Self::cancel) while nesting the
/// batch inside another.
///
/// # Example
///
/// ```
/// use holdgate::{Batch, BatchItem};
///
/// let batch = Batch::consecutive([
///     BatchItem::step(|| println!("unlock credential store")),
///     BatchItem::step(|| println!("start session services")),
/// ]);
/// let hold = batch.run().unwrap();
/// // Neither step produced a hold, so the sequence finished synchronously.
/// assert!(!hold.is_acquired());
/// ```
#[derive(Clone)]
pub struct Batch {
    core: Arc<BatchCore>,
}

impl Batch {
    fn new<I>(policy: BatchPolicy, items: I) -> Self
    where
        I: IntoIterator<Item = BatchItem>,
    {
        Self {
            core: Arc::new(BatchCore {
                policy,
                state: Mutex::new(BatchState {
                    items: items.into_iter().map(Some).collect(),
                    cursor: 0,
                    hold: None,
                    phase: BatchPhase::Created,
                }),
            }),
        }
    }

    /// Creates a batch that starts every item immediately and completes
    /// once every produced hold has released, in any release order.
    pub fn concurrent<I>(items: I) -> Self
    where
        I: IntoIterator<Item = BatchItem>,
    {
        Self::new(BatchPolicy::Concurrent, items)
    }

    /// Creates a batch that starts each item only after the previous item's
    /// hold (if any) has fully released.
    pub fn consecutive<I>(items: I) -> Self
    where
        I: IntoIterator<Item = BatchItem>,
    {
        Self::new(BatchPolicy::Consecutive, items)
    }

    /// Returns this batch's advancement policy.
    #[must_use]
    pub fn policy(&self) -> BatchPolicy {
        self.core.policy
    }

    /// Returns the number of items currently scheduled.
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.state.lock().items.len()
    }

    /// Returns true if no items are scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true once the batch has advanced past its last item and
    /// released its own hold's creator reference.
    ///
    /// A finished concurrent batch may still have in-flight items keeping
    /// the returned hold open; this only reports that no further item will
    /// be started.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.core.state.lock().phase == BatchPhase::Finished
    }

    /// Starts the batch and returns its completion hold immediately.
    ///
    /// The hold releases once every item has been started and every hold
    /// those items produced has released. If nothing ever kept it open, it
    /// has already released by the time `run` returns. A panic in an item's
    /// handler propagates to the caller, abandons the rest of the sequence,
    /// and leaves the hold unreleased.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::AlreadyStarted`] if `run` was already called
    /// on this batch (or any clone of it).
    pub fn run(&self) -> Result<Hold, BatchError> {
        let hold = {
            let mut state = self.core.state.lock();
            if state.phase != BatchPhase::Created {
                return Err(BatchError::AlreadyStarted);
            }
            state.phase = BatchPhase::Running;
            state.cursor = 0;
            let hold = Hold::new();
            state.hold = Some(hold.clone());
            hold
        };
        debug!(policy = ?self.core.policy, items = self.len(), "batch started");
        BatchCore::process(&self.core);
        Ok(hold)
    }

    /// Stops items that have not started from ever starting.
    ///
    /// Truncates the task list to the already-started prefix, freezing the
    /// eventual end of the sequence. In-flight items are not interrupted and
    /// no hold is force-released; a cancelled batch's hold still releases
    /// once the already-started items finish. Idempotent, callable in any
    /// phase.
    pub fn cancel(&self) {
        let mut state = self.core.state.lock();
        match state.phase {
            BatchPhase::Created => state.items.clear(),
            BatchPhase::Running | BatchPhase::Finished => {
                let keep = (state.cursor + 1).min(state.items.len());
                state.items.truncate(keep);
            }
        }
        debug!(remaining = state.items.len(), "batch cancelled");
    }
}

impl BatchCore {
    /// Runs the item under the cursor, if any, returning the hold it
    /// produced.
    ///
    /// The item is checked out of its slot so no lock is held while its
    /// handler runs; handlers may freely cancel or inspect the batch.
    fn run_current(core: &Arc<Self>) -> Option<Hold> {
        let item = {
            let mut state = core.state.lock();
            let cursor = state.cursor;
            if cursor < state.items.len() {
                state.items[cursor].take()
            } else {
                None
            }
        };
        item.and_then(|mut item| item.run())
    }

    /// Advances the cursor; past the last slot, marks the batch finished
    /// and releases the creator reference on its hold. Returns true when
    /// the batch finished.
    fn advance(core: &Arc<Self>) -> bool {
        let finished = {
            let mut state = core.state.lock();
            state.cursor += 1;
            trace!(cursor = state.cursor, "batch advanced");
            if state.cursor >= state.items.len() {
                state.phase = BatchPhase::Finished;
                state.hold.clone()
            } else {
                None
            }
        };
        match finished {
            Some(hold) => {
                debug!("batch finished");
                hold.release();
                true
            }
            None => false,
        }
    }

    /// The policy-defined processing loop.
    ///
    /// Runs items from the cursor onward. A concurrent batch joins every
    /// produced hold onto its own and keeps going; a consecutive batch
    /// parks on a produced hold and resumes from that hold's release
    /// notification.
    fn process(core: &Arc<Self>) {
        loop {
            if let Some(produced) = Self::run_current(core) {
                match core.policy {
                    BatchPolicy::Concurrent => {
                        let batch_hold = core.state.lock().hold.clone();
                        // Invariant: the creator reference is outstanding
                        // until `advance` walks off the end, so the batch
                        // hold cannot be terminal here.
                        if let Some(batch_hold) = batch_hold {
                            if batch_hold.acquire_until_after(&produced).is_err() {
                                error!("batch hold released while items were still starting");
                            }
                        }
                    }
                    BatchPolicy::Consecutive => {
                        let next = Arc::clone(core);
                        if produced.when_released(move || Self::resume(&next)) {
                            // Parked; the release notification re-enters
                            // through `resume`.
                            return;
                        }
                        // Already released; fall through and keep going.
                    }
                }
            }
            if Self::advance(core) {
                return;
            }
        }
    }

    /// Continuation entered when a consecutive batch's awaited hold
    /// releases.
    fn resume(core: &Arc<Self>) {
        if !Self::advance(core) {
            Self::process(core);
        }
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.state.lock();
        f.debug_struct("Batch")
            .field("policy", &self.core.policy)
            .field("phase", &state.phase)
            .field("cursor", &state.cursor)
            .field("items", &state.items.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    /// Records each started step by label and exposes the order.
    fn step_recorder() -> (Arc<StdMutex<Vec<&'static str>>>, impl Fn(&'static str) -> BatchItem) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        let make = move |label: &'static str| {
            let log = Arc::clone(&log2);
            BatchItem::step(move || log.lock().unwrap().push(label))
        };
        (log, make)
    }

    #[test]
    fn synchronous_batch_is_released_on_return() {
        init_test("synchronous_batch_is_released_on_return");
        let (log, step) = step_recorder();
        let batch = Batch::consecutive([step("one"), step("two")]);
        let hold = batch.run().expect("first run");
        crate::assert_with_log!(
            !hold.is_acquired(),
            "nothing kept the hold open",
            false,
            hold.is_acquired()
        );
        let order = log.lock().unwrap().clone();
        crate::assert_with_log!(
            order == ["one", "two"],
            "program order",
            ["one", "two"],
            order
        );
        crate::assert_with_log!(batch.is_finished(), "finished", true, batch.is_finished());
        crate::test_complete!("synchronous_batch_is_released_on_return");
    }

    #[test]
    fn empty_batch_finishes_immediately() {
        init_test("empty_batch_finishes_immediately");
        for batch in [Batch::concurrent([]), Batch::consecutive([])] {
            let hold = batch.run().expect("first run");
            crate::assert_with_log!(
                !hold.is_acquired(),
                "empty batch released",
                false,
                hold.is_acquired()
            );
        }
        crate::test_complete!("empty_batch_finishes_immediately");
    }

    #[test]
    fn run_twice_is_rejected() {
        init_test("run_twice_is_rejected");
        let batch = Batch::concurrent([BatchItem::step(|| {})]);
        batch.run().expect("first run");
        let err = batch.run().expect_err("second run must be rejected");
        crate::assert_with_log!(
            err == BatchError::AlreadyStarted,
            "second run rejected",
            BatchError::AlreadyStarted,
            err
        );
        crate::test_complete!("run_twice_is_rejected");
    }

    #[test]
    fn consecutive_parks_on_an_unreleased_hold() {
        init_test("consecutive_parks_on_an_unreleased_hold");
        let gate = Hold::new();
        let passed = gate.clone();
        let started = Arc::new(AtomicUsize::new(0));
        let started2 = Arc::clone(&started);

        let batch = Batch::consecutive([
            BatchItem::gated(move || passed),
            BatchItem::step(move || {
                started2.fetch_add(1, Ordering::SeqCst);
            }),
        ]);
        let hold = batch.run().expect("first run");

        let before = started.load(Ordering::SeqCst);
        crate::assert_with_log!(before == 0, "second step not started", 0usize, before);
        crate::assert_with_log!(hold.is_acquired(), "batch still open", true, hold.is_acquired());

        gate.release();
        let after = started.load(Ordering::SeqCst);
        crate::assert_with_log!(after == 1, "second step started", 1usize, after);
        crate::assert_with_log!(
            !hold.is_acquired(),
            "batch finished",
            false,
            hold.is_acquired()
        );
        crate::test_complete!("consecutive_parks_on_an_unreleased_hold");
    }

    #[test]
    fn consecutive_continues_past_a_released_hold() {
        init_test("consecutive_continues_past_a_released_hold");
        let (log, step) = step_recorder();
        let batch = Batch::consecutive([
            BatchItem::gated(|| {
                let hold = Hold::new();
                hold.release();
                hold
            }),
            step("after"),
        ]);
        let hold = batch.run().expect("first run");
        crate::assert_with_log!(
            !hold.is_acquired(),
            "batch done inline",
            false,
            hold.is_acquired()
        );
        let order = log.lock().unwrap().clone();
        crate::assert_with_log!(order == ["after"], "second step ran", ["after"], order);
        crate::test_complete!("consecutive_continues_past_a_released_hold");
    }

    #[test]
    fn concurrent_starts_everything_before_any_release() {
        init_test("concurrent_starts_everything_before_any_release");
        let gates: Vec<Hold> = (0..3).map(|_| Hold::new()).collect();
        let items: Vec<BatchItem> = gates
            .iter()
            .map(|gate| {
                let gate = gate.clone();
                BatchItem::gated(move || gate)
            })
            .collect();

        let batch = Batch::concurrent(items);
        let hold = batch.run().expect("first run");

        // All three items started (their slots were consumed) while every
        // gate is still open.
        crate::assert_with_log!(batch.is_finished(), "fan-out done", true, batch.is_finished());
        crate::assert_with_log!(hold.is_acquired(), "join open", true, hold.is_acquired());

        // Release in an arbitrary, non-program order.
        gates[1].release();
        gates[2].release();
        crate::assert_with_log!(
            hold.is_acquired(),
            "one gate still open",
            true,
            hold.is_acquired()
        );
        gates[0].release();
        crate::assert_with_log!(!hold.is_acquired(), "joined", false, hold.is_acquired());
        crate::test_complete!("concurrent_starts_everything_before_any_release");
    }

    #[test]
    fn cancel_freezes_the_unstarted_suffix() {
        init_test("cancel_freezes_the_unstarted_suffix");
        let gate = Hold::new();
        let passed = gate.clone();
        let (log, step) = step_recorder();

        let batch = Batch::consecutive([
            step("zero"),
            BatchItem::gated(move || passed),
            step("two"),
            step("three"),
            step("four"),
        ]);
        let hold = batch.run().expect("first run");

        // Items 0 and 1 have started; the batch is parked on the gate.
        batch.cancel();
        let len = batch.len();
        crate::assert_with_log!(len == 2, "suffix dropped", 2usize, len);

        gate.release();
        let order = log.lock().unwrap().clone();
        crate::assert_with_log!(order == ["zero"], "steps 2-4 never started", ["zero"], order);
        crate::assert_with_log!(
            !hold.is_acquired(),
            "cancelled batch still completes",
            false,
            hold.is_acquired()
        );
        crate::test_complete!("cancel_freezes_the_unstarted_suffix");
    }

    #[test]
    fn cancel_before_run_clears_everything() {
        init_test("cancel_before_run_clears_everything");
        let batch = Batch::consecutive([BatchItem::step(|| unreachable!("cancelled before run"))]);
        batch.cancel();
        let hold = batch.run().expect("first run");
        crate::assert_with_log!(
            !hold.is_acquired(),
            "nothing to do",
            false,
            hold.is_acquired()
        );
        crate::test_complete!("cancel_before_run_clears_everything");
    }

    #[test]
    fn cancel_is_idempotent_after_finish() {
        init_test("cancel_is_idempotent_after_finish");
        let batch = Batch::concurrent([BatchItem::step(|| {})]);
        let _hold = batch.run().expect("first run");
        batch.cancel();
        batch.cancel();
        crate::assert_with_log!(batch.is_finished(), "still finished", true, batch.is_finished());
        crate::test_complete!("cancel_is_idempotent_after_finish");
    }

    #[test]
    fn stalled_consecutive_batch_never_finishes() {
        init_test("stalled_consecutive_batch_never_finishes");
        let gate = Hold::new();
        let passed = gate.clone();
        let batch = Batch::consecutive([
            BatchItem::gated(move || passed),
            BatchItem::step(|| unreachable!("gate never releases")),
        ]);
        let hold = batch.run().expect("first run");
        crate::assert_with_log!(hold.is_acquired(), "stalled open", true, hold.is_acquired());
        crate::assert_with_log!(
            !batch.is_finished(),
            "stalled unfinished",
            false,
            batch.is_finished()
        );
        // `gate` is intentionally never released.
        crate::test_complete!("stalled_consecutive_batch_never_finishes");
    }
}
