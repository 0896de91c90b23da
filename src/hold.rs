//! Reference-counted completion gate.
//!
//! A [`Hold`] is a manually reference-counted gate that fires a single
//! release notification when its last outstanding acquisition is released.
//! It is the completion currency of this crate: a task that starts
//! asynchronous work returns a `Hold`, releases it exactly once when the
//! work finishes, and anyone holding a clone can subscribe to that moment.
//!
//! Reference counting, rather than a one-shot future, lets one gate be kept
//! open by a dynamically discovered number of waiters: a batch does not know
//! in advance how many of its tasks will produce holds, so each discovered
//! hold contributes exactly one matching acquire/release pair via
//! [`Hold::acquire_until_after`].
//!
//! # Terminal state
//!
//! The count starts at 1 (the creator's implicit reference) and can only
//! fall to zero once. After that the gate is permanently released:
//! [`Hold::acquire`] fails, further [`Hold::release`] calls are no-ops, and
//! the release notification never fires again.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{AlreadyReleasedError, InvalidSubscription};
use crate::relay::{Relay, SubscriptionId};
use crate::tracing_compat::{trace, warn};

/// The single notification a hold can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HoldEvent {
    Release,
}

struct HoldInner {
    /// Outstanding acquisitions. Zero is terminal.
    count: Mutex<u64>,
    relay: Relay<HoldEvent, ()>,
}

/// A reference-counted completion gate that notifies exactly once when its
/// last outstanding acquisition is released.
///
/// `Hold` is a cheap handle: clones share one acquisition counter and one
/// subscriber list.
///
/// # Example
///
/// ```
/// use holdgate::Hold;
///
/// let hold = Hold::new();
/// hold.on_release(|| println!("all work finished"));
///
/// hold.acquire().unwrap(); // a second party keeps the gate open
/// hold.release();          // first party done; still acquired
/// hold.release();          // second party done; notification fires
/// assert!(!hold.is_acquired());
/// ```
#[derive(Clone)]
pub struct Hold {
    inner: Arc<HoldInner>,
}

impl Hold {
    /// Creates a new hold with one outstanding acquisition (the creator's).
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HoldInner {
                count: Mutex::new(1),
                relay: Relay::new(),
            }),
        }
    }

    /// Returns the number of outstanding acquisitions.
    #[must_use]
    pub fn acquisitions(&self) -> u64 {
        *self.inner.count.lock()
    }

    /// Returns true while at least one acquisition is outstanding.
    #[must_use]
    pub fn is_acquired(&self) -> bool {
        self.acquisitions() > 0
    }

    /// Adds one acquisition to the gate.
    ///
    /// # Errors
    ///
    /// Returns [`AlreadyReleasedError`] if the gate has already fully
    /// released; a terminal gate cannot be re-opened.
    pub fn acquire(&self) -> Result<(), AlreadyReleasedError> {
        let mut count = self.inner.count.lock();
        if *count == 0 {
            return Err(AlreadyReleasedError);
        }
        *count += 1;
        trace!(acquisitions = *count, "hold acquired");
        Ok(())
    }

    /// Releases one acquisition.
    ///
    /// On the transition to zero the release notification fires — exactly
    /// once, ever, regardless of how many subscribers exist or when they
    /// subscribed. Releasing an already-released hold is a no-op.
    pub fn release(&self) {
        let fire = {
            let mut count = self.inner.count.lock();
            if *count == 0 {
                warn!("release on an already released hold ignored");
                return;
            }
            *count -= 1;
            trace!(acquisitions = *count, "hold released");
            *count == 0
        };
        // Emit outside the count lock so handlers can acquire other holds,
        // run batch continuations, or inspect this hold freely.
        if fire {
            self.inner.relay.emit(&HoldEvent::Release, &());
        }
    }

    /// Subscribes `handler` to this hold's release notification.
    ///
    /// The notification fires at most once; if the hold has already
    /// released, the handler will never run. Callers that need to act
    /// immediately on an already-released hold should use
    /// [`when_released`](Self::when_released) instead.
    pub fn on_release<F>(&self, handler: F) -> SubscriptionId
    where
        F: FnMut() + Send + 'static,
    {
        let mut handler = handler;
        self.inner
            .relay
            .subscribe(HoldEvent::Release, move |()| handler())
    }

    /// Removes a subscription made with [`on_release`](Self::on_release).
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSubscription`] for unknown or already-removed
    /// tokens.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), InvalidSubscription> {
        self.inner.relay.unsubscribe(id)
    }

    /// Registers `f` to run exactly once when this hold releases.
    ///
    /// Returns `false` without registering if the hold has already released,
    /// in which case the caller should proceed inline. The check and the
    /// registration are atomic with respect to a concurrent final
    /// [`release`](Self::release): either `f` is registered before the
    /// notification fires, or this method reports the hold as released.
    pub fn when_released<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        // Holding the count lock across the registration orders it before
        // any concurrent 1 -> 0 transition, whose emission starts only
        // after taking (and dropping) this lock.
        let count = self.inner.count.lock();
        if *count == 0 {
            return false;
        }
        self.inner
            .relay
            .subscribe_once(HoldEvent::Release, move |()| f());
        drop(count);
        true
    }

    /// Keeps this hold open until `other` has released.
    ///
    /// If `other` is already released this is a no-op. Otherwise this hold
    /// gains one acquisition, matched by exactly one automatic
    /// [`release`](Self::release) when `other`'s notification fires.
    ///
    /// Waiting on itself is ignored: the matching release could then never
    /// happen and the gate would be wedged open.
    ///
    /// # Errors
    ///
    /// Returns [`AlreadyReleasedError`] if this hold has already fully
    /// released.
    pub fn acquire_until_after(&self, other: &Self) -> Result<(), AlreadyReleasedError> {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            warn!("hold asked to wait on itself; ignored");
            return Ok(());
        }
        let count = other.inner.count.lock();
        if *count == 0 {
            return Ok(());
        }
        self.acquire()?;
        let this = self.clone();
        other
            .inner
            .relay
            .subscribe_once(HoldEvent::Release, move |()| this.release());
        drop(count);
        Ok(())
    }
}

impl Default for Hold {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Hold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hold")
            .field("acquisitions", &self.acquisitions())
            .finish()
    }
}
