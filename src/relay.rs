//! Synchronous publish/subscribe relay.
//!
//! [`Relay`] is the notification channel the rest of the crate is built on:
//! a minimal, ordered, synchronous dispatcher. Subscribers register a
//! handler for a signal value and receive a token; emission invokes every
//! handler subscribed to that signal at the moment the emission begins, in
//! subscription order.
//!
//! There is no priority, no queuing, and no cross-thread dispatch: `emit`
//! runs every handler on the calling thread before returning.
//!
//! # Reentrancy
//!
//! Handlers are never invoked while the relay's internal lock is held, so a
//! handler may freely subscribe, unsubscribe (including itself), or emit on
//! the same relay. Handlers added during an emission are not invoked by it;
//! handlers removed during an emission are skipped if they have not run yet.

use std::fmt;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::InvalidSubscription;
use crate::tracing_compat::trace;

/// Token identifying one subscription on a [`Relay`].
///
/// Tokens are unique for the lifetime of the relay and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Handler<A> = Box<dyn FnMut(&A) + Send>;

struct Entry<S, A> {
    id: SubscriptionId,
    signal: S,
    /// Remove the entry after its first invocation.
    once: bool,
    /// `None` while the handler is checked out by a running emission.
    handler: Option<Handler<A>>,
}

struct RelayState<S, A> {
    entries: Vec<Entry<S, A>>,
    next_id: u64,
}

/// A synchronous publish/subscribe channel keyed by signal values of type
/// `S`, delivering a borrowed argument `&A` to each handler.
///
/// # Example
///
/// ```
/// use holdgate::Relay;
///
/// let relay: Relay<&str, u32> = Relay::new();
/// let token = relay.subscribe("ready", |n| {
///     assert_eq!(*n, 7);
/// });
/// relay.emit(&"ready", &7);
/// relay.unsubscribe(token).unwrap();
/// ```
pub struct Relay<S, A> {
    state: Mutex<RelayState<S, A>>,
}

impl<S, A> Relay<S, A> {
    /// Creates an empty relay.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RelayState {
                entries: Vec::new(),
                next_id: 0,
            }),
        }
    }

    fn insert(&self, signal: S, once: bool, handler: Handler<A>) -> SubscriptionId {
        let mut state = self.state.lock();
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        state.entries.push(Entry {
            id,
            signal,
            once,
            handler: Some(handler),
        });
        id
    }

    /// Subscribes `handler` to emissions of `signal`.
    ///
    /// Handlers run synchronously inside [`emit`](Self::emit), in
    /// subscription order, until unsubscribed.
    pub fn subscribe<F>(&self, signal: S, handler: F) -> SubscriptionId
    where
        F: FnMut(&A) + Send + 'static,
    {
        self.insert(signal, false, Box::new(handler))
    }

    /// Subscribes `handler` to run for at most one emission of `signal`.
    ///
    /// The subscription is removed automatically after the handler runs; the
    /// returned token stays valid for an early [`unsubscribe`](Self::unsubscribe)
    /// until then.
    pub fn subscribe_once<F>(&self, signal: S, handler: F) -> SubscriptionId
    where
        F: FnOnce(&A) + Send + 'static,
    {
        let mut handler = Some(handler);
        self.insert(
            signal,
            true,
            Box::new(move |args| {
                if let Some(f) = handler.take() {
                    f(args);
                }
            }),
        )
    }

    /// Removes a subscription.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSubscription`] if the token is unknown or the
    /// subscription was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), InvalidSubscription> {
        let mut state = self.state.lock();
        let Some(position) = state.entries.iter().position(|e| e.id == id) else {
            return Err(InvalidSubscription);
        };
        // The handler may be checked out by a running emission; removing the
        // entry here is what prevents it from being re-armed afterwards.
        state.entries.remove(position);
        Ok(())
    }

    /// Returns the number of live subscriptions for `signal`.
    #[must_use]
    pub fn subscriber_count(&self, signal: &S) -> usize
    where
        S: PartialEq,
    {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|e| e.signal == *signal)
            .count()
    }

    /// Synchronously invokes every handler currently subscribed to `signal`.
    ///
    /// The subscriber set is snapshotted when the emission begins: handlers
    /// subscribed from inside a handler do not run until the next emission,
    /// and handlers unsubscribed mid-emission are skipped.
    pub fn emit(&self, signal: &S, args: &A)
    where
        S: PartialEq,
    {
        let snapshot: SmallVec<[SubscriptionId; 4]> = {
            let state = self.state.lock();
            state
                .entries
                .iter()
                .filter(|e| e.signal == *signal)
                .map(|e| e.id)
                .collect()
        };
        trace!(subscribers = snapshot.len(), "relay emit");

        for id in snapshot {
            // Check the handler out of its slot so it runs unlocked. An
            // entry that vanished (unsubscribed) or is empty (checked out by
            // a reentrant emission) is skipped.
            let checked_out = {
                let mut state = self.state.lock();
                state
                    .entries
                    .iter_mut()
                    .find(|e| e.id == id)
                    .and_then(|e| e.handler.take())
            };
            let Some(mut handler) = checked_out else {
                continue;
            };

            handler(args);

            let mut state = self.state.lock();
            if let Some(position) = state.entries.iter().position(|e| e.id == id) {
                if state.entries[position].once {
                    state.entries.remove(position);
                } else {
                    state.entries[position].handler = Some(handler);
                }
            }
        }
    }
}

impl<S, A> Default for Relay<S, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, A> fmt::Debug for Relay<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("subscriptions", &self.state.lock().entries.len())
            .finish()
    }
}
