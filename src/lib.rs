//! Holdgate: cooperative task batches sequenced by reference-counted
//! completion gates.
//!
//! # Overview
//!
//! Holdgate is a small coordination primitive for multi-step, partially
//! asynchronous initialization work — the kind of session-startup sequencing
//! where some steps must wait on external processes before the next step may
//! begin. It deliberately is not a future/promise library: there is no value
//! propagation, no chained transformations, no timeouts, and no executor.
//! Completion is a notification, and keeping work "open" is an explicit,
//! counted act.
//!
//! # Core pieces
//!
//! - [`Relay`]: minimal synchronous publish/subscribe, the notification
//!   channel everything else builds on
//! - [`Hold`]: a manually reference-counted completion gate that notifies
//!   exactly once when its last acquisition is released
//! - [`Task`]: a deferred unit of work that may return a `Hold` to signal
//!   asynchronous completion
//! - [`Batch`]: an ordered sequence of tasks advanced under a
//!   [`BatchPolicy`] — strict sequencing or fan-out-then-join — exposing a
//!   `Hold` for the whole sequence
//!
//! # Example
//!
//! ```
//! use holdgate::{Batch, BatchItem, Hold};
//!
//! // "Start networking and audio together; show the desktop once both
//! // report ready."
//! let network_ready = Hold::new();
//! let audio_ready = Hold::new();
//!
//! let services = Batch::concurrent([
//!     BatchItem::gated({
//!         let hold = network_ready.clone();
//!         move || hold // released later by the network callback
//!     }),
//!     BatchItem::gated({
//!         let hold = audio_ready.clone();
//!         move || hold
//!     }),
//! ]);
//!
//! let startup = Batch::consecutive([
//!     BatchItem::step(|| { /* unlock credential store */ }),
//!     services.into(),
//!     BatchItem::step(|| { /* show desktop */ }),
//! ]);
//!
//! let done = startup.run().unwrap();
//! assert!(done.is_acquired());
//!
//! network_ready.release();
//! audio_ready.release();
//! assert!(!done.is_acquired()); // every step finished
//! ```
//!
//! # Scheduling model
//!
//! Single-threaded and cooperative at heart: "concurrency" means
//! interleaving across turns of a host event loop, and nothing here blocks.
//! The implementation is nonetheless thread-safe — holds may be released
//! from any thread, and the decrement-and-notify step is atomic so the
//! release notification fires exactly once even under racing releases.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

pub mod batch;
pub mod error;
pub mod hold;
pub mod relay;
pub mod task;
pub mod tracing_compat;

#[cfg(test)]
pub mod test_utils;

pub use batch::{Batch, BatchPolicy};
pub use error::{AlreadyReleasedError, BatchError, InvalidSubscription};
pub use hold::Hold;
pub use relay::{Relay, SubscriptionId};
pub use task::{BatchItem, Task};
