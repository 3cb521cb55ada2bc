//! The minimal promise-like contract, and the bridge for foreign futures.
//!
//! A [`Thenable`] is anything that can report a settlement state, hand out
//! its terminal [`Settlement`], and call back exactly once when it settles.
//! The engine's own [`Promise`](crate::Promise) implements it, and one
//! small adapter per foreign future/stage type is all bridging takes; the
//! engine never subclasses or special-cases foreign types beyond this
//! trait.
//!
//! # Adapter contract
//!
//! An adapter for a foreign asynchronous primitive must guarantee:
//!
//! - **Exactly-once completion**: the `on_settled` callback fires exactly
//!   once, and only after the foreign primitive is fully terminal — never
//!   re-entrantly while it is still transitioning.
//! - **Unwrapped causes**: if the foreign type wraps failure causes in a
//!   composition envelope (a "completion exception" or similar), the
//!   adapter must unwrap it and report the original cause.
//! - **Stable identity**: [`Thenable::id`] returns the same value for the
//!   lifetime of the entity, so the resolution walk can detect cycles
//!   through it. Deriving it from a stable heap address is the usual
//!   choice.
//!
//! Violating the exactly-once rule cannot corrupt a target promise (the
//! settlement core enforces at-most-once on its own), but the surplus
//! completion will surface as an [`InvalidTransition`]
//! (crate::ErrorKind::InvalidTransition) wherever the adapter reports
//! errors.

use crate::error::Result;
use crate::outcome::{Settlement, State};

/// Callback invoked with the terminal settlement of a thenable.
pub type SettledCallback = Box<dyn FnOnce(&Settlement) + Send>;

/// Stable identity of a promise-like entity, used for cycle detection.
///
/// Compared by value; pointer-derived identities must remain valid for the
/// entity's lifetime. Identity equality means *same entity*, never value
/// equality of outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThenableId(pub usize);

/// The minimal promise state-query contract.
///
/// Implemented by the engine's own promises and by adapters over foreign
/// future types. All methods must be callable from any thread.
pub trait Thenable: Send + Sync {
    /// Current settlement state. Must never block.
    fn state(&self) -> State;

    /// The terminal settlement.
    ///
    /// # Errors
    ///
    /// Fails with [`PendingAccess`](crate::ErrorKind::PendingAccess) while
    /// the entity is still pending.
    fn settlement(&self) -> Result<Settlement>;

    /// Registers a callback to run once this entity settles.
    ///
    /// If the entity is already terminal the callback may run before this
    /// method returns, on the calling thread; otherwise it runs later, on
    /// whatever thread completes the entity. Either way it runs exactly
    /// once, strictly after the terminal transition is observable.
    fn on_settled(&self, callback: SettledCallback);

    /// Stable identity for cycle detection.
    fn id(&self) -> ThenableId;
}
