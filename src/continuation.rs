//! Continuation records: the deferred reactions of the settlement graph.
//!
//! Every chaining call builds one [`ContinuationRecord`] against a parent
//! promise. Records queue while the parent is pending and are drained in
//! insertion order at the moment of settlement; each drained record is then
//! *independently* scheduled on the backend, so nothing here runs inline on
//! the settling thread and no ordering holds between sibling reactions.
//!
//! # Reaction shapes
//!
//! - [`Reaction::Map`]: the common shape. The handler receives the parent
//!   settlement and returns a candidate (or an error standing in for a
//!   throw), which resolves the derived promise.
//! - [`Reaction::Emit`]: the handler pushes at most one candidate through a
//!   one-shot [`Emitter`] instead of returning it. Never emitting fulfills
//!   the derived promise with the absence value; a panic after an emit is
//!   discarded — the emitted candidate stands.
//!
//! A record with no reaction at all is an internal pass-through link: the
//! derived promise simply adopts the parent settlement. Combinator plumbing
//! and pending-candidate adoption both ride on this.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::backend::Backend;
use crate::outcome::{Candidate, Category, Cause, Settlement, State, Value};
use crate::resolve::resolve;
use crate::thenable::SettledCallback;
use crate::Promise;

/// Which settlement states trigger a record's reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    /// React to fulfillment only; rejections pass through.
    OnFulfilled,
    /// React to rejection only; fulfillments pass through.
    OnRejected,
    /// React to either terminal state.
    Always,
}

impl Condition {
    /// Whether a terminal state triggers this condition.
    #[must_use]
    pub const fn matches(&self, state: State) -> bool {
        match self {
            Self::OnFulfilled => matches!(state, State::Fulfilled),
            Self::OnRejected => matches!(state, State::Rejected),
            Self::Always => state.is_terminal(),
        }
    }
}

/// A value-returning handler: the parent settlement in, a candidate out.
///
/// Returning `Err` is the Rust spelling of a handler throw; the cause
/// becomes the failure candidate for the derived promise.
pub type MapHandler =
    Box<dyn FnOnce(&Settlement) -> std::result::Result<Candidate, Cause> + Send + 'static>;

/// An emitting handler: pushes its result through the [`Emitter`] instead
/// of returning it.
pub type EmitHandler = Box<dyn FnOnce(&Settlement, &Emitter) + Send + 'static>;

/// The user code attached to a continuation record.
pub(crate) enum Reaction {
    /// Return-value shape.
    Map(MapHandler),
    /// Emit-callback shape.
    Emit(EmitHandler),
}

/// One-shot result slot handed to [`EmitHandler`]s.
///
/// The first emitted candidate wins; later emits within the same handler
/// invocation are ignored.
pub struct Emitter {
    slot: Mutex<Option<Candidate>>,
}

impl Emitter {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Emits the handler's result. Returns whether this call won the slot.
    pub fn emit(&self, candidate: impl Into<Candidate>) -> bool {
        let mut slot = self.slot.lock().expect("emitter lock poisoned");
        if slot.is_some() {
            return false;
        }
        *slot = Some(candidate.into());
        true
    }

    /// Returns true once something has been emitted.
    #[must_use]
    pub fn is_spent(&self) -> bool {
        self.slot.lock().expect("emitter lock poisoned").is_some()
    }

    fn take(&self) -> Option<Candidate> {
        self.slot.lock().expect("emitter lock poisoned").take()
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("spent", &self.is_spent())
            .finish()
    }
}

/// A registered, deferred reaction to a parent promise's settlement.
///
/// Created at chain-call time, consumed exactly once when the parent
/// settles (or immediately when chained onto an already-terminal parent).
pub(crate) struct ContinuationRecord {
    /// The derived promise this record will settle.
    pub(crate) target: Promise,
    pub(crate) condition: Condition,
    /// Absent for internal pass-through links.
    pub(crate) reaction: Option<Reaction>,
}

impl ContinuationRecord {
    /// Runs this record against the parent's settlement.
    ///
    /// Always invoked from a backend task, never inline on the settling or
    /// registering thread. Handler panics are caught and turned into
    /// failure candidates; resolution errors cannot surface to any caller
    /// from here, so they are logged and the target is left pending.
    pub(crate) fn run(self, settlement: &Settlement) {
        let matched = self.condition.matches(settlement.state());
        let (candidate, category) = match self.reaction {
            Some(Reaction::Map(handler)) if matched => {
                match catch_unwind(AssertUnwindSafe(|| handler(settlement))) {
                    Ok(Ok(candidate)) => (candidate, Category::Success),
                    Ok(Err(cause)) => (Candidate::Cause(cause), Category::Failure),
                    Err(payload) => (
                        Candidate::Cause(Cause::from_panic(payload)),
                        Category::Failure,
                    ),
                }
            }
            Some(Reaction::Emit(handler)) if matched => {
                let emitter = Emitter::new();
                let panicked =
                    catch_unwind(AssertUnwindSafe(|| handler(settlement, &emitter))).err();
                match (emitter.take(), panicked) {
                    // First write wins; a later panic is discarded.
                    (Some(candidate), _) => (candidate, Category::Success),
                    (None, Some(payload)) => (
                        Candidate::Cause(Cause::from_panic(payload)),
                        Category::Failure,
                    ),
                    (None, None) => (Candidate::Value(Value::absent()), Category::Success),
                }
            }
            // Condition mismatch or pass-through link: adopt unchanged.
            _ => settlement.clone().into_parts(),
        };

        if let Err(error) = resolve(&self.target, candidate, category) {
            tracing::warn!(%error, "scheduled resolution failed; derived promise left pending");
        }
    }
}

impl std::fmt::Debug for ContinuationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuationRecord")
            .field("condition", &self.condition)
            .field("has_reaction", &self.reaction.is_some())
            .finish()
    }
}

/// An entry in a promise's subscriber queue.
pub(crate) enum Subscriber {
    /// A chained continuation.
    Continuation(ContinuationRecord),
    /// A bare settlement callback (the [`Thenable`](crate::Thenable)
    /// contract's `on_settled`).
    Callback(SettledCallback),
}

impl Subscriber {
    /// Hands this subscriber to the backend for execution against a
    /// settlement.
    pub(crate) fn dispatch(self, backend: &Arc<dyn Backend>, settlement: Settlement) {
        match self {
            Self::Continuation(record) => backend.schedule(Box::new(move || {
                record.run(&settlement);
            })),
            Self::Callback(callback) => backend.schedule(Box::new(move || {
                callback(&settlement);
            })),
        }
    }
}
