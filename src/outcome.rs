//! Core settlement vocabulary: states, payloads, and candidates.
//!
//! A promise settles exactly once with a [`Settlement`], which is either a
//! fulfillment carrying a [`Value`] or a rejection carrying a [`Cause`].
//! Before a settlement exists there are only *candidates*: the raw outcomes
//! handed to the resolution algorithm, which may still be promise-shaped
//! and need unwrapping.
//!
//! # Payload typing
//!
//! The engine is deliberately dynamically typed: a [`Value`] can carry any
//! `Send + Sync` payload, including the absence value, and a [`Cause`] is
//! always a real error object. This is what lets a single continuation
//! graph move arbitrary results between heterogeneous handlers, at the cost
//! of a downcast at the consuming edge.

use std::any::Any;
use std::sync::Arc;

use thiserror::Error;

use crate::thenable::Thenable;
use crate::Promise;

/// The lifecycle state of a promise.
///
/// Transitions exactly once, monotonically, from [`Pending`](Self::Pending)
/// to one of the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum State {
    /// Not yet settled.
    Pending = 0,
    /// Settled with a success value.
    Fulfilled = 1,
    /// Settled with a failure cause.
    Rejected = 2,
}

impl State {
    /// Decodes a state from its atomic representation.
    ///
    /// # Panics
    ///
    /// Panics on a byte that was not produced by [`as_u8`](Self::as_u8);
    /// the state cell is written by this crate only.
    #[must_use]
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Fulfilled,
            2 => Self::Rejected,
            other => unreachable!("invalid state byte {other}"),
        }
    }

    /// Encodes this state for the atomic cell.
    #[must_use]
    pub(crate) const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns true once the state is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Which side of a settlement a candidate is headed for.
///
/// The resolution algorithm carries a category alongside every candidate:
/// the category of the producing call (fulfill vs reject), of a handler's
/// return vs throw, or of an adopted parent settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// The candidate fulfills its target.
    Success,
    /// The candidate rejects its target.
    Failure,
}

impl Category {
    /// The terminal state this category settles into.
    #[must_use]
    pub const fn state(&self) -> State {
        match self {
            Self::Success => State::Fulfilled,
            Self::Failure => State::Rejected,
        }
    }
}

/// A dynamically typed success payload.
///
/// `Value` is cheap to clone (shared payload) and may be *absent*, the
/// engine's null: [`Value::absent`] fulfills a promise with nothing in
/// particular, and is the one payload a rejection may never carry.
#[derive(Clone)]
pub struct Value {
    payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl Value {
    /// Wraps an arbitrary payload.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(payload: T) -> Self {
        Self {
            payload: Some(Arc::new(payload)),
        }
    }

    /// The absence value.
    #[must_use]
    pub const fn absent() -> Self {
        Self { payload: None }
    }

    /// Wraps a promise so it can travel as a payload.
    ///
    /// The resolution algorithm recognizes payloads stored through this
    /// constructor (or [`new`](Self::new) with a [`Promise`]) and unwraps
    /// them instead of settling with them.
    #[must_use]
    pub fn promise(promise: Promise) -> Self {
        Self::new(promise)
    }

    /// Wraps a foreign promise-like entity so it can travel as a payload.
    ///
    /// Foreign thenables must come through this constructor to be
    /// recognized by the resolution walk; an adapter buried inside some
    /// other payload type is opaque to the engine.
    #[must_use]
    pub fn thenable(thenable: Arc<dyn Thenable>) -> Self {
        Self::new(thenable)
    }

    /// Returns true for the absence value.
    #[must_use]
    pub const fn is_absent(&self) -> bool {
        self.payload.is_none()
    }

    /// Borrows the payload as a concrete type.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref::<T>()
    }

    /// Clones the payload out as a concrete type.
    #[must_use]
    pub fn extract<T: Any + Clone>(&self) -> Option<T> {
        self.downcast_ref::<T>().cloned()
    }

    /// Sniffs a promise payload back out.
    #[must_use]
    pub(crate) fn as_promise(&self) -> Option<Promise> {
        self.extract::<Promise>()
    }

    /// Sniffs a foreign thenable payload back out.
    #[must_use]
    pub(crate) fn as_foreign(&self) -> Option<Arc<dyn Thenable>> {
        self.extract::<Arc<dyn Thenable>>()
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::absent()
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_absent() {
            f.write_str("Value(absent)")
        } else {
            f.write_str("Value(..)")
        }
    }
}

/// A non-null failure cause.
///
/// Every rejection carries a real error object; the type makes an absent or
/// non-error cause unrepresentable once a settlement exists. The dynamic
/// checks for those two misuses happen earlier, in the resolution
/// algorithm.
#[derive(Clone)]
pub struct Cause {
    error: Arc<dyn std::error::Error + Send + Sync>,
}

impl Cause {
    /// Wraps an error object.
    #[must_use]
    pub fn new<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Self {
            error: Arc::new(error),
        }
    }

    /// Builds a cause from a bare message.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(MessageCause(message.into()))
    }

    /// Converts a caught panic payload into a cause.
    #[must_use]
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let text = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::new(PanicCause(text))
    }

    /// Borrows the underlying error object.
    #[must_use]
    pub fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.error.as_ref()
    }

    /// Borrows the cause as a concrete error type.
    #[must_use]
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.error.as_ref().downcast_ref::<E>()
    }
}

impl std::fmt::Display for Cause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl std::fmt::Debug for Cause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cause({:?})", self.error)
    }
}

/// A plain-text error used by [`Cause::msg`].
#[derive(Debug, Error)]
#[error("{0}")]
struct MessageCause(String);

/// The rejection cause produced when a handler or producing action panics.
///
/// Carries the stringified panic payload. Handlers panicking never crash a
/// worker thread; the panic is caught and lands here instead.
#[derive(Debug, Error)]
#[error("handler panicked: {0}")]
pub struct PanicCause(pub String);

/// A raw outcome handed to the resolution algorithm.
///
/// Candidates are what producing actions, handler returns, and adopted
/// settlements look like before resolution: possibly promise-shaped,
/// possibly illegal for their category. Resolution turns a candidate into
/// an actual settlement of its target, or fails without settling anything.
#[derive(Clone)]
pub enum Candidate {
    /// A plain value (possibly absent).
    Value(Value),
    /// An error object.
    Cause(Cause),
    /// One of this engine's own promises, to be adopted.
    Promise(Promise),
    /// A foreign promise-like entity, to be adopted through its adapter.
    Foreign(Arc<dyn Thenable>),
}

impl Candidate {
    /// Replaces a `Value` that secretly carries a promise-like payload with
    /// the explicit promise-shaped variant, so the resolution walk sees it.
    #[must_use]
    pub(crate) fn normalize(self) -> Self {
        match self {
            Self::Value(value) => {
                if let Some(promise) = value.as_promise() {
                    Self::Promise(promise)
                } else if let Some(thenable) = value.as_foreign() {
                    Self::Foreign(thenable)
                } else {
                    Self::Value(value)
                }
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Cause(cause) => f.debug_tuple("Cause").field(cause).finish(),
            Self::Promise(_) => f.write_str("Promise(..)"),
            Self::Foreign(_) => f.write_str("Foreign(..)"),
        }
    }
}

impl From<Value> for Candidate {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Cause> for Candidate {
    fn from(cause: Cause) -> Self {
        Self::Cause(cause)
    }
}

impl From<Promise> for Candidate {
    fn from(promise: Promise) -> Self {
        Self::Promise(promise)
    }
}

/// The immutable recorded outcome of a settled promise.
///
/// Cheap to clone; both arms share their payload.
#[derive(Debug, Clone)]
pub enum Settlement {
    /// Settled successfully.
    Fulfilled(Value),
    /// Settled with a failure.
    Rejected(Cause),
}

impl Settlement {
    /// The terminal state this settlement represents.
    #[must_use]
    pub const fn state(&self) -> State {
        match self {
            Self::Fulfilled(_) => State::Fulfilled,
            Self::Rejected(_) => State::Rejected,
        }
    }

    /// The category this settlement carries forward when adopted.
    #[must_use]
    pub const fn category(&self) -> Category {
        match self {
            Self::Fulfilled(_) => Category::Success,
            Self::Rejected(_) => Category::Failure,
        }
    }

    /// The success value, if fulfilled.
    #[must_use]
    pub const fn value(&self) -> Option<&Value> {
        match self {
            Self::Fulfilled(value) => Some(value),
            Self::Rejected(_) => None,
        }
    }

    /// The failure cause, if rejected.
    #[must_use]
    pub const fn cause(&self) -> Option<&Cause> {
        match self {
            Self::Fulfilled(_) => None,
            Self::Rejected(cause) => Some(cause),
        }
    }

    /// Splits this settlement back into resolution inputs, for adoption by
    /// a downstream promise.
    #[must_use]
    pub(crate) fn into_parts(self) -> (Candidate, Category) {
        match self {
            Self::Fulfilled(value) => (Candidate::Value(value), Category::Success),
            Self::Rejected(cause) => (Candidate::Cause(cause), Category::Failure),
        }
    }
}
