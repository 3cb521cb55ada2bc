//! Promise construction: factories, resolvers, and foreign wrapping.
//!
//! A [`Factory`] owns nothing but a backend handle. Every promise it
//! creates carries that backend for the rest of its life, so there is no
//! process-wide default scheduler anywhere in the crate — two factories
//! over two pools coexist without sharing anything.
//!
//! # Producing actions
//!
//! [`create`](Factory::create) schedules a user-supplied producing action
//! and hands it a [`Resolver`], the bundled pair of settlement-triggering
//! functions for the new promise. The action runs asynchronously on the
//! backend, like everything else; a second fulfill or reject through the
//! resolver surfaces [`InvalidTransition`](crate::ErrorKind::InvalidTransition)
//! to whoever made that call, and an uncaught panic in the action is
//! equivalent to rejecting with the panic as cause.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::backend::Backend;
use crate::error::Result;
use crate::outcome::{Candidate, Category, Cause, Settlement, Value};
use crate::resolve::resolve;
use crate::thenable::Thenable;
use crate::Promise;

/// Creates promises bound to one scheduling backend.
///
/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct Factory {
    backend: Arc<dyn Backend>,
}

impl Factory {
    /// Creates a factory over an explicit backend.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// The backend promises from this factory broadcast on.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Creates a pending promise and schedules its producing action.
    ///
    /// The action receives the promise's [`Resolver`]. It runs on the
    /// backend, never on the calling thread, and never before this method
    /// returns. If the action panics while the promise is still pending,
    /// the promise rejects with the panic's cause; if it panics after
    /// settling, the panic is logged and discarded.
    pub fn create<F>(&self, producer: F) -> Promise
    where
        F: FnOnce(Resolver) + Send + 'static,
    {
        let promise = Promise::pending(Arc::clone(&self.backend));
        let handle = promise.clone();
        self.backend.schedule(Box::new(move || {
            let resolver = Resolver {
                promise: handle.clone(),
            };
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| producer(resolver))) {
                let cause = Cause::from_panic(payload);
                if handle.state().is_terminal() {
                    tracing::warn!(%cause, "producing action panicked after settling");
                } else if let Err(error) =
                    resolve(&handle, Candidate::Cause(cause), Category::Failure)
                {
                    tracing::warn!(%error, "failed to reject after producer panic");
                }
            }
        }));
        promise
    }

    /// Creates an already-fulfilled promise, synchronously.
    ///
    /// No scheduling, no resolution: the value is stored as-is, even if it
    /// wraps a promise. (This is how terminal promise-in-promise fixtures
    /// come to exist; the resolution walk unwraps them on adoption.)
    #[must_use]
    pub fn fulfilled(&self, value: Value) -> Promise {
        Promise::already_settled(Settlement::Fulfilled(value), Arc::clone(&self.backend))
    }

    /// Creates an already-rejected promise, synchronously.
    ///
    /// The [`Cause`] type guarantees the cause is a real error object, so
    /// this cannot fail.
    #[must_use]
    pub fn rejected(&self, cause: Cause) -> Promise {
        Promise::already_settled(Settlement::Rejected(cause), Arc::clone(&self.backend))
    }

    /// Adapts a foreign promise-like entity into an engine promise.
    ///
    /// An already-terminal source settles the new promise inline with the
    /// identical settlement — no scheduled delay, same value. A pending
    /// source is adopted through its `on_settled` callback once it
    /// settles.
    #[must_use]
    pub fn wrap(&self, thenable: Arc<dyn Thenable>) -> Promise {
        if let Ok(settlement) = thenable.settlement() {
            return Promise::already_settled(settlement, Arc::clone(&self.backend));
        }
        let promise = Promise::pending(Arc::clone(&self.backend));
        if let Err(error) = resolve(
            &promise,
            Candidate::Foreign(thenable),
            Category::Success,
        ) {
            tracing::warn!(%error, "wrapping foreign thenable failed; promise left pending");
        }
        promise
    }
}

impl std::fmt::Debug for Factory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory").finish_non_exhaustive()
    }
}

/// The settlement-triggering pair for one promise.
///
/// Handed to producing actions by [`Factory::create`] and captured by
/// [`BlockingHandle`](crate::BlockingHandle). All three entry points run
/// the full resolution algorithm, so a fulfillment value that wraps a
/// promise is adopted rather than stored, and every misuse error surfaces
/// synchronously to the caller of the triggering function itself.
pub struct Resolver {
    promise: Promise,
}

impl Resolver {
    /// The promise this resolver settles.
    #[must_use]
    pub fn promise(&self) -> &Promise {
        &self.promise
    }

    /// Fulfills the promise with a value (resolving promise-shaped values
    /// by adoption).
    ///
    /// # Errors
    ///
    /// [`InvalidTransition`](crate::ErrorKind::InvalidTransition) if the
    /// promise is already settled; resolution errors as documented on the
    /// algorithm.
    pub fn fulfill(&self, value: Value) -> Result<()> {
        resolve(&self.promise, Candidate::Value(value), Category::Success)
    }

    /// Rejects the promise with an error object.
    ///
    /// # Errors
    ///
    /// [`InvalidTransition`](crate::ErrorKind::InvalidTransition) if the
    /// promise is already settled.
    pub fn reject(&self, cause: Cause) -> Result<()> {
        resolve(&self.promise, Candidate::Cause(cause), Category::Failure)
    }

    /// Raw resolution entry point: any candidate, either category.
    ///
    /// This is where the dynamic rejection checks are reachable from user
    /// code: a failure-category candidate that is the absence value fails
    /// with [`NullCause`](crate::ErrorKind::NullCause), any other
    /// non-error failure candidate with
    /// [`IllegalCause`](crate::ErrorKind::IllegalCause).
    ///
    /// # Errors
    ///
    /// As documented on the resolution algorithm; the promise is untouched
    /// on error.
    pub fn settle_with(&self, candidate: Candidate, category: Category) -> Result<()> {
        resolve(&self.promise, candidate, category)
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("state", &self.promise.state())
            .finish()
    }
}
