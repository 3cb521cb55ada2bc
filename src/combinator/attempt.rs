//! Attempt combinator: wrap a throwing call as a promise.
//!
//! `attempt` schedules a fallible callable like any producing action and
//! settles with its result: the returned value fulfills, the returned
//! error — or a panic, the Rust spelling of an uncaught throw — rejects.

use crate::factory::Factory;
use crate::outcome::{Cause, Value};
use crate::Promise;

/// Runs `callable` on the factory's backend and settles with its outcome.
///
/// A panic inside `callable` rejects the promise with a
/// [`PanicCause`](crate::PanicCause); it never crashes the worker.
pub fn attempt<F>(factory: &Factory, callable: F) -> Promise
where
    F: FnOnce() -> Result<Value, Cause> + Send + 'static,
{
    factory.create(move |resolver| {
        // A panic in `callable` unwinds into create's producer guard and
        // rejects there.
        let report = match callable() {
            Ok(value) => resolver.fulfill(value),
            Err(cause) => resolver.reject(cause),
        };
        if let Err(error) = report {
            tracing::warn!(%error, "attempt result could not settle its promise");
        }
    })
}
