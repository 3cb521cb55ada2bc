//! Join combinators: `each` and `all`.
//!
//! Both produce a promise that fulfills with the input-ordered sequence of
//! results once *every* element has settled, regardless of completion
//! order.
//!
//! # Semantics
//!
//! `all([p1, p2, p3])`:
//! 1. Chain an order-tagged reaction onto every input
//! 2. Wait for all of them to reach a terminal state (no fail-fast)
//! 3. Fulfill with `Vec<Value>` in input order, or reject with an
//!    [`AggregateFailure`] carrying every cause in input order
//!
//! **Key property**: a rejection does not short-circuit the join. Every
//! input always reaches a terminal state before the join settles, so the
//! aggregate cause list is complete, not a prefix.
//!
//! `each(items, mapper)` is the same join over one promise per element,
//! each resolved from the mapper's candidate (which may itself be a
//! promise to adopt).
//!
//! An empty input fulfills immediately with an empty sequence.

use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::factory::{Factory, Resolver};
use crate::outcome::{Candidate, Category, Cause, Settlement, Value};
use crate::Promise;

/// Rejection cause of a join whose inputs failed.
///
/// Carries the full ordered list of causes, each tagged with the input
/// index it came from. Fulfilled inputs contribute nothing; the list is
/// ordered by index, independent of completion order.
#[derive(Debug, Error)]
#[error("{} of {} join inputs rejected", .causes.len(), .total)]
pub struct AggregateFailure {
    /// Total number of join inputs.
    pub total: usize,
    /// `(input index, cause)` for every rejected input, in input order.
    pub causes: Vec<(usize, Cause)>,
}

/// Bookkeeping shared between the join inputs and the result's resolver.
struct JoinState {
    slots: Vec<Option<Settlement>>,
    remaining: usize,
    resolver: Option<Resolver>,
    done: bool,
}

impl JoinState {
    /// Settles the result once every slot is filled and the resolver has
    /// been captured. Both the last input reaction and the capture call
    /// race to be the trigger; the `done` flag keeps it single-shot.
    fn try_complete(&mut self) {
        if self.done || self.remaining != 0 {
            return;
        }
        let Some(resolver) = self.resolver.take() else {
            return;
        };
        self.done = true;

        let total = self.slots.len();
        let causes: Vec<(usize, Cause)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref()
                    .and_then(Settlement::cause)
                    .map(|cause| (index, cause.clone()))
            })
            .collect();

        let report = if causes.is_empty() {
            let values: Vec<Value> = self
                .slots
                .iter()
                .map(|slot| {
                    slot.as_ref()
                        .and_then(Settlement::value)
                        .cloned()
                        .unwrap_or_else(Value::absent)
                })
                .collect();
            resolver.fulfill(Value::new(values))
        } else {
            resolver.reject(Cause::new(AggregateFailure { total, causes }))
        };
        if let Err(error) = report {
            tracing::warn!(%error, "join result could not settle its promise");
        }
    }
}

/// Joins existing promises, preserving input order.
///
/// The result fulfills with a `Vec<Value>` in input order once every input
/// fulfills, or rejects with [`AggregateFailure`] once every input has
/// settled and at least one rejected.
#[must_use]
pub fn all(factory: &Factory, promises: Vec<Promise>) -> Promise {
    let total = promises.len();
    let state = Arc::new(Mutex::new(JoinState {
        slots: vec![None; total],
        remaining: total,
        resolver: None,
        done: false,
    }));

    let capture = Arc::clone(&state);
    let result = factory.create(move |resolver| {
        let mut guard = capture.lock().expect("join state poisoned");
        guard.resolver = Some(resolver);
        guard.try_complete();
    });

    for (index, promise) in promises.iter().enumerate() {
        let state = Arc::clone(&state);
        let _ = promise.always(move |settlement| {
            let mut guard = state.lock().expect("join state poisoned");
            if guard.slots[index].is_none() {
                guard.slots[index] = Some(settlement.clone());
                guard.remaining -= 1;
            }
            guard.try_complete();
            Ok(Candidate::Value(Value::absent()))
        });
    }

    result
}

/// Maps every element through `mapper` and joins the resulting promises in
/// input order.
///
/// The mapper runs synchronously at combinator-call time and returns a
/// candidate per element — a plain value, an error object (rejecting that
/// element), or a promise to adopt. Join semantics are those of [`all`].
#[must_use]
pub fn each<I, F>(factory: &Factory, items: I, mut mapper: F) -> Promise
where
    I: IntoIterator<Item = Value>,
    F: FnMut(usize, Value) -> Candidate,
{
    let promises: Vec<Promise> = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let candidate = mapper(index, item);
            factory.create(move |resolver| {
                if let Err(error) = resolver.settle_with(candidate, Category::Success) {
                    // The mapper produced something unresolvable (a cycle,
                    // in practice); fold that into the element's failure so
                    // the join still terminates.
                    let _ = resolver.reject(Cause::new(error));
                }
            })
        })
        .collect();
    all(factory, promises)
}
