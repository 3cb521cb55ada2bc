//! Race combinator: first settlement wins.
//!
//! # Semantics
//!
//! `race([p1, p2, p3])`:
//! 1. Chain an order-independent reaction onto every input
//! 2. Adopt the outcome of whichever input settles first — success *or*
//!    failure; a losing fulfillment does not rescue a winning rejection
//! 3. Leave the remaining inputs to settle on their own; their outcomes
//!    are ignored
//!
//! A race over no inputs never settles. That is the documented liveness
//! trade-off, not an error: bounded waits belong to the caller.

use std::sync::{Arc, Mutex};

use crate::factory::{Factory, Resolver};
use crate::outcome::{Candidate, Settlement, Value};
use crate::Promise;

struct RaceState {
    winner: Option<Settlement>,
    resolver: Option<Resolver>,
    done: bool,
}

impl RaceState {
    fn try_finish(&mut self) {
        if self.done || self.winner.is_none() {
            return;
        }
        let Some(resolver) = self.resolver.take() else {
            return;
        };
        self.done = true;
        let winner = self.winner.take().expect("checked above");
        let (candidate, category) = winner.into_parts();
        if let Err(error) = resolver.settle_with(candidate, category) {
            tracing::warn!(%error, "race result could not settle its promise");
        }
    }
}

/// Settles with the outcome of whichever input settles first.
#[must_use]
pub fn race(factory: &Factory, promises: Vec<Promise>) -> Promise {
    let state = Arc::new(Mutex::new(RaceState {
        winner: None,
        resolver: None,
        done: false,
    }));

    let capture = Arc::clone(&state);
    let result = factory.create(move |resolver| {
        let mut guard = capture.lock().expect("race state poisoned");
        guard.resolver = Some(resolver);
        guard.try_finish();
    });

    for promise in &promises {
        let state = Arc::clone(&state);
        let _ = promise.always(move |settlement| {
            let mut guard = state.lock().expect("race state poisoned");
            if guard.winner.is_none() && !guard.done {
                guard.winner = Some(settlement.clone());
            }
            guard.try_finish();
            Ok(Candidate::Value(Value::absent()))
        });
    }

    result
}
