//! The resolution algorithm: from raw candidate to definitive settlement.
//!
//! `resolve` is interposed between every outcome source and the settlement
//! core — producing actions, handler returns, and adopted settlements all
//! come through here, so [`settle`](crate::Promise) itself never sees a
//! promise-shaped value.
//!
//! # The walk
//!
//! ```text
//! resolve(target, candidate, category)
//!   candidate is target ─────────────────► SelfResolution (target untouched)
//!   candidate is terminal promise-like ──► unwrap its outcome, repeat
//!        └─ identity seen before ────────► CircularResolution (untouched)
//!   candidate is pending promise-like ───► subscribe pass-through, done
//!        └─ (never settles → target never settles; accepted liveness)
//!   candidate is absence, failure ───────► NullCause (untouched)
//!   candidate is plain value, failure ───► IllegalCause (untouched)
//!   otherwise ───────────────────────────► settle(target, ...)
//! ```
//!
//! Cycle detection carries a visited-identity set seeded with the target,
//! and only walks links that are already terminal; a cycle that closes
//! *after* resolution registered its pass-throughs is not detected — every
//! member just stays pending forever, which is the documented safe
//! behavior.

use smallvec::SmallVec;

use crate::error::{Error, ErrorKind, Result};
use crate::outcome::{Candidate, Category, Settlement, State, Value};
use crate::thenable::ThenableId;
use crate::Promise;

/// Resolves `target` with a candidate outcome of the given category.
///
/// On success the target is either settled or subscribed to a still-pending
/// candidate. On error the target is exactly as it was: a failed resolve
/// never settles anything.
///
/// # Errors
///
/// - [`SelfResolution`](ErrorKind::SelfResolution): the candidate is the
///   target itself.
/// - [`CircularResolution`](ErrorKind::CircularResolution): unwrapping
///   already-terminal links revisited an identity.
/// - [`NullCause`](ErrorKind::NullCause) /
///   [`IllegalCause`](ErrorKind::IllegalCause): a failure-category
///   candidate that is not an error object.
/// - [`InvalidTransition`](ErrorKind::InvalidTransition): the target was
///   already settled by the time the walk bottomed out.
pub(crate) fn resolve(target: &Promise, candidate: Candidate, category: Category) -> Result<()> {
    let mut visited: SmallVec<[ThenableId; 4]> = SmallVec::new();
    visited.push(target.id());

    let mut candidate = candidate;
    let mut category = category;
    let mut direct = true;

    loop {
        match candidate.normalize() {
            Candidate::Promise(promise) => {
                let id = promise.id();
                if direct && id == target.id() {
                    return Err(Error::new(ErrorKind::SelfResolution));
                }
                if visited.contains(&id) {
                    return Err(Error::new(ErrorKind::CircularResolution));
                }
                if promise.state() == State::Pending {
                    // Defer: target adopts the candidate's settlement once
                    // it exists. The subscribe path re-checks terminality
                    // under the candidate's lock, so a settlement racing
                    // this registration is not lost.
                    tracing::trace!("resolution deferred to pending promise");
                    promise.adopt_into(target.clone());
                    return Ok(());
                }
                visited.push(id);
                let settlement = promise.settlement()?;
                (candidate, category) = settlement.into_parts();
                direct = false;
            }
            Candidate::Foreign(thenable) => {
                let id = thenable.id();
                if direct && id == target.id() {
                    return Err(Error::new(ErrorKind::SelfResolution));
                }
                if visited.contains(&id) {
                    return Err(Error::new(ErrorKind::CircularResolution));
                }
                if thenable.state() == State::Pending {
                    tracing::trace!("resolution deferred to pending foreign thenable");
                    let adopter = target.clone();
                    thenable.on_settled(Box::new(move |settlement: &Settlement| {
                        let (candidate, category) = settlement.clone().into_parts();
                        let backend = std::sync::Arc::clone(adopter.backend());
                        backend.schedule(Box::new(move || {
                            if let Err(error) = resolve(&adopter, candidate, category) {
                                tracing::warn!(
                                    %error,
                                    "adoption from foreign thenable failed; target left pending"
                                );
                            }
                        }));
                    }));
                    return Ok(());
                }
                visited.push(id);
                let settlement = thenable.settlement()?;
                (candidate, category) = settlement.into_parts();
                direct = false;
            }
            Candidate::Value(value) => {
                return match category {
                    Category::Failure if value.is_absent() => {
                        Err(Error::new(ErrorKind::NullCause))
                    }
                    Category::Failure => Err(Error::new(ErrorKind::IllegalCause)),
                    Category::Success => target.settle(Settlement::Fulfilled(value)),
                };
            }
            Candidate::Cause(cause) => {
                return match category {
                    Category::Failure => target.settle(Settlement::Rejected(cause)),
                    // A successful outcome that happens to be an error
                    // object fulfills with it as an opaque payload.
                    Category::Success => target.settle(Settlement::Fulfilled(Value::new(cause))),
                };
            }
        }
    }
}
