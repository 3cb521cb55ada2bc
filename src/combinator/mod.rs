//! Combinators over settled and settling promises.
//!
//! This module provides the combinator set:
//!
//! - [`attempt`]: wrap a throwing call as a promise
//! - [`each`]: map a sequence through promises, join in input order
//! - [`all`]: join existing promises, input order preserved
//! - [`race`]: first settlement wins, success or failure
//!
//! Everything here is expressed purely through chaining, resolution, and
//! the factory's constructors; no combinator touches a promise's internal
//! state.
//!
//! # Join failure semantics
//!
//! `each` and `all` always wait for *every* input to reach a terminal
//! state, then aggregate: any rejection among the inputs rejects the join
//! with an [`AggregateFailure`] carrying the full, input-ordered cause
//! list. There is no fail-fast early exit.

pub mod attempt;
pub mod each;
pub mod race;

pub use attempt::attempt;
pub use each::{all, each, AggregateFailure};
pub use race::race;
