//! Pledge: a thread-safe, at-most-once settlement engine for Rust.
//!
//! # Overview
//!
//! Pledge is a promise engine built on the principle that settlement is a
//! one-time, lock-free-to-observe fact. A promise starts empty, is
//! produced by concurrent work, and is consumed by chained continuations;
//! everything user-supplied runs through an explicit scheduling backend,
//! never inline on the thread that settled or registered.
//!
//! # Core Guarantees
//!
//! - **At-most-once settlement**: the terminal transition happens exactly
//!   once; every later attempt fails with `InvalidTransition` and the
//!   first-recorded outcome stands
//! - **Lock-free terminal reads**: once a thread observes a terminal
//!   state, the outcome is readable without synchronization
//! - **No inline continuations**: handlers always execute via the backend,
//!   even when the parent was already settled at registration time
//! - **Corruption-free resolution**: self- and circular resolution fail
//!   synchronously and settle nothing; a dependency that never settles
//!   waits forever rather than guessing
//! - **No global scheduler**: every factory takes its backend explicitly
//!
//! # Module Structure
//!
//! - [`outcome`]: states, payloads, candidates, settlements
//! - [`error`]: synchronous misuse errors
//! - [`promise`]: the settlement core and continuation graph
//! - `resolve`: the resolution algorithm (crate-internal)
//! - [`continuation`]: records, conditions, and handler shapes
//! - [`thenable`]: the promise-like contract and foreign adapter bridge
//! - [`backend`]: scheduling backends (thread pool, manual test pump)
//! - [`factory`]: promise construction and resolvers
//! - [`handle`]: blocking bridge to a promise's settlement functions
//! - [`combinator`]: attempt, each, all, race
//!
//! # Example
//!
//! ```ignore
//! use pledge::{Factory, ThreadPoolBackend, Value, Candidate};
//! use std::sync::Arc;
//!
//! let backend = Arc::new(ThreadPoolBackend::new());
//! let factory = Factory::new(backend);
//!
//! let doubled = factory
//!     .create(|resolver| {
//!         resolver.fulfill(Value::new(21_i32)).expect("first settle");
//!     })
//!     .then(|settlement| {
//!         let x = settlement.value().unwrap().extract::<i32>().unwrap();
//!         Ok(Candidate::Value(Value::new(x * 2)))
//!     });
//!
//! let settlement = doubled.wait();
//! assert_eq!(settlement.value().unwrap().extract::<i32>(), Some(42));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod combinator;
pub mod continuation;
pub mod error;
pub mod factory;
pub mod handle;
pub mod outcome;
pub mod promise;
pub(crate) mod resolve;
pub mod thenable;

// Re-exports for convenient access to core types
pub use backend::{Backend, ManualBackend, PoolConfig, Task, ThreadPoolBackend};
pub use combinator::{all, attempt, each, race, AggregateFailure};
pub use continuation::{Condition, EmitHandler, Emitter, MapHandler};
pub use error::{Error, ErrorCategory, ErrorKind, Result};
pub use factory::{Factory, Resolver};
pub use handle::BlockingHandle;
pub use outcome::{Candidate, Category, Cause, PanicCause, Settlement, State, Value};
pub use promise::Promise;
pub use thenable::{SettledCallback, Thenable, ThenableId};
