//! Blocking bridge between external threads and a promise's resolver.
//!
//! [`BlockingHandle`] exists for code that lives outside the continuation
//! graph — a test harness, a synchronous caller, a foreign event loop —
//! and needs to trigger or await settlement directly.
//!
//! The subtlety it owns: the resolver for a factory-created promise is
//! *captured by the producing action*, and producing actions run
//! asynchronously on the backend. A caller may therefore hold the handle
//! before the resolver exists. `fulfill` and `reject` block on a condition
//! variable until capture, re-checking the predicate in a loop (spurious
//! wakeups are harmless), then run the resolver.

use std::sync::{Arc, Condvar, Mutex};

use crate::error::Result;
use crate::factory::{Factory, Resolver};
use crate::outcome::{Cause, Value};
use crate::Promise;

/// Shared capture cell between the handle and the producing action.
struct CaptureCell {
    slot: Mutex<Option<Resolver>>,
    captured: Condvar,
}

/// A promise plus blocking access to its settlement functions.
pub struct BlockingHandle {
    promise: Promise,
    cell: Arc<CaptureCell>,
}

impl BlockingHandle {
    /// Creates a promise through the factory and arranges resolver
    /// capture.
    ///
    /// Returns synchronously; the capture itself happens whenever the
    /// backend runs the producing action.
    #[must_use]
    pub fn new(factory: &Factory) -> Self {
        let cell = Arc::new(CaptureCell {
            slot: Mutex::new(None),
            captured: Condvar::new(),
        });
        let cell_clone = Arc::clone(&cell);
        let promise = factory.create(move |resolver| {
            let mut slot = cell_clone.slot.lock().expect("capture lock poisoned");
            *slot = Some(resolver);
            cell_clone.captured.notify_all();
        });
        Self { promise, cell }
    }

    /// The wrapped promise.
    #[must_use]
    pub fn promise(&self) -> &Promise {
        &self.promise
    }

    /// Returns true once the resolver has been captured.
    #[must_use]
    pub fn is_captured(&self) -> bool {
        self.cell
            .slot
            .lock()
            .expect("capture lock poisoned")
            .is_some()
    }

    /// Fulfills the wrapped promise, blocking until the resolver exists.
    ///
    /// # Errors
    ///
    /// Whatever the resolution reports — notably
    /// [`InvalidTransition`](crate::ErrorKind::InvalidTransition) on a
    /// second settlement.
    pub fn fulfill(&self, value: Value) -> Result<Promise> {
        self.with_resolver(|resolver| resolver.fulfill(value))?;
        Ok(self.promise.clone())
    }

    /// Rejects the wrapped promise, blocking until the resolver exists.
    ///
    /// # Errors
    ///
    /// As for [`fulfill`](Self::fulfill).
    pub fn reject(&self, cause: Cause) -> Result<Promise> {
        self.with_resolver(|resolver| resolver.reject(cause))?;
        Ok(self.promise.clone())
    }

    fn with_resolver<R>(&self, f: impl FnOnce(&Resolver) -> R) -> R {
        let mut slot = self.cell.slot.lock().expect("capture lock poisoned");
        while slot.is_none() {
            slot = self
                .cell
                .captured
                .wait(slot)
                .expect("capture lock poisoned");
        }
        f(slot.as_ref().expect("checked above"))
    }
}

impl std::fmt::Debug for BlockingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingHandle")
            .field("state", &self.promise.state())
            .field("captured", &self.is_captured())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, ManualBackend, PoolConfig, ThreadPoolBackend};
    use crate::error::ErrorKind;
    use crate::outcome::State;
    use std::time::Duration;

    #[test]
    fn capture_happens_when_backend_runs() {
        let backend = Arc::new(ManualBackend::new());
        let factory = Factory::new(Arc::clone(&backend) as Arc<dyn Backend>);
        let handle = BlockingHandle::new(&factory);

        assert!(!handle.is_captured());
        backend.run_until_idle();
        assert!(handle.is_captured());

        let promise = handle.fulfill(Value::new(1_i32)).expect("fulfill");
        assert_eq!(promise.state(), State::Fulfilled);
    }

    #[test]
    fn fulfill_blocks_across_threads_until_capture() {
        // Real pool: the producing action runs on a worker at some point
        // after new() returns, while this thread is already blocked in
        // fulfill().
        let pool = Arc::new(ThreadPoolBackend::with_config(PoolConfig {
            min_workers: 1,
            max_workers: 2,
            ..PoolConfig::default()
        }));
        let factory = Factory::new(Arc::clone(&pool) as Arc<dyn Backend>);
        let handle = BlockingHandle::new(&factory);

        let promise = handle.fulfill(Value::new(5_i32)).expect("fulfill");
        let settlement = promise
            .wait_timeout(Duration::from_secs(5))
            .expect("settled");
        assert_eq!(settlement.value().unwrap().extract::<i32>(), Some(5));
        assert!(pool.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn second_settlement_through_handle_fails() {
        let backend = Arc::new(ManualBackend::new());
        let factory = Factory::new(Arc::clone(&backend) as Arc<dyn Backend>);
        let handle = BlockingHandle::new(&factory);
        backend.run_until_idle();

        handle.fulfill(Value::new(1_i32)).expect("first");
        let err = handle.reject(Cause::msg("late")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert_eq!(handle.promise().state(), State::Fulfilled);
    }

    #[test]
    fn reject_settles_rejected() {
        let backend = Arc::new(ManualBackend::new());
        let factory = Factory::new(Arc::clone(&backend) as Arc<dyn Backend>);
        let handle = BlockingHandle::new(&factory);
        backend.run_until_idle();

        let promise = handle.reject(Cause::msg("nope")).expect("reject");
        let settlement = promise.settlement().expect("terminal");
        assert_eq!(settlement.cause().unwrap().to_string(), "nope");
    }
}
