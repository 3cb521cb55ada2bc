//! The settlement core: one promise, one at-most-once state machine.
//!
//! A [`Promise`] starts `Pending` and transitions exactly once to
//! `Fulfilled` or `Rejected`. The transition is guarded by a per-promise
//! mutual-exclusion region; *reads* after the transition take a lock-free
//! fast path:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     SETTLEMENT FAST PATH                         │
//! │                                                                  │
//! │  writer (settle, once)            readers (any thread, anytime)  │
//! │    lock queue                       load state (Acquire) ───┐    │
//! │    re-check Pending                                         │    │
//! │    write outcome                    Pending ──► PendingAccess    │
//! │    store state (Release) ─────────► terminal ─► read outcome     │
//! │    drain subscribers                            (no lock)        │
//! │    unlock, broadcast                                             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The release store of the state is the single synchronization point: any
//! thread that observes a terminal state also observes the outcome written
//! before it, so `settlement()` never takes the lock once the promise is
//! terminal.
//!
//! # Subscribers
//!
//! While pending, chaining calls append [`ContinuationRecord`]s to the
//! subscriber queue under the same lock. Settlement drains the queue
//! exactly once, in insertion order, and hands every record to the backend;
//! execution order between records is up to the scheduler.
//!
//! # Blocking
//!
//! [`wait`](Promise::wait) and [`wait_timeout`](Promise::wait_timeout) are
//! the crate's only blocking reads, built on a condition variable with a
//! predicate re-check loop (spurious wakeups are harmless). There is no
//! cancellation: waiting on a promise that never settles waits forever.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::{Duration, Instant};

use smallvec::SmallVec;

use crate::backend::Backend;
use crate::continuation::{
    Condition, ContinuationRecord, EmitHandler, MapHandler, Reaction, Subscriber,
};
use crate::error::{Error, ErrorKind, Result};
use crate::outcome::{Settlement, State};
use crate::thenable::{SettledCallback, Thenable, ThenableId};

/// Shared state of one promise.
struct Inner {
    /// Fast-path state cell. `Pending` until the terminal transition's
    /// release store.
    state: AtomicU8,
    /// Written exactly once, before the state store that publishes it.
    outcome: OnceLock<Settlement>,
    /// Pending-side region: guards the transition re-check and the
    /// subscriber queue. Empty forever once drained.
    queue: Mutex<SmallVec<[Subscriber; 2]>>,
    /// Wakes blocking waiters at settlement.
    settled: Condvar,
    /// The scheduler this promise broadcasts on.
    backend: Arc<dyn Backend>,
}

/// A settable, chainable, at-most-once value container.
///
/// `Promise` is a cheap handle (`Arc` underneath); clones refer to the same
/// settlement cell and the same identity. Promises are created through a
/// [`Factory`](crate::Factory) and settle through the resolution algorithm;
/// there is no public mutation short of that.
#[derive(Clone)]
pub struct Promise {
    inner: Arc<Inner>,
}

impl Promise {
    /// Creates a fresh pending promise bound to a backend.
    pub(crate) fn pending(backend: Arc<dyn Backend>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(State::Pending.as_u8()),
                outcome: OnceLock::new(),
                queue: Mutex::new(SmallVec::new()),
                settled: Condvar::new(),
                backend,
            }),
        }
    }

    /// Creates an already-terminal promise, settled synchronously.
    ///
    /// Used by the factory's immediate constructors; the settlement is
    /// stored as-is, without resolution.
    pub(crate) fn already_settled(settlement: Settlement, backend: Arc<dyn Backend>) -> Self {
        let promise = Self::pending(backend);
        promise
            .settle(settlement)
            .expect("fresh promise cannot be terminal");
        promise
    }

    /// Current state. Never blocks; callable from any thread at any time.
    #[must_use]
    pub fn state(&self) -> State {
        State::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// The recorded settlement.
    ///
    /// Lock-free once the promise is terminal.
    ///
    /// # Errors
    ///
    /// Fails with [`PendingAccess`](ErrorKind::PendingAccess) while the
    /// promise is still pending.
    pub fn settlement(&self) -> Result<Settlement> {
        if !self.state().is_terminal() {
            return Err(Error::new(ErrorKind::PendingAccess));
        }
        Ok(self
            .inner
            .outcome
            .get()
            .expect("terminal promise missing outcome")
            .clone())
    }

    /// Stable identity, for cycle detection.
    #[must_use]
    pub(crate) fn id(&self) -> ThenableId {
        ThenableId(Arc::as_ptr(&self.inner) as usize)
    }

    /// The backend this promise broadcasts on.
    pub(crate) fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    /// Performs the one-time terminal transition.
    ///
    /// This is the sole place state ever changes. A `Pending` "settlement"
    /// is unrepresentable ([`Settlement`] has only terminal arms), and a
    /// rejection cause is a real error object by construction, so the only
    /// dynamic check left from the contract is the at-most-once rule.
    ///
    /// # Errors
    ///
    /// Fails with [`InvalidTransition`](ErrorKind::InvalidTransition) if
    /// the promise is already terminal; the recorded outcome is unaffected.
    pub(crate) fn settle(&self, settlement: Settlement) -> Result<()> {
        // Fast-path reject; terminal is permanent so this cannot misfire.
        if self.state().is_terminal() {
            return Err(Error::new(ErrorKind::InvalidTransition));
        }

        let drained = {
            let mut queue = self.inner.queue.lock().expect("promise lock poisoned");
            // Re-check under the lock: the race between the check above and
            // the acquire is decided here.
            if self.state().is_terminal() {
                return Err(Error::new(ErrorKind::InvalidTransition));
            }
            self.inner
                .outcome
                .set(settlement.clone())
                .expect("outcome written twice");
            self.inner
                .state
                .store(settlement.state().as_u8(), Ordering::Release);
            self.inner.settled.notify_all();
            std::mem::take(&mut *queue)
        };

        tracing::trace!(
            state = ?settlement.state(),
            subscribers = drained.len(),
            "promise settled"
        );

        // Broadcast strictly after the transition is externally observable.
        for subscriber in drained {
            subscriber.dispatch(&self.inner.backend, settlement.clone());
        }
        Ok(())
    }

    /// Appends a subscriber, or fires it immediately if already terminal.
    pub(crate) fn subscribe(&self, subscriber: Subscriber) {
        {
            let mut queue = self.inner.queue.lock().expect("promise lock poisoned");
            if !self.state().is_terminal() {
                queue.push(subscriber);
                return;
            }
        }
        let settlement = self
            .inner
            .outcome
            .get()
            .expect("terminal promise missing outcome")
            .clone();
        subscriber.dispatch(&self.inner.backend, settlement);
    }

    /// Registers a pass-through link: when `self` settles, `target` adopts
    /// its settlement through the resolution algorithm.
    pub(crate) fn adopt_into(&self, target: Promise) {
        self.subscribe(Subscriber::Continuation(ContinuationRecord {
            target,
            condition: Condition::Always,
            reaction: None,
        }));
    }

    fn chain(&self, condition: Condition, reaction: Option<Reaction>) -> Promise {
        let derived = Promise::pending(Arc::clone(&self.inner.backend));
        self.subscribe(Subscriber::Continuation(ContinuationRecord {
            target: derived.clone(),
            condition,
            reaction,
        }));
        derived
    }

    /// Chains a success handler.
    ///
    /// The handler runs (via the backend, never inline) once this promise
    /// fulfills; its returned candidate resolves the derived promise, and a
    /// returned error or panic rejects it. If this promise rejects instead,
    /// the rejection passes through to the derived promise untouched.
    pub fn then<F>(&self, handler: F) -> Promise
    where
        F: FnOnce(&Settlement) -> std::result::Result<crate::Candidate, crate::Cause>
            + Send
            + 'static,
    {
        self.chain(
            Condition::OnFulfilled,
            Some(Reaction::Map(Box::new(handler) as MapHandler)),
        )
    }

    /// Chains a failure handler; fulfillments pass through.
    pub fn except<F>(&self, handler: F) -> Promise
    where
        F: FnOnce(&Settlement) -> std::result::Result<crate::Candidate, crate::Cause>
            + Send
            + 'static,
    {
        self.chain(
            Condition::OnRejected,
            Some(Reaction::Map(Box::new(handler) as MapHandler)),
        )
    }

    /// Chains a handler that runs on either terminal state.
    pub fn always<F>(&self, handler: F) -> Promise
    where
        F: FnOnce(&Settlement) -> std::result::Result<crate::Candidate, crate::Cause>
            + Send
            + 'static,
    {
        self.chain(
            Condition::Always,
            Some(Reaction::Map(Box::new(handler) as MapHandler)),
        )
    }

    /// Chains an emit-shaped success handler.
    ///
    /// See [`Emitter`](crate::Emitter): not emitting fulfills the derived
    /// promise with the absence value, and a panic after an emit is
    /// discarded in favor of the emitted candidate.
    pub fn then_emit<F>(&self, handler: F) -> Promise
    where
        F: FnOnce(&Settlement, &crate::Emitter) + Send + 'static,
    {
        self.chain(
            Condition::OnFulfilled,
            Some(Reaction::Emit(Box::new(handler) as EmitHandler)),
        )
    }

    /// Chains an emit-shaped failure handler.
    pub fn except_emit<F>(&self, handler: F) -> Promise
    where
        F: FnOnce(&Settlement, &crate::Emitter) + Send + 'static,
    {
        self.chain(
            Condition::OnRejected,
            Some(Reaction::Emit(Box::new(handler) as EmitHandler)),
        )
    }

    /// Chains an emit-shaped handler for either terminal state.
    pub fn always_emit<F>(&self, handler: F) -> Promise
    where
        F: FnOnce(&Settlement, &crate::Emitter) + Send + 'static,
    {
        self.chain(
            Condition::Always,
            Some(Reaction::Emit(Box::new(handler) as EmitHandler)),
        )
    }

    /// Blocks the calling thread until this promise settles.
    ///
    /// There is no cancellation; if the promise never settles, this never
    /// returns. Use [`wait_timeout`](Self::wait_timeout) for bounded waits.
    #[must_use]
    pub fn wait(&self) -> Settlement {
        if let Ok(settlement) = self.settlement() {
            return settlement;
        }
        let mut guard = self.inner.queue.lock().expect("promise lock poisoned");
        while !self.state().is_terminal() {
            guard = self
                .inner
                .settled
                .wait(guard)
                .expect("promise lock poisoned");
        }
        drop(guard);
        self.inner
            .outcome
            .get()
            .expect("terminal promise missing outcome")
            .clone()
    }

    /// Blocks until this promise settles or the timeout elapses.
    ///
    /// Returns `None` on timeout, with the promise left untouched.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Settlement> {
        if let Ok(settlement) = self.settlement() {
            return Some(settlement);
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.queue.lock().expect("promise lock poisoned");
        while !self.state().is_terminal() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (next, _timed_out) = self
                .inner
                .settled
                .wait_timeout(guard, remaining)
                .expect("promise lock poisoned");
            guard = next;
        }
        drop(guard);
        Some(
            self.inner
                .outcome
                .get()
                .expect("terminal promise missing outcome")
                .clone(),
        )
    }
}

impl std::fmt::Debug for Promise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subscribers = self
            .inner
            .queue
            .lock()
            .map(|queue| queue.len())
            .unwrap_or(0);
        f.debug_struct("Promise")
            .field("state", &self.state())
            .field("subscribers", &subscribers)
            .finish()
    }
}

impl Thenable for Promise {
    fn state(&self) -> State {
        Promise::state(self)
    }

    fn settlement(&self) -> Result<Settlement> {
        Promise::settlement(self)
    }

    fn on_settled(&self, callback: SettledCallback) {
        self.subscribe(Subscriber::Callback(callback));
    }

    fn id(&self) -> ThenableId {
        Promise::id(self)
    }
}
