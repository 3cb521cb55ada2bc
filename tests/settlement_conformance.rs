//! Settlement contract conformance against the real thread pool.
//!
//! These tests exercise the cross-thread guarantees: at-most-once
//! settlement, lock-free terminal reads, never-inline handler execution,
//! and the synchronous misuse errors.

mod common;

use common::*;

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pledge::{
    BlockingHandle, Candidate, Cause, ErrorKind, Settlement, SettledCallback, State, Thenable,
    ThenableId, Value,
};

#[test]
fn state_is_pending_until_settled_then_stable_forever() {
    let (pool, factory) = pool_factory();
    let handle = BlockingHandle::new(&factory);
    let promise = handle.promise().clone();

    assert_eq!(promise.state(), State::Pending);
    assert_eq!(
        promise.settlement().unwrap_err().kind(),
        ErrorKind::PendingAccess
    );

    handle.fulfill(Value::new(1_i32)).expect("fulfill");

    // Reads are idempotent: same terminal value forever, from any thread.
    for _ in 0..100 {
        assert_eq!(promise.state(), State::Fulfilled);
    }
    let reader = {
        let promise = promise.clone();
        thread::spawn(move || promise.state())
    };
    assert_eq!(reader.join().expect("reader thread"), State::Fulfilled);
    assert!(pool.shutdown(WAIT_BUDGET));
}

#[test]
fn second_settlement_fails_and_first_outcome_stands() {
    let (pool, factory) = pool_factory();
    let handle = BlockingHandle::new(&factory);

    handle.fulfill(Value::new(1_i32)).expect("first settle");

    let err = handle.fulfill(Value::new(2_i32)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    let err = handle.reject(Cause::msg("too late")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);

    let settlement = handle.promise().settlement().expect("terminal");
    assert_eq!(settlement.value().unwrap().extract::<i32>(), Some(1));
    assert!(pool.shutdown(WAIT_BUDGET));
}

#[test]
fn concurrent_settlers_exactly_one_wins() {
    let (pool, factory) = pool_factory();
    let handle = Arc::new(BlockingHandle::new(&factory));

    let mut racers = Vec::new();
    for tag in 0..8_i32 {
        let handle = Arc::clone(&handle);
        racers.push(thread::spawn(move || {
            handle.fulfill(Value::new(tag)).is_ok()
        }));
    }
    let wins: usize = racers
        .into_iter()
        .map(|racer| usize::from(racer.join().expect("racer thread")))
        .sum();

    assert_eq!(wins, 1);
    assert_eq!(handle.promise().state(), State::Fulfilled);
    assert!(pool.shutdown(WAIT_BUDGET));
}

#[test]
fn self_resolution_fails_synchronously_and_leaves_pending() {
    let (pool, factory) = pool_factory();
    let (tx, rx) = mpsc::channel();

    let promise = factory.create(move |resolver| {
        let own = resolver.promise().clone();
        let err = resolver
            .settle_with(Candidate::Promise(own), pledge::Category::Success)
            .unwrap_err();
        let _ = tx.send(err.kind());
    });

    assert_eq!(
        rx.recv_timeout(WAIT_BUDGET).expect("producer ran"),
        ErrorKind::SelfResolution
    );
    assert_eq!(promise.state(), State::Pending);
    assert!(pool.shutdown(WAIT_BUDGET));
}

#[test]
fn circular_resolution_fails_synchronously_and_leaves_pending() {
    let (pool, factory) = pool_factory();

    // c is pending; a and b are already fulfilled, promise-in-promise.
    let hc = BlockingHandle::new(&factory);
    let b = factory.fulfilled(Value::promise(hc.promise().clone()));
    let a = factory.fulfilled(Value::promise(b));

    // Fulfilling c with a closes the cycle c → a → b → c.
    let err = hc.fulfill(Value::promise(a)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CircularResolution);
    assert_eq!(hc.promise().state(), State::Pending);
    assert!(pool.shutdown(WAIT_BUDGET));
}

#[test]
fn rejection_misuse_errors_never_settle() {
    let (pool, factory) = pool_factory();
    let (tx, rx) = mpsc::channel();

    let promise = factory.create(move |resolver| {
        let null = resolver
            .settle_with(
                Candidate::Value(Value::absent()),
                pledge::Category::Failure,
            )
            .unwrap_err();
        let illegal = resolver
            .settle_with(
                Candidate::Value(Value::new("not an error")),
                pledge::Category::Failure,
            )
            .unwrap_err();
        let _ = tx.send((null.kind(), illegal.kind()));
    });

    let (null, illegal) = rx.recv_timeout(WAIT_BUDGET).expect("producer ran");
    assert_eq!(null, ErrorKind::NullCause);
    assert_eq!(illegal, ErrorKind::IllegalCause);
    assert_eq!(promise.state(), State::Pending);
    assert!(pool.shutdown(WAIT_BUDGET));
}

#[test]
fn handlers_never_run_on_the_settling_thread() {
    let (pool, factory) = pool_factory();
    let handle = BlockingHandle::new(&factory);
    let (tx, rx) = mpsc::channel();

    let _derived = handle.promise().then(move |settlement| {
        let _ = tx.send((thread::current().id(), settlement.clone()));
        Ok(Candidate::Value(Value::absent()))
    });

    // Settle from this thread; the handler must run elsewhere.
    let settling_thread = thread::current().id();
    handle.fulfill(Value::new(1_i32)).expect("fulfill");

    let (handler_thread, _settlement) = rx.recv_timeout(WAIT_BUDGET).expect("handler ran");
    assert_ne!(handler_thread, settling_thread);
    assert!(pool.shutdown(WAIT_BUDGET));
}

#[test]
fn then_maps_and_except_passes_through() {
    let (pool, factory) = pool_factory();
    let handle = BlockingHandle::new(&factory);
    let promise = handle.promise().clone();

    let mapped = promise.then(|settlement| {
        let x = settlement.value().unwrap().extract::<i32>().unwrap();
        Ok(Candidate::Value(Value::new(x + 1)))
    });
    let (tx, rx) = mpsc::channel();
    let passed = promise.except(move |_| {
        let _ = tx.send(());
        Ok(Candidate::Value(Value::absent()))
    });

    handle.fulfill(Value::new(42_i32)).expect("fulfill");

    let settlement = mapped.wait_timeout(WAIT_BUDGET).expect("mapped settled");
    assert_eq!(settlement.value().unwrap().extract::<i32>(), Some(43));

    let settlement = passed.wait_timeout(WAIT_BUDGET).expect("passed settled");
    assert_eq!(settlement.value().unwrap().extract::<i32>(), Some(42));
    assert!(
        rx.try_recv().is_err(),
        "failure handler ran on a fulfillment"
    );
    assert!(pool.shutdown(WAIT_BUDGET));
}

#[test]
fn rejection_flows_to_except_and_past_then() {
    let (pool, factory) = pool_factory();
    let handle = BlockingHandle::new(&factory);
    let promise = handle.promise().clone();

    let recovered = promise
        .then(|_| {
            panic!("success handler must not run");
        })
        .except(|settlement| {
            let text = settlement.cause().unwrap().to_string();
            Ok(Candidate::Value(Value::new(format!("recovered: {text}"))))
        });

    handle.reject(Cause::msg("primary failed")).expect("reject");

    let settlement = recovered.wait_timeout(WAIT_BUDGET).expect("settled");
    assert_eq!(
        settlement.value().unwrap().extract::<String>().unwrap(),
        "recovered: primary failed"
    );
    assert!(pool.shutdown(WAIT_BUDGET));
}

#[test]
fn dependency_on_never_settling_promise_blocks_forever() {
    let (pool, factory) = pool_factory();
    let orphan = BlockingHandle::new(&factory);
    let derived = orphan
        .promise()
        .then(|_| Ok(Candidate::Value(Value::absent())));

    assert!(derived.wait_timeout(Duration::from_millis(100)).is_none());
    assert_eq!(derived.state(), State::Pending);
    assert!(pool.shutdown(WAIT_BUDGET));
}

#[test]
fn rejected_constructor_is_terminal_with_no_async_delay() {
    let (pool, factory) = pool_factory();
    let promise = factory.rejected(Cause::msg("immediate"));
    // No wait, no pumping: terminal the moment the constructor returns.
    assert_eq!(promise.state(), State::Rejected);
    assert_eq!(
        promise
            .settlement()
            .expect("terminal")
            .cause()
            .unwrap()
            .to_string(),
        "immediate"
    );
    assert!(pool.shutdown(WAIT_BUDGET));
}

#[test]
fn blocking_wait_sees_settlement_from_another_thread() {
    let (pool, factory) = pool_factory();
    let handle = Arc::new(BlockingHandle::new(&factory));
    let promise = handle.promise().clone();

    fulfill_later(
        Arc::clone(&handle),
        Duration::from_millis(50),
        Value::new(5_i32),
    );

    let started = Instant::now();
    let settlement = promise.wait();
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert_eq!(settlement.value().unwrap().extract::<i32>(), Some(5));
    assert!(pool.shutdown(WAIT_BUDGET));
}

/// An adapter over an already-completed foreign computation.
struct CompletedForeign(Settlement);

impl Thenable for CompletedForeign {
    fn state(&self) -> State {
        self.0.state()
    }

    fn settlement(&self) -> pledge::Result<Settlement> {
        Ok(self.0.clone())
    }

    fn on_settled(&self, callback: SettledCallback) {
        callback(&self.0);
    }

    fn id(&self) -> ThenableId {
        ThenableId(self as *const Self as usize)
    }
}

#[test]
fn wrapping_terminal_foreign_value_settles_inline() {
    let (pool, factory) = pool_factory();
    let foreign: Arc<dyn Thenable> = Arc::new(CompletedForeign(Settlement::Fulfilled(
        Value::new(String::from("done upstream")),
    )));

    let promise = factory.wrap(foreign);
    // Same value, immediately terminal, no scheduled delay.
    assert_eq!(promise.state(), State::Fulfilled);
    assert_eq!(
        promise
            .settlement()
            .expect("terminal")
            .value()
            .unwrap()
            .extract::<String>()
            .unwrap(),
        "done upstream"
    );
    assert!(pool.shutdown(WAIT_BUDGET));
}
