#![allow(dead_code)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```ignore
//! mod common;
//! use common::*;
//! ```

use std::sync::{Arc, Once};
use std::time::Duration;

use pledge::{Backend, BlockingHandle, Factory, PoolConfig, ThreadPoolBackend, Value};

static INIT_LOGGING: Once = Once::new();

/// Default bound for waits that are expected to complete.
pub const WAIT_BUDGET: Duration = Duration::from_secs(5);

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trace")),
            )
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .try_init();
    });
}

/// A small thread pool suitable for deterministic-enough e2e tests.
pub fn test_pool() -> Arc<ThreadPoolBackend> {
    Arc::new(ThreadPoolBackend::with_config(PoolConfig {
        min_workers: 2,
        max_workers: 4,
        ..PoolConfig::default()
    }))
}

/// A factory over a fresh test pool.
pub fn pool_factory() -> (Arc<ThreadPoolBackend>, Factory) {
    init_test_logging();
    let pool = test_pool();
    let factory = Factory::new(Arc::clone(&pool) as Arc<dyn Backend>);
    (pool, factory)
}

/// Fulfills the handle's promise from a freshly spawned thread after a
/// delay, simulating slow concurrent production.
pub fn fulfill_later(handle: Arc<BlockingHandle>, delay: Duration, value: Value) {
    std::thread::spawn(move || {
        std::thread::sleep(delay);
        handle.fulfill(value).expect("late fulfill");
    });
}
