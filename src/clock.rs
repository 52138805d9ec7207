//! A small clock abstraction so the writer and broadcaster scheduling logic can be
//! driven by a fake clock in tests instead of wall time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Clone + Send + 'static {
    /// Seconds since the Unix epoch, sub-second resolution.
    fn now(&self) -> f64;
}

#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_secs_f64()
    }
}

/// A clock whose value is advanced explicitly by test code. Stored as microseconds in
/// an atomic so it can be shared across threads without a mutex.
#[derive(Clone)]
pub struct FakeClock(Arc<AtomicI64>);

impl FakeClock {
    pub fn new(start_secs: f64) -> Self {
        Self(Arc::new(AtomicI64::new((start_secs * 1_000_000.0) as i64)))
    }

    pub fn advance(&self, secs: f64) {
        self.0
            .fetch_add((secs * 1_000_000.0) as i64, Ordering::SeqCst);
    }

    pub fn set(&self, secs: f64) {
        self.0.store((secs * 1_000_000.0) as i64, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> f64 {
        self.0.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}
