//! The only cross-worker mutable state: the shutdown flag and the event-armed flag.
//!
//! Both are plain atomics, deliberately kept out of the data queues so that trigger
//! latency and shutdown latency never depend on queue depth (see design notes).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative shutdown signal. Written only by the lifecycle coordinator's signal
/// handler; read by every worker at its suspension points.
#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn signal(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Process-wide event-armed flag. Written only by the STA/LTA detector; read by the
/// MiniSEED writer to decide whether to shorten its flush deadline.
#[derive(Clone, Default)]
pub struct EventArmedFlag(Arc<AtomicBool>);

impl EventArmedFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn arm(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
