// packages/mesh/src/runtime/stats.rs
use std::sync::atomic::{AtomicU64, Ordering};

/// Live worker counters, shared with mailbox and transport tasks
#[derive(Debug, Default)]
pub(crate) struct WorkerCounters {
    pub published: AtomicU64,
    pub received: AtomicU64,
    pub delivered: AtomicU64,
    pub handled: AtomicU64,
    pub handler_failures: AtomicU64,
    pub rejected: AtomicU64,
}

impl WorkerCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            published: self.published.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Worker statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Envelopes handed to the host (API calls and handler posts)
    pub published: u64,
    /// Envelope frames received from the host
    pub received: u64,
    /// Envelopes placed in an agent mailbox
    pub delivered: u64,
    /// Handler invocations that returned `Ok`
    pub handled: u64,
    pub handler_failures: u64,
    /// Rejection frames received from the host
    pub rejected: u64,
}
