use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every dispatch task.
#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    ignored_not_self: AtomicU64,
    ignored_stale: AtomicU64,
    denied: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub ignored_not_self: u64,
    pub ignored_stale: u64,
    pub denied: u64,
    pub sent: u64,
    pub failed: u64,
}

impl DispatchStats {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_self(&self) {
        self.ignored_not_self.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self) {
        self.ignored_stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denied(&self) {
        self.denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            ignored_not_self: self.ignored_not_self.load(Ordering::Relaxed),
            ignored_stale: self.ignored_stale.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
