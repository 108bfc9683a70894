use std::sync::atomic::{AtomicU64, Ordering};

/// Observable counters for one buffer instance (§4.E "Lifecycle").
#[derive(Default)]
pub struct Stats {
    pub enqueue_hot_total: AtomicU64,
    pub enqueue_cold_total: AtomicU64,
    pub backpressure_total: AtomicU64,
    pub scanner_recovered_total: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatsSnapshot {
    pub queue_depth: usize,
    pub enqueue_hot_total: u64,
    pub enqueue_cold_total: u64,
    pub backpressure_total: u64,
    pub scanner_recovered_total: u64,
}

impl Stats {
    pub fn snapshot(&self, queue_depth: usize) -> StatsSnapshot {
        StatsSnapshot {
            queue_depth,
            enqueue_hot_total: self.enqueue_hot_total.load(Ordering::Relaxed),
            enqueue_cold_total: self.enqueue_cold_total.load(Ordering::Relaxed),
            backpressure_total: self.backpressure_total.load(Ordering::Relaxed),
            scanner_recovered_total: self.scanner_recovered_total.load(Ordering::Relaxed),
        }
    }
}
