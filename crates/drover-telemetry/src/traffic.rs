use std::sync::atomic::{AtomicU64, Ordering};

/// Fleet-wide traffic counters shared by every agent.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    window_actions: AtomicU64,
    total_joins: AtomicU64,
}

impl TrafficCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_actions(&self, n: u64) {
        self.window_actions.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_join(&self) {
        self.total_joins.fetch_add(1, Ordering::Relaxed);
    }

    /// Read and reset the per-window action count.
    pub fn take_window(&self) -> u64 {
        self.window_actions.swap(0, Ordering::Relaxed)
    }

    pub fn window_actions(&self) -> u64 {
        self.window_actions.load(Ordering::Relaxed)
    }

    pub fn total_joins(&self) -> u64 {
        self.total_joins.load(Ordering::Relaxed)
    }

    /// Start a new run: cumulative joins count from zero again.
    pub fn reset(&self) {
        self.window_actions.store(0, Ordering::Relaxed);
        self.total_joins.store(0, Ordering::Relaxed);
    }
}
