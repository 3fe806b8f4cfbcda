//! Named monotonic counters shared across concurrent request flows.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;

/// Registry of named counters, created lazily on first use.
///
/// Cloning the registry is cheap and every clone shares the same counter
/// set; counters survive filter configuration reloads.
#[derive(Clone, Default)]
pub struct StatsRegistry {
    counters: Arc<DashMap<String, Arc<AtomicU64>>>,
}

impl StatsRegistry {
    /// Returns the counter with the given name, creating it at zero if it
    /// has never been seen before.
    pub fn counter(&self, name: &str) -> Counter {
        let counter = {
            let entry = self
                .counters
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(AtomicU64::new(0)));

            Arc::clone(entry.value())
        };

        Counter(counter)
    }

    /// Current value of a counter, zero if it was never incremented.
    pub fn value(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|entry| entry.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// All counters and their current values, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let mut entries: Vec<(String, u64)> = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();

        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

/// Handle to one monotonic counter.
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}
