//! Percentage-based feature gate with configuration overrides.

use std::{collections::BTreeMap, sync::Arc};

use rand::Rng;

/// Snapshot of runtime feature overrides.
///
/// A feature is keyed by name and resolves to a percentage in 0..=100: the
/// configured override if present, the caller-supplied default otherwise.
/// Every call draws fresh randomness; results are never cached across
/// requests.
#[derive(Clone, Default)]
pub struct Runtime {
    overrides: Arc<BTreeMap<String, u64>>,
}

impl Runtime {
    pub fn new(overrides: &BTreeMap<String, u64>) -> Self {
        Self {
            overrides: Arc::new(overrides.clone()),
        }
    }

    /// Whether the feature is enabled for one evaluation.
    pub fn feature_enabled(&self, key: &str, default_percent: u64) -> bool {
        let percent = self.overrides.get(key).copied().unwrap_or(default_percent);

        if percent >= 100 {
            return true;
        }

        if percent == 0 {
            return false;
        }

        rand::rng().random_range(0..100) < percent
    }
}
