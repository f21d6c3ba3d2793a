//! Effective engine settings derived from the layered configuration

use overlay_core::config::LayeredConfig;

use crate::fragments::FragmentOptions;

/// Settings carried into processors, the worker pool and the fragment builder
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// Upper bound on the weight of one worker batch
    pub max_batch_size: u64,
    pub worker_count: usize,
    pub queue_capacity: usize,
    /// Row cap for presence tables
    pub results_limit: usize,
    pub max_histogram_entries: usize,
    pub fragments: FragmentOptions,
}

impl EngineOptions {
    pub fn from_config(config: &LayeredConfig) -> Self {
        let mut effective: Vec<_> = config.to_inspection_map().into_iter().collect();
        effective.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, (value, source)) in effective {
            tracing::debug!(key = key.as_str(), value = value.as_str(), source = ?source, "Engine setting");
        }

        Self {
            max_batch_size: config.max_batch_size.value,
            worker_count: config.worker_count.value,
            queue_capacity: config.effective_queue_capacity(),
            results_limit: config.results_limit.value,
            max_histogram_entries: config.max_histogram_entries.value,
            fragments: FragmentOptions {
                max_iterations: config.max_decomposition_iterations.value,
                min_fragment_area_m2: config.min_fragment_area_m2.value,
            },
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config(&LayeredConfig::with_defaults())
    }
}
