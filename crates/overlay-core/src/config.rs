use crate::error::{OverlayError, Result};
use crate::stats::DEFAULT_RESULTS_LIMIT;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "OVERLAY_";

/// Configuration source for tracking where values come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Default value
    Default,
    /// Loaded from config file
    File,
    /// Loaded from environment variable
    Environment,
    /// Provided by the embedding application
    Cli,
}

impl ConfigSource {
    /// Returns the precedence level (higher = higher priority)
    pub fn precedence(&self) -> u8 {
        match self {
            ConfigSource::Default => 0,
            ConfigSource::File => 1,
            ConfigSource::Environment => 2,
            ConfigSource::Cli => 3,
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }

    /// Update the value if the new source has higher precedence
    pub fn update(&mut self, value: T, source: ConfigSource) {
        if source.precedence() > self.source.precedence() {
            self.value = value;
            self.source = source;
        }
    }
}

/// Default worker count: available parallelism minus one, at least one
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Layered configuration for the overlay engine
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    /// Upper bound on the weight of a single worker batch
    pub max_batch_size: ConfigValue<u64>,
    pub worker_count: ConfigValue<usize>,
    /// Bounded queue in front of the workers; `None` follows `worker_count`
    pub queue_capacity: ConfigValue<Option<usize>>,
    pub max_decomposition_iterations: ConfigValue<usize>,
    /// Row cap for presence tables
    pub results_limit: ConfigValue<usize>,
    pub min_fragment_area_m2: ConfigValue<f64>,
    pub max_histogram_entries: ConfigValue<usize>,
}

impl LayeredConfig {
    /// Create a new configuration with default values
    pub fn with_defaults() -> Self {
        Self {
            max_batch_size: ConfigValue::new(5_000_000, ConfigSource::Default),
            worker_count: ConfigValue::new(default_worker_count(), ConfigSource::Default),
            queue_capacity: ConfigValue::new(None, ConfigSource::Default),
            max_decomposition_iterations: ConfigValue::new(10, ConfigSource::Default),
            results_limit: ConfigValue::new(DEFAULT_RESULTS_LIMIT, ConfigSource::Default),
            min_fragment_area_m2: ConfigValue::new(1.0, ConfigSource::Default),
            max_histogram_entries: ConfigValue::new(200, ConfigSource::Default),
        }
    }

    /// Queue capacity actually used by the worker pool
    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity.value.unwrap_or(self.worker_count.value).max(1)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| OverlayError::ConfigInvalid {
                key: "file".to_string(),
                reason: format!("Failed to read config file: {}", e),
            })?;

        let file_config: FileConfig =
            toml::from_str(&content).map_err(|e| OverlayError::ConfigInvalid {
                key: "file".to_string(),
                reason: format!("Failed to parse TOML: {}", e),
            })?;

        if let Some(v) = file_config.max_batch_size {
            self.max_batch_size.update(v, ConfigSource::File);
        }
        if let Some(v) = file_config.worker_count {
            self.worker_count.update(v, ConfigSource::File);
        }
        if let Some(v) = file_config.queue_capacity {
            self.queue_capacity.update(Some(v), ConfigSource::File);
        }
        if let Some(v) = file_config.max_decomposition_iterations {
            self.max_decomposition_iterations.update(v, ConfigSource::File);
        }
        if let Some(v) = file_config.results_limit {
            self.results_limit.update(v, ConfigSource::File);
        }
        if let Some(v) = file_config.min_fragment_area_m2 {
            self.min_fragment_area_m2.update(v, ConfigSource::File);
        }
        if let Some(v) = file_config.max_histogram_entries {
            self.max_histogram_entries.update(v, ConfigSource::File);
        }

        Ok(self)
    }

    /// Load configuration from `OVERLAY_*` environment variables
    pub fn load_from_env(mut self) -> Self {
        if let Some(v) = env_value::<u64>("MAX_BATCH_SIZE", "positive integer") {
            self.max_batch_size.update(v, ConfigSource::Environment);
        }
        if let Some(v) = env_value::<usize>("WORKER_COUNT", "positive integer") {
            self.worker_count.update(v, ConfigSource::Environment);
        }
        if let Some(v) = env_value::<usize>("QUEUE_CAPACITY", "positive integer") {
            self.queue_capacity.update(Some(v), ConfigSource::Environment);
        }
        if let Some(v) = env_value::<usize>("MAX_DECOMPOSITION_ITERATIONS", "positive integer") {
            self.max_decomposition_iterations.update(v, ConfigSource::Environment);
        }
        if let Some(v) = env_value::<usize>("RESULTS_LIMIT", "integer") {
            self.results_limit.update(v, ConfigSource::Environment);
        }
        if let Some(v) = env_value::<f64>("MIN_FRAGMENT_AREA_M2", "number") {
            self.min_fragment_area_m2.update(v, ConfigSource::Environment);
        }
        if let Some(v) = env_value::<usize>("MAX_HISTOGRAM_ENTRIES", "positive integer") {
            self.max_histogram_entries.update(v, ConfigSource::Environment);
        }

        self
    }

    /// Apply overrides supplied by the embedding application
    pub fn update_from_cli(&mut self, overrides: CliConfigOverrides) {
        if let Some(v) = overrides.max_batch_size {
            self.max_batch_size.update(v, ConfigSource::Cli);
        }
        if let Some(v) = overrides.worker_count {
            self.worker_count.update(v, ConfigSource::Cli);
        }
        if let Some(v) = overrides.queue_capacity {
            self.queue_capacity.update(Some(v), ConfigSource::Cli);
        }
        if let Some(v) = overrides.max_decomposition_iterations {
            self.max_decomposition_iterations.update(v, ConfigSource::Cli);
        }
        if let Some(v) = overrides.results_limit {
            self.results_limit.update(v, ConfigSource::Cli);
        }
        if let Some(v) = overrides.min_fragment_area_m2 {
            self.min_fragment_area_m2.update(v, ConfigSource::Cli);
        }
        if let Some(v) = overrides.max_histogram_entries {
            self.max_histogram_entries.update(v, ConfigSource::Cli);
        }
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, reason: &str| OverlayError::ConfigInvalid {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if self.worker_count.value == 0 {
            return Err(invalid("worker_count", "must be at least 1"));
        }
        if self.max_batch_size.value == 0 {
            return Err(invalid("max_batch_size", "must be greater than 0"));
        }
        if self.max_decomposition_iterations.value == 0 {
            return Err(invalid("max_decomposition_iterations", "must be at least 1"));
        }
        if self.queue_capacity.value == Some(0) {
            return Err(invalid("queue_capacity", "must be at least 1"));
        }
        if self.max_histogram_entries.value == 0 {
            return Err(invalid("max_histogram_entries", "must be at least 1"));
        }
        if !self.min_fragment_area_m2.value.is_finite() || self.min_fragment_area_m2.value < 0.0 {
            return Err(invalid("min_fragment_area_m2", "must be a non-negative number"));
        }
        Ok(())
    }

    /// Get all configuration values as a map for inspection
    pub fn to_inspection_map(&self) -> HashMap<String, (String, ConfigSource)> {
        let mut map = HashMap::new();

        map.insert(
            "max_batch_size".to_string(),
            (self.max_batch_size.value.to_string(), self.max_batch_size.source),
        );
        map.insert(
            "worker_count".to_string(),
            (self.worker_count.value.to_string(), self.worker_count.source),
        );
        map.insert(
            "queue_capacity".to_string(),
            (self.effective_queue_capacity().to_string(), self.queue_capacity.source),
        );
        map.insert(
            "max_decomposition_iterations".to_string(),
            (
                self.max_decomposition_iterations.value.to_string(),
                self.max_decomposition_iterations.source,
            ),
        );
        map.insert(
            "results_limit".to_string(),
            (self.results_limit.value.to_string(), self.results_limit.source),
        );
        map.insert(
            "min_fragment_area_m2".to_string(),
            (format!("{} m²", self.min_fragment_area_m2.value), self.min_fragment_area_m2.source),
        );
        map.insert(
            "max_histogram_entries".to_string(),
            (self.max_histogram_entries.value.to_string(), self.max_histogram_entries.source),
        );

        map
    }
}

impl Default for LayeredConfig {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn env_value<T: FromStr>(key: &str, expected: &str) -> Option<T> {
    let name = format!("{}{}", ENV_PREFIX, key);
    let raw = env::var(&name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Invalid {} value '{}': expected {}", name, raw, expected);
            None
        }
    }
}

/// Configuration loaded from TOML file
#[derive(Debug, Deserialize, Serialize)]
struct FileConfig {
    max_batch_size: Option<u64>,
    worker_count: Option<usize>,
    queue_capacity: Option<usize>,
    max_decomposition_iterations: Option<usize>,
    results_limit: Option<usize>,
    min_fragment_area_m2: Option<f64>,
    max_histogram_entries: Option<usize>,
}

/// Programmatic overrides, highest precedence
#[derive(Debug, Default)]
pub struct CliConfigOverrides {
    pub max_batch_size: Option<u64>,
    pub worker_count: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub max_decomposition_iterations: Option<usize>,
    pub results_limit: Option<usize>,
    pub min_fragment_area_m2: Option<f64>,
    pub max_histogram_entries: Option<usize>,
}
