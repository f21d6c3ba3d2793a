//! Progress, log and debug callbacks for long-running calculations

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use overlay_core::models::Feature;

/// Receives progress and diagnostics from processors.
///
/// Every method has a no-op default, so implementors only override what
/// they care about.
pub trait ProgressReporter: Send + Sync {
    /// Percent complete in `0..=100`
    fn progress(&self, _percent: f64, _message: Option<&str>) {}

    fn log(&self, _message: &str) {}

    /// Intermediate geometry for external debugging, tagged with a layer name
    fn log_feature(&self, _layer: &str, _feature: &Feature) {}

    /// Whether [`ProgressReporter::log_feature`] does anything. Processors skip
    /// building debug features when this is false.
    fn wants_features(&self) -> bool {
        false
    }

    fn time(&self, _label: &str) {}

    fn time_end(&self, _label: &str) {}
}

/// Reporter that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {}

/// Reporter that forwards to `tracing`
#[derive(Debug, Default)]
pub struct TracingReporter {
    timers: Mutex<HashMap<String, Instant>>,
}

impl TracingReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressReporter for TracingReporter {
    fn progress(&self, percent: f64, message: Option<&str>) {
        match message {
            Some(message) => tracing::debug!(percent, "{}", message),
            None => tracing::debug!(percent, "Progress"),
        }
    }

    fn log(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn log_feature(&self, layer: &str, feature: &Feature) {
        tracing::trace!(
            layer,
            geometry_type = feature.geometry.geometry_type().as_str(),
            "Debug feature"
        );
    }

    fn wants_features(&self) -> bool {
        tracing::enabled!(tracing::Level::TRACE)
    }

    fn time(&self, label: &str) {
        if let Ok(mut timers) = self.timers.lock() {
            timers.insert(label.to_string(), Instant::now());
        }
    }

    fn time_end(&self, label: &str) {
        let started = self.timers.lock().ok().and_then(|mut timers| timers.remove(label));
        match started {
            Some(started) => {
                tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "{}", label)
            }
            None => tracing::warn!("Timer '{}' was never started", label),
        }
    }
}
