//! Training Metrics Module
//!
//! Provides the running-average loss accumulator used by the epoch loop and
//! the scalar metrics sink abstraction for external dashboards.

use serde::{Deserialize, Serialize};
use tracing::info;

/// Running average of a scalar, weighted by the number of contributing
/// examples (batch sizes vary at epoch boundaries).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AverageMeter {
    /// Most recent value
    pub value: f64,
    /// Weighted sum of all values
    pub sum: f64,
    /// Total weight seen
    pub count: usize,
    /// Current weighted average
    pub average: f64,
}

impl AverageMeter {
    /// Create a fresh meter
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` with weight `n`
    pub fn update(&mut self, value: f64, n: usize) {
        self.value = value;
        self.sum += value * n as f64;
        self.count += n;
        if self.count > 0 {
            self.average = self.sum / self.count as f64;
        }
    }

    /// Reset all accumulated state
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Destination for scalar training metrics.
///
/// Fire-and-forget: implementations must not influence training state, and a
/// missing dashboard is represented by [`NullMetrics`] rather than an
/// `Option` checked at every call site.
pub trait MetricsSink: Send {
    /// Record a named scalar at the given global step
    fn scalar(&mut self, name: &str, value: f64, step: usize);
}

/// Metrics sink that emits scalars through `tracing`
#[derive(Debug, Clone, Default)]
pub struct LogMetrics;

impl MetricsSink for LogMetrics {
    fn scalar(&mut self, name: &str, value: f64, step: usize) {
        info!(target: "selflabel::metrics", "{} = {:.6} (step {})", name, value, step);
    }
}

/// No-op metrics sink for runs without a dashboard
#[derive(Debug, Clone, Default)]
pub struct NullMetrics;

impl MetricsSink for NullMetrics {
    fn scalar(&mut self, _name: &str, _value: f64, _step: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_meter_weighted() {
        let mut meter = AverageMeter::new();
        meter.update(1.0, 100);
        meter.update(3.0, 100);
        assert!((meter.average - 2.0).abs() < 1e-12);
        assert_eq!(meter.count, 200);
        assert_eq!(meter.value, 3.0);
    }

    #[test]
    fn test_average_meter_uneven_weights() {
        let mut meter = AverageMeter::new();
        meter.update(1.0, 300);
        meter.update(5.0, 100);
        // (1*300 + 5*100) / 400 = 2.0
        assert!((meter.average - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_average_meter_reset() {
        let mut meter = AverageMeter::new();
        meter.update(4.0, 10);
        meter.reset();
        assert_eq!(meter.count, 0);
        assert_eq!(meter.average, 0.0);
    }

    #[test]
    fn test_null_sink_is_silent() {
        let mut sink = NullMetrics;
        sink.scalar("loss", 1.0, 0);
    }
}
