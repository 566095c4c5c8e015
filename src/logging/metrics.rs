//! Stage duration metrics
//!
//! Lightweight collection of per-stage timings with statistical summaries.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

const MAX_MEASUREMENTS: usize = 10_000;

/// Individual performance measurement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMeasurement {
    pub operation: String,
    pub duration_ms: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub correlation_id: Option<Uuid>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Statistical summary of performance measurements
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub operation: String,
    pub count: usize,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub std_dev_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
}

/// Thread-safe metrics collector
pub struct MetricsCollector {
    measurements: Arc<Mutex<Vec<PerformanceMeasurement>>>,
    enabled: bool,
}

impl MetricsCollector {
    pub fn new(enabled: bool) -> Self {
        Self {
            measurements: Arc::new(Mutex::new(Vec::new())),
            enabled,
        }
    }

    pub fn record(&self, operation: &str, duration: Duration, correlation_id: Option<Uuid>) {
        self.record_with_metadata(operation, duration, correlation_id, HashMap::new());
    }

    pub fn record_with_metadata(
        &self,
        operation: &str,
        duration: Duration,
        correlation_id: Option<Uuid>,
        metadata: HashMap<String, serde_json::Value>,
    ) {
        if !self.enabled {
            return;
        }

        let measurement = PerformanceMeasurement {
            operation: operation.to_string(),
            duration_ms: duration.as_secs_f64() * 1000.0,
            timestamp: chrono::Utc::now(),
            correlation_id,
            metadata,
        };

        if let Ok(mut measurements) = self.measurements.lock() {
            measurements.push(measurement);
            if measurements.len() > MAX_MEASUREMENTS {
                measurements.drain(0..MAX_MEASUREMENTS / 2);
            }
        }
    }

    pub fn get_measurements(&self, operation: &str) -> Vec<PerformanceMeasurement> {
        self.filtered(|m| m.operation == operation)
    }

    /// All measurements of one registration run
    pub fn get_measurements_by_correlation(&self, correlation_id: Uuid) -> Vec<PerformanceMeasurement> {
        self.filtered(|m| m.correlation_id == Some(correlation_id))
    }

    fn filtered<F: Fn(&PerformanceMeasurement) -> bool>(&self, keep: F) -> Vec<PerformanceMeasurement> {
        match self.measurements.lock() {
            Ok(measurements) => measurements.iter().filter(|m| keep(m)).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn calculate_stats(&self, operation: &str) -> Option<PerformanceStats> {
        let mut durations: Vec<f64> = self
            .get_measurements(operation)
            .iter()
            .map(|m| m.duration_ms)
            .collect();
        if durations.is_empty() {
            return None;
        }
        durations.sort_by(|a, b| a.total_cmp(b));

        let count = durations.len();
        let mean = durations.iter().sum::<f64>() / count as f64;
        let variance = durations.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / count as f64;
        let median = if count % 2 == 0 {
            (durations[count / 2 - 1] + durations[count / 2]) / 2.0
        } else {
            durations[count / 2]
        };
        let p95_index = ((count as f64) * 0.95) as usize;

        Some(PerformanceStats {
            operation: operation.to_string(),
            count,
            mean_ms: mean,
            median_ms: median,
            std_dev_ms: variance.sqrt(),
            min_ms: durations[0],
            max_ms: durations[count - 1],
            p95_ms: durations[p95_index.min(count - 1)],
        })
    }

    pub fn clear(&self) {
        if let Ok(mut measurements) = self.measurements.lock() {
            measurements.clear();
        }
    }

    pub fn measurement_count(&self) -> usize {
        self.measurements.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn export_to_json(&self) -> Result<String, serde_json::Error> {
        match self.measurements.lock() {
            Ok(measurements) => serde_json::to_string_pretty(&*measurements),
            Err(_) => Ok("[]".to_string()),
        }
    }
}

/// Measures one operation and reports it to a collector on `stop`
pub struct Timer {
    start: Instant,
    operation: String,
    correlation_id: Option<Uuid>,
    metadata: HashMap<String, serde_json::Value>,
}

impl Timer {
    pub fn start(operation: &str, correlation_id: Option<Uuid>) -> Self {
        Self {
            start: Instant::now(),
            operation: operation.to_string(),
            correlation_id,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn stop(self, collector: &MetricsCollector) -> Duration {
        let duration = self.start.elapsed();
        tracing::debug!(
            operation = %self.operation,
            duration_ms = duration.as_millis() as u64,
            correlation_id = ?self.correlation_id,
            "Timer completed"
        );
        collector.record_with_metadata(&self.operation, duration, self.correlation_id, self.metadata);
        duration
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_METRICS: MetricsCollector = MetricsCollector::new(true);
}

/// Process-wide collector used by the workflow driver
pub fn global_metrics() -> &'static MetricsCollector {
    &GLOBAL_METRICS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_metrics_collector() {
        let collector = MetricsCollector::new(true);
        let correlation_id = Uuid::new_v4();

        collector.record("crop", Duration::from_millis(100), Some(correlation_id));
        collector.record("crop", Duration::from_millis(150), Some(correlation_id));
        collector.record("crop", Duration::from_millis(200), None);

        assert_eq!(collector.get_measurements("crop").len(), 3);
        assert_eq!(collector.get_measurements_by_correlation(correlation_id).len(), 2);

        let stats = collector.calculate_stats("crop").unwrap();
        assert_eq!(stats.count, 3);
        assert!((stats.mean_ms - 150.0).abs() < 1.0);
        assert!((stats.median_ms - 150.0).abs() < 1.0);
        assert!(collector.calculate_stats("resample").is_none());
    }

    #[test]
    fn test_timer() {
        let collector = MetricsCollector::new(true);
        let correlation_id = Uuid::new_v4();

        let timer = Timer::start("register", Some(correlation_id))
            .with_metadata("success", serde_json::json!(true));
        thread::sleep(Duration::from_millis(10));
        let duration = timer.stop(&collector);

        assert!(duration >= Duration::from_millis(10));
        let measurements = collector.get_measurements("register");
        assert_eq!(measurements.len(), 1);
        assert_eq!(measurements[0].correlation_id, Some(correlation_id));
        assert_eq!(measurements[0].metadata["success"], serde_json::json!(true));
    }

    #[test]
    fn test_global_metrics_is_shared() {
        let operation = format!("stage-{}", Uuid::new_v4());
        global_metrics().record(&operation, Duration::from_millis(5), None);
        assert!(std::ptr::eq(global_metrics(), global_metrics()));
        assert_eq!(global_metrics().get_measurements(&operation).len(), 1);
    }

    #[test]
    fn test_disabled_collector() {
        let collector = MetricsCollector::new(false);
        collector.record("crop", Duration::from_millis(100), None);
        assert_eq!(collector.measurement_count(), 0);
        assert_eq!(collector.export_to_json().unwrap(), "[]");
    }
}
