//! Structured logging for the registration pipeline
//!
//! Subscriber setup, per-thread correlation ids that tie the log lines of one
//! registration run together, stage spans and duration metrics.

pub mod config;
pub mod metrics;
pub mod spans;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

pub use config::LoggingConfig;
pub use metrics::{global_metrics, MetricsCollector, PerformanceMeasurement, PerformanceStats, Timer};
pub use spans::{PipelineSpan, RunSpan};

thread_local! {
    static CORRELATION_ID: std::cell::RefCell<Option<Uuid>> = const { std::cell::RefCell::new(None) };
}

/// Initialize the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the program when file logging is enabled.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let mut layers = Vec::new();
    let mut guard = None;

    if config.console_output {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(config.include_file_location)
            .with_file(config.include_file_location);
        layers.push(console_layer.boxed());
    }

    if let Some(ref log_dir) = config.log_directory {
        let file_appender = tracing_appender::rolling::daily(log_dir, &config.log_file_prefix);
        let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(worker_guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .json();
        layers.push(file_layer.boxed());
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    tracing::info!(?config, "Logging system initialized");
    Ok(guard)
}

/// Set a correlation ID for the current thread
pub fn set_correlation_id(id: Uuid) {
    CORRELATION_ID.with(|correlation_id| {
        *correlation_id.borrow_mut() = Some(id);
    });
}

/// Get the current correlation ID for this thread
pub fn get_correlation_id() -> Option<Uuid> {
    CORRELATION_ID.with(|correlation_id| *correlation_id.borrow())
}

/// Generate a new correlation ID and set it for the current thread
pub fn new_correlation_id() -> Uuid {
    let id = Uuid::new_v4();
    set_correlation_id(id);
    id
}

/// Clear the correlation ID for the current thread
pub fn clear_correlation_id() {
    CORRELATION_ID.with(|correlation_id| {
        *correlation_id.borrow_mut() = None;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_management() {
        clear_correlation_id();
        assert!(get_correlation_id().is_none());

        let id = new_correlation_id();
        assert_eq!(get_correlation_id(), Some(id));

        clear_correlation_id();
        assert!(get_correlation_id().is_none());
    }

    #[test]
    fn test_correlation_id_is_per_thread() {
        let id = new_correlation_id();
        let other = std::thread::spawn(get_correlation_id).join().unwrap();
        assert!(other.is_none());
        assert_eq!(get_correlation_id(), Some(id));
    }
}
