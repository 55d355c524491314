//! Observability infrastructure for the usage monitor
//!
//! Provides:
//! - Prometheus metrics (cycle latency, fetch latency, anomalies, breaker trips)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter,
    register_int_counter_vec, register_int_gauge, Histogram, HistogramVec, IntCounter,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

use crate::anomaly::{Anomaly, CircuitBreakerEvent, Severity};

/// Histogram buckets for cycle and fetch latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    cycle_latency_seconds: Histogram,
    fetch_latency_seconds: HistogramVec,
    cycles_completed: IntCounter,
    cycle_failures: IntCounter,
    anomalies_detected: IntCounterVec,
    fetch_errors: IntCounterVec,
    circuit_breaker_trips: IntCounterVec,
    notification_failures: IntCounter,
    services_monitored: IntGauge,
    services_tripped: IntGauge,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram!(
                "runaway_monitor_cycle_latency_seconds",
                "Time spent on a full monitoring cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            fetch_latency_seconds: register_histogram_vec!(
                "runaway_monitor_fetch_latency_seconds",
                "Time spent fetching usage from a single service",
                &["service"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register fetch_latency_seconds"),

            cycles_completed: register_int_counter!(
                "runaway_monitor_cycles_total",
                "Total number of completed monitoring cycles"
            )
            .expect("Failed to register cycles_total"),

            cycle_failures: register_int_counter!(
                "runaway_monitor_cycle_failures_total",
                "Total number of monitoring cycles that entered backoff"
            )
            .expect("Failed to register cycle_failures_total"),

            anomalies_detected: register_int_counter_vec!(
                "runaway_monitor_anomalies_detected_total",
                "Total number of anomalies detected",
                &["service", "kind", "severity"]
            )
            .expect("Failed to register anomalies_detected_total"),

            fetch_errors: register_int_counter_vec!(
                "runaway_monitor_fetch_errors_total",
                "Total number of usage fetch failures",
                &["service"]
            )
            .expect("Failed to register fetch_errors_total"),

            circuit_breaker_trips: register_int_counter_vec!(
                "runaway_monitor_circuit_breaker_trips_total",
                "Total number of circuit breaker trips",
                &["service"]
            )
            .expect("Failed to register circuit_breaker_trips_total"),

            notification_failures: register_int_counter!(
                "runaway_monitor_notification_failures_total",
                "Total number of failed notification deliveries"
            )
            .expect("Failed to register notification_failures_total"),

            services_monitored: register_int_gauge!(
                "runaway_monitor_services_monitored",
                "Number of services with a usage source"
            )
            .expect("Failed to register services_monitored"),

            services_tripped: register_int_gauge!(
                "runaway_monitor_services_tripped",
                "Number of services whose circuit breaker has tripped"
            )
            .expect("Failed to register services_tripped"),
        }
    }
}

/// Monitor metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_cycle_latency(&self, duration_secs: f64) {
        self.inner().cycle_latency_seconds.observe(duration_secs);
        self.inner().cycles_completed.inc();
    }

    pub fn observe_fetch_latency(&self, service: &str, duration_secs: f64) {
        self.inner()
            .fetch_latency_seconds
            .with_label_values(&[service])
            .observe(duration_secs);
    }

    pub fn inc_cycle_failures(&self) {
        self.inner().cycle_failures.inc();
    }

    pub fn inc_anomalies_detected(&self, anomaly: &Anomaly) {
        let kind = anomaly.kind.to_string();
        let severity = anomaly.severity.to_string();
        self.inner()
            .anomalies_detected
            .with_label_values(&[anomaly.service.as_str(), kind.as_str(), severity.as_str()])
            .inc();
    }

    pub fn inc_fetch_errors(&self, service: &str) {
        self.inner().fetch_errors.with_label_values(&[service]).inc();
    }

    pub fn inc_circuit_breaker_trips(&self, service: &str) {
        self.inner()
            .circuit_breaker_trips
            .with_label_values(&[service])
            .inc();
    }

    pub fn inc_notification_failures(&self) {
        self.inner().notification_failures.inc();
    }

    pub fn set_services_monitored(&self, count: i64) {
        self.inner().services_monitored.set(count);
    }

    pub fn set_services_tripped(&self, count: i64) {
        self.inner().services_tripped.set(count);
    }
}

/// Structured logger for monitor events
///
/// Every record carries an `event` field so log pipelines can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, services: usize) {
        info!(
            event = "monitor_started",
            instance = %self.instance,
            version = %version,
            services = services,
            "Runaway monitor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Runaway monitor shutting down"
        );
    }

    pub fn log_baseline(&self, established: usize, failed: usize) {
        info!(
            event = "baseline_established",
            instance = %self.instance,
            services = established,
            failed = failed,
            "Baseline established"
        );
    }

    /// Log a detected anomaly; High severity is logged at warn
    pub fn log_anomaly(&self, anomaly: &Anomaly) {
        match anomaly.severity {
            Severity::High => warn!(
                event = "anomaly_detected",
                instance = %self.instance,
                service = %anomaly.service,
                kind = %anomaly.kind,
                severity = %anomaly.severity,
                metrics = ?anomaly.metrics,
                "{}",
                anomaly.message
            ),
            Severity::Medium => info!(
                event = "anomaly_detected",
                instance = %self.instance,
                service = %anomaly.service,
                kind = %anomaly.kind,
                severity = %anomaly.severity,
                metrics = ?anomaly.metrics,
                "{}",
                anomaly.message
            ),
        }
    }

    pub fn log_breaker_trip(&self, event: &CircuitBreakerEvent) {
        error!(
            event = "circuit_breaker_tripped",
            instance = %self.instance,
            service = %event.service,
            reason = %event.reason,
            trigger = %event.anomaly.message,
            "Circuit breaker tripped"
        );
    }

    pub fn log_cycle(&self, succeeded: usize, failed: usize, anomalies: usize, elapsed_ms: u128) {
        info!(
            event = "cycle_completed",
            instance = %self.instance,
            succeeded = succeeded,
            failed = failed,
            anomalies = anomalies,
            elapsed_ms = elapsed_ms as u64,
            "Monitoring cycle complete"
        );
    }
}
