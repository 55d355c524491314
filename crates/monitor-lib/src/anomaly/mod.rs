//! Anomaly detection and escalation for service usage
//!
//! This module provides:
//! - Cost threshold and usage spike detection against a baseline
//! - Per-service circuit breaker escalation over recent anomalies

mod circuit_breaker;
mod detector;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerEvent, CircuitBreakerState, TripReason,
    RECENT_ANOMALY_CAPACITY, REPEATED_ANOMALY_TRIP_COUNT,
};
pub use detector::{detect, Anomaly, AnomalyDetector, AnomalyKind, Severity};
