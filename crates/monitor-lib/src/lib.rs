//! Runaway API usage monitor library
//!
//! This crate provides the core functionality for:
//! - Usage collection from third-party API providers
//! - Cost threshold and usage spike detection
//! - Circuit breaker escalation per service
//! - Alert delivery with cooldown
//! - Health checks and observability

pub mod anomaly;
pub mod collector;
pub mod config;
pub mod error;
pub mod health;
pub mod models;
pub mod monitor;
pub mod notify;
pub mod observability;

pub use anomaly::{
    detect, Anomaly, AnomalyDetector, AnomalyKind, CircuitBreaker, CircuitBreakerEvent,
    CircuitBreakerState, Severity, TripReason,
};
pub use config::{CircuitBreakerConfig, MonitorConfig};
pub use error::{MonitorError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use monitor::{
    MonitorSession, MonitorState, MonitorStatus, MonitoringLoop, MonitoringLoopBuilder,
    StatusHandle,
};
pub use observability::{MonitorMetrics, StructuredLogger};
