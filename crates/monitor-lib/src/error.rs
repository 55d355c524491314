//! Error taxonomy for the monitor
//!
//! Per-service errors (`Fetch`, `InvalidSample`, `Timeout`) are isolated to a
//! single cycle, notification errors are logged and dropped, and `Cycle`
//! triggers the loop's backoff. None of them stop the monitor.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// A usage source could not produce a sample this cycle
    #[error("failed to fetch usage for {service}: {reason}")]
    Fetch { service: String, reason: String },

    /// A usage source returned data that does not form a valid sample
    #[error("invalid usage sample for {service}: {reason}")]
    InvalidSample { service: String, reason: String },

    /// A usage source did not answer within the fetch timeout
    #[error("usage fetch for {service} timed out after {timeout:?}")]
    Timeout { service: String, timeout: Duration },

    /// A notifier failed to deliver a message
    #[error("notification delivery failed: {0}")]
    Notification(String),

    /// The whole cycle failed (e.g. every usage source is down)
    #[error("monitoring cycle failed: {0}")]
    Cycle(String),

    /// Configuration could not be loaded; callers fall back to defaults
    #[error("configuration unavailable: {0}")]
    ConfigMissing(String),
}

impl MonitorError {
    pub fn fetch(service: impl Into<String>, reason: impl ToString) -> Self {
        MonitorError::Fetch {
            service: service.into(),
            reason: reason.to_string(),
        }
    }

    /// Service the error is attributed to, if any
    pub fn service(&self) -> Option<&str> {
        match self {
            MonitorError::Fetch { service, .. }
            | MonitorError::InvalidSample { service, .. }
            | MonitorError::Timeout { service, .. } => Some(service),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
