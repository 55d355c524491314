//! Core data models for the usage monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};

/// Point-in-time usage snapshot for a single service
///
/// Samples are produced by usage sources and never mutated afterwards.
/// Construct through [`UsageSample::new`] so that malformed adapter output
/// is rejected before it reaches detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub requests_per_hour: f64,
    pub estimated_cost: f64,
}

impl UsageSample {
    /// Create a validated sample
    pub fn new(
        service: impl Into<String>,
        timestamp: DateTime<Utc>,
        requests_per_hour: f64,
        estimated_cost: f64,
    ) -> Result<Self> {
        let sample = Self {
            service: service.into(),
            timestamp,
            requests_per_hour,
            estimated_cost,
        };
        sample.validate()?;
        Ok(sample)
    }

    /// Create a validated sample stamped with the current time
    pub fn now(
        service: impl Into<String>,
        requests_per_hour: f64,
        estimated_cost: f64,
    ) -> Result<Self> {
        Self::new(service, Utc::now(), requests_per_hour, estimated_cost)
    }

    /// Check that both metrics are finite and non-negative
    pub fn validate(&self) -> Result<()> {
        if self.service.trim().is_empty() {
            return Err(MonitorError::InvalidSample {
                service: self.service.clone(),
                reason: "service name is empty".to_string(),
            });
        }
        check_metric(&self.service, "requests_per_hour", self.requests_per_hour)?;
        check_metric(&self.service, "estimated_cost", self.estimated_cost)
    }
}

fn check_metric(service: &str, name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(MonitorError::InvalidSample {
            service: service.to_string(),
            reason: format!("{name} must be a finite non-negative number, got {value}"),
        });
    }
    Ok(())
}

/// Cost limits for a service
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    #[serde(rename = "hourly")]
    pub hourly_cost_limit: f64,
    #[serde(rename = "daily")]
    pub daily_cost_limit: f64,
}

impl Threshold {
    pub const fn new(hourly_cost_limit: f64, daily_cost_limit: f64) -> Self {
        Self {
            hourly_cost_limit,
            daily_cost_limit,
        }
    }
}
