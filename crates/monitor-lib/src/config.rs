//! Monitor configuration
//!
//! Loaded once at startup by the binary. Every field has a default so a
//! missing or partial configuration still yields a usable monitor.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};
use crate::models::Threshold;

/// Default monitoring interval (5 minutes)
pub const DEFAULT_MONITORING_INTERVAL_SECS: u64 = 300;

/// Default usage spike multiplier relative to baseline
pub const DEFAULT_SPIKE_MULTIPLIER: f64 = 3.0;

/// Default cooldown between repeated alerts of the same kind (30 minutes)
pub const DEFAULT_ALERT_COOLDOWN_SECS: u64 = 1800;

/// Default per-source fetch timeout
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Circuit breaker settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// When disabled, anomalies are still recorded but nothing trips
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Stop polling a service once its breaker has tripped
    #[serde(default = "default_true")]
    pub pause_tripped: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pause_tripped: true,
        }
    }
}

/// Usage monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between monitoring cycles
    #[serde(default = "default_monitoring_interval")]
    pub monitoring_interval: u64,

    /// Cost limits keyed by service name
    #[serde(default = "default_cost_thresholds")]
    pub cost_thresholds: HashMap<String, Threshold>,

    /// Ratio to baseline requests above which a spike is reported
    #[serde(default = "default_spike_multiplier")]
    pub usage_spike_multiplier: f64,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Seconds during which repeated alerts of the same kind are suppressed
    #[serde(default = "default_alert_cooldown")]
    pub alert_cooldown: u64,

    /// Seconds to wait for a single usage source
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: u64,
}

fn default_true() -> bool {
    true
}

fn default_monitoring_interval() -> u64 {
    DEFAULT_MONITORING_INTERVAL_SECS
}

fn default_spike_multiplier() -> f64 {
    DEFAULT_SPIKE_MULTIPLIER
}

fn default_alert_cooldown() -> u64 {
    DEFAULT_ALERT_COOLDOWN_SECS
}

fn default_fetch_timeout() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

fn default_cost_thresholds() -> HashMap<String, Threshold> {
    HashMap::from([
        ("openai".to_string(), Threshold::new(10.0, 100.0)),
        ("github".to_string(), Threshold::new(5.0, 50.0)),
        ("stripe".to_string(), Threshold::new(50.0, 500.0)),
        ("supabase".to_string(), Threshold::new(5.0, 25.0)),
    ])
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            monitoring_interval: default_monitoring_interval(),
            cost_thresholds: default_cost_thresholds(),
            usage_spike_multiplier: default_spike_multiplier(),
            circuit_breaker: CircuitBreakerConfig::default(),
            alert_cooldown: default_alert_cooldown(),
            fetch_timeout: default_fetch_timeout(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.monitoring_interval)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }

    pub fn threshold_for(&self, service: &str) -> Option<&Threshold> {
        self.cost_thresholds.get(service)
    }

    /// Reject values that would make the loop spin or detection meaningless
    pub fn validate(&self) -> Result<()> {
        if self.monitoring_interval == 0 {
            return Err(MonitorError::ConfigMissing(
                "monitoring_interval must be greater than zero".to_string(),
            ));
        }
        if self.fetch_timeout == 0 {
            return Err(MonitorError::ConfigMissing(
                "fetch_timeout must be greater than zero".to_string(),
            ));
        }
        if !self.usage_spike_multiplier.is_finite() || self.usage_spike_multiplier <= 0.0 {
            return Err(MonitorError::ConfigMissing(format!(
                "usage_spike_multiplier must be positive, got {}",
                self.usage_spike_multiplier
            )));
        }
        for (service, threshold) in &self.cost_thresholds {
            if !(threshold.hourly_cost_limit >= 0.0 && threshold.daily_cost_limit >= 0.0) {
                return Err(MonitorError::ConfigMissing(format!(
                    "cost threshold for {service} must be non-negative"
                )));
            }
        }
        Ok(())
    }
}
