//! Cost threshold and usage spike detection
//!
//! Compares a current usage sample against the service's cost threshold and
//! its baseline sample. Detection is pure: the same inputs always yield the
//! same anomalies.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_SPIKE_MULTIPLIER;
use crate::models::{Threshold, UsageSample};

/// Factor over a limit beyond which an anomaly is High severity
const HIGH_SEVERITY_FACTOR: f64 = 2.0;

/// Anomaly classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    CostThreshold,
    UsageSpike,
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalyKind::CostThreshold => write!(f, "cost_threshold"),
            AnomalyKind::UsageSpike => write!(f, "usage_spike"),
        }
    }
}

/// Severity levels for anomalies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

impl Severity {
    /// High strictly above `factor × limit`; exactly at the boundary stays Medium
    fn for_excess(value: f64, limit: f64) -> Self {
        if value > limit * HIGH_SEVERITY_FACTOR {
            Severity::High
        } else {
            Severity::Medium
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

/// A detected usage anomaly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub service: String,
    pub severity: Severity,
    pub message: String,
    pub metrics: BTreeMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

impl Anomaly {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn is_high(&self) -> bool {
        self.severity == Severity::High
    }
}

/// Detects cost overruns and request spikes
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    /// Ratio to baseline requests that counts as a spike
    pub spike_multiplier: f64,
}

impl AnomalyDetector {
    pub fn new(spike_multiplier: f64) -> Self {
        Self { spike_multiplier }
    }

    /// Run both checks for one service
    ///
    /// # Returns
    /// Zero, one or two anomalies. A cost anomaly, when present, comes first.
    pub fn detect(
        &self,
        service: &str,
        sample: &UsageSample,
        baseline: Option<&UsageSample>,
        threshold: Option<&Threshold>,
    ) -> Vec<Anomaly> {
        detect(service, sample, baseline, threshold, self.spike_multiplier)
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DEFAULT_SPIKE_MULTIPLIER)
    }
}

/// Run the cost and spike checks independently
pub fn detect(
    service: &str,
    sample: &UsageSample,
    baseline: Option<&UsageSample>,
    threshold: Option<&Threshold>,
    spike_multiplier: f64,
) -> Vec<Anomaly> {
    let mut anomalies = Vec::with_capacity(2);

    if let Some(anomaly) = threshold.and_then(|t| check_cost(service, sample, t)) {
        anomalies.push(anomaly);
    }
    if let Some(anomaly) = baseline.and_then(|b| check_spike(service, sample, b, spike_multiplier)) {
        anomalies.push(anomaly);
    }

    anomalies
}

fn check_cost(service: &str, sample: &UsageSample, threshold: &Threshold) -> Option<Anomaly> {
    let cost = sample.estimated_cost;
    let limit = threshold.hourly_cost_limit;

    if cost <= limit {
        return None;
    }

    Some(Anomaly {
        kind: AnomalyKind::CostThreshold,
        service: service.to_string(),
        severity: Severity::for_excess(cost, limit),
        message: format!(
            "{} hourly cost ${:.2} exceeds threshold ${:.2}",
            service, cost, limit
        ),
        metrics: BTreeMap::from([
            ("current_cost".to_string(), cost),
            ("threshold".to_string(), limit),
        ]),
        timestamp: sample.timestamp,
    })
}

fn check_spike(
    service: &str,
    sample: &UsageSample,
    baseline: &UsageSample,
    spike_multiplier: f64,
) -> Option<Anomaly> {
    let baseline_requests = baseline.requests_per_hour;

    // No meaningful baseline to compare against
    if baseline_requests <= 0.0 {
        return None;
    }

    let current_requests = sample.requests_per_hour;
    let multiplier = current_requests / baseline_requests;

    if multiplier <= spike_multiplier {
        return None;
    }

    Some(Anomaly {
        kind: AnomalyKind::UsageSpike,
        service: service.to_string(),
        severity: Severity::for_excess(multiplier, spike_multiplier),
        message: format!(
            "{} usage spike: {:.1}x baseline ({} vs {} req/hour)",
            service, multiplier, current_requests, baseline_requests
        ),
        metrics: BTreeMap::from([
            ("current_requests".to_string(), current_requests),
            ("baseline_requests".to_string(), baseline_requests),
            ("multiplier".to_string(), multiplier),
        ]),
        timestamp: sample.timestamp,
    })
}
