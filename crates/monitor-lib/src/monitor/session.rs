//! Monitor session state
//!
//! The session owns everything that changes while monitoring runs: the
//! baseline, the circuit breaker and the counters. Only the monitoring loop
//! holds it, so no locking is needed.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::{MonitorState, MonitorStatus};
use crate::anomaly::{Anomaly, AnomalyDetector, CircuitBreaker, CircuitBreakerEvent};
use crate::config::MonitorConfig;
use crate::models::UsageSample;

/// One reference sample per service
#[derive(Debug, Clone, Default)]
pub struct Baseline {
    samples: HashMap<String, UsageSample>,
}

impl Baseline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, service: &str) -> Option<&UsageSample> {
        self.samples.get(service)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Replace the whole baseline; services absent from `samples` lose theirs
    pub fn refresh(&mut self, samples: impl IntoIterator<Item = UsageSample>) {
        self.samples = samples
            .into_iter()
            .map(|s| (s.service.clone(), s))
            .collect();
    }
}

/// Anomalies and trips produced by evaluating one cycle's samples
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub anomalies: Vec<Anomaly>,
    pub events: Vec<CircuitBreakerEvent>,
}

/// Explicit owned monitor state
#[derive(Debug, Clone)]
pub struct MonitorSession {
    config: MonitorConfig,
    detector: AnomalyDetector,
    baseline: Baseline,
    breaker: CircuitBreaker,
    state: MonitorState,
    anomalies_detected: u64,
    last_check: Option<DateTime<Utc>>,
}

impl MonitorSession {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            detector: AnomalyDetector::new(config.usage_spike_multiplier),
            breaker: CircuitBreaker::new(config.circuit_breaker.enabled),
            baseline: Baseline::new(),
            state: MonitorState::Idle,
            anomalies_detected: 0,
            last_check: None,
            config,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn anomalies_detected(&self) -> u64 {
        self.anomalies_detected
    }

    pub(crate) fn set_state(&mut self, state: MonitorState) {
        self.state = state;
    }

    pub fn refresh_baseline(&mut self, samples: impl IntoIterator<Item = UsageSample>) {
        self.baseline.refresh(samples);
    }

    /// Whether a service should be skipped this cycle
    pub fn is_paused(&self, service: &str) -> bool {
        self.config.circuit_breaker.pause_tripped && self.breaker.is_tripped(service)
    }

    /// Detect anomalies for every sample, then escalate each in detection order
    pub fn evaluate(&mut self, samples: &[UsageSample]) -> Evaluation {
        let anomalies: Vec<Anomaly> = samples
            .iter()
            .flat_map(|sample| {
                self.detector.detect(
                    &sample.service,
                    sample,
                    self.baseline.get(&sample.service),
                    self.config.threshold_for(&sample.service),
                )
            })
            .collect();

        let events = anomalies
            .iter()
            .filter_map(|anomaly| self.breaker.record(anomaly))
            .collect();

        self.anomalies_detected += anomalies.len() as u64;
        self.last_check = Some(Utc::now());

        Evaluation { anomalies, events }
    }

    pub fn status(&self, services_monitored: usize) -> MonitorStatus {
        MonitorStatus {
            state: self.state,
            active: self.state.is_active(),
            last_check: self.last_check,
            anomalies_detected: self.anomalies_detected,
            services_monitored,
            tripped_services: self.breaker.tripped_services(),
        }
    }
}
