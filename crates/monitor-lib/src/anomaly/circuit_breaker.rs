//! Per-service circuit breaker
//!
//! Two states per service:
//! ```text
//! Closed → Tripped: incoming anomaly is High severity
//! Closed → Tripped: recent history holds >= 3 anomalies
//! Tripped: terminal for the session, cleared only by manual intervention
//! ```

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Anomaly;

/// Anomalies retained per service
pub const RECENT_ANOMALY_CAPACITY: usize = 10;

/// Anomalies within the retained history that trip the breaker
pub const REPEATED_ANOMALY_TRIP_COUNT: usize = 3;

/// Why a breaker tripped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TripReason {
    HighSeverity,
    RepeatedAnomalies { count: usize },
}

impl std::fmt::Display for TripReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TripReason::HighSeverity => write!(f, "high severity anomaly"),
            TripReason::RepeatedAnomalies { count } => {
                write!(f, "{} anomalies in recent history", count)
            }
        }
    }
}

/// Emitted once when a service's breaker trips
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerEvent {
    pub service: String,
    /// The anomaly that caused the trip
    pub anomaly: Anomaly,
    pub reason: TripReason,
    pub tripped_at: DateTime<Utc>,
}

/// Breaker state for one service
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerState {
    pub tripped: bool,
    pub trip_reason: Option<Anomaly>,
    recent_anomalies: VecDeque<Anomaly>,
}

impl CircuitBreakerState {
    /// Append, evicting the oldest entry once capacity is exceeded
    fn push(&mut self, anomaly: Anomaly) {
        self.recent_anomalies.push_back(anomaly);
        while self.recent_anomalies.len() > RECENT_ANOMALY_CAPACITY {
            self.recent_anomalies.pop_front();
        }
    }

    /// Recent anomalies, oldest first
    pub fn recent_anomalies(&self) -> impl Iterator<Item = &Anomaly> {
        self.recent_anomalies.iter()
    }

    pub fn recent_count(&self) -> usize {
        self.recent_anomalies.len()
    }
}

/// Escalation policy over all monitored services
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    enabled: bool,
    states: HashMap<String, CircuitBreakerState>,
}

impl CircuitBreaker {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            states: HashMap::new(),
        }
    }

    /// Record an anomaly and decide whether its service trips
    ///
    /// The anomaly always enters the service's history. An event is returned
    /// only on the Closed → Tripped transition.
    pub fn record(&mut self, anomaly: &Anomaly) -> Option<CircuitBreakerEvent> {
        let enabled = self.enabled;
        let state = self.states.entry(anomaly.service.clone()).or_default();
        state.push(anomaly.clone());

        if !enabled || state.tripped {
            return None;
        }

        let reason = if anomaly.is_high() {
            TripReason::HighSeverity
        } else if state.recent_count() >= REPEATED_ANOMALY_TRIP_COUNT {
            TripReason::RepeatedAnomalies {
                count: state.recent_count(),
            }
        } else {
            return None;
        };

        state.tripped = true;
        state.trip_reason = Some(anomaly.clone());

        Some(CircuitBreakerEvent {
            service: anomaly.service.clone(),
            anomaly: anomaly.clone(),
            reason,
            tripped_at: Utc::now(),
        })
    }

    pub fn is_tripped(&self, service: &str) -> bool {
        self.states.get(service).map(|s| s.tripped).unwrap_or(false)
    }

    pub fn state(&self, service: &str) -> Option<&CircuitBreakerState> {
        self.states.get(service)
    }

    /// Services currently tripped, sorted by name
    pub fn tripped_services(&self) -> Vec<String> {
        let mut services: Vec<String> = self
            .states
            .iter()
            .filter(|(_, s)| s.tripped)
            .map(|(name, _)| name.clone())
            .collect();
        services.sort();
        services
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{AnomalyKind, Severity};
    use std::collections::BTreeMap;

    fn anomaly(service: &str, severity: Severity, seq: f64) -> Anomaly {
        Anomaly {
            kind: AnomalyKind::CostThreshold,
            service: service.to_string(),
            severity,
            message: format!("synthetic #{seq}"),
            metrics: BTreeMap::from([("seq".to_string(), seq)]),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_single_high_trips_immediately() {
        let mut breaker = CircuitBreaker::default();

        let event = breaker.record(&anomaly("openai", Severity::High, 1.0)).unwrap();

        assert_eq!(event.service, "openai");
        assert_eq!(event.reason, TripReason::HighSeverity);
        assert!(breaker.is_tripped("openai"));
        assert_eq!(
            breaker.state("openai").unwrap().trip_reason.as_ref().unwrap().message,
            "synthetic #1"
        );
    }

    #[test]
    fn test_third_medium_trips() {
        let mut breaker = CircuitBreaker::default();

        assert!(breaker.record(&anomaly("github", Severity::Medium, 1.0)).is_none());
        assert!(breaker.record(&anomaly("github", Severity::Medium, 2.0)).is_none());
        assert!(!breaker.is_tripped("github"));

        let event = breaker.record(&anomaly("github", Severity::Medium, 3.0)).unwrap();
        assert_eq!(event.reason, TripReason::RepeatedAnomalies { count: 3 });
        assert_eq!(event.anomaly.metric("seq"), Some(3.0));
        assert!(breaker.is_tripped("github"));
    }

    #[test]
    fn test_histories_are_per_service() {
        let mut breaker = CircuitBreaker::default();

        breaker.record(&anomaly("openai", Severity::Medium, 1.0));
        breaker.record(&anomaly("github", Severity::Medium, 2.0));
        breaker.record(&anomaly("stripe", Severity::Medium, 3.0));
        breaker.record(&anomaly("openai", Severity::Medium, 4.0));

        assert!(breaker.tripped_services().is_empty());
        assert_eq!(breaker.state("openai").unwrap().recent_count(), 2);
    }

    #[test]
    fn test_tripped_is_terminal_and_emits_once() {
        let mut breaker = CircuitBreaker::default();

        assert!(breaker.record(&anomaly("openai", Severity::High, 1.0)).is_some());
        assert!(breaker.record(&anomaly("openai", Severity::High, 2.0)).is_none());
        assert!(breaker.record(&anomaly("openai", Severity::Medium, 3.0)).is_none());

        let state = breaker.state("openai").unwrap();
        assert!(state.tripped);
        assert_eq!(state.recent_count(), 3);
        assert_eq!(state.trip_reason.as_ref().unwrap().metric("seq"), Some(1.0));
    }

    #[test]
    fn test_history_bounded_with_oldest_first_eviction() {
        let mut breaker = CircuitBreaker::new(false);

        for seq in 1..=15 {
            breaker.record(&anomaly("openai", Severity::Medium, seq as f64));
            assert!(breaker.state("openai").unwrap().recent_count() <= RECENT_ANOMALY_CAPACITY);
        }

        let retained: Vec<f64> = breaker
            .state("openai")
            .unwrap()
            .recent_anomalies()
            .map(|a| a.metric("seq").unwrap())
            .collect();
        let expected: Vec<f64> = (6..=15).map(|s| s as f64).collect();
        assert_eq!(retained, expected);
    }

    #[test]
    fn test_disabled_breaker_records_but_never_trips() {
        let mut breaker = CircuitBreaker::new(false);

        assert!(breaker.record(&anomaly("openai", Severity::High, 1.0)).is_none());
        for seq in 2..=5 {
            assert!(breaker.record(&anomaly("openai", Severity::Medium, seq as f64)).is_none());
        }

        assert!(!breaker.is_tripped("openai"));
        assert_eq!(breaker.state("openai").unwrap().recent_count(), 5);
    }

    #[test]
    fn test_tripped_services_sorted() {
        let mut breaker = CircuitBreaker::default();
        breaker.record(&anomaly("stripe", Severity::High, 1.0));
        breaker.record(&anomaly("github", Severity::High, 2.0));
        breaker.record(&anomaly("openai", Severity::Medium, 3.0));

        assert_eq!(breaker.tripped_services(), vec!["github", "stripe"]);
    }
}
