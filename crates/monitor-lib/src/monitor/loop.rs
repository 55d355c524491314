//! Monitoring loop
//!
//! Establishes a baseline, then periodically fetches usage from every source
//! concurrently, evaluates the samples and hands the results to the notifier.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{MonitorSession, MonitorState, StatusHandle};
use crate::anomaly::{Anomaly, CircuitBreakerEvent};
use crate::collector::UsageSource;
use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::health::{components, HealthRegistry};
use crate::models::UsageSample;
use crate::notify::{LogNotifier, Notifier};
use crate::observability::{MonitorMetrics, StructuredLogger};

/// Wait after a failed cycle before resuming
pub const ERROR_BACKOFF: Duration = Duration::from_secs(60);

/// Outcome of a single monitoring cycle
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Services whose usage was fetched successfully
    pub sampled: Vec<String>,
    /// Per-service failures, excluded from detection this cycle
    pub failures: Vec<MonitorError>,
    /// Services skipped because their breaker tripped
    pub paused: Vec<String>,
    pub anomalies: Vec<Anomaly>,
    pub events: Vec<CircuitBreakerEvent>,
}

/// Fan-in result of fetching from several sources
#[derive(Debug, Default)]
struct FetchResults {
    samples: Vec<UsageSample>,
    failures: Vec<MonitorError>,
}

/// Periodic usage monitor
pub struct MonitoringLoop {
    sources: Vec<Arc<dyn UsageSource>>,
    notifier: Arc<dyn Notifier>,
    session: MonitorSession,
    status: StatusHandle,
    health: HealthRegistry,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
    error_backoff: Duration,
}

impl MonitoringLoop {
    /// Handle to the status published after every cycle
    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn session(&self) -> &MonitorSession {
        &self.session
    }

    /// Run until a stop signal arrives
    ///
    /// The signal is only observed between cycles, so an in-flight cycle
    /// always completes. Returns the final session.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> MonitorSession {
        info!(
            interval_secs = self.session.config().monitoring_interval,
            services = self.sources.len(),
            "Starting monitoring loop"
        );

        self.establish_baseline().await;

        loop {
            let started = Instant::now();

            let wait = match self.run_cycle().await {
                Ok(_) => {
                    self.health.set_healthy(components::MONITOR_LOOP).await;
                    self.session
                        .config()
                        .interval()
                        .saturating_sub(started.elapsed())
                }
                Err(e) => {
                    error!(
                        error = %e,
                        backoff_secs = self.error_backoff.as_secs(),
                        "Monitoring cycle failed, backing off"
                    );
                    self.metrics.inc_cycle_failures();
                    self.health
                        .set_degraded(components::MONITOR_LOOP, e.to_string())
                        .await;
                    self.transition(MonitorState::ErrorBackoff).await;
                    self.error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.recv() => {
                    info!("Shutting down monitoring loop");
                    break;
                }
            }
        }

        self.transition(MonitorState::Stopped).await;
        self.session
    }

    /// Capture one sample per source as the baseline
    ///
    /// Failed services get no baseline and skip spike checks.
    pub async fn establish_baseline(&mut self) {
        self.transition(MonitorState::EstablishingBaseline).await;
        info!(services = self.sources.len(), "Establishing baseline usage");

        let results = self.fetch_all(&self.sources).await;
        for failure in &results.failures {
            warn!(error = %failure, "Baseline fetch failed, service will skip spike checks");
        }

        self.logger
            .log_baseline(results.samples.len(), results.failures.len());
        self.session.refresh_baseline(results.samples);
        self.health.set_ready(true).await;
    }

    /// Execute one fetch → detect → escalate → notify pass
    ///
    /// Per-service failures are isolated in the report. Only a total fetch
    /// outage is returned as an error.
    pub async fn run_cycle(&mut self) -> std::result::Result<CycleReport, MonitorError> {
        let started = Instant::now();
        self.transition(MonitorState::Running).await;

        let (active, paused): (Vec<_>, Vec<_>) = self
            .sources
            .iter()
            .cloned()
            .partition(|source| !self.session.is_paused(source.service()));

        let paused: Vec<String> = paused.iter().map(|s| s.service().to_string()).collect();
        if !paused.is_empty() {
            debug!(services = ?paused, "Skipping services with tripped circuit breaker");
        }

        let results = self.fetch_all(&active).await;

        for failure in &results.failures {
            warn!(
                service = failure.service().unwrap_or("unknown"),
                error = %failure,
                "Usage fetch failed, excluding service from this cycle"
            );
        }
        self.health
            .record_fetch_outcome(results.samples.len(), results.failures.len())
            .await;

        if !active.is_empty() && results.samples.is_empty() {
            return Err(MonitorError::Cycle(format!(
                "all {} usage sources failed",
                results.failures.len()
            )));
        }

        let evaluation = self.session.evaluate(&results.samples);
        self.dispatch(&evaluation.anomalies, &evaluation.events).await;

        self.metrics.set_services_monitored(self.sources.len() as i64);
        self.metrics
            .set_services_tripped(self.session.breaker().tripped_services().len() as i64);
        self.metrics
            .observe_cycle_latency(started.elapsed().as_secs_f64());
        self.logger.log_cycle(
            results.samples.len(),
            results.failures.len(),
            evaluation.anomalies.len(),
            started.elapsed().as_millis(),
        );
        self.publish_status().await;

        Ok(CycleReport {
            sampled: results.samples.iter().map(|s| s.service.clone()).collect(),
            failures: results.failures,
            paused,
            anomalies: evaluation.anomalies,
            events: evaluation.events,
        })
    }

    /// Fetch from all given sources concurrently and wait for every one
    async fn fetch_all(&self, sources: &[Arc<dyn UsageSource>]) -> FetchResults {
        let timeout = self.session.config().fetch_timeout();

        let handles: Vec<(String, JoinHandle<(Result<UsageSample, MonitorError>, Duration)>)> =
            sources
                .iter()
                .map(|source| {
                    let source = Arc::clone(source);
                    let service = source.service().to_string();
                    let handle = tokio::spawn(async move {
                        let started = Instant::now();
                        let result = match tokio::time::timeout(timeout, source.fetch_usage()).await
                        {
                            Ok(result) => result,
                            Err(_) => Err(MonitorError::Timeout {
                                service: source.service().to_string(),
                                timeout,
                            }),
                        };
                        (result, started.elapsed())
                    });
                    (service, handle)
                })
                .collect();

        let mut results = FetchResults::default();

        for (service, handle) in handles {
            let outcome = match handle.await {
                Ok((result, elapsed)) => {
                    self.metrics
                        .observe_fetch_latency(&service, elapsed.as_secs_f64());
                    result.and_then(|sample| check_sample(&service, sample))
                }
                Err(e) => Err(MonitorError::fetch(&service, format!("fetch task failed: {e}"))),
            };

            match outcome {
                Ok(sample) => results.samples.push(sample),
                Err(e) => {
                    self.metrics.inc_fetch_errors(&service);
                    results.failures.push(e);
                }
            }
        }

        results
    }

    /// Hand every anomaly and breaker event to the notifier
    ///
    /// Delivery failures are logged and counted, never propagated.
    async fn dispatch(&self, anomalies: &[Anomaly], events: &[CircuitBreakerEvent]) {
        let mut delivery_failed = false;

        for anomaly in anomalies {
            self.metrics.inc_anomalies_detected(anomaly);
            if let Err(e) = self.notifier.notify_anomaly(anomaly).await {
                warn!(service = %anomaly.service, error = %e, "Failed to deliver anomaly alert");
                self.metrics.inc_notification_failures();
                delivery_failed = true;
            }
        }

        for event in events {
            self.metrics.inc_circuit_breaker_trips(&event.service);
            if let Err(e) = self.notifier.notify_breaker(event).await {
                error!(service = %event.service, error = %e, "Failed to deliver circuit breaker alert");
                self.metrics.inc_notification_failures();
                delivery_failed = true;
            }
        }

        if delivery_failed {
            self.health
                .set_degraded(components::NOTIFIER, "alert delivery failed")
                .await;
        } else if !anomalies.is_empty() || !events.is_empty() {
            self.health.set_healthy(components::NOTIFIER).await;
        }
    }

    async fn transition(&mut self, state: MonitorState) {
        if self.session.state() != state {
            debug!(from = ?self.session.state(), to = ?state, "Monitor state change");
        }
        self.session.set_state(state);
        self.publish_status().await;
    }

    async fn publish_status(&self) {
        self.status
            .publish(self.session.status(self.sources.len()))
            .await;
    }
}

/// Reject samples that are malformed or attributed to another service
fn check_sample(service: &str, sample: UsageSample) -> Result<UsageSample, MonitorError> {
    if sample.service != service {
        return Err(MonitorError::InvalidSample {
            service: service.to_string(),
            reason: format!("source returned a sample for {}", sample.service),
        });
    }
    sample.validate()?;
    Ok(sample)
}

/// Builder for the monitoring loop
pub struct MonitoringLoopBuilder {
    sources: Vec<Arc<dyn UsageSource>>,
    notifier: Option<Arc<dyn Notifier>>,
    config: MonitorConfig,
    health: Option<HealthRegistry>,
    status: Option<StatusHandle>,
    logger: Option<StructuredLogger>,
    error_backoff: Duration,
}

impl MonitoringLoopBuilder {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            notifier: None,
            config: MonitorConfig::default(),
            health: None,
            status: None,
            logger: None,
            error_backoff: ERROR_BACKOFF,
        }
    }

    pub fn source(mut self, source: Arc<dyn UsageSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn sources(mut self, sources: impl IntoIterator<Item = Arc<dyn UsageSource>>) -> Self {
        self.sources.extend(sources);
        self
    }

    /// Defaults to logging alerts when unset
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn status(mut self, status: StatusHandle) -> Self {
        self.status = Some(status);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Build the loop
    pub fn build(self) -> Result<MonitoringLoop> {
        self.config.validate()?;

        let mut services: Vec<&str> = self.sources.iter().map(|s| s.service()).collect();
        services.sort_unstable();
        if let Some(pair) = services.windows(2).find(|w| w[0] == w[1]) {
            anyhow::bail!("Duplicate usage source for service {}", pair[0]);
        }
        if self.sources.is_empty() {
            warn!("No usage sources configured, monitor will idle");
        }

        let logger = self
            .logger
            .unwrap_or_else(|| StructuredLogger::new("runaway-monitor"));
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(LogNotifier::new(logger.clone())));

        Ok(MonitoringLoop {
            sources: self.sources,
            notifier,
            session: MonitorSession::new(self.config),
            status: self.status.unwrap_or_default(),
            health: self.health.unwrap_or_default(),
            metrics: MonitorMetrics::new(),
            logger,
            error_backoff: self.error_backoff,
        })
    }
}

impl Default for MonitoringLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{AnomalyKind, Severity};
    use crate::models::Threshold;
    use crate::notify::testing::RecordingNotifier;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays scripted results, repeating the last one
    struct ScriptedSource {
        service: String,
        script: Mutex<VecDeque<std::result::Result<(f64, f64), String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(
            service: &str,
            script: Vec<std::result::Result<(f64, f64), String>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                service: service.to_string(),
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl UsageSource for ScriptedSource {
        fn service(&self) -> &str {
            &self.service
        }

        async fn fetch_usage(&self) -> std::result::Result<UsageSample, MonitorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.pop_front().unwrap()
                } else {
                    script.front().cloned().unwrap()
                }
            };
            match next {
                Ok((requests, cost)) => UsageSample::now(&self.service, requests, cost),
                Err(reason) => Err(MonitorError::fetch(&self.service, reason)),
            }
        }
    }

    /// Never answers within any reasonable timeout
    struct HangingSource;

    #[async_trait]
    impl UsageSource for HangingSource {
        fn service(&self) -> &str {
            "stripe"
        }

        async fn fetch_usage(&self) -> std::result::Result<UsageSample, MonitorError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            UsageSample::now("stripe", 0.0, 0.0)
        }
    }

    /// Reports usage under the wrong service name
    struct MislabelledSource;

    #[async_trait]
    impl UsageSource for MislabelledSource {
        fn service(&self) -> &str {
            "supabase"
        }

        async fn fetch_usage(&self) -> std::result::Result<UsageSample, MonitorError> {
            UsageSample::now("cloudflare", 1.0, 1.0)
        }
    }

    fn config() -> MonitorConfig {
        MonitorConfig {
            monitoring_interval: 1,
            fetch_timeout: 1,
            cost_thresholds: HashMap::from([
                ("openai".to_string(), Threshold::new(10.0, 100.0)),
                ("github".to_string(), Threshold::new(5.0, 50.0)),
            ]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_builder_rejects_invalid_config() {
        let result = MonitoringLoopBuilder::new()
            .config(MonitorConfig {
                monitoring_interval: 0,
                ..Default::default()
            })
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_builder_rejects_duplicate_services() {
        let result = MonitoringLoopBuilder::new()
            .source(ScriptedSource::new("openai", vec![Ok((1.0, 1.0))]))
            .source(ScriptedSource::new("openai", vec![Ok((1.0, 1.0))]))
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_partial_failure_isolated() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut monitor = MonitoringLoopBuilder::new()
            .config(config())
            .source(ScriptedSource::new("openai", vec![Ok((10.0, 1.0)), Ok((10.0, 12.0))]))
            .source(ScriptedSource::new("github", vec![Err("rate limited".to_string())]))
            .source(ScriptedSource::new("stripe", vec![Ok((5.0, 1.0))]))
            .notifier(notifier.clone())
            .build()
            .unwrap();

        monitor.establish_baseline().await;
        assert_eq!(monitor.session().baseline().len(), 2);

        let report = monitor.run_cycle().await.unwrap();

        assert_eq!(report.sampled, vec!["openai", "stripe"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].service(), Some("github"));
        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(report.anomalies[0].kind, AnomalyKind::CostThreshold);
        assert_eq!(notifier.anomalies.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_total_outage_is_cycle_failure() {
        let mut monitor = MonitoringLoopBuilder::new()
            .config(config())
            .source(ScriptedSource::new("openai", vec![Err("down".to_string())]))
            .source(ScriptedSource::new("github", vec![Err("down".to_string())]))
            .build()
            .unwrap();

        let err = monitor.run_cycle().await.unwrap_err();
        assert!(matches!(err, MonitorError::Cycle(_)));
    }

    #[tokio::test]
    async fn test_no_sources_is_not_a_failure() {
        let mut monitor = MonitoringLoopBuilder::new().config(config()).build().unwrap();
        let report = monitor.run_cycle().await.unwrap();
        assert!(report.sampled.is_empty());
        assert!(report.anomalies.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_is_fetch_failure() {
        let mut monitor = MonitoringLoopBuilder::new()
            .config(config())
            .source(Arc::new(HangingSource))
            .source(ScriptedSource::new("openai", vec![Ok((1.0, 1.0))]))
            .build()
            .unwrap();

        let report = monitor.run_cycle().await.unwrap();

        assert_eq!(report.sampled, vec!["openai"]);
        assert!(matches!(report.failures[0], MonitorError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_mislabelled_sample_rejected() {
        let mut monitor = MonitoringLoopBuilder::new()
            .config(config())
            .source(Arc::new(MislabelledSource))
            .source(ScriptedSource::new("openai", vec![Ok((1.0, 1.0))]))
            .build()
            .unwrap();

        let report = monitor.run_cycle().await.unwrap();
        assert!(matches!(report.failures[0], MonitorError::InvalidSample { .. }));
    }

    #[tokio::test]
    async fn test_tripped_service_is_paused() {
        let openai = ScriptedSource::new("openai", vec![Ok((1.0, 50.0))]);
        let notifier = Arc::new(RecordingNotifier::default());
        let mut monitor = MonitoringLoopBuilder::new()
            .config(config())
            .source(openai.clone())
            .source(ScriptedSource::new("github", vec![Ok((1.0, 1.0))]))
            .notifier(notifier.clone())
            .build()
            .unwrap();

        let first = monitor.run_cycle().await.unwrap();
        assert_eq!(first.events.len(), 1);
        assert_eq!(first.anomalies[0].severity, Severity::High);

        let second = monitor.run_cycle().await.unwrap();
        assert_eq!(second.paused, vec!["openai"]);
        assert_eq!(second.sampled, vec!["github"]);
        assert_eq!(openai.calls.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.events.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_abort_cycle() {
        let notifier = Arc::new(RecordingNotifier::failing());
        let mut monitor = MonitoringLoopBuilder::new()
            .config(config())
            .source(ScriptedSource::new("openai", vec![Ok((1.0, 25.0))]))
            .notifier(notifier.clone())
            .build()
            .unwrap();

        let report = monitor.run_cycle().await.unwrap();

        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(report.events.len(), 1);
        assert_eq!(notifier.events.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_status_published_after_cycle() {
        let mut monitor = MonitoringLoopBuilder::new()
            .config(config())
            .source(ScriptedSource::new("openai", vec![Ok((1.0, 25.0))]))
            .build()
            .unwrap();
        let status = monitor.status_handle();

        assert_eq!(status.snapshot().await.state, MonitorState::Idle);

        monitor.run_cycle().await.unwrap();

        let snapshot = status.snapshot().await;
        assert_eq!(snapshot.state, MonitorState::Running);
        assert_eq!(snapshot.anomalies_detected, 1);
        assert_eq!(snapshot.tripped_services, vec!["openai"]);
        assert!(snapshot.last_check.is_some());
    }

    #[tokio::test]
    async fn test_run_stops_after_current_cycle() {
        let openai = ScriptedSource::new("openai", vec![Ok((1.0, 1.0))]);
        let monitor = MonitoringLoopBuilder::new()
            .config(config())
            .source(openai.clone())
            .build()
            .unwrap();
        let status = monitor.status_handle();

        let (tx, rx) = broadcast::channel(1);
        tx.send(()).unwrap();

        let session = tokio::time::timeout(Duration::from_secs(5), monitor.run(rx))
            .await
            .expect("loop should stop");

        // baseline fetch plus exactly one full cycle
        assert_eq!(openai.calls.load(Ordering::SeqCst), 2);
        assert_eq!(session.state(), MonitorState::Stopped);
        assert!(!status.snapshot().await.active);
    }

    #[tokio::test]
    async fn test_run_backs_off_after_total_outage() {
        let monitor = MonitoringLoopBuilder::new()
            .config(config())
            .source(ScriptedSource::new("openai", vec![Err("down".to_string())]))
            .error_backoff(Duration::from_millis(10))
            .build()
            .unwrap();
        let status = monitor.status_handle();

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(monitor.run(rx));

        let mut saw_backoff = false;
        for _ in 0..100 {
            if status.snapshot().await.state == MonitorState::ErrorBackoff {
                saw_backoff = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(saw_backoff);

        tx.send(()).unwrap();
        let session = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop should stop")
            .unwrap();
        assert_eq!(session.state(), MonitorState::Stopped);
    }
}
