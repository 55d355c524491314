//! Delivery of anomalies and circuit breaker events
//!
//! Notifiers are fire-and-forget from the monitor's perspective: a failed
//! delivery is reported back as an error, logged by the caller and never
//! aborts a cycle.

mod cooldown;
mod telegram;

pub use cooldown::CooldownNotifier;
pub use telegram::{TelegramConfig, TelegramNotifier};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::anomaly::{Anomaly, CircuitBreakerEvent};
use crate::error::{MonitorError, Result};
use crate::observability::StructuredLogger;

/// Sink for monitor alerts
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_anomaly(&self, anomaly: &Anomaly) -> Result<()>;

    async fn notify_breaker(&self, event: &CircuitBreakerEvent) -> Result<()>;
}

/// Writes alerts to the structured log
pub struct LogNotifier {
    logger: StructuredLogger,
}

impl LogNotifier {
    pub fn new(logger: StructuredLogger) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_anomaly(&self, anomaly: &Anomaly) -> Result<()> {
        self.logger.log_anomaly(anomaly);
        Ok(())
    }

    async fn notify_breaker(&self, event: &CircuitBreakerEvent) -> Result<()> {
        self.logger.log_breaker_trip(event);
        Ok(())
    }
}

/// Delivers every alert to all inner notifiers
///
/// Each notifier is attempted even if an earlier one fails; failures are
/// joined into a single error.
#[derive(Default)]
pub struct FanoutNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    fn collect_errors(results: Vec<Result<()>>) -> Result<()> {
        let errors: Vec<String> = results
            .into_iter()
            .filter_map(|r| r.err().map(|e| e.to_string()))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MonitorError::Notification(errors.join("; ")))
        }
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify_anomaly(&self, anomaly: &Anomaly) -> Result<()> {
        let mut results = Vec::with_capacity(self.notifiers.len());
        for notifier in &self.notifiers {
            results.push(notifier.notify_anomaly(anomaly).await);
        }
        Self::collect_errors(results)
    }

    async fn notify_breaker(&self, event: &CircuitBreakerEvent) -> Result<()> {
        let mut results = Vec::with_capacity(self.notifiers.len());
        for notifier in &self.notifiers {
            results.push(notifier.notify_breaker(event).await);
        }
        Self::collect_errors(results)
    }
}

/// Compose the alert path
///
/// `local` sees every alert. Each `remote` notifier sits behind its own
/// cooldown, so suppressed repeats still reach the local sink.
pub fn alert_chain(
    local: Arc<dyn Notifier>,
    remote: impl IntoIterator<Item = Arc<dyn Notifier>>,
    cooldown: Duration,
) -> FanoutNotifier {
    remote.into_iter().fold(FanoutNotifier::new().with(local), |chain, notifier| {
        chain.with(Arc::new(CooldownNotifier::new(notifier, cooldown)))
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// Records every delivery; optionally fails all of them
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub anomalies: Mutex<Vec<Anomaly>>,
        pub events: Mutex<Vec<CircuitBreakerEvent>>,
        pub fail: bool,
    }

    impl RecordingNotifier {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify_anomaly(&self, anomaly: &Anomaly) -> Result<()> {
            self.anomalies.lock().await.push(anomaly.clone());
            if self.fail {
                return Err(MonitorError::Notification("recording failure".to_string()));
            }
            Ok(())
        }

        async fn notify_breaker(&self, event: &CircuitBreakerEvent) -> Result<()> {
            self.events.lock().await.push(event.clone());
            if self.fail {
                return Err(MonitorError::Notification("recording failure".to_string()));
            }
            Ok(())
        }
    }
}
