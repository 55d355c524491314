//! Alert cooldown
//!
//! Suppresses repeated anomaly notifications of the same kind for the same
//! service within a configurable window. Circuit breaker events are always
//! delivered. Suppression applies to notification only; escalation has
//! already seen the anomaly by the time it reaches a notifier.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use super::Notifier;
use crate::anomaly::{Anomaly, AnomalyKind, CircuitBreakerEvent};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CooldownKey {
    service: String,
    kind: AnomalyKind,
}

impl CooldownKey {
    fn of(anomaly: &Anomaly) -> Self {
        Self {
            service: anomaly.service.clone(),
            kind: anomaly.kind,
        }
    }
}

/// Notifier wrapper with per (service, kind) cooldown
pub struct CooldownNotifier {
    inner: Arc<dyn Notifier>,
    cooldown: Duration,
    last_sent: Mutex<HashMap<CooldownKey, Instant>>,
}

impl CooldownNotifier {
    pub fn new(inner: Arc<dyn Notifier>, cooldown: Duration) -> Self {
        Self {
            inner,
            cooldown,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Whether an alert for this key was delivered within the cooldown
    fn is_cooling_down(&self, key: &CooldownKey) -> bool {
        let mut last_sent = self.lock();
        last_sent.retain(|_, sent| sent.elapsed() < self.cooldown);
        last_sent.contains_key(key)
    }

    fn mark_sent(&self, key: CooldownKey) {
        self.lock().insert(key, Instant::now());
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CooldownKey, Instant>> {
        self.last_sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Notifier for CooldownNotifier {
    /// Only a successful delivery starts the cooldown
    async fn notify_anomaly(&self, anomaly: &Anomaly) -> Result<()> {
        if self.cooldown.is_zero() {
            return self.inner.notify_anomaly(anomaly).await;
        }

        let key = CooldownKey::of(anomaly);
        if self.is_cooling_down(&key) {
            debug!(
                service = %anomaly.service,
                kind = %anomaly.kind,
                cooldown_secs = self.cooldown.as_secs(),
                "Alert suppressed by cooldown"
            );
            return Ok(());
        }

        self.inner.notify_anomaly(anomaly).await?;
        self.mark_sent(key);
        Ok(())
    }

    async fn notify_breaker(&self, event: &CircuitBreakerEvent) -> Result<()> {
        self.inner.notify_breaker(event).await
    }
}
