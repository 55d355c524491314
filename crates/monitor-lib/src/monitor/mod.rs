//! Usage monitoring loop
//!
//! Ties usage sources, detection, escalation and notification together:
//! ```text
//! Idle → EstablishingBaseline → Running ⇄ ErrorBackoff → Stopped
//! ```

mod r#loop;
mod session;

pub use r#loop::{CycleReport, MonitoringLoop, MonitoringLoopBuilder, ERROR_BACKOFF};
pub use session::{Baseline, Evaluation, MonitorSession};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Lifecycle state of a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Idle,
    EstablishingBaseline,
    Running,
    ErrorBackoff,
    Stopped,
}

impl MonitorState {
    pub fn is_active(&self) -> bool {
        !matches!(self, MonitorState::Idle | MonitorState::Stopped)
    }
}

/// Point-in-time view of the monitor, published after every cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub state: MonitorState,
    pub active: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub anomalies_detected: u64,
    pub services_monitored: usize,
    pub tripped_services: Vec<String>,
}

impl Default for MonitorStatus {
    fn default() -> Self {
        Self {
            state: MonitorState::Idle,
            active: false,
            last_check: None,
            anomalies_detected: 0,
            services_monitored: 0,
            tripped_services: Vec::new(),
        }
    }
}

/// Read side of the published status, shared with the HTTP API
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<RwLock<MonitorStatus>>,
}

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> MonitorStatus {
        self.inner.read().await.clone()
    }

    pub(crate) async fn publish(&self, status: MonitorStatus) {
        *self.inner.write().await = status;
    }
}
