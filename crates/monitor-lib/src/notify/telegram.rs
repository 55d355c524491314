//! Telegram alert delivery
//!
//! Sends formatted alerts through the Bot API `sendMessage` method. High
//! severity anomalies and circuit breaker events go to the critical chat.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use super::Notifier;
use crate::anomaly::{Anomaly, AnomalyKind, CircuitBreakerEvent, Severity};
use crate::error::{MonitorError, Result};
use crate::monitor::MonitorStatus;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Telegram credentials and chat routing
#[derive(Debug, Clone, Default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    /// Falls back to `chat_id` when unset
    pub critical_chat_id: Option<String>,
    pub api_base: String,
}

impl TelegramConfig {
    /// Read `TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHANNEL_ID` and
    /// `TELEGRAM_CRITICAL_CHANNEL_ID`
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            bot_token: var("TELEGRAM_BOT_TOKEN"),
            chat_id: var("TELEGRAM_CHANNEL_ID"),
            critical_chat_id: var("TELEGRAM_CRITICAL_CHANNEL_ID"),
            api_base: TELEGRAM_API_BASE.to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.bot_token.is_some() && self.chat_id.is_some()
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

/// Notifier posting to Telegram chats
pub struct TelegramNotifier {
    client: Client,
    config: TelegramConfig,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        if !config.is_configured() {
            warn!("TELEGRAM_BOT_TOKEN or TELEGRAM_CHANNEL_ID not set, Telegram alerts disabled");
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| MonitorError::Notification(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    fn chat_for(&self, critical: bool) -> Option<&str> {
        let regular = self.config.chat_id.as_deref();
        if critical {
            self.config.critical_chat_id.as_deref().or(regular)
        } else {
            regular
        }
    }

    /// Send a monitoring status summary to the regular chat
    pub async fn send_status_update(&self, status: &MonitorStatus) -> Result<()> {
        self.deliver(&format_status_message(status), false).await
    }

    /// Post a test message to verify bot and chat configuration
    pub async fn test_connection(&self) -> Result<()> {
        self.deliver("🤖 Runaway Monitor Test - Connection OK!", false)
            .await
    }

    async fn deliver(&self, text: &str, critical: bool) -> Result<()> {
        let (Some(token), Some(chat_id)) = (self.config.bot_token.as_deref(), self.chat_for(critical))
        else {
            debug!("Telegram not configured, skipping alert");
            return Ok(());
        };

        let url = format!("{}/bot{}/sendMessage", self.config.api_base, token);
        let payload = SendMessage {
            chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MonitorError::Notification(format!("Telegram request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MonitorError::Notification(format!(
                "Telegram API error ({}): {}",
                status, body
            )));
        }

        debug!(chat_id = %chat_id, "Telegram message sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify_anomaly(&self, anomaly: &Anomaly) -> Result<()> {
        self.deliver(&format_anomaly_message(anomaly), anomaly.is_high())
            .await
    }

    async fn notify_breaker(&self, event: &CircuitBreakerEvent) -> Result<()> {
        self.deliver(&format_breaker_message(event), true).await
    }
}

fn kind_title(kind: AnomalyKind) -> &'static str {
    match kind {
        AnomalyKind::CostThreshold => "Cost Threshold",
        AnomalyKind::UsageSpike => "Usage Spike",
    }
}

/// Render an anomaly as a Telegram message
pub fn format_anomaly_message(anomaly: &Anomaly) -> String {
    let marker = match anomaly.severity {
        Severity::High => "🚨",
        Severity::Medium => "⚠️",
    };

    let mut text = format!("{} RUNAWAY DETECTED\n\n", marker);
    text.push_str(&format!("Service: {}\n", anomaly.service.to_uppercase()));
    text.push_str(&format!("Type: {}\n", kind_title(anomaly.kind)));
    text.push_str(&format!("Details: {}\n", anomaly.message));

    let metric = |name: &str| anomaly.metric(name).unwrap_or_default();
    match anomaly.kind {
        AnomalyKind::CostThreshold => {
            text.push_str(&format!(
                "\n💰 Cost: ${:.2} (Threshold: ${:.2})",
                metric("current_cost"),
                metric("threshold")
            ));
        }
        AnomalyKind::UsageSpike => {
            text.push_str(&format!("\n📈 Spike: {:.1}x baseline", metric("multiplier")));
            text.push_str(&format!("\n📊 Current: {} req/h", metric("current_requests")));
            text.push_str(&format!("\n📊 Baseline: {} req/h", metric("baseline_requests")));
        }
    }

    text.push_str(&format!("\n⏰ Time: {}", anomaly.timestamp.to_rfc3339()));
    text
}

/// Render a circuit breaker trip as a critical Telegram message
pub fn format_breaker_message(event: &CircuitBreakerEvent) -> String {
    format!(
        "🚨 CRITICAL ALERT 🚨\n\n🚨 CIRCUIT BREAKER ACTIVATED\nService: {}\nReason: {}\nEscalation: {}\nMonitoring paused for this service.",
        event.service, event.anomaly.message, event.reason
    )
}

/// Render a status summary
pub fn format_status_message(status: &MonitorStatus) -> String {
    let active = if status.active { "🟢 ACTIVE" } else { "🔴 INACTIVE" };
    let last_check = status
        .last_check
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "Never".to_string());

    let mut text = String::from("🤖 RUNAWAY MONITOR STATUS\n\n");
    text.push_str(&format!("Status: {}\n", active));
    text.push_str(&format!("Last Check: {}\n", last_check));
    text.push_str(&format!("Services: {}\n", status.services_monitored));
    text.push_str(&format!("Anomalies: {}\n", status.anomalies_detected));
    if !status.tripped_services.is_empty() {
        text.push_str(&format!("Tripped: {}\n", status.tripped_services.join(", ")));
    }
    text
}
