//! Runaway Monitor - API usage watchdog
//!
//! Polls third-party API usage, alerts on cost overruns and usage spikes,
//! and pauses monitoring of services whose circuit breaker has tripped.

use monitor_lib::{
    collector::create_sources,
    health::{components, HealthRegistry},
    monitor::{MonitoringLoopBuilder, StatusHandle},
    notify::{alert_chain, LogNotifier, Notifier, TelegramConfig, TelegramNotifier},
    observability::{MonitorMetrics, StructuredLogger},
};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting runaway-monitor");

    let config = config::AppConfig::load();

    let health_registry = HealthRegistry::new();
    health_registry.register(components::USAGE_SOURCES).await;
    health_registry.register(components::NOTIFIER).await;
    health_registry.register(components::MONITOR_LOOP).await;

    let metrics = MonitorMetrics::new();
    let logger = StructuredLogger::new(hostname());

    let sources = create_sources(&config.endpoints(), &config.credentials());
    metrics.set_services_monitored(sources.len() as i64);
    logger.log_startup(MONITOR_VERSION, sources.len());

    let telegram = connect_telegram(&config).await?;
    let remote: Vec<Arc<dyn Notifier>> = telegram
        .iter()
        .map(|t| Arc::clone(t) as Arc<dyn Notifier>)
        .collect();
    let notifier = alert_chain(
        Arc::new(LogNotifier::new(logger.clone())),
        remote,
        config.monitor.alert_cooldown(),
    );

    let status = StatusHandle::new();
    let monitor = MonitoringLoopBuilder::new()
        .config(config.monitor.clone())
        .sources(sources)
        .notifier(Arc::new(notifier))
        .health(health_registry.clone())
        .status(status.clone())
        .logger(logger.clone())
        .build()?;

    let app_state = Arc::new(api::AppState::new(health_registry, status.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let monitor_handle = tokio::spawn(monitor.run(shutdown_rx));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            match result {
                Ok(Ok(())) => warn!("API server exited"),
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task panicked"),
            }
            logger.log_shutdown("API server stopped");
        }
    }

    // The loop finishes its current cycle before observing the signal
    let _ = shutdown_tx.send(());
    let session = monitor_handle.await?;

    info!(
        anomalies_detected = session.anomalies_detected(),
        tripped_services = ?session.breaker().tripped_services(),
        "Shutdown complete"
    );

    if let Some(telegram) = telegram {
        if let Err(e) = telegram.send_status_update(&status.snapshot().await).await {
            warn!(error = %e, "Failed to send final status update");
        }
    }

    Ok(())
}

/// Telegram notifier when enabled and configured
async fn connect_telegram(config: &config::AppConfig) -> Result<Option<Arc<TelegramNotifier>>> {
    if !config.telegram.enabled {
        info!("Telegram alerts disabled by configuration");
        return Ok(None);
    }

    let telegram = TelegramNotifier::new(TelegramConfig::from_env())?;
    if !telegram.is_configured() {
        return Ok(None);
    }

    if let Err(e) = telegram.test_connection().await {
        warn!(error = %e, "Telegram connection test failed, alerts may not be delivered");
    }
    info!("Telegram alerts enabled");
    Ok(Some(Arc::new(telegram)))
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "runaway-monitor".to_string())
}
