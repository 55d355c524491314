//! Monitor configuration
//!
//! Layered from an optional config file and `MONITOR__*` environment
//! variables, e.g. `MONITOR__MONITOR__MONITORING_INTERVAL=60` or
//! `MONITOR__API_PORT=9090`.

use std::collections::HashMap;
use std::path::Path;

use monitor_lib::collector::{self, Credentials};
use monitor_lib::{MonitorConfig, MonitorError};
use serde::Deserialize;
use tracing::{info, warn};

/// Config file used when `MONITOR_CONFIG` is unset
const DEFAULT_CONFIG_PATH: &str = "config/monitor.toml";

/// Full application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Usage endpoints keyed by service name
    #[serde(default)]
    pub services: HashMap<String, ServiceEndpoint>,

    #[serde(default)]
    pub telegram: TelegramSettings,

    /// API server port for health/metrics/status
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

/// Where to poll a service's usage
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEndpoint {
    pub url: String,

    /// Read the provider secret from this variable instead of the default
    #[serde(default)]
    pub credential_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_api_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            services: HashMap::new(),
            telegram: TelegramSettings::default(),
            api_port: default_api_port(),
        }
    }
}

impl AppConfig {
    /// Load from `MONITOR_CONFIG` (or the default path) and the environment
    pub fn load() -> Self {
        let path = std::env::var("MONITOR_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load from a specific file plus the environment
    ///
    /// Never fails: an unreadable or invalid configuration is reported and
    /// replaced by defaults.
    pub fn load_from(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(config) => {
                info!(path = %path.display(), services = config.services.len(), "Configuration loaded");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Using default configuration");
                Self::default()
            }
        }
    }

    fn try_load(path: &Path) -> Result<Self, MonitorError> {
        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("MONITOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| MonitorError::ConfigMissing(e.to_string()))?;

        config.monitor.validate()?;
        Ok(config)
    }

    /// Usage endpoint URLs keyed by service
    pub fn endpoints(&self) -> HashMap<String, String> {
        self.services
            .iter()
            .map(|(name, service)| (name.clone(), service.url.clone()))
            .collect()
    }

    /// Provider credentials from the environment, with per-service overrides
    pub fn credentials(&self) -> Credentials {
        let mut credentials = Credentials::from_env();

        for (name, service) in &self.services {
            let Some(var) = service.credential_env.as_deref() else {
                continue;
            };
            let Some(provider) = collector::provider(name) else {
                warn!(service = %name, "Credential override for unknown provider ignored");
                continue;
            };
            match std::env::var(var) {
                Ok(value) if !value.is_empty() => credentials.set(provider.secret, value),
                _ => warn!(service = %name, variable = %var, "Credential override variable not set"),
            }
        }

        credentials
    }
}
