//! Usage collection from third-party services
//!
//! Each monitored service is backed by a [`UsageSource`]. Sources own their
//! credentials and transport; the monitor only sees validated samples or
//! errors.

mod http;
mod providers;

pub use http::{HttpUsageSource, UsageReport};
pub use providers::{provider, AuthScheme, Credentials, ProviderSpec, PROVIDERS};

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::models::UsageSample;

pub use async_trait::async_trait;

/// Trait for per-service usage adapters
#[async_trait]
pub trait UsageSource: Send + Sync {
    /// Name of the service this source reports on
    fn service(&self) -> &str;

    /// Fetch the current usage snapshot
    async fn fetch_usage(&self) -> Result<UsageSample>;
}

/// Build HTTP sources for every known provider that has credentials and a
/// usage endpoint
///
/// Providers missing either are skipped with a warning.
pub fn create_sources(
    endpoints: &HashMap<String, String>,
    credentials: &Credentials,
) -> Vec<Arc<dyn UsageSource>> {
    let mut sources: Vec<Arc<dyn UsageSource>> = Vec::new();

    for provider in PROVIDERS {
        if !provider.is_configured(credentials) {
            tracing::warn!(
                service = provider.name,
                missing = ?provider.missing_credentials(credentials),
                "Provider credentials not configured, skipping"
            );
            continue;
        }

        let Some(endpoint) = endpoints.get(provider.name) else {
            tracing::warn!(service = provider.name, "No usage endpoint configured, skipping");
            continue;
        };

        match HttpUsageSource::new(provider, endpoint, credentials) {
            Ok(source) => {
                tracing::info!(service = provider.name, endpoint = %endpoint, "Usage source configured");
                sources.push(Arc::new(source));
            }
            Err(e) => {
                tracing::warn!(service = provider.name, error = %e, "Invalid usage source, skipping");
            }
        }
    }

    sources
}
