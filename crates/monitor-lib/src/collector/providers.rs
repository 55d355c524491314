//! Known usage providers and their credential requirements

use std::collections::HashMap;

/// How a provider expects its credential to be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <token>`
    Bearer,
    /// `Authorization: token <token>` (GitHub)
    Token,
    /// `apikey: <key>` plus `Authorization: Bearer <key>` (Supabase)
    ApiKeyAndBearer,
}

/// Static description of a provider
#[derive(Debug, Clone, Copy)]
pub struct ProviderSpec {
    pub name: &'static str,
    /// Environment variables that must all be present
    pub required_credentials: &'static [&'static str],
    /// Credential presented on requests
    pub secret: &'static str,
    pub auth: AuthScheme,
}

impl ProviderSpec {
    pub fn is_configured(&self, credentials: &Credentials) -> bool {
        self.required_credentials
            .iter()
            .all(|key| credentials.get(key).is_some())
    }

    pub fn missing_credentials(&self, credentials: &Credentials) -> Vec<&'static str> {
        self.required_credentials
            .iter()
            .copied()
            .filter(|key| credentials.get(key).is_none())
            .collect()
    }
}

pub const PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        name: "openai",
        required_credentials: &["OPENAI_API_KEY"],
        secret: "OPENAI_API_KEY",
        auth: AuthScheme::Bearer,
    },
    ProviderSpec {
        name: "github",
        required_credentials: &["GITHUB_TOKEN"],
        secret: "GITHUB_TOKEN",
        auth: AuthScheme::Token,
    },
    ProviderSpec {
        name: "stripe",
        required_credentials: &["STRIPE_API_KEY"],
        secret: "STRIPE_API_KEY",
        auth: AuthScheme::Bearer,
    },
    ProviderSpec {
        name: "supabase",
        required_credentials: &["SUPABASE_URL", "SUPABASE_ANON_KEY"],
        secret: "SUPABASE_ANON_KEY",
        auth: AuthScheme::ApiKeyAndBearer,
    },
    ProviderSpec {
        name: "cloudflare",
        required_credentials: &["CLOUDFLARE_API_TOKEN", "CLOUDFLARE_ACCOUNT_ID"],
        secret: "CLOUDFLARE_API_TOKEN",
        auth: AuthScheme::Bearer,
    },
];

/// Look up a known provider by service name
pub fn provider(name: &str) -> Option<&'static ProviderSpec> {
    PROVIDERS.iter().find(|p| p.name == name)
}

/// Credential values keyed by environment variable name
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    values: HashMap<String, String>,
}

impl Credentials {
    /// Collect every provider credential present in the process environment
    pub fn from_env() -> Self {
        let mut values = HashMap::new();
        for provider in PROVIDERS {
            for key in provider.required_credentials {
                match std::env::var(key) {
                    Ok(value) if !value.is_empty() => {
                        values.insert(key.to_string(), value);
                    }
                    _ => tracing::debug!(variable = %key, "Credential not set"),
                }
            }
        }
        Self { values }
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Override a single credential, e.g. when read from a custom variable
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str) -> &'static ProviderSpec {
        super::provider(name).unwrap()
    }

    #[test]
    fn test_provider_requires_all_credentials() {
        let supabase = provider("supabase");
        let partial = Credentials::from_pairs([("SUPABASE_URL", "https://x.supabase.co")]);

        assert!(!supabase.is_configured(&partial));
        assert_eq!(supabase.missing_credentials(&partial), vec!["SUPABASE_ANON_KEY"]);

        let full = Credentials::from_pairs([
            ("SUPABASE_URL", "https://x.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon"),
        ]);
        assert!(supabase.is_configured(&full));
    }

    #[test]
    fn test_github_uses_token_scheme() {
        assert_eq!(provider("github").auth, AuthScheme::Token);
        assert_eq!(provider("openai").auth, AuthScheme::Bearer);
    }

    #[test]
    fn test_set_overrides_credential() {
        let mut credentials = Credentials::from_pairs([("OPENAI_API_KEY", "old")]);
        credentials.set("OPENAI_API_KEY", "new");
        assert_eq!(credentials.get("OPENAI_API_KEY"), Some("new"));
        assert!(super::provider("heroku").is_none());
    }

    #[test]
    fn test_provider_names_unique() {
        let mut names: Vec<&str> = PROVIDERS.iter().map(|p| p.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), PROVIDERS.len());
    }
}
