//! Provider registry
//!
//! Maps provider identifiers onto provider implementations. Built once from
//! configuration at startup and shared read-only afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::error::IntegrationError;
use super::fitbit::FitbitProvider;
use super::http::build_client;
use super::provider::{Provider, ProviderMetadata};
use super::strava::StravaProvider;
use crate::config::AppConfig;
use crate::models::ProviderName;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Provider '{name}' not found")]
    ProviderNotFound { name: String },
}

impl From<RegistryError> for IntegrationError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::ProviderNotFound { name } => IntegrationError::UnknownProvider { name },
        }
    }
}

#[derive(Clone, Default)]
pub struct Registry {
    providers: BTreeMap<ProviderName, Arc<dyn Provider>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every compiled-in provider using the credentials in `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self, reqwest::Error> {
        let client = build_client(config.provider_http_timeout_seconds.map(Duration::from_secs))?;

        if config.fitbit_client_id.is_none() {
            warn!("Fitbit client credentials not configured; authorization will fail upstream");
        }
        if config.strava_client_id.is_none() {
            warn!("Strava client credentials not configured; authorization will fail upstream");
        }

        let mut registry = Self::new();
        registry.register(Arc::new(FitbitProvider::new(
            config.fitbit_config(),
            client.clone(),
        )));
        registry.register(Arc::new(StravaProvider::new(config.strava_config(), client)));
        Ok(registry)
    }

    /// Register (or replace) the implementation for a provider
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name(), provider);
    }

    /// Look a provider up by its wire identifier.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Provider>, RegistryError> {
        let provider_name =
            name.parse::<ProviderName>()
                .map_err(|_| RegistryError::ProviderNotFound {
                    name: name.to_string(),
                })?;
        self.get(provider_name)
    }

    pub fn get(&self, name: ProviderName) -> Result<Arc<dyn Provider>, RegistryError> {
        self.providers
            .get(&name)
            .cloned()
            .ok_or_else(|| RegistryError::ProviderNotFound {
                name: name.to_string(),
            })
    }

    /// Metadata for every registered provider, ordered by name.
    pub fn list_metadata(&self) -> Vec<ProviderMetadata> {
        self.providers
            .values()
            .map(|provider| provider.metadata())
            .collect()
    }
}
