//! Provider registry.
//!
//! The set of rails is closed at compile time; the factory constructs
//! each provider once at startup and answers lookups with shared
//! handles. Runtime enablement is consulted per lookup so an operator
//! toggle takes effect without restart.

use crate::database::provider_config_repository::ProviderConfigRepository;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::ProviderName;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub struct ProviderFactory {
    providers: HashMap<ProviderName, Arc<dyn PaymentProvider>>,
    config_repository: Arc<ProviderConfigRepository>,
}

impl ProviderFactory {
    pub fn new(config_repository: Arc<ProviderConfigRepository>) -> Self {
        Self {
            providers: HashMap::new(),
            config_repository,
        }
    }

    /// Register a constructed provider. Called once per rail at startup;
    /// a rail whose construction failed (missing credentials) is simply
    /// not registered.
    pub fn register(&mut self, provider: Arc<dyn PaymentProvider>) {
        self.providers.insert(provider.name(), provider);
    }

    pub fn registered(&self) -> Vec<ProviderName> {
        self.providers.keys().copied().collect()
    }

    /// Look up a provider without the enablement check. Used by webhook
    /// ingress: an event for a disabled rail must still settle payments
    /// created before the toggle.
    pub fn get_registered(&self, name: ProviderName) -> PaymentResult<Arc<dyn PaymentProvider>> {
        self.providers
            .get(&name)
            .cloned()
            .ok_or_else(|| PaymentError::ConfigurationError {
                message: format!("provider {} is not configured", name),
            })
    }

    /// Look up a provider for new payment creation, honoring the runtime
    /// enablement flag
    pub async fn get_enabled(&self, name: ProviderName) -> PaymentResult<Arc<dyn PaymentProvider>> {
        let provider = self.get_registered(name)?;

        let enabled = self
            .config_repository
            .is_enabled(name.as_str(), name.enabled_by_default())
            .await
            .map_err(|err| {
                warn!(provider = %name, error = %err, "provider enablement lookup failed");
                PaymentError::from(err)
            })?;

        if !enabled {
            return Err(PaymentError::ValidationError {
                message: format!("provider {} is disabled", name),
                field: Some("provider".to_string()),
            });
        }

        Ok(provider)
    }
}
