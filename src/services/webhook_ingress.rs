//! Webhook ingress.
//!
//! Single entry point for provider events. Transport-level verification
//! (the bot platform's secret header) happens here; payload-level
//! verification (the gateway's signature token) happens inside the
//! provider. Events are routed to the registered provider even when the
//! rail is disabled for new payments, so in-flight payments still
//! settle after an operator toggle.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::factory::ProviderFactory;
use crate::payments::types::{ProviderName, WebhookOutcome};
use crate::payments::utils::secure_eq;
use http::HeaderMap;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::info;

/// Header the bot platform echoes the configured secret back in
pub const BOT_SECRET_HEADER: &str = "x-bot-api-secret-token";

pub struct WebhookIngress {
    factory: Arc<ProviderFactory>,
    token_webhook_secret: Option<String>,
}

impl WebhookIngress {
    pub fn new(factory: Arc<ProviderFactory>, token_webhook_secret: Option<String>) -> Self {
        Self {
            factory,
            token_webhook_secret,
        }
    }

    pub async fn process(
        &self,
        provider_name: ProviderName,
        headers: &HeaderMap,
        payload: &JsonValue,
    ) -> PaymentResult<WebhookOutcome> {
        self.verify_transport(provider_name, headers)?;

        let provider = self.factory.get_registered(provider_name)?;
        let outcome = provider.process_webhook(payload).await?;

        info!(
            provider = %provider_name,
            success = outcome.success,
            payment_id = outcome.payment_id,
            "webhook processed"
        );
        Ok(outcome)
    }

    fn verify_transport(
        &self,
        provider_name: ProviderName,
        headers: &HeaderMap,
    ) -> PaymentResult<()> {
        if provider_name != ProviderName::Token {
            return Ok(());
        }

        let expected = match &self.token_webhook_secret {
            Some(secret) => secret,
            // No secret configured means the check is off
            None => return Ok(()),
        };
        let provided = headers
            .get(BOT_SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        if !secure_eq(expected.as_bytes(), provided.as_bytes()) {
            return Err(PaymentError::SignatureError {
                message: "bot webhook secret mismatch".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::provider_config_repository::ProviderConfigRepository;
    use sqlx::postgres::PgPoolOptions;

    fn ingress(secret: Option<&str>) -> WebhookIngress {
        // The pool is never used by verify_transport
        let pool = PgPoolOptions::new().connect_lazy("postgres://localhost/payrail");
        let repository = Arc::new(ProviderConfigRepository::new(
            pool.expect("lazy pool construction should not fail"),
        ));
        let factory = Arc::new(ProviderFactory::new(repository));
        WebhookIngress::new(factory, secret.map(str::to_string))
    }

    #[tokio::test]
    async fn token_secret_is_enforced_when_configured() {
        let ingress = ingress(Some("hunter2"));

        let mut headers = HeaderMap::new();
        headers.insert(BOT_SECRET_HEADER, "hunter2".parse().unwrap());
        assert!(ingress
            .verify_transport(ProviderName::Token, &headers)
            .is_ok());

        let mut headers = HeaderMap::new();
        headers.insert(BOT_SECRET_HEADER, "wrong".parse().unwrap());
        assert!(ingress
            .verify_transport(ProviderName::Token, &headers)
            .is_err());

        assert!(ingress
            .verify_transport(ProviderName::Token, &HeaderMap::new())
            .is_err());
    }

    #[tokio::test]
    async fn transport_check_only_applies_to_token_rail() {
        let ingress = ingress(Some("hunter2"));
        assert!(ingress
            .verify_transport(ProviderName::Gateway, &HeaderMap::new())
            .is_ok());
        assert!(ingress
            .verify_transport(ProviderName::Chain, &HeaderMap::new())
            .is_ok());
    }

    #[tokio::test]
    async fn missing_secret_disables_the_check() {
        let ingress = ingress(None);
        assert!(ingress
            .verify_transport(ProviderName::Token, &HeaderMap::new())
            .is_ok());
    }
}
