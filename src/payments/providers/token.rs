//! In-chat token rail.
//!
//! Two-phase flow through the bot platform: an invoice link is issued
//! at creation, the platform asks for a pre-checkout acknowledgement
//! before charging, and a successful-payment event settles the row with
//! the platform's charge id. The token currency is fiat-pegged 1:1, so
//! no rate lookup is involved.

use crate::config::TokenConfig;
use crate::database::payment_repository::{NewPayment, PaymentRecord, PaymentRepository};
use crate::database::provider_config_repository::ProviderConfigRepository;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    Conversion, CreatePaymentRequest, CreatedPayment, PaymentAction, PaymentStatus, ProviderName,
    RefundExecution, TierId, WebhookOutcome, TOKEN_CURRENCY,
};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize)]
struct BotApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<JsonValue>,
    #[serde(default)]
    description: Option<String>,
}

pub struct TokenProvider {
    repository: Arc<PaymentRepository>,
    settings: Arc<ProviderConfigRepository>,
    http: PaymentHttpClient,
    bot_token: String,
    base_url: String,
}

impl TokenProvider {
    pub fn from_config(
        config: &TokenConfig,
        repository: Arc<PaymentRepository>,
        settings: Arc<ProviderConfigRepository>,
    ) -> PaymentResult<Self> {
        let bot_token = config
            .bot_token
            .clone()
            .ok_or_else(|| PaymentError::ConfigurationError {
                message: "BOT_TOKEN is not set".to_string(),
            })?;

        Ok(Self {
            repository,
            settings,
            http: PaymentHttpClient::new(
                Duration::from_secs(config.timeout_secs),
                config.max_retries,
            )?,
            bot_token,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn call(&self, method_name: &str, payload: JsonValue) -> PaymentResult<JsonValue> {
        let url = format!("{}/bot{}/{}", self.base_url, self.bot_token, method_name);
        let response: BotApiResponse = self
            .http
            .request_json(Method::POST, &url, Some(&payload), &[])
            .await?;

        if !response.ok {
            return Err(PaymentError::ProviderError {
                provider: ProviderName::Token.as_str().to_string(),
                message: response
                    .description
                    .unwrap_or_else(|| format!("{} rejected", method_name)),
                provider_code: None,
                retryable: false,
            });
        }

        Ok(response.result.unwrap_or(JsonValue::Null))
    }

    /// Acknowledge a pre-checkout query. The platform charges only after
    /// a positive answer; business validation happens at settlement.
    async fn answer_pre_checkout(&self, query_id: &str) -> PaymentResult<()> {
        let payload = json!({
            "pre_checkout_query_id": query_id,
            "ok": true,
        });
        self.call("answerPreCheckoutQuery", payload).await?;
        Ok(())
    }

    async fn handle_pre_checkout(&self, query: &JsonValue) -> PaymentResult<WebhookOutcome> {
        let query_id = query
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::ValidationError {
                message: "pre-checkout query missing id".to_string(),
                field: Some("id".to_string()),
            })?;

        // Always acknowledge affirmatively; the settlement guard rejects
        // invoices that reference no settleable payment
        self.answer_pre_checkout(query_id).await?;
        info!(
            invoice_payload = ?parse_invoice_payload(query.get("invoice_payload")),
            "pre-checkout acknowledged"
        );
        Ok(WebhookOutcome::accepted())
    }

    async fn handle_successful_payment(
        &self,
        successful_payment: &JsonValue,
    ) -> PaymentResult<WebhookOutcome> {
        let payment_id = parse_invoice_payload(successful_payment.get("invoice_payload"))
            .ok_or_else(|| PaymentError::ValidationError {
                message: "successful payment missing invoice payload".to_string(),
                field: Some("invoice_payload".to_string()),
            })?;
        let charge_id = successful_payment
            .get("charge_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::ValidationError {
                message: "successful payment missing charge id".to_string(),
                field: Some("charge_id".to_string()),
            })?;

        match self
            .repository
            .settle_token_payment(payment_id, charge_id)
            .await?
        {
            Some(record) => {
                info!(payment_id = record.id, charge_id = %charge_id, "token payment settled");
                Ok(WebhookOutcome::ok(record.id, PaymentStatus::Succeeded))
            }
            None => {
                // Replay with the same charge id, or a row past settlement
                match self.repository.find_by_id(payment_id).await? {
                    Some(record) if record.status == "succeeded" => {
                        Ok(WebhookOutcome::accepted())
                    }
                    _ => Ok(WebhookOutcome::rejected(format!(
                        "payment {} cannot be settled",
                        payment_id
                    ))),
                }
            }
        }
    }
}

impl TokenProvider {
    /// Operator-set price from provider settings, falling back to the
    /// compiled-in tier table
    async fn token_price(&self, tier: TierId) -> PaymentResult<i64> {
        let settings = self
            .settings
            .get(ProviderName::Token.as_str())
            .await?
            .map(|c| c.settings)
            .unwrap_or(JsonValue::Null);

        Ok(price_from_settings(&settings, tier).unwrap_or_else(|| tier.default_token_price()))
    }
}

/// The invoice payload carries the payment id as a decimal string
fn parse_invoice_payload(value: Option<&JsonValue>) -> Option<i64> {
    value.and_then(|v| v.as_str()).and_then(|s| s.parse().ok())
}

/// The platform identifies the payer by chat id; internal user ids mean
/// nothing to it
fn refund_request_body(chat_id: i64, charge_id: &str) -> JsonValue {
    json!({
        "user_id": chat_id,
        "charge_id": charge_id,
    })
}

fn price_from_settings(settings: &JsonValue, tier: TierId) -> Option<i64> {
    settings
        .get("tier_prices")
        .and_then(|prices| prices.get(tier.as_str()))
        .and_then(|v| v.as_i64())
        .filter(|price| *price > 0)
}

#[async_trait]
impl PaymentProvider for TokenProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Token
    }

    fn currency(&self) -> &'static str {
        TOKEN_CURRENCY
    }

    async fn create_payment(&self, request: CreatePaymentRequest) -> PaymentResult<CreatedPayment> {
        if request.chat_id.is_none() {
            return Err(PaymentError::ValidationError {
                message: "token payments require a linked chat".to_string(),
                field: Some("chat_id".to_string()),
            });
        }

        let token_price = self.token_price(request.tier).await?;
        let price = BigDecimal::from(token_price);
        let conversion = self.convert_to_rub(&price).await?;

        let record = self
            .repository
            .create(&NewPayment {
                provider: self.name().as_str().to_string(),
                user_id: request.user_id,
                chat_id: request.chat_id,
                purchase_context_id: request.purchase_context_id,
                email: request.email.clone(),
                tier_id: request.tier.as_str().to_string(),
                photo_count: request.tier.photo_count(),
                amount: conversion.settlement_amount.clone(),
                original_amount: price.clone(),
                original_currency: TOKEN_CURRENCY.to_string(),
                exchange_rate: Some(conversion.rate.clone()),
                rate_locked_at: Some(Utc::now()),
                rate_expires_at: Some(conversion.expires_at),
            })
            .await?;

        let payload = json!({
            "title": format!("{} bundle", request.tier),
            "description": format!("{} photos", request.tier.photo_count()),
            "payload": record.id.to_string(),
            "currency": TOKEN_CURRENCY,
            "prices": [{
                "label": format!("{} bundle", request.tier),
                "amount": token_price,
            }],
        });
        let result = self.call("createInvoiceLink", payload).await?;
        let invoice_url = result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PaymentError::ProviderError {
                provider: self.name().as_str().to_string(),
                message: "createInvoiceLink returned no link".to_string(),
                provider_code: None,
                retryable: false,
            })?;

        let record = self
            .repository
            .set_external_refs(record.id, &record.id.to_string(), None)
            .await?;

        info!(payment_id = record.id, "token invoice issued");

        Ok(CreatedPayment {
            payment_id: record.id,
            external_ref: record.external_id,
            action: PaymentAction::Invoice { invoice_url },
            amount: price,
            currency: TOKEN_CURRENCY.to_string(),
            settlement_amount: conversion.settlement_amount,
            rate: Some(conversion.rate),
            expires_at: None,
        })
    }

    async fn get_status(&self, payment_id: i64) -> PaymentResult<PaymentStatus> {
        // The bot platform pushes state; the row is authoritative
        let record = self.repository.get(payment_id).await?;
        PaymentStatus::from_str(&record.status)
    }

    async fn process_webhook(&self, payload: &JsonValue) -> PaymentResult<WebhookOutcome> {
        if let Some(query) = payload.get("pre_checkout_query") {
            return self.handle_pre_checkout(query).await;
        }
        if let Some(successful_payment) = payload
            .get("message")
            .and_then(|m| m.get("successful_payment"))
        {
            return self.handle_successful_payment(successful_payment).await;
        }

        // Other bot updates are not ours to handle
        Ok(WebhookOutcome::accepted())
    }

    async fn refund(
        &self,
        payment: &PaymentRecord,
        amount: Option<&BigDecimal>,
        _reason: &str,
    ) -> PaymentResult<RefundExecution> {
        let charge_id = match &payment.charge_id {
            Some(id) => id.clone(),
            None => {
                return Ok(RefundExecution::Blocked {
                    instructions: format!(
                        "Refund {} {} to user {} manually: payment {} has no charge id",
                        amount.unwrap_or(&payment.original_amount),
                        TOKEN_CURRENCY,
                        payment.user_id,
                        payment.id
                    ),
                })
            }
        };
        // The platform refunds to the payer's chat identity, not our
        // internal user id
        let chat_id = match payment.chat_id {
            Some(id) => id,
            None => {
                return Ok(RefundExecution::Blocked {
                    instructions: format!(
                        "Refund {} {} for payment {} (charge {}) manually: no linked chat identity on record",
                        amount.unwrap_or(&payment.original_amount),
                        TOKEN_CURRENCY,
                        payment.id,
                        charge_id
                    ),
                })
            }
        };

        // The platform only reverses whole charges
        if let Some(partial) = amount {
            if *partial < payment.original_amount {
                return Ok(RefundExecution::Manual {
                    instructions: format!(
                        "Partial refund of {} {} for payment {} (charge {}) must be sent manually to chat {}",
                        partial, TOKEN_CURRENCY, payment.id, charge_id, chat_id
                    ),
                });
            }
        }

        self.call("refundStarPayment", refund_request_body(chat_id, &charge_id))
            .await?;

        info!(payment_id = payment.id, charge_id = %charge_id, "token charge refunded");

        Ok(RefundExecution::Completed {
            refund_id: Some(charge_id),
        })
    }

    async fn convert_to_rub(&self, amount: &BigDecimal) -> PaymentResult<Conversion> {
        // Fiat-pegged token: the rate is 1 by definition
        Ok(Conversion {
            amount: amount.clone(),
            currency: TOKEN_CURRENCY.to_string(),
            rate: BigDecimal::from(1),
            settlement_amount: amount
                .with_scale_round(0, bigdecimal::RoundingMode::HalfUp),
            source: "manual".to_string(),
            expires_at: Utc::now() + chrono::Duration::minutes(15),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_payload_parses_decimal_ids() {
        assert_eq!(parse_invoice_payload(Some(&json!("42"))), Some(42));
        assert_eq!(parse_invoice_payload(Some(&json!("not-a-number"))), None);
        assert_eq!(parse_invoice_payload(Some(&json!(42))), None);
        assert_eq!(parse_invoice_payload(None), None);
    }

    #[test]
    fn settings_override_tier_prices() {
        let settings = json!({"tier_prices": {"standard": 450}});
        assert_eq!(price_from_settings(&settings, TierId::Standard), Some(450));
        assert_eq!(price_from_settings(&settings, TierId::Starter), None);
        assert_eq!(price_from_settings(&JsonValue::Null, TierId::Premium), None);

        // Nonsense prices fall through to the defaults
        let settings = json!({"tier_prices": {"standard": 0}});
        assert_eq!(price_from_settings(&settings, TierId::Standard), None);
    }

    #[test]
    fn refund_is_keyed_on_the_linked_chat_identity() {
        // Internal user id 10, platform chat id 777777: the request must
        // carry the chat id
        let body = refund_request_body(777_777, "ch_abc");
        assert_eq!(body["user_id"], json!(777_777));
        assert_eq!(body["charge_id"], json!("ch_abc"));
    }

    #[tokio::test]
    async fn refund_without_chat_identity_is_blocked() {
        use crate::config::TokenConfig;
        use crate::database::provider_config_repository::ProviderConfigRepository;
        use sqlx::postgres::PgPoolOptions;

        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/payrail")
            .expect("lazy pool");
        let provider = TokenProvider::from_config(
            &TokenConfig {
                bot_token: Some("123:abc".to_string()),
                webhook_secret: None,
                base_url: "https://bot.example".to_string(),
                timeout_secs: 5,
                max_retries: 1,
            },
            Arc::new(PaymentRepository::new(pool.clone())),
            Arc::new(ProviderConfigRepository::new(pool)),
        )
        .expect("provider");

        let mut payment = sample_token_payment();
        payment.chat_id = None;

        match provider.refund(&payment, None, "delivery failed").await.expect("refund") {
            RefundExecution::Blocked { instructions } => {
                assert!(instructions.contains("no linked chat identity"));
            }
            other => panic!("expected blocked execution, got {:?}", other),
        }
    }

    fn sample_token_payment() -> PaymentRecord {
        let now = Utc::now();
        PaymentRecord {
            id: 42,
            provider: "token".to_string(),
            external_id: Some("42".to_string()),
            user_id: 10,
            chat_id: Some(777_777),
            purchase_context_id: uuid::Uuid::new_v4(),
            email: None,
            tier_id: "standard".to_string(),
            photo_count: 15,
            amount: BigDecimal::from(500),
            original_amount: BigDecimal::from(500),
            original_currency: TOKEN_CURRENCY.to_string(),
            exchange_rate: Some(BigDecimal::from(1)),
            rate_locked_at: Some(now),
            rate_expires_at: Some(now),
            status: "succeeded".to_string(),
            refund_amount: None,
            refund_status: "none".to_string(),
            refund_reason: None,
            refund_at: None,
            gateway_transaction_id: None,
            charge_id: Some("ch_abc".to_string()),
            tx_hash: None,
            sender_address: None,
            confirmations: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
