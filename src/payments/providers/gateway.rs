//! Card/bank gateway rail.
//!
//! Redirect-based flow against the gateway's Init / GetState / Cancel
//! API. Amounts cross the wire in minor units (kopecks); every request
//! and webhook carries a signature token computed over the sorted
//! scalar fields with the shared terminal password.

use crate::config::GatewayConfig;
use crate::database::payment_repository::{NewPayment, PaymentRecord, PaymentRepository};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    Conversion, CreatePaymentRequest, CreatedPayment, PaymentAction, PaymentStatus, ProviderName,
    RefundExecution, WebhookOutcome, SETTLEMENT_CURRENCY,
};
use crate::payments::utils::{gateway_signature_token, verify_gateway_signature, PaymentHttpClient};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayApiResponse {
    success: bool,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    external_payment_id: Option<String>,
    #[serde(default)]
    payment_url: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct GatewayProvider {
    repository: Arc<PaymentRepository>,
    http: PaymentHttpClient,
    terminal_key: String,
    password: String,
    base_url: String,
    success_url: Option<String>,
}

impl GatewayProvider {
    pub fn from_config(
        config: &GatewayConfig,
        repository: Arc<PaymentRepository>,
    ) -> PaymentResult<Self> {
        let terminal_key =
            config
                .terminal_key
                .clone()
                .ok_or_else(|| PaymentError::ConfigurationError {
                    message: "GATEWAY_TERMINAL_KEY is not set".to_string(),
                })?;
        let password = config
            .password
            .clone()
            .ok_or_else(|| PaymentError::ConfigurationError {
                message: "GATEWAY_PASSWORD is not set".to_string(),
            })?;

        Ok(Self {
            repository,
            http: PaymentHttpClient::new(
                Duration::from_secs(config.timeout_secs),
                config.max_retries,
            )?,
            terminal_key,
            password,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            success_url: config.success_url.clone(),
        })
    }

    fn signed(&self, mut payload: JsonValue) -> JsonValue {
        let token = gateway_signature_token(&payload, &self.password);
        payload["signatureToken"] = json!(token);
        payload
    }

    async fn call(&self, endpoint: &str, payload: JsonValue) -> PaymentResult<GatewayApiResponse> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let signed = self.signed(payload);
        let response: GatewayApiResponse = self
            .http
            .request_json(Method::POST, &url, Some(&signed), &[])
            .await?;

        if !response.success {
            return Err(PaymentError::ProviderError {
                provider: ProviderName::Gateway.as_str().to_string(),
                message: response
                    .message
                    .unwrap_or_else(|| "gateway request rejected".to_string()),
                provider_code: response.error_code,
                retryable: false,
            });
        }

        Ok(response)
    }

    fn map_gateway_status(status: &str) -> Option<PaymentStatus> {
        match status {
            "CONFIRMED" => Some(PaymentStatus::Succeeded),
            "AUTHORIZED" | "FORM_SHOWED" | "CONFIRMING" => Some(PaymentStatus::Processing),
            "CANCELED" | "REJECTED" | "DEADLINE_EXPIRED" | "AUTH_FAIL" => {
                Some(PaymentStatus::Canceled)
            }
            "REFUNDED" => Some(PaymentStatus::Refunded),
            "PARTIAL_REFUNDED" => Some(PaymentStatus::Partial),
            _ => None,
        }
    }
}

/// Whole settlement-currency units to wire minor units (kopecks)
fn to_minor_units(amount: &BigDecimal) -> PaymentResult<i64> {
    (amount * BigDecimal::from(100))
        .with_scale_round(0, bigdecimal::RoundingMode::HalfUp)
        .to_i64()
        .ok_or_else(|| PaymentError::ValidationError {
            message: format!("amount out of range: {}", amount),
            field: Some("amount".to_string()),
        })
}

#[async_trait]
impl PaymentProvider for GatewayProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Gateway
    }

    fn currency(&self) -> &'static str {
        SETTLEMENT_CURRENCY
    }

    async fn create_payment(&self, request: CreatePaymentRequest) -> PaymentResult<CreatedPayment> {
        let price = BigDecimal::from(request.tier.price_rub());

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
                amount: price.clone(),
                original_amount: price.clone(),
                original_currency: SETTLEMENT_CURRENCY.to_string(),
                exchange_rate: None,
                rate_locked_at: None,
                rate_expires_at: None,
            })
            .await?;

        let mut payload = json!({
            "terminalKey": self.terminal_key,
            "amount": to_minor_units(&price)?,
            "orderId": record.id.to_string(),
            "description": format!("{} bundle, {} photos", request.tier, request.tier.photo_count()),
        });
        if let Some(url) = &self.success_url {
            payload["successUrl"] = json!(url);
        }
        if let Some(email) = &request.email {
            // Receipt is a nested object and stays outside the signature
            payload["receipt"] = json!({
                "email": email,
                "items": [{
                    "name": format!("{} bundle", request.tier),
                    "quantity": 1,
                    "amount": to_minor_units(&price)?,
                }],
            });
        }

        let response = self.call("Init", payload).await?;
        let external_id =
            response
                .external_payment_id
                .ok_or_else(|| PaymentError::ProviderError {
                    provider: self.name().as_str().to_string(),
                    message: "Init response missing externalPaymentId".to_string(),
                    provider_code: None,
                    retryable: false,
                })?;
        let payment_url = response
            .payment_url
            .ok_or_else(|| PaymentError::ProviderError {
                provider: self.name().as_str().to_string(),
                message: "Init response missing paymentUrl".to_string(),
                provider_code: None,
                retryable: false,
            })?;

        let record = self
            .repository
            .set_external_refs(record.id, &external_id, Some(&external_id))
            .await?;

        info!(payment_id = record.id, external_id = %external_id, "gateway payment initialized");

        Ok(CreatedPayment {
            payment_id: record.id,
            external_ref: Some(external_id),
            action: PaymentAction::Redirect { url: payment_url },
            amount: price.clone(),
            currency: SETTLEMENT_CURRENCY.to_string(),
            settlement_amount: price,
            rate: None,
            expires_at: None,
        })
    }

    async fn get_status(&self, payment_id: i64) -> PaymentResult<PaymentStatus> {
        let record = self.repository.get(payment_id).await?;

        // Terminal rows are authoritative; only open rows are polled
        if record.status != "pending" && record.status != "processing" {
            return PaymentStatus::from_str(&record.status);
        }
        let external_id = match &record.external_id {
            Some(id) => id.clone(),
            None => return PaymentStatus::from_str(&record.status),
        };

        let payload = json!({
            "terminalKey": self.terminal_key,
            "externalPaymentId": external_id,
        });
        let response = self.call("GetState", payload).await?;

        // Persist terminal transitions so a lost webhook cannot strand
        // the row in pending
        let provider = self.name().as_str();
        match response.status.as_deref().and_then(Self::map_gateway_status) {
            Some(PaymentStatus::Succeeded) => {
                if let Some(reconciled) = self
                    .repository
                    .mark_succeeded_by_external_id(provider, &external_id)
                    .await?
                {
                    info!(payment_id = reconciled.id, "gateway payment reconciled via poll");
                }
                Ok(PaymentStatus::Succeeded)
            }
            Some(PaymentStatus::Canceled) => {
                self.repository
                    .mark_canceled_by_external_id(provider, &external_id)
                    .await?;
                Ok(PaymentStatus::Canceled)
            }
            Some(status) => Ok(status),
            None => PaymentStatus::from_str(&record.status),
        }
    }

    async fn process_webhook(&self, payload: &JsonValue) -> PaymentResult<WebhookOutcome> {
        if !verify_gateway_signature(payload, &self.password) {
            return Err(PaymentError::SignatureError {
                message: "gateway signature token mismatch".to_string(),
            });
        }

        let external_id = payload
            .get("externalPaymentId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| {
                payload
                    .get("externalPaymentId")
                    .and_then(|v| v.as_i64())
                    .map(|v| v.to_string())
            })
            .ok_or_else(|| PaymentError::ValidationError {
                message: "webhook missing externalPaymentId".to_string(),
                field: Some("externalPaymentId".to_string()),
            })?;
        let status = payload
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let provider = self.name().as_str();
        match Self::map_gateway_status(status) {
            Some(PaymentStatus::Succeeded) => {
                match self
                    .repository
                    .mark_succeeded_by_external_id(provider, &external_id)
                    .await?
                {
                    Some(record) => {
                        info!(payment_id = record.id, "gateway payment confirmed");
                        Ok(WebhookOutcome::ok(record.id, PaymentStatus::Succeeded))
                    }
                    // Replay or unknown order: acknowledge without transition
                    None => Ok(WebhookOutcome::accepted()),
                }
            }
            Some(PaymentStatus::Canceled) => {
                match self
                    .repository
                    .mark_canceled_by_external_id(provider, &external_id)
                    .await?
                {
                    Some(record) => Ok(WebhookOutcome::ok(record.id, PaymentStatus::Canceled)),
                    None => Ok(WebhookOutcome::accepted()),
                }
            }
            Some(PaymentStatus::Refunded) => {
                match self
                    .repository
                    .mark_refunded_by_external_id(provider, &external_id)
                    .await?
                {
                    Some(record) => Ok(WebhookOutcome::ok(record.id, PaymentStatus::Refunded)),
                    None => Ok(WebhookOutcome::accepted()),
                }
            }
            // Intermediate statuses carry no transition for us
            Some(_) | None => {
                warn!(status = %status, "ignoring gateway webhook status");
                Ok(WebhookOutcome::accepted())
            }
        }
    }

    async fn refund(
        &self,
        payment: &PaymentRecord,
        amount: Option<&BigDecimal>,
        _reason: &str,
    ) -> PaymentResult<RefundExecution> {
        let external_id = match payment.external_id.clone() {
            Some(id) => id,
            None => {
                return Ok(RefundExecution::Blocked {
                    instructions: format!(
                        "Refund {} {} for payment {} manually: no gateway reference on record",
                        amount.unwrap_or(&payment.original_amount),
                        SETTLEMENT_CURRENCY,
                        payment.id
                    ),
                })
            }
        };

        let mut payload = json!({
            "terminalKey": self.terminal_key,
            "externalPaymentId": external_id,
        });
        // Cancel without an amount reverses the full charge; a partial
        // amount needs a corrective receipt
        if let Some(partial) = amount {
            payload["amount"] = json!(to_minor_units(partial)?);
            if let Some(email) = &payment.email {
                payload["receipt"] = json!({
                    "email": email,
                    "items": [{
                        "name": format!("{} bundle refund", payment.tier_id),
                        "quantity": 1,
                        "amount": to_minor_units(partial)?,
                    }],
                });
            }
        }

        let response = self.call("Cancel", payload).await?;
        info!(
            payment_id = payment.id,
            status = response.status.as_deref().unwrap_or("-"),
            "gateway refund accepted"
        );

        Ok(RefundExecution::Completed {
            refund_id: response.external_payment_id,
        })
    }

    async fn convert_to_rub(&self, amount: &BigDecimal) -> PaymentResult<Conversion> {
        // Already the settlement currency
        Ok(Conversion {
            amount: amount.clone(),
            currency: SETTLEMENT_CURRENCY.to_string(),
            rate: BigDecimal::from(1),
            settlement_amount: amount.clone(),
            source: "manual".to_string(),
            expires_at: Utc::now() + chrono::Duration::minutes(15),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minor_unit_conversion_rounds_half_up() {
        assert_eq!(to_minor_units(&BigDecimal::from(999)).unwrap(), 99900);
        assert_eq!(
            to_minor_units(&BigDecimal::from_str("12.345").unwrap()).unwrap(),
            1235
        );
        assert_eq!(
            to_minor_units(&BigDecimal::from_str("0.004").unwrap()).unwrap(),
            0
        );
    }

    #[test]
    fn gateway_status_mapping() {
        assert_eq!(
            GatewayProvider::map_gateway_status("CONFIRMED"),
            Some(PaymentStatus::Succeeded)
        );
        assert_eq!(
            GatewayProvider::map_gateway_status("DEADLINE_EXPIRED"),
            Some(PaymentStatus::Canceled)
        );
        assert_eq!(
            GatewayProvider::map_gateway_status("REFUNDED"),
            Some(PaymentStatus::Refunded)
        );
        assert_eq!(GatewayProvider::map_gateway_status("UNKNOWN_STATE"), None);
    }
}
