use crate::database::payment_repository::PaymentRecord;
use crate::payments::error::PaymentResult;
use crate::payments::types::{
    Conversion, CreatePaymentRequest, CreatedPayment, PaymentStatus, ProviderName, RefundExecution,
    WebhookOutcome,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde_json::Value as JsonValue;

/// One payment rail.
///
/// Implementations own their external API calls and the guarded state
/// transitions for payments they created; callers go through the
/// dispatcher/ingress services, never through a provider directly.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    /// Charging currency of this rail (RUB, XTR or TON)
    fn currency(&self) -> &'static str;

    /// Create the payment row and whatever external artifact the user
    /// needs next (redirect URL, invoice, deposit instructions)
    async fn create_payment(&self, request: CreatePaymentRequest) -> PaymentResult<CreatedPayment>;

    /// Authoritative status, consulting the external provider where one
    /// exists
    async fn get_status(&self, payment_id: i64) -> PaymentResult<PaymentStatus>;

    /// Handle one verified provider event. Never returns an error for a
    /// replayed or unattributable event; those resolve to an accepted
    /// no-op outcome.
    async fn process_webhook(&self, payload: &JsonValue) -> PaymentResult<WebhookOutcome>;

    /// Execute the external side of a refund. `amount` of `None` means
    /// full refund in the rail's original currency.
    async fn refund(
        &self,
        payment: &PaymentRecord,
        amount: Option<&BigDecimal>,
        reason: &str,
    ) -> PaymentResult<RefundExecution>;

    /// Normalize `amount` of this rail's currency into the settlement
    /// currency with a time-locked rate
    async fn convert_to_rub(&self, amount: &BigDecimal) -> PaymentResult<Conversion>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::PaymentAction;
    use chrono::Utc;

    struct MockProvider;

    #[async_trait]
    impl PaymentProvider for MockProvider {
        fn name(&self) -> ProviderName {
            ProviderName::Gateway
        }

        fn currency(&self) -> &'static str {
            "RUB"
        }

        async fn create_payment(
            &self,
            _request: CreatePaymentRequest,
        ) -> PaymentResult<CreatedPayment> {
            Ok(CreatedPayment {
                payment_id: 1,
                external_ref: Some("mock_1".to_string()),
                action: PaymentAction::Redirect {
                    url: "https://example.com/pay/1".to_string(),
                },
                amount: BigDecimal::from(999),
                currency: "RUB".to_string(),
                settlement_amount: BigDecimal::from(999),
                rate: None,
                expires_at: None,
            })
        }

        async fn get_status(&self, _payment_id: i64) -> PaymentResult<PaymentStatus> {
            Ok(PaymentStatus::Pending)
        }

        async fn process_webhook(&self, _payload: &JsonValue) -> PaymentResult<WebhookOutcome> {
            Ok(WebhookOutcome::ok(1, PaymentStatus::Succeeded))
        }

        async fn refund(
            &self,
            _payment: &PaymentRecord,
            _amount: Option<&BigDecimal>,
            _reason: &str,
        ) -> PaymentResult<RefundExecution> {
            Ok(RefundExecution::Completed {
                refund_id: Some("mock_refund".to_string()),
            })
        }

        async fn convert_to_rub(&self, amount: &BigDecimal) -> PaymentResult<Conversion> {
            Ok(Conversion {
                amount: amount.clone(),
                currency: "RUB".to_string(),
                rate: BigDecimal::from(1),
                settlement_amount: amount.clone(),
                source: "manual".to_string(),
                expires_at: Utc::now() + chrono::Duration::minutes(15),
            })
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_provider() {
        let provider: Box<dyn PaymentProvider> = Box::new(MockProvider);

        let created = provider
            .create_payment(CreatePaymentRequest {
                user_id: 10,
                chat_id: None,
                tier: crate::payments::types::TierId::Standard,
                purchase_context_id: uuid::Uuid::new_v4(),
                email: Some("user@example.com".to_string()),
            })
            .await
            .expect("mock create should succeed");
        assert_eq!(created.payment_id, 1);
        assert!(matches!(created.action, PaymentAction::Redirect { .. }));

        let conversion = provider
            .convert_to_rub(&BigDecimal::from(500))
            .await
            .expect("mock conversion should succeed");
        assert_eq!(conversion.settlement_amount, BigDecimal::from(500));
    }
}
