use crate::payments::error::PaymentError;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Settlement currency every payment is normalized to
pub const SETTLEMENT_CURRENCY: &str = "RUB";
/// In-chat token currency, fiat-pegged 1:1
pub const TOKEN_CURRENCY: &str = "XTR";
/// Blockchain currency
pub const CHAIN_CURRENCY: &str = "TON";

/// Minor-unit scale used when rounding settlement and refund amounts
pub fn minor_unit_scale(currency: &str) -> i64 {
    match currency {
        SETTLEMENT_CURRENCY => 2,
        TOKEN_CURRENCY => 0,
        CHAIN_CURRENCY => 9,
        _ => 2,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Gateway,
    Token,
    Chain,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Gateway => "gateway",
            ProviderName::Token => "token",
            ProviderName::Chain => "chain",
        }
    }

    /// Whether the provider is usable without an explicit enable flag
    pub fn enabled_by_default(&self) -> bool {
        matches!(self, ProviderName::Gateway)
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "gateway" => Ok(ProviderName::Gateway),
            "token" => Ok(ProviderName::Token),
            "chain" => Ok(ProviderName::Chain),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Succeeded,
    Canceled,
    Refunded,
    Refunding,
    Expired,
    Partial,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Canceled => "canceled",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Refunding => "refunding",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Partial => "partial",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(PaymentStatus::Pending),
            "processing" => Ok(PaymentStatus::Processing),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "canceled" => Ok(PaymentStatus::Canceled),
            "refunded" => Ok(PaymentStatus::Refunded),
            "refunding" => Ok(PaymentStatus::Refunding),
            "expired" => Ok(PaymentStatus::Expired),
            "partial" => Ok(PaymentStatus::Partial),
            _ => Err(PaymentError::ValidationError {
                message: format!("unknown payment status: {}", value),
                field: Some("status".to_string()),
            }),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    None,
    Processing,
    Completed,
    Failed,
    Partial,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::None => "none",
            RefundStatus::Processing => "processing",
            RefundStatus::Completed => "completed",
            RefundStatus::Failed => "failed",
            RefundStatus::Partial => "partial",
        }
    }
}

/// Priced product bundle; photo count and per-rail price are fixed per tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TierId {
    Starter,
    Standard,
    Premium,
}

impl TierId {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierId::Starter => "starter",
            TierId::Standard => "standard",
            TierId::Premium => "premium",
        }
    }

    pub fn photo_count(&self) -> i32 {
        match self {
            TierId::Starter => 10,
            TierId::Standard => 15,
            TierId::Premium => 30,
        }
    }

    /// Price in whole settlement-currency units
    pub fn price_rub(&self) -> i64 {
        match self {
            TierId::Starter => 499,
            TierId::Standard => 999,
            TierId::Premium => 1799,
        }
    }

    /// Default price in token currency; overridable via provider settings
    pub fn default_token_price(&self) -> i64 {
        match self {
            TierId::Starter => 250,
            TierId::Standard => 500,
            TierId::Premium => 900,
        }
    }
}

impl FromStr for TierId {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "starter" => Ok(TierId::Starter),
            "standard" => Ok(TierId::Standard),
            "premium" => Ok(TierId::Premium),
            _ => Err(PaymentError::ValidationError {
                message: format!("unknown tier: {}", value),
                field: Some("tier".to_string()),
            }),
        }
    }
}

impl std::fmt::Display for TierId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    pub user_id: i64,
    /// Linked chat identity; required by the token rail
    pub chat_id: Option<i64>,
    pub tier: TierId,
    pub purchase_context_id: Uuid,
    pub email: Option<String>,
}

/// What the caller must do next to complete the payment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PaymentAction {
    Redirect { url: String },
    Invoice { invoice_url: String },
    WalletDeposit {
        address: String,
        comment: String,
        expires_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedPayment {
    pub payment_id: i64,
    pub external_ref: Option<String>,
    pub action: PaymentAction,
    /// Amount actually charged, in `currency`
    pub amount: BigDecimal,
    pub currency: String,
    /// Normalized settlement amount
    pub settlement_amount: BigDecimal,
    pub rate: Option<BigDecimal>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Uniform envelope returned by every provider's webhook handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookOutcome {
    pub success: bool,
    pub payment_id: Option<i64>,
    pub status: Option<PaymentStatus>,
    pub error: Option<String>,
}

impl WebhookOutcome {
    pub fn ok(payment_id: i64, status: PaymentStatus) -> Self {
        Self {
            success: true,
            payment_id: Some(payment_id),
            status: Some(status),
            error: None,
        }
    }

    /// Accepted but produced no state transition (acks, orphans, replays)
    pub fn accepted() -> Self {
        Self {
            success: true,
            payment_id: None,
            status: None,
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            payment_id: None,
            status: None,
            error: Some(error.into()),
        }
    }
}

/// Ephemeral refund input; never persisted
#[derive(Debug, Clone)]
pub struct RefundContext {
    pub payment_id: i64,
    pub reason: String,
    pub admin_id: i64,
}

/// What a provider's refund attempt produced.
///
/// `Manual` means the rail cannot move this money programmatically and
/// an operator must act on the instructions. `Blocked` means a
/// precondition was missing and nothing external was attempted; the
/// dispatcher releases the refund lock so the payment stays refundable.
/// Neither is an error.
#[derive(Debug, Clone)]
pub enum RefundExecution {
    Completed { refund_id: Option<String> },
    Manual { instructions: String },
    Blocked { instructions: String },
}

/// Dispatcher-level refund result.
///
/// `success` means the dispatcher completed its own work correctly,
/// independent of whether money moved automatically. The only
/// `success: false` non-error outcome is a lost race for the refund lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundOutcome {
    pub success: bool,
    pub refund_id: Option<String>,
    pub manual_refund: bool,
    pub manual_instructions: Option<String>,
    pub refund_amount: Option<BigDecimal>,
}

impl RefundOutcome {
    pub fn completed(refund_id: Option<String>, amount: BigDecimal) -> Self {
        Self {
            success: true,
            refund_id,
            manual_refund: false,
            manual_instructions: None,
            refund_amount: Some(amount),
        }
    }

    pub fn manual(instructions: String, amount: Option<BigDecimal>) -> Self {
        Self {
            success: true,
            refund_id: None,
            manual_refund: true,
            manual_instructions: Some(instructions),
            refund_amount: amount,
        }
    }

    pub fn already_in_progress() -> Self {
        Self {
            success: false,
            refund_id: None,
            manual_refund: false,
            manual_instructions: None,
            refund_amount: None,
        }
    }

    /// Partial refund below the minimum refundable unit: no-op, not an error
    pub fn skipped() -> Self {
        Self {
            success: true,
            refund_id: None,
            manual_refund: false,
            manual_instructions: None,
            refund_amount: Some(BigDecimal::from(0)),
        }
    }
}

/// Result of normalizing an amount into the settlement currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversion {
    pub amount: BigDecimal,
    pub currency: String,
    pub rate: BigDecimal,
    pub settlement_amount: BigDecimal,
    pub source: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_name_round_trips() {
        for name in [ProviderName::Gateway, ProviderName::Token, ProviderName::Chain] {
            assert_eq!(ProviderName::from_str(name.as_str()).unwrap(), name);
        }
        assert!(ProviderName::from_str("paypal").is_err());
    }

    #[test]
    fn only_gateway_is_enabled_by_default() {
        assert!(ProviderName::Gateway.enabled_by_default());
        assert!(!ProviderName::Token.enabled_by_default());
        assert!(!ProviderName::Chain.enabled_by_default());
    }

    #[test]
    fn status_round_trips() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Processing,
            PaymentStatus::Succeeded,
            PaymentStatus::Canceled,
            PaymentStatus::Refunded,
            PaymentStatus::Refunding,
            PaymentStatus::Expired,
            PaymentStatus::Partial,
        ] {
            assert_eq!(PaymentStatus::from_str(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn tier_table_is_consistent() {
        assert_eq!(TierId::from_str("premium").unwrap(), TierId::Premium);
        assert_eq!(TierId::Standard.photo_count(), 15);
        assert_eq!(TierId::Starter.price_rub(), 499);
        assert!(TierId::from_str("gold").is_err());
    }

    #[test]
    fn minor_unit_scales() {
        assert_eq!(minor_unit_scale("RUB"), 2);
        assert_eq!(minor_unit_scale("XTR"), 0);
        assert_eq!(minor_unit_scale("TON"), 9);
    }

    #[test]
    fn created_payment_serializes_to_json() {
        let created = CreatedPayment {
            payment_id: 7,
            external_ref: Some("ext_7".to_string()),
            action: PaymentAction::Redirect {
                url: "https://pay.example/7".to_string(),
            },
            amount: BigDecimal::from(999),
            currency: SETTLEMENT_CURRENCY.to_string(),
            settlement_amount: BigDecimal::from(999),
            rate: None,
            expires_at: None,
        };
        let json = serde_json::to_value(&created).expect("serialization should succeed");
        assert_eq!(json["payment_id"], 7);
        assert_eq!(json["action"]["kind"], "redirect");
    }
}
