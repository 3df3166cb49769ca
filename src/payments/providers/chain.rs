//! Blockchain rail.
//!
//! No external payment API: the user sends the quoted amount to the
//! service wallet with the payment id in the transfer comment. Deposit
//! events are matched by comment, checked against the quote within a
//! small tolerance, and promoted once enough confirmations accumulate.
//! The quote's exchange rate is locked for a limited window; a deposit
//! arriving after the lock lapses is orphaned for manual review rather
//! than settled at a stale rate.

use crate::config::ChainConfig;
use crate::database::orphan_repository::{NewOrphan, OrphanRepository};
use crate::database::payment_repository::{NewPayment, PaymentRecord, PaymentRepository};
use crate::database::transaction::with_transaction;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    Conversion, CreatePaymentRequest, CreatedPayment, PaymentAction, PaymentStatus, ProviderName,
    RefundExecution, WebhookOutcome, CHAIN_CURRENCY,
};
use crate::services::rate_service::RateService;
use async_trait::async_trait;
use bigdecimal::{BigDecimal, RoundingMode};
use chrono::Utc;
use regex::Regex;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Scale used when quoting amounts in the chain currency
const CHAIN_SCALE: i64 = 9;

pub struct ChainProvider {
    pool: PgPool,
    repository: Arc<PaymentRepository>,
    orphans: Arc<OrphanRepository>,
    rates: Arc<RateService>,
    wallet_address: String,
    confirmation_threshold: i32,
    amount_tolerance_pct: u32,
    rate_lock_minutes: i64,
    comment_pattern: Regex,
}

impl ChainProvider {
    pub fn from_config(
        config: &ChainConfig,
        pool: PgPool,
        repository: Arc<PaymentRepository>,
        orphans: Arc<OrphanRepository>,
        rates: Arc<RateService>,
    ) -> PaymentResult<Self> {
        let wallet_address =
            config
                .wallet_address
                .clone()
                .ok_or_else(|| PaymentError::ConfigurationError {
                    message: "CHAIN_WALLET_ADDRESS is not set".to_string(),
                })?;
        let comment_pattern =
            Regex::new(r"\d+").map_err(|e| PaymentError::ConfigurationError {
                message: format!("invalid comment pattern: {}", e),
            })?;

        Ok(Self {
            pool,
            repository,
            orphans,
            rates,
            wallet_address,
            confirmation_threshold: config.confirmation_threshold,
            amount_tolerance_pct: config.amount_tolerance_pct,
            rate_lock_minutes: config.rate_lock_minutes,
            comment_pattern,
        })
    }

    /// Payment id embedded in a transfer comment; users paste extra text
    /// around it, so the first digit run wins
    fn payment_id_from_comment(&self, comment: &str) -> Option<i64> {
        self.comment_pattern
            .find(comment)
            .and_then(|m| m.as_str().parse().ok())
    }

    fn orphan_from(deposit: &DepositEvent, reason: &str) -> NewOrphan {
        NewOrphan {
            tx_hash: deposit.tx_hash.clone(),
            sender_address: deposit.sender_address.clone(),
            amount: deposit.amount.clone(),
            currency: CHAIN_CURRENCY.to_string(),
            comment: deposit.comment.clone(),
            reason: reason.to_string(),
        }
    }

    async fn handle_known_transaction(
        &self,
        record: PaymentRecord,
        deposit: &DepositEvent,
    ) -> PaymentResult<WebhookOutcome> {
        let updated = self
            .repository
            .bump_confirmations(&deposit.tx_hash, deposit.confirmations)
            .await?
            .unwrap_or(record);

        if updated.status == "processing" && updated.confirmations >= self.confirmation_threshold {
            if let Some(promoted) = self
                .repository
                .promote_confirmed(updated.id, self.confirmation_threshold)
                .await?
            {
                info!(
                    payment_id = promoted.id,
                    confirmations = promoted.confirmations,
                    "chain payment confirmed"
                );
                return Ok(WebhookOutcome::ok(promoted.id, PaymentStatus::Succeeded));
            }
        }

        Ok(WebhookOutcome::accepted())
    }

    async fn handle_new_deposit(&self, deposit: &DepositEvent) -> PaymentResult<WebhookOutcome> {
        let payment_id = deposit
            .comment
            .as_deref()
            .and_then(|c| self.payment_id_from_comment(c));

        let record = match payment_id {
            Some(id) => self.repository.find_pending_chain_payment(id).await?,
            None => None,
        };
        let record = match record {
            Some(record) => record,
            None => {
                warn!(tx_hash = %deposit.tx_hash, "unattributable chain deposit");
                self.orphans
                    .insert(&Self::orphan_from(deposit, "no_match"))
                    .await?;
                return Ok(WebhookOutcome::accepted());
            }
        };

        // A lapsed rate lock must expire the payment and orphan the
        // deposit in one step, or a crash in between loses the deposit
        if record.rate_lock_expired(Utc::now()) {
            let orphan = Self::orphan_from(deposit, "rate_expired");
            let payment_id = record.id;
            with_transaction(&self.pool, move |conn| {
                Box::pin(async move {
                    PaymentRepository::mark_expired_with(conn, payment_id).await?;
                    OrphanRepository::insert_with(conn, &orphan).await?;
                    Ok(())
                })
            })
            .await?;
            warn!(payment_id = record.id, tx_hash = %deposit.tx_hash, "deposit after rate lock expiry");
            return Ok(WebhookOutcome::accepted());
        }

        if !within_tolerance(
            &record.original_amount,
            &deposit.amount,
            self.amount_tolerance_pct,
        ) {
            warn!(
                payment_id = record.id,
                expected = %record.original_amount,
                received = %deposit.amount,
                "chain deposit amount outside tolerance"
            );
            self.orphans
                .insert(&Self::orphan_from(deposit, "amount_mismatch"))
                .await?;
            return Ok(WebhookOutcome::accepted());
        }

        let status = if deposit.confirmations >= self.confirmation_threshold {
            PaymentStatus::Succeeded
        } else {
            PaymentStatus::Processing
        };
        match self
            .repository
            .attach_chain_match(
                record.id,
                &deposit.tx_hash,
                deposit.sender_address.as_deref(),
                deposit.confirmations,
                status.as_str(),
            )
            .await?
        {
            Some(matched) => {
                info!(
                    payment_id = matched.id,
                    tx_hash = %deposit.tx_hash,
                    confirmations = deposit.confirmations,
                    status = %status,
                    "chain deposit matched"
                );
                Ok(WebhookOutcome::ok(matched.id, status))
            }
            // Lost the race to another observation of the same payment
            None => Ok(WebhookOutcome::accepted()),
        }
    }
}

/// Chain-currency amount quoted for a settlement price at a locked rate
fn quote_amount(price_rub: &BigDecimal, rate: &BigDecimal) -> BigDecimal {
    (price_rub / rate).with_scale_round(CHAIN_SCALE, RoundingMode::HalfUp)
}

/// Received vs expected within `pct` percent of the expected amount
fn within_tolerance(expected: &BigDecimal, received: &BigDecimal, pct: u32) -> bool {
    let diff = (expected - received).abs();
    diff * BigDecimal::from(100) <= expected * BigDecimal::from(pct)
}

#[derive(Debug)]
struct DepositEvent {
    tx_hash: String,
    sender_address: Option<String>,
    destination: Option<String>,
    amount: BigDecimal,
    comment: Option<String>,
    confirmations: i32,
}

impl DepositEvent {
    fn from_payload(payload: &JsonValue) -> PaymentResult<Self> {
        let tx_hash = payload
            .get("tx_hash")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| PaymentError::ValidationError {
                message: "deposit event missing tx_hash".to_string(),
                field: Some("tx_hash".to_string()),
            })?;
        let amount_raw = payload
            .get("amount")
            .map(|v| match v {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })
            .ok_or_else(|| PaymentError::ValidationError {
                message: "deposit event missing amount".to_string(),
                field: Some("amount".to_string()),
            })?;
        let amount =
            BigDecimal::from_str(&amount_raw).map_err(|_| PaymentError::ValidationError {
                message: format!("invalid deposit amount: {}", amount_raw),
                field: Some("amount".to_string()),
            })?;

        Ok(Self {
            tx_hash,
            sender_address: payload
                .get("sender_address")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            destination: payload
                .get("destination")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            amount,
            comment: payload
                .get("comment")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            confirmations: payload
                .get("confirmations")
                .and_then(|v| v.as_i64())
                .unwrap_or(0) as i32,
        })
    }
}

#[async_trait]
impl PaymentProvider for ChainProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Chain
    }

    fn currency(&self) -> &'static str {
        CHAIN_CURRENCY
    }

    async fn create_payment(&self, request: CreatePaymentRequest) -> PaymentResult<CreatedPayment> {
        let price_rub = BigDecimal::from(request.tier.price_rub());
        let rate = self.rates.get_rate(CHAIN_CURRENCY).await?;

        if rate.rate <= BigDecimal::from(0) {
            return Err(PaymentError::RateError {
                message: format!("non-positive {} rate: {}", CHAIN_CURRENCY, rate.rate),
            });
        }
        let chain_amount = quote_amount(&price_rub, &rate.rate);

        let now = Utc::now();
        let expires_at = now + chrono::Duration::minutes(self.rate_lock_minutes);

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
                amount: price_rub.clone(),
                original_amount: chain_amount.clone(),
                original_currency: CHAIN_CURRENCY.to_string(),
                exchange_rate: Some(rate.rate.clone()),
                rate_locked_at: Some(now),
                rate_expires_at: Some(expires_at),
            })
            .await?;

        info!(
            payment_id = record.id,
            amount = %chain_amount,
            rate = %rate.rate,
            rate_source = %rate.source,
            "chain payment quoted"
        );

        Ok(CreatedPayment {
            payment_id: record.id,
            external_ref: None,
            action: PaymentAction::WalletDeposit {
                address: self.wallet_address.clone(),
                comment: record.id.to_string(),
                expires_at,
            },
            amount: chain_amount,
            currency: CHAIN_CURRENCY.to_string(),
            settlement_amount: price_rub,
            rate: Some(rate.rate),
            expires_at: Some(expires_at),
        })
    }

    async fn get_status(&self, payment_id: i64) -> PaymentResult<PaymentStatus> {
        let record = self.repository.get(payment_id).await?;
        PaymentStatus::from_str(&record.status)
    }

    async fn process_webhook(&self, payload: &JsonValue) -> PaymentResult<WebhookOutcome> {
        let deposit = DepositEvent::from_payload(payload)?;

        // Events for other wallets are not ours
        if let Some(destination) = &deposit.destination {
            if destination != &self.wallet_address {
                return Ok(WebhookOutcome::accepted());
            }
        }

        match self.repository.find_by_tx_hash(&deposit.tx_hash).await? {
            Some(record) => self.handle_known_transaction(record, &deposit).await,
            None => self.handle_new_deposit(&deposit).await,
        }
    }

    async fn refund(
        &self,
        payment: &PaymentRecord,
        amount: Option<&BigDecimal>,
        reason: &str,
    ) -> PaymentResult<RefundExecution> {
        // No programmatic refunds on this rail; produce exact operator
        // instructions instead
        let chain_amount = amount.unwrap_or(&payment.original_amount).clone();

        let destination = payment
            .sender_address
            .as_deref()
            .unwrap_or("the originating wallet");
        let tx_ref = payment.tx_hash.as_deref().unwrap_or("unknown");

        Ok(RefundExecution::Manual {
            instructions: format!(
                "Send {} {} to {} (original deposit {}). Payment {}, reason: {}",
                chain_amount, CHAIN_CURRENCY, destination, tx_ref, payment.id, reason
            ),
        })
    }

    async fn convert_to_rub(&self, amount: &BigDecimal) -> PaymentResult<Conversion> {
        self.rates.convert_to_rub(amount, CHAIN_CURRENCY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerance_accepts_one_percent_deviation() {
        let expected = BigDecimal::from_str("4.000000000").unwrap();

        assert!(within_tolerance(&expected, &expected, 1));
        assert!(within_tolerance(
            &expected,
            &BigDecimal::from_str("3.96").unwrap(),
            1
        ));
        assert!(within_tolerance(
            &expected,
            &BigDecimal::from_str("4.04").unwrap(),
            1
        ));
        assert!(!within_tolerance(
            &expected,
            &BigDecimal::from_str("3.95").unwrap(),
            1
        ));
        assert!(!within_tolerance(
            &expected,
            &BigDecimal::from_str("4.09").unwrap(),
            1
        ));
    }

    #[test]
    fn deposit_event_parses_string_and_numeric_amounts() {
        let event = DepositEvent::from_payload(&serde_json::json!({
            "tx_hash": "abc123",
            "amount": "4.05",
            "comment": "payment 42",
            "confirmations": 3
        }))
        .unwrap();
        assert_eq!(event.amount, BigDecimal::from_str("4.05").unwrap());
        assert_eq!(event.confirmations, 3);

        let event = DepositEvent::from_payload(&serde_json::json!({
            "tx_hash": "abc123",
            "amount": 4.05
        }))
        .unwrap();
        assert_eq!(event.amount, BigDecimal::from_str("4.05").unwrap());
        assert_eq!(event.confirmations, 0);

        assert!(DepositEvent::from_payload(&serde_json::json!({"amount": "1"})).is_err());
    }

    #[test]
    fn deposits_settle_against_the_locked_quote_not_the_live_rate() {
        let price_rub = BigDecimal::from(999);
        let locked = quote_amount(&price_rub, &BigDecimal::from(250));
        assert_eq!(locked, BigDecimal::from_str("3.996000000").unwrap());

        // The user paid the quoted amount; a later rate move does not
        // reprice the deposit
        assert!(within_tolerance(&locked, &locked, 1));
        let repriced = quote_amount(&price_rub, &BigDecimal::from(300));
        assert!(!within_tolerance(&repriced, &locked, 1));
    }

    #[test]
    fn comment_extraction_takes_first_digit_run() {
        let pattern = Regex::new(r"\d+").unwrap();
        let find = |comment: &str| {
            pattern
                .find(comment)
                .and_then(|m| m.as_str().parse::<i64>().ok())
        };
        assert_eq!(find("42"), Some(42));
        assert_eq!(find("payment #42, thanks"), Some(42));
        assert_eq!(find("no id here"), None);
    }
}
