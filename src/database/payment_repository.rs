//! Payment record storage.
//!
//! The payment row is the permanent audit trail of one purchase attempt;
//! rows are never deleted. Every state transition is a single guarded
//! `UPDATE ... WHERE ... RETURNING` so that concurrent writers can race
//! safely: whoever matches zero rows lost, and nothing external happened
//! yet. The refund lock in particular is only this conditional write; there
//! is no in-process mutex anywhere.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::payments::types::{PaymentStatus, RefundStatus};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

/// One purchase attempt
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRecord {
    pub id: i64,
    pub provider: String,
    pub external_id: Option<String>,
    pub user_id: i64,
    pub chat_id: Option<i64>,
    pub purchase_context_id: Uuid,
    pub email: Option<String>,
    pub tier_id: String,
    pub photo_count: i32,
    /// Settlement-currency amount
    pub amount: BigDecimal,
    pub original_amount: BigDecimal,
    pub original_currency: String,
    pub exchange_rate: Option<BigDecimal>,
    pub rate_locked_at: Option<DateTime<Utc>>,
    pub rate_expires_at: Option<DateTime<Utc>>,
    pub status: String,
    pub refund_amount: Option<BigDecimal>,
    pub refund_status: String,
    pub refund_reason: Option<String>,
    pub refund_at: Option<DateTime<Utc>>,
    pub gateway_transaction_id: Option<String>,
    pub charge_id: Option<String>,
    pub tx_hash: Option<String>,
    pub sender_address: Option<String>,
    pub confirmations: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn rate_lock_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.rate_expires_at, Some(expires) if expires < now)
    }
}

/// Insert payload for a new payment row
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub provider: String,
    pub user_id: i64,
    pub chat_id: Option<i64>,
    pub purchase_context_id: Uuid,
    pub email: Option<String>,
    pub tier_id: String,
    pub photo_count: i32,
    pub amount: BigDecimal,
    pub original_amount: BigDecimal,
    pub original_currency: String,
    pub exchange_rate: Option<BigDecimal>,
    pub rate_locked_at: Option<DateTime<Utc>>,
    pub rate_expires_at: Option<DateTime<Utc>>,
}

const COLUMNS: &str = "id, provider, external_id, user_id, chat_id, purchase_context_id, email, \
     tier_id, photo_count, amount, original_amount, original_currency, \
     exchange_rate, rate_locked_at, rate_expires_at, status, \
     refund_amount, refund_status, refund_reason, refund_at, \
     gateway_transaction_id, charge_id, tx_hash, sender_address, confirmations, \
     created_at, updated_at";

pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a payment row in `pending` status.
    ///
    /// Called before any external API so that a crash after the external
    /// call still leaves a traceable row with a correlation key.
    pub async fn create(&self, new: &NewPayment) -> Result<PaymentRecord, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "INSERT INTO payments \
             (provider, user_id, chat_id, purchase_context_id, email, tier_id, photo_count, \
              amount, original_amount, original_currency, exchange_rate, rate_locked_at, \
              rate_expires_at, status, refund_status, confirmations) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 'pending', 'none', 0) \
             RETURNING {COLUMNS}"
        ))
        .bind(&new.provider)
        .bind(new.user_id)
        .bind(new.chat_id)
        .bind(new.purchase_context_id)
        .bind(&new.email)
        .bind(&new.tier_id)
        .bind(new.photo_count)
        .bind(&new.amount)
        .bind(&new.original_amount)
        .bind(&new.original_currency)
        .bind(&new.exchange_rate)
        .bind(new.rate_locked_at)
        .bind(new.rate_expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "SELECT {COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn get(&self, id: i64) -> Result<PaymentRecord, DatabaseError> {
        self.find_by_id(id).await?.ok_or_else(|| {
            DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "PaymentRecord".to_string(),
                id: id.to_string(),
            })
        })
    }

    pub async fn find_by_tx_hash(
        &self,
        tx_hash: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "SELECT {COLUMNS} FROM payments WHERE tx_hash = $1"
        ))
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// A `pending` chain payment referenced by its comment
    pub async fn find_pending_chain_payment(
        &self,
        id: i64,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "SELECT {COLUMNS} FROM payments \
             WHERE id = $1 AND provider = 'chain' AND status = 'pending'"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Store the provider-assigned references after the external create call
    pub async fn set_external_refs(
        &self,
        id: i64,
        external_id: &str,
        gateway_transaction_id: Option<&str>,
    ) -> Result<PaymentRecord, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "UPDATE payments \
             SET external_id = $2, gateway_transaction_id = $3, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(external_id)
        .bind(gateway_transaction_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Idempotent settlement keyed on the provider's external id.
    ///
    /// Returns `None` when no row was still pending/processing: a webhook
    /// replay resolves to a no-op instead of a second transition.
    pub async fn mark_succeeded_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "UPDATE payments \
             SET status = 'succeeded', updated_at = NOW() \
             WHERE provider = $1 AND external_id = $2 AND status IN ('pending', 'processing') \
             RETURNING {COLUMNS}"
        ))
        .bind(provider)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn mark_canceled_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "UPDATE payments \
             SET status = 'canceled', updated_at = NOW() \
             WHERE provider = $1 AND external_id = $2 AND status IN ('pending', 'processing') \
             RETURNING {COLUMNS}"
        ))
        .bind(provider)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Provider-side refund observed via webhook (gateway REFUNDED status)
    pub async fn mark_refunded_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "UPDATE payments \
             SET status = 'refunded', refund_status = 'completed', refund_at = NOW(), \
                 updated_at = NOW() \
             WHERE provider = $1 AND external_id = $2 \
               AND status IN ('succeeded', 'refunding') \
             RETURNING {COLUMNS}"
        ))
        .bind(provider)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Two-phase token settlement; idempotent on the charge id
    pub async fn settle_token_payment(
        &self,
        id: i64,
        charge_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "UPDATE payments \
             SET status = 'succeeded', charge_id = $2, updated_at = NOW() \
             WHERE id = $1 AND status IN ('pending', 'processing') \
               AND (charge_id IS NULL OR charge_id = $2) \
             RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(charge_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Link an observed chain transaction to its pending payment
    pub async fn attach_chain_match(
        &self,
        id: i64,
        tx_hash: &str,
        sender_address: Option<&str>,
        confirmations: i32,
        status: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "UPDATE payments \
             SET status = $5, tx_hash = $2, sender_address = $3, confirmations = $4, \
                 updated_at = NOW() \
             WHERE id = $1 AND provider = 'chain' AND status = 'pending' AND tx_hash IS NULL \
             RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(tx_hash)
        .bind(sender_address)
        .bind(confirmations)
        .bind(status)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Monotonic confirmation-count update for an already-linked transaction
    pub async fn bump_confirmations(
        &self,
        tx_hash: &str,
        confirmations: i32,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "UPDATE payments \
             SET confirmations = $2, updated_at = NOW() \
             WHERE tx_hash = $1 AND confirmations < $2 \
             RETURNING {COLUMNS}"
        ))
        .bind(tx_hash)
        .bind(confirmations)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Promote a processing chain payment once the threshold is reached
    pub async fn promote_confirmed(
        &self,
        id: i64,
        threshold: i32,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "UPDATE payments \
             SET status = 'succeeded', updated_at = NOW() \
             WHERE id = $1 AND status = 'processing' AND confirmations >= $2 \
             RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(threshold)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Refund lock acquisition, the system's one concurrency primitive.
    ///
    /// `None` means another caller owns the refund or it is already
    /// completed; the caller must not touch the external provider.
    pub async fn try_acquire_refund_lock(
        &self,
        id: i64,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "UPDATE payments \
             SET refund_status = 'processing', status = 'refunding', updated_at = NOW() \
             WHERE id = $1 AND status = 'succeeded' \
               AND refund_status NOT IN ('processing', 'completed') \
             RETURNING {COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Release a held lock without refunding (precondition failed)
    pub async fn release_refund_lock(&self, id: i64) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE payments \
             SET refund_status = 'none', status = 'succeeded', updated_at = NOW() \
             WHERE id = $1 AND refund_status = 'processing'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    pub async fn complete_refund(
        &self,
        id: i64,
        amount: &BigDecimal,
        reason: &str,
        partial: bool,
    ) -> Result<PaymentRecord, DatabaseError> {
        let (status, refund_status) = if partial {
            (PaymentStatus::Partial, RefundStatus::Partial)
        } else {
            (PaymentStatus::Refunded, RefundStatus::Completed)
        };
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "UPDATE payments \
             SET status = $2, refund_status = $3, refund_amount = $4, refund_reason = $5, \
                 refund_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND refund_status = 'processing' \
             RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(refund_status.as_str())
        .bind(amount)
        .bind(reason)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Manual-rail outcome: instructions were issued, money has not
    /// moved. The row returns to `succeeded` with the pending amount and
    /// a manual-flagged reason; `failed` keeps the lock re-acquirable so
    /// the operator can re-trigger for fresh instructions.
    pub async fn record_manual_refund(
        &self,
        id: i64,
        amount: &BigDecimal,
        reason: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE payments \
             SET refund_status = 'failed', status = 'succeeded', refund_amount = $2, \
                 refund_reason = $3, updated_at = NOW() \
             WHERE id = $1 AND refund_status = 'processing'",
        )
        .bind(id)
        .bind(amount)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    /// Terminal for automatic retry; a human must re-trigger
    pub async fn fail_refund(&self, id: i64, reason: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE payments \
             SET refund_status = 'failed', status = 'succeeded', refund_reason = $2, \
                 updated_at = NOW() \
             WHERE id = $1 AND refund_status = 'processing'",
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    /// Expire pending chain payments whose rate lock has passed
    pub async fn expire_stale_chain_payments(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "UPDATE payments \
             SET status = 'expired', updated_at = NOW() \
             WHERE provider = 'chain' AND status = 'pending' AND rate_expires_at < NOW()",
        )
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected())
    }

    /// Transaction-scoped expiry of a single payment (used when a deposit
    /// arrives after the rate lock lapsed and is orphaned atomically)
    pub async fn mark_expired_with(
        conn: &mut PgConnection,
        id: i64,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "UPDATE payments \
             SET status = 'expired', updated_at = NOW() \
             WHERE id = $1 AND status = 'pending' \
             RETURNING {COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn rate_lock_expiry_check() {
        let now = Utc::now();
        let record = sample_record(Some(now - chrono::Duration::minutes(1)));
        assert!(record.rate_lock_expired(now));

        let record = sample_record(Some(now + chrono::Duration::minutes(10)));
        assert!(!record.rate_lock_expired(now));

        // Fiat rows carry no rate lock
        let record = sample_record(None);
        assert!(!record.rate_lock_expired(now));
    }

    fn sample_record(rate_expires_at: Option<DateTime<Utc>>) -> PaymentRecord {
        let now = Utc::now();
        PaymentRecord {
            id: 1,
            provider: "chain".to_string(),
            external_id: None,
            user_id: 10,
            chat_id: None,
            purchase_context_id: Uuid::new_v4(),
            email: None,
            tier_id: "standard".to_string(),
            photo_count: 15,
            amount: BigDecimal::from(999),
            original_amount: BigDecimal::from_str("4.05").unwrap(),
            original_currency: "TON".to_string(),
            exchange_rate: Some(BigDecimal::from(247)),
            rate_locked_at: Some(now),
            rate_expires_at,
            status: "pending".to_string(),
            refund_amount: None,
            refund_status: "none".to_string(),
            refund_reason: None,
            refund_at: None,
            gateway_transaction_id: None,
            charge_id: None,
            tx_hash: None,
            sender_address: None,
            confirmations: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
