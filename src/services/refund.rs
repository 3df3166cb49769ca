//! Refund dispatcher.
//!
//! All refunds, full and partial, go through here. The only concurrency
//! control is the conditional refund-lock UPDATE on the payment row:
//! the dispatcher touches the external provider only while holding that
//! lock, and every exit path either completes, fails, or releases it.
//! Losing the lock race is reported as `success: false` without error;
//! nothing external happened.

use crate::database::payment_repository::{PaymentRecord, PaymentRepository};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::factory::ProviderFactory;
use crate::payments::types::{
    minor_unit_scale, ProviderName, RefundContext, RefundExecution, RefundOutcome, CHAIN_CURRENCY,
};
use bigdecimal::{BigDecimal, RoundingMode};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error as log_error, info, warn};

pub struct RefundDispatcher {
    repository: Arc<PaymentRepository>,
    factory: Arc<ProviderFactory>,
}

impl RefundDispatcher {
    pub fn new(repository: Arc<PaymentRepository>, factory: Arc<ProviderFactory>) -> Self {
        Self {
            repository,
            factory,
        }
    }

    /// Refund the full original amount
    pub async fn full_refund(&self, context: RefundContext) -> PaymentResult<RefundOutcome> {
        let record = match self
            .repository
            .try_acquire_refund_lock(context.payment_id)
            .await?
        {
            Some(record) => record,
            None => {
                info!(
                    payment_id = context.payment_id,
                    "refund lock not acquired, refund already in progress or completed"
                );
                return Ok(RefundOutcome::already_in_progress());
            }
        };

        let amount = record.original_amount.clone();
        self.execute(record, context, amount, false).await
    }

    /// Refund the failed fraction of a partially delivered purchase:
    /// `round(original_amount * failed / total)` at the original
    /// currency's refund precision. A fraction rounding to zero is a
    /// no-op.
    pub async fn partial_refund(
        &self,
        context: RefundContext,
        failed: i64,
        total: i64,
    ) -> PaymentResult<RefundOutcome> {
        if total <= 0 || failed < 0 || failed > total {
            return Err(PaymentError::ValidationError {
                message: format!("invalid delivery counts: {} failed of {}", failed, total),
                field: Some("failed".to_string()),
            });
        }

        // Compute and short-circuit before touching the lock: a zero
        // refund must not block a later real one
        let record = self.repository.get(context.payment_id).await?;
        let amount = partial_amount(&record.original_amount, &record.original_currency, failed, total);
        if amount <= BigDecimal::from(0) {
            info!(
                payment_id = context.payment_id,
                failed, total, "partial refund rounds to zero, skipping"
            );
            return Ok(RefundOutcome::skipped());
        }

        let record = match self
            .repository
            .try_acquire_refund_lock(context.payment_id)
            .await?
        {
            Some(record) => record,
            None => return Ok(RefundOutcome::already_in_progress()),
        };

        // Everything failed: treat as a full refund
        let partial = amount < record.original_amount;
        self.execute(record, context, amount, partial).await
    }

    async fn execute(
        &self,
        record: PaymentRecord,
        context: RefundContext,
        amount: BigDecimal,
        partial: bool,
    ) -> PaymentResult<RefundOutcome> {
        let provider_name = match ProviderName::from_str(&record.provider) {
            Ok(name) => name,
            Err(err) => {
                self.repository
                    .release_refund_lock(record.id)
                    .await?;
                return Err(err);
            }
        };
        // Disabled rails still refund payments they already took; a rail
        // that never got credentials cannot, so hand the operator exact
        // instructions instead of erroring
        let provider = match self.factory.get_registered(provider_name) {
            Ok(provider) => provider,
            Err(err) => {
                self.repository.release_refund_lock(record.id).await?;
                warn!(
                    payment_id = record.id,
                    provider = %provider_name,
                    error = %err,
                    "refund rail unavailable"
                );
                return Ok(RefundOutcome::manual(
                    format!(
                        "Refund {} {} for payment {} manually: the {} rail is not configured",
                        amount, record.original_currency, record.id, provider_name
                    ),
                    Some(amount),
                ));
            }
        };

        let executed = provider
            .refund(&record, partial.then_some(&amount), &context.reason)
            .await;

        match executed {
            Ok(RefundExecution::Completed { refund_id }) => {
                self.repository
                    .complete_refund(record.id, &amount, &context.reason, partial)
                    .await?;
                info!(
                    payment_id = record.id,
                    provider = %provider_name,
                    amount = %amount,
                    partial,
                    admin_id = context.admin_id,
                    "refund completed"
                );
                Ok(RefundOutcome::completed(refund_id, amount))
            }
            Ok(RefundExecution::Manual { instructions }) => {
                // Money has not moved; the row must not claim a completed
                // refund
                let reason = format!("{} (manual)", context.reason);
                self.repository
                    .record_manual_refund(record.id, &amount, &reason)
                    .await?;
                warn!(
                    payment_id = record.id,
                    provider = %provider_name,
                    amount = %amount,
                    admin_id = context.admin_id,
                    instructions = %instructions,
                    "refund requires manual action"
                );
                Ok(RefundOutcome::manual(instructions, Some(amount)))
            }
            Ok(RefundExecution::Blocked { instructions }) => {
                // Precondition failed before anything external happened:
                // release the lock so the payment stays refundable
                self.repository.release_refund_lock(record.id).await?;
                warn!(
                    payment_id = record.id,
                    provider = %provider_name,
                    admin_id = context.admin_id,
                    instructions = %instructions,
                    "refund blocked on a missing precondition"
                );
                Ok(RefundOutcome::manual(instructions, Some(amount)))
            }
            Err(err) => {
                log_error!(
                    payment_id = record.id,
                    provider = %provider_name,
                    error = %err,
                    "refund execution failed"
                );
                // Terminal for automatic retry; a human must re-trigger
                self.repository
                    .fail_refund(record.id, &err.to_string())
                    .await?;
                Ok(RefundOutcome::manual(
                    format!(
                        "Automatic refund of {} {} for payment {} failed, refund manually. Provider error: {}",
                        amount, record.original_currency, record.id, err
                    ),
                    Some(amount),
                ))
            }
        }
    }
}

/// Share of the original amount for `failed` of `total` items.
///
/// Fiat and token rails refund in whole units (their minimum refundable
/// unit); the chain currency keeps its full minor-unit precision.
pub fn partial_amount(
    original: &BigDecimal,
    currency: &str,
    failed: i64,
    total: i64,
) -> BigDecimal {
    let scale = if currency == CHAIN_CURRENCY {
        minor_unit_scale(CHAIN_CURRENCY)
    } else {
        0
    };
    (original * BigDecimal::from(failed) / BigDecimal::from(total))
        .with_scale_round(scale, RoundingMode::HalfUp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_amount_rounds_half_up() {
        assert_eq!(
            partial_amount(&BigDecimal::from(999), "RUB", 5, 15),
            BigDecimal::from(333)
        );
        assert_eq!(
            partial_amount(&BigDecimal::from(499), "RUB", 1, 23),
            BigDecimal::from(22)
        );
        assert_eq!(
            partial_amount(&BigDecimal::from(1799), "RUB", 30, 30),
            BigDecimal::from(1799)
        );
    }

    #[test]
    fn chain_partials_keep_fractional_precision() {
        use std::str::FromStr as _;
        // 5 of 15 on a 4.05 TON payment is 1.35, not 1
        assert_eq!(
            partial_amount(&BigDecimal::from_str("4.050000000").unwrap(), "TON", 5, 15),
            BigDecimal::from_str("1.350000000").unwrap()
        );
    }

    #[test]
    fn tiny_fractions_round_to_zero() {
        assert_eq!(
            partial_amount(&BigDecimal::from(1), "RUB", 1, 3),
            BigDecimal::from(0)
        );
        assert_eq!(
            partial_amount(&BigDecimal::from(999), "XTR", 0, 15),
            BigDecimal::from(0)
        );
    }
}
