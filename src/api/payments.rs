//! Payment HTTP handlers.

use crate::api::AppState;
use crate::database::payment_repository::PaymentRecord;
use crate::error::{AppError, AppErrorKind, DomainError};
use crate::payments::types::{
    CreatePaymentRequest, CreatedPayment, ProviderName, RefundContext, RefundOutcome, TierId,
};
use axum::extract::{Path, State};
use axum::Json;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentBody {
    pub provider: String,
    pub user_id: i64,
    pub chat_id: Option<i64>,
    pub tier: String,
    pub purchase_context_id: Uuid,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentView {
    pub id: i64,
    pub provider: String,
    pub status: String,
    pub tier_id: String,
    pub photo_count: i32,
    pub amount: BigDecimal,
    pub original_amount: BigDecimal,
    pub original_currency: String,
    pub exchange_rate: Option<BigDecimal>,
    pub rate_expires_at: Option<DateTime<Utc>>,
    pub refund_status: String,
    pub refund_amount: Option<BigDecimal>,
    pub confirmations: i32,
    pub created_at: DateTime<Utc>,
}

impl From<PaymentRecord> for PaymentView {
    fn from(record: PaymentRecord) -> Self {
        Self {
            id: record.id,
            provider: record.provider,
            status: record.status,
            tier_id: record.tier_id,
            photo_count: record.photo_count,
            amount: record.amount,
            original_amount: record.original_amount,
            original_currency: record.original_currency,
            exchange_rate: record.exchange_rate,
            rate_expires_at: record.rate_expires_at,
            refund_status: record.refund_status,
            refund_amount: record.refund_amount,
            confirmations: record.confirmations,
            created_at: record.created_at,
        }
    }
}

pub async fn create_payment(
    State(state): State<AppState>,
    Json(body): Json<CreatePaymentBody>,
) -> Result<Json<CreatedPayment>, AppError> {
    let provider_name = ProviderName::from_str(&body.provider)?;
    let tier = TierId::from_str(&body.tier).map_err(|_| {
        AppError::new(AppErrorKind::Domain(DomainError::InvalidTier {
            tier: body.tier.clone(),
        }))
    })?;

    let provider = state.factory.get_enabled(provider_name).await?;
    let created = provider
        .create_payment(CreatePaymentRequest {
            user_id: body.user_id,
            chat_id: body.chat_id,
            tier,
            purchase_context_id: body.purchase_context_id,
            email: body.email,
        })
        .await?;

    Ok(Json(created))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PaymentView>, AppError> {
    let record = state.payments.find_by_id(id).await?.ok_or_else(|| {
        AppError::new(AppErrorKind::Domain(DomainError::PaymentNotFound {
            payment_id: id.to_string(),
        }))
    })?;

    // A pending row may have missed its webhook; reconcile through the
    // provider, which persists any terminal transition it learns about.
    // An unreachable provider degrades to the stored row.
    let record = if record.status == "pending" {
        match reconcile_pending(&state, &record).await {
            Ok(Some(refreshed)) => refreshed,
            Ok(None) => record,
            Err(err) => {
                warn!(payment_id = id, error = %err, "status reconciliation failed");
                record
            }
        }
    } else {
        record
    };

    Ok(Json(PaymentView::from(record)))
}

async fn reconcile_pending(
    state: &AppState,
    record: &PaymentRecord,
) -> Result<Option<PaymentRecord>, AppError> {
    let provider_name = ProviderName::from_str(&record.provider)?;
    let provider = state.factory.get_registered(provider_name)?;
    provider.get_status(record.id).await?;
    Ok(state.payments.find_by_id(record.id).await?)
}

#[derive(Debug, Deserialize)]
pub struct RefundBody {
    pub reason: String,
    pub admin_id: i64,
}

pub async fn full_refund(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RefundBody>,
) -> Result<Json<RefundOutcome>, AppError> {
    let outcome = state
        .refunds
        .full_refund(RefundContext {
            payment_id: id,
            reason: body.reason,
            admin_id: body.admin_id,
        })
        .await?;

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct PartialRefundBody {
    pub reason: String,
    pub admin_id: i64,
    /// Items that failed to deliver
    pub failed: i64,
    /// Items purchased
    pub total: i64,
}

pub async fn partial_refund(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<PartialRefundBody>,
) -> Result<Json<RefundOutcome>, AppError> {
    let outcome = state
        .refunds
        .partial_refund(
            RefundContext {
                payment_id: id,
                reason: body.reason,
                admin_id: body.admin_id,
            },
            body.failed,
            body.total,
        )
        .await?;

    Ok(Json(outcome))
}
