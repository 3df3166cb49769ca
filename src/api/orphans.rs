//! Orphaned-deposit review handlers.

use crate::api::AppState;
use crate::database::orphan_repository::OrphanPayment;
use crate::error::AppError;
use axum::extract::{Path, State};
use axum::Json;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

#[derive(Debug, Serialize)]
pub struct OrphanView {
    pub id: i64,
    pub tx_hash: String,
    pub sender_address: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub comment: Option<String>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl From<OrphanPayment> for OrphanView {
    fn from(orphan: OrphanPayment) -> Self {
        Self {
            id: orphan.id,
            tx_hash: orphan.tx_hash,
            sender_address: orphan.sender_address,
            amount: orphan.amount,
            currency: orphan.currency,
            comment: orphan.comment,
            reason: orphan.reason,
            created_at: orphan.created_at,
        }
    }
}

/// Deposits awaiting manual attribution, oldest first
pub async fn list_unresolved(
    State(state): State<AppState>,
) -> Result<Json<Vec<OrphanView>>, AppError> {
    let orphans = state.orphans.find_unresolved().await?;
    Ok(Json(orphans.into_iter().map(OrphanView::from).collect()))
}

pub async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<JsonValue>, AppError> {
    state.orphans.mark_resolved(id).await?;
    Ok(Json(json!({ "resolved": true })))
}
