//! Orphaned deposit storage.
//!
//! A chain deposit that cannot be attributed to any pending payment is
//! never dropped: it lands here for manual review, keyed by its
//! transaction hash so repeated observations of the same transaction
//! do not pile up duplicate rows.

use crate::database::error::DatabaseError;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool};

#[derive(Debug, Clone, FromRow)]
pub struct OrphanPayment {
    pub id: i64,
    pub tx_hash: String,
    pub sender_address: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub comment: Option<String>,
    /// Why attribution failed: no_match, amount_mismatch, rate_expired
    pub reason: String,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrphan {
    pub tx_hash: String,
    pub sender_address: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub comment: Option<String>,
    pub reason: String,
}

const COLUMNS: &str =
    "id, tx_hash, sender_address, amount, currency, comment, reason, resolved, created_at";

const INSERT_SQL_TAIL: &str = "(tx_hash, sender_address, amount, currency, comment, reason, resolved) \
     VALUES ($1, $2, $3, $4, $5, $6, FALSE) \
     ON CONFLICT (tx_hash) DO NOTHING";

pub struct OrphanRepository {
    pool: PgPool,
}

impl OrphanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record an unattributable deposit; a replayed transaction is a no-op
    pub async fn insert(&self, orphan: &NewOrphan) -> Result<(), DatabaseError> {
        sqlx::query(&format!("INSERT INTO orphan_payments {INSERT_SQL_TAIL}"))
            .bind(&orphan.tx_hash)
            .bind(&orphan.sender_address)
            .bind(&orphan.amount)
            .bind(&orphan.currency)
            .bind(&orphan.comment)
            .bind(&orphan.reason)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    /// Transaction-scoped insert, for orphaning atomically with a payment
    /// state change
    pub async fn insert_with(
        conn: &mut PgConnection,
        orphan: &NewOrphan,
    ) -> Result<(), DatabaseError> {
        sqlx::query(&format!("INSERT INTO orphan_payments {INSERT_SQL_TAIL}"))
            .bind(&orphan.tx_hash)
            .bind(&orphan.sender_address)
            .bind(&orphan.amount)
            .bind(&orphan.currency)
            .bind(&orphan.comment)
            .bind(&orphan.reason)
            .execute(conn)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    pub async fn find_unresolved(&self) -> Result<Vec<OrphanPayment>, DatabaseError> {
        sqlx::query_as::<_, OrphanPayment>(&format!(
            "SELECT {COLUMNS} FROM orphan_payments WHERE resolved = FALSE ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn mark_resolved(&self, id: i64) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE orphan_payments SET resolved = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
