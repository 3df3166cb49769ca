//! Exchange rate audit trail.
//!
//! Rates are append-only: every fetch writes a new row tagged with its
//! source, so any payment's `exchange_rate` can be traced back to where
//! the number came from. Rows are never updated or deleted.

use crate::database::error::DatabaseError;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, FromRow)]
pub struct ExchangeRateRecord {
    pub id: i64,
    pub currency: String,
    /// Settlement-currency units per one unit of `currency`
    pub rate: BigDecimal,
    /// Where the number came from: live, cached_fallback, emergency_fallback, manual
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct ExchangeRateRepository {
    pool: PgPool,
}

impl ExchangeRateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_rate(
        &self,
        currency: &str,
        rate: &BigDecimal,
        source: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<ExchangeRateRecord, DatabaseError> {
        sqlx::query_as::<_, ExchangeRateRecord>(
            "INSERT INTO exchange_rates (currency, rate, source, fetched_at, expires_at) \
             VALUES ($1, $2, $3, NOW(), $4) \
             RETURNING id, currency, rate, source, fetched_at, expires_at",
        )
        .bind(currency)
        .bind(rate)
        .bind(source)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Most recent rate whose expiry has not passed
    pub async fn latest_unexpired(
        &self,
        currency: &str,
    ) -> Result<Option<ExchangeRateRecord>, DatabaseError> {
        sqlx::query_as::<_, ExchangeRateRecord>(
            "SELECT id, currency, rate, source, fetched_at, expires_at \
             FROM exchange_rates \
             WHERE currency = $1 AND expires_at > NOW() \
             ORDER BY fetched_at DESC \
             LIMIT 1",
        )
        .bind(currency)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Most recent rate regardless of expiry; fallback when the market
    /// source is down
    pub async fn latest_any(
        &self,
        currency: &str,
    ) -> Result<Option<ExchangeRateRecord>, DatabaseError> {
        sqlx::query_as::<_, ExchangeRateRecord>(
            "SELECT id, currency, rate, source, fetched_at, expires_at \
             FROM exchange_rates \
             WHERE currency = $1 \
             ORDER BY fetched_at DESC \
             LIMIT 1",
        )
        .bind(currency)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
