//! Per-provider runtime configuration.
//!
//! Enablement and operator-tunable settings (token prices, manual rate
//! overrides) live in a small keyed table so a provider can be switched
//! off without a deploy.

use crate::database::error::DatabaseError;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, FromRow)]
pub struct ProviderConfig {
    pub provider: String,
    pub enabled: bool,
    pub settings: JsonValue,
    pub updated_at: DateTime<Utc>,
}

pub struct ProviderConfigRepository {
    pool: PgPool,
}

impl ProviderConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, provider: &str) -> Result<Option<ProviderConfig>, DatabaseError> {
        sqlx::query_as::<_, ProviderConfig>(
            "SELECT provider, enabled, settings, updated_at \
             FROM provider_configs WHERE provider = $1",
        )
        .bind(provider)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Absent row falls back to the provider's compiled-in default
    pub async fn is_enabled(
        &self,
        provider: &str,
        default: bool,
    ) -> Result<bool, DatabaseError> {
        Ok(self.get(provider).await?.map_or(default, |c| c.enabled))
    }

    pub async fn upsert(
        &self,
        provider: &str,
        enabled: bool,
        settings: &JsonValue,
    ) -> Result<ProviderConfig, DatabaseError> {
        sqlx::query_as::<_, ProviderConfig>(
            "INSERT INTO provider_configs (provider, enabled, settings, updated_at) \
             VALUES ($1, $2, $3, NOW()) \
             ON CONFLICT (provider) \
             DO UPDATE SET enabled = $2, settings = $3, updated_at = NOW() \
             RETURNING provider, enabled, settings, updated_at",
        )
        .bind(provider)
        .bind(enabled)
        .bind(settings)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
