//! Exchange rate service.
//!
//! Every rate the system hands out is time-boxed and tagged with its
//! source, so a payment priced on a fallback number is distinguishable
//! from one priced live. Lookup order: in-process cache, then the
//! durable rate table, then a fresh fetch. A fetch that cannot reach
//! the market degrades through the last durable rate to a configured
//! emergency constant rather than failing the payment.

use crate::config::RatesConfig;
use crate::database::exchange_rate_repository::ExchangeRateRepository;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{Conversion, SETTLEMENT_CURRENCY, TOKEN_CURRENCY};
use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{DateTime, Duration, Utc};
use reqwest::Method;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::payments::utils::PaymentHttpClient;

/// Rate source tags, worst to best: emergency_fallback, cached_fallback,
/// manual, live
pub const SOURCE_LIVE: &str = "live";
pub const SOURCE_CACHED_FALLBACK: &str = "cached_fallback";
pub const SOURCE_EMERGENCY_FALLBACK: &str = "emergency_fallback";
pub const SOURCE_MANUAL: &str = "manual";

/// Time source, injectable so expiry logic is testable
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// One settlement-currency rate with its provenance
#[derive(Debug, Clone)]
pub struct Rate {
    pub currency: String,
    /// Settlement-currency units per one unit of `currency`
    pub rate: BigDecimal,
    pub source: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CachedRate {
    rate: Rate,
    cached_at: DateTime<Utc>,
}

/// In-process rate cache. Lock is never held across an await.
struct RateCache {
    entries: Mutex<HashMap<String, CachedRate>>,
    max_age: Duration,
}

impl RateCache {
    fn new(max_age: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_age,
        }
    }

    fn get(&self, currency: &str, now: DateTime<Utc>) -> Option<Rate> {
        let entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.get(currency).and_then(|cached| {
            let fresh = now - cached.cached_at < self.max_age && cached.rate.expires_at > now;
            fresh.then(|| cached.rate.clone())
        })
    }

    fn put(&self, rate: Rate, now: DateTime<Utc>) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(
            rate.currency.clone(),
            CachedRate {
                rate,
                cached_at: now,
            },
        );
    }
}

#[derive(Debug, Deserialize)]
struct MarketQuote {
    price: String,
}

pub struct RateService {
    repository: Arc<ExchangeRateRepository>,
    http: PaymentHttpClient,
    config: RatesConfig,
    clock: Arc<dyn Clock>,
    cache: RateCache,
}

impl RateService {
    pub fn new(
        repository: Arc<ExchangeRateRepository>,
        config: RatesConfig,
    ) -> PaymentResult<Self> {
        Self::with_clock(repository, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        repository: Arc<ExchangeRateRepository>,
        config: RatesConfig,
        clock: Arc<dyn Clock>,
    ) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            std::time::Duration::from_secs(config.market_timeout_secs),
            1,
        )?;
        let cache = RateCache::new(Duration::seconds(config.market_cache_secs as i64));

        Ok(Self {
            repository,
            http,
            config,
            clock,
            cache,
        })
    }

    pub async fn get_rate(&self, currency: &str) -> PaymentResult<Rate> {
        let now = self.clock.now();

        if let Some(rate) = self.cache.get(currency, now) {
            return Ok(rate);
        }

        if let Some(row) = self.repository.latest_unexpired(currency).await? {
            let rate = Rate {
                currency: row.currency,
                rate: row.rate,
                source: row.source,
                expires_at: row.expires_at,
            };
            self.cache.put(rate.clone(), now);
            return Ok(rate);
        }

        let rate = self.fetch_and_persist(currency, now).await?;
        self.cache.put(rate.clone(), now);
        Ok(rate)
    }

    pub async fn convert_to_rub(
        &self,
        amount: &BigDecimal,
        currency: &str,
    ) -> PaymentResult<Conversion> {
        let rate = self.get_rate(currency).await?;
        let settlement_amount =
            (amount * &rate.rate).with_scale_round(2, RoundingMode::HalfUp);

        Ok(Conversion {
            amount: amount.clone(),
            currency: currency.to_string(),
            rate: rate.rate,
            settlement_amount,
            source: rate.source,
            expires_at: rate.expires_at,
        })
    }

    async fn fetch_and_persist(
        &self,
        currency: &str,
        now: DateTime<Utc>,
    ) -> PaymentResult<Rate> {
        let (value, source) = self.fetch(currency).await?;
        let expires_at = now + Duration::minutes(self.config.rate_ttl_minutes);

        let row = self
            .repository
            .insert_rate(currency, &value, source, expires_at)
            .await?;

        info!(currency = %currency, rate = %row.rate, source = %source, "rate refreshed");

        Ok(Rate {
            currency: row.currency,
            rate: row.rate,
            source: row.source,
            expires_at: row.expires_at,
        })
    }

    async fn fetch(&self, currency: &str) -> PaymentResult<(BigDecimal, &'static str)> {
        // The token currency is fiat-pegged by definition
        if currency == TOKEN_CURRENCY {
            return Ok((BigDecimal::from(1), SOURCE_MANUAL));
        }

        let url = format!(
            "{}?base={}&quote={}",
            self.config.market_url, currency, SETTLEMENT_CURRENCY
        );
        match self
            .http
            .request_json::<MarketQuote>(Method::GET, &url, None, &[])
            .await
        {
            Ok(quote) => match BigDecimal::from_str(&quote.price) {
                Ok(value) if value > BigDecimal::from(0) => Ok((value, SOURCE_LIVE)),
                _ => {
                    warn!(currency = %currency, price = %quote.price, "unusable market quote");
                    self.fallback(currency).await
                }
            },
            Err(err) => {
                warn!(currency = %currency, error = %err, "market fetch failed");
                self.fallback(currency).await
            }
        }
    }

    /// Last durable rate regardless of age, then the emergency constant
    async fn fallback(&self, currency: &str) -> PaymentResult<(BigDecimal, &'static str)> {
        if let Some(row) = self.repository.latest_any(currency).await? {
            return Ok((row.rate, SOURCE_CACHED_FALLBACK));
        }

        let emergency = BigDecimal::from_str(&self.config.emergency_chain_rate).map_err(|_| {
            PaymentError::ConfigurationError {
                message: format!(
                    "invalid emergency rate: {}",
                    self.config.emergency_chain_rate
                ),
            }
        })?;
        warn!(currency = %currency, rate = %emergency, "using emergency fallback rate");
        Ok((emergency, SOURCE_EMERGENCY_FALLBACK))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(currency: &str, expires_at: DateTime<Utc>) -> Rate {
        Rate {
            currency: currency.to_string(),
            rate: BigDecimal::from(247),
            source: SOURCE_LIVE.to_string(),
            expires_at,
        }
    }

    #[test]
    fn cache_returns_fresh_entries() {
        let now = Utc::now();
        let cache = RateCache::new(Duration::seconds(300));
        cache.put(rate("TON", now + Duration::minutes(15)), now);

        assert!(cache.get("TON", now).is_some());
        assert!(cache.get("TON", now + Duration::seconds(299)).is_some());
        assert!(cache.get("XTR", now).is_none());
    }

    #[test]
    fn cache_expires_by_age() {
        let now = Utc::now();
        let cache = RateCache::new(Duration::seconds(300));
        cache.put(rate("TON", now + Duration::minutes(15)), now);

        assert!(cache.get("TON", now + Duration::seconds(301)).is_none());
    }

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn new(start: DateTime<Utc>) -> Self {
            Self(Mutex::new(start))
        }

        fn advance(&self, by: Duration) {
            *self.0.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[test]
    fn manual_clock_drives_cache_expiry() {
        let clock = ManualClock::new(Utc::now());
        let cache = RateCache::new(Duration::seconds(300));
        cache.put(rate("TON", clock.now() + Duration::minutes(15)), clock.now());

        assert!(cache.get("TON", clock.now()).is_some());
        clock.advance(Duration::seconds(301));
        assert!(cache.get("TON", clock.now()).is_none());
    }

    #[test]
    fn cache_expires_with_rate_expiry() {
        let now = Utc::now();
        let cache = RateCache::new(Duration::seconds(300));
        // The rate row itself expires before the cache age does
        cache.put(rate("TON", now + Duration::seconds(60)), now);

        assert!(cache.get("TON", now + Duration::seconds(59)).is_some());
        assert!(cache.get("TON", now + Duration::seconds(61)).is_none());
    }
}
