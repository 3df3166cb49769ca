//! Chain rail refunds are always manual and carry complete operator
//! instructions.

use bigdecimal::BigDecimal;
use chrono::Utc;
use payrail_backend::config::{ChainConfig, RatesConfig};
use payrail_backend::database::exchange_rate_repository::ExchangeRateRepository;
use payrail_backend::database::orphan_repository::OrphanRepository;
use payrail_backend::database::payment_repository::{PaymentRecord, PaymentRepository};
use payrail_backend::payments::provider::PaymentProvider;
use payrail_backend::payments::providers::ChainProvider;
use payrail_backend::payments::types::RefundExecution;
use payrail_backend::services::rate_service::RateService;
use sqlx::postgres::PgPoolOptions;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

fn chain_provider() -> ChainProvider {
    // Lazy pool: never connected, the refund path does no I/O
    let pool = PgPoolOptions::new()
        .connect_lazy("postgres://localhost/payrail")
        .expect("lazy pool");
    let rates_config = RatesConfig {
        market_url: "https://api.market-data.example/v1/price".to_string(),
        market_timeout_secs: 5,
        market_cache_secs: 300,
        rate_ttl_minutes: 15,
        emergency_chain_rate: "250.0".to_string(),
    };
    let rates = Arc::new(
        RateService::new(
            Arc::new(ExchangeRateRepository::new(pool.clone())),
            rates_config,
        )
        .expect("rate service"),
    );

    ChainProvider::from_config(
        &ChainConfig {
            wallet_address: Some("UQDdServiceWallet".to_string()),
            confirmation_threshold: 10,
            amount_tolerance_pct: 1,
            rate_lock_minutes: 30,
        },
        pool.clone(),
        Arc::new(PaymentRepository::new(pool.clone())),
        Arc::new(OrphanRepository::new(pool)),
        rates,
    )
    .expect("chain provider")
}

fn succeeded_chain_payment() -> PaymentRecord {
    let now = Utc::now();
    PaymentRecord {
        id: 42,
        provider: "chain".to_string(),
        external_id: None,
        user_id: 10,
        chat_id: None,
        purchase_context_id: Uuid::new_v4(),
        email: None,
        tier_id: "standard".to_string(),
        photo_count: 15,
        amount: BigDecimal::from(999),
        original_amount: BigDecimal::from_str("4.050000000").unwrap(),
        original_currency: "TON".to_string(),
        exchange_rate: Some(BigDecimal::from_str("246.67").unwrap()),
        rate_locked_at: Some(now),
        rate_expires_at: Some(now),
        status: "succeeded".to_string(),
        refund_amount: None,
        refund_status: "none".to_string(),
        refund_reason: None,
        refund_at: None,
        gateway_transaction_id: None,
        charge_id: None,
        tx_hash: Some("b5e3a9".to_string()),
        sender_address: Some("UQDdSenderWallet".to_string()),
        confirmations: 12,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn full_chain_refund_instructions_name_amount_destination_and_tx() {
    let provider = chain_provider();
    let payment = succeeded_chain_payment();

    let execution = provider
        .refund(&payment, None, "delivery failed")
        .await
        .expect("chain refund never errors");

    match execution {
        RefundExecution::Manual { instructions } => {
            assert!(instructions.contains("4.050000000"));
            assert!(instructions.contains("TON"));
            assert!(instructions.contains("UQDdSenderWallet"));
            assert!(instructions.contains("b5e3a9"));
            assert!(instructions.contains("delivery failed"));
        }
        RefundExecution::Completed { .. } => panic!("chain refunds are never automatic"),
        RefundExecution::Blocked { .. } => panic!("chain refunds are never blocked"),
    }
}

#[tokio::test]
async fn partial_chain_refund_uses_the_requested_amount() {
    let provider = chain_provider();
    let payment = succeeded_chain_payment();
    let partial = BigDecimal::from_str("1.350000000").unwrap();

    let execution = provider
        .refund(&payment, Some(&partial), "5 of 15 failed")
        .await
        .expect("chain refund never errors");

    match execution {
        RefundExecution::Manual { instructions } => {
            assert!(instructions.contains("1.350000000"));
            assert!(!instructions.contains("4.050000000"));
        }
        RefundExecution::Completed { .. } => panic!("chain refunds are never automatic"),
        RefundExecution::Blocked { .. } => panic!("chain refunds are never blocked"),
    }
}

#[tokio::test]
async fn refund_without_deposit_details_still_produces_instructions() {
    let provider = chain_provider();
    let mut payment = succeeded_chain_payment();
    payment.tx_hash = None;
    payment.sender_address = None;

    let execution = provider
        .refund(&payment, None, "operator request")
        .await
        .expect("chain refund never errors");

    match execution {
        RefundExecution::Manual { instructions } => {
            assert!(instructions.contains("originating wallet"));
        }
        RefundExecution::Completed { .. } => panic!("chain refunds are never automatic"),
        RefundExecution::Blocked { .. } => panic!("chain refunds are never blocked"),
    }
}
