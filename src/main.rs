use payrail_backend::api::{self, AppState};
use payrail_backend::config::{AppConfig, LogFormat};
use payrail_backend::database::exchange_rate_repository::ExchangeRateRepository;
use payrail_backend::database::orphan_repository::OrphanRepository;
use payrail_backend::database::payment_repository::PaymentRepository;
use payrail_backend::database::provider_config_repository::ProviderConfigRepository;
use payrail_backend::database;
use payrail_backend::payments::factory::ProviderFactory;
use payrail_backend::payments::providers::{ChainProvider, GatewayProvider, TokenProvider};
use payrail_backend::services::rate_service::RateService;
use payrail_backend::services::refund::RefundDispatcher;
use payrail_backend::services::webhook_ingress::WebhookIngress;
use payrail_backend::workers::rate_lock_sweeper::RateLockSweeper;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_lowercase()));

    match config.logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Plain => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => error!(error = %err, "failed to install signal handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;

    init_tracing(&config);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting payment backend service"
    );

    let pool = database::init_pool_from_config(&config.database)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to initialize database pool");
            anyhow::anyhow!(e)
        })?;

    let payments = Arc::new(PaymentRepository::new(pool.clone()));
    let rates_repo = Arc::new(ExchangeRateRepository::new(pool.clone()));
    let orphans = Arc::new(OrphanRepository::new(pool.clone()));
    let provider_configs = Arc::new(ProviderConfigRepository::new(pool.clone()));

    let rate_service = Arc::new(RateService::new(rates_repo, config.rates.clone())?);

    // Rails with missing credentials stay unregistered; the rest of the
    // service runs without them
    let mut factory = ProviderFactory::new(provider_configs.clone());
    match GatewayProvider::from_config(&config.gateway, payments.clone()) {
        Ok(provider) => factory.register(Arc::new(provider)),
        Err(err) => warn!(error = %err, "gateway rail not registered"),
    }
    match TokenProvider::from_config(&config.token, payments.clone(), provider_configs.clone()) {
        Ok(provider) => factory.register(Arc::new(provider)),
        Err(err) => warn!(error = %err, "token rail not registered"),
    }
    match ChainProvider::from_config(
        &config.chain,
        pool.clone(),
        payments.clone(),
        orphans.clone(),
        rate_service.clone(),
    ) {
        Ok(provider) => factory.register(Arc::new(provider)),
        Err(err) => warn!(error = %err, "chain rail not registered"),
    }
    let factory = Arc::new(factory);
    info!(rails = ?factory.registered(), "payment rails registered");

    let ingress = Arc::new(WebhookIngress::new(
        factory.clone(),
        config.token.webhook_secret.clone(),
    ));
    let refunds = Arc::new(RefundDispatcher::new(payments.clone(), factory.clone()));

    let sweeper = RateLockSweeper::new(payments.clone(), Duration::from_secs(60));
    tokio::spawn(sweeper.run());
    info!("Rate lock sweeper started");

    let app = api::router(AppState {
        pool,
        payments,
        orphans,
        factory,
        ingress,
        refunds,
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(address = %addr, error = %e, "Failed to bind");
        e
    })?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
