pub mod health;
pub mod orphans;
pub mod payments;
pub mod webhooks;

use crate::database::orphan_repository::OrphanRepository;
use crate::database::payment_repository::PaymentRepository;
use crate::payments::factory::ProviderFactory;
use crate::services::refund::RefundDispatcher;
use crate::services::webhook_ingress::WebhookIngress;
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub payments: Arc<PaymentRepository>,
    pub orphans: Arc<OrphanRepository>,
    pub factory: Arc<ProviderFactory>,
    pub ingress: Arc<WebhookIngress>,
    pub refunds: Arc<RefundDispatcher>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/payments", post(payments::create_payment))
        .route("/api/payments/{id}", get(payments::get_payment))
        .route("/api/payments/{id}/refund", post(payments::full_refund))
        .route(
            "/api/payments/{id}/refund/partial",
            post(payments::partial_refund),
        )
        .route("/api/orphans", get(orphans::list_unresolved))
        .route("/api/orphans/{id}/resolve", post(orphans::resolve))
        .route("/webhooks/{provider}", post(webhooks::handle_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
