//! Webhook HTTP handlers.

use crate::api::AppState;
use crate::error::AppError;
use crate::payments::types::{ProviderName, WebhookOutcome};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use tracing::info;

/// One endpoint per provider: POST /webhooks/{provider}.
///
/// The gateway requires the literal body `OK` as acknowledgement and
/// retries anything else; the other rails accept a JSON envelope.
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<JsonValue>,
) -> Result<Response, AppError> {
    let provider_name = ProviderName::from_str(&provider)?;

    info!(provider = %provider_name, "webhook received");
    let outcome = state
        .ingress
        .process(provider_name, &headers, &payload)
        .await?;

    Ok(ack(provider_name, outcome))
}

fn ack(provider_name: ProviderName, outcome: WebhookOutcome) -> Response {
    match provider_name {
        ProviderName::Gateway => "OK".into_response(),
        _ => Json(outcome).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::PaymentStatus;

    #[tokio::test]
    async fn gateway_ack_is_the_bare_ok_body() {
        let response = ack(
            ProviderName::Gateway,
            WebhookOutcome::ok(1, PaymentStatus::Succeeded),
        );
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 16).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn other_rails_get_a_json_envelope() {
        let response = ack(ProviderName::Chain, WebhookOutcome::accepted());
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let parsed: JsonValue = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["success"], true);
    }
}
