use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl PaymentHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);

            for (k, v) in additional_headers {
                request = request.header(*k, *v);
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let response = request
                .send()
                .await
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("provider request failed: {}", e),
                });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            PaymentError::ProviderError {
                                provider: "http".to_string(),
                                message: format!("invalid provider JSON response: {}", e),
                                provider_code: None,
                                retryable: false,
                            }
                        });
                    }

                    if status.as_u16() == 429 {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                            continue;
                        }
                        return Err(PaymentError::RateLimitError {
                            message: "provider rate limit exceeded".to_string(),
                            retry_after_seconds: None,
                        });
                    }

                    if status.is_server_error() && attempt < self.max_retries {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            "provider server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    return Err(PaymentError::ProviderError {
                        provider: "http".to_string(),
                        message: format!("HTTP {}: {}", status, text),
                        provider_code: Some(status.as_u16().to_string()),
                        retryable: status.is_server_error(),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(PaymentError::NetworkError {
            message: "provider request failed".to_string(),
        }))
    }
}

/// Gateway signature token: SHA-256 over all scalar payload fields sorted by
/// field name with the shared password inserted as a `password` field.
///
/// Nested objects, arrays and nulls are excluded, matching the gateway's
/// documented scheme. Booleans serialize as `true`/`false`.
pub fn gateway_signature_token(payload: &JsonValue, password: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    if let Some(map) = payload.as_object() {
        for (key, value) in map {
            if key == "signatureToken" {
                continue;
            }
            if let Some(scalar) = scalar_to_string(value) {
                fields.insert(key.clone(), scalar);
            }
        }
    }
    fields.insert("password".to_string(), password.to_string());

    let concatenated: String = fields.values().map(String::as_str).collect();
    let digest = Sha256::digest(concatenated.as_bytes());
    hex::encode(digest)
}

/// Verify a gateway webhook payload against its embedded `signatureToken`
pub fn verify_gateway_signature(payload: &JsonValue, password: &str) -> bool {
    let provided = match payload.get("signatureToken").and_then(|v| v.as_str()) {
        Some(token) => token,
        None => return false,
    };
    let expected = gateway_signature_token(payload, password);
    secure_eq(expected.as_bytes(), provided.trim().as_bytes())
}

fn scalar_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => None,
    }
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn signature_token_is_order_independent() {
        let a = json!({"orderId": "o-1", "amount": 99900, "terminalKey": "term"});
        let b = json!({"terminalKey": "term", "amount": 99900, "orderId": "o-1"});
        assert_eq!(
            gateway_signature_token(&a, "pw"),
            gateway_signature_token(&b, "pw")
        );
    }

    #[test]
    fn signature_token_excludes_itself_and_nested_values() {
        let unsigned = json!({"orderId": "o-1", "amount": 99900});
        let token = gateway_signature_token(&unsigned, "pw");
        let signed = json!({"orderId": "o-1", "amount": 99900, "signatureToken": token, "data": {"x": 1}});
        assert_eq!(gateway_signature_token(&signed, "pw"), token);
    }

    #[test]
    fn verification_round_trip() {
        let mut payload = json!({
            "terminalKey": "term",
            "orderId": "o-1",
            "success": true,
            "status": "CONFIRMED",
            "externalPaymentId": "p-1",
            "amount": 99900
        });
        let token = gateway_signature_token(&payload, "pw");
        payload["signatureToken"] = json!(token);
        assert!(verify_gateway_signature(&payload, "pw"));

        // Any tampered field invalidates the token
        payload["amount"] = json!(99901);
        assert!(!verify_gateway_signature(&payload, "pw"));
    }

    #[test]
    fn verification_rejects_missing_token() {
        let payload = json!({"orderId": "o-1"});
        assert!(!verify_gateway_signature(&payload, "pw"));
    }
}
