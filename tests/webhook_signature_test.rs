//! Gateway webhook signature behavior.

use payrail_backend::payments::utils::{gateway_signature_token, verify_gateway_signature};
use serde_json::json;

fn signed_payload(password: &str) -> serde_json::Value {
    let mut payload = json!({
        "terminalKey": "TK-100",
        "externalPaymentId": "ext-777",
        "orderId": "42",
        "status": "CONFIRMED",
        "success": true,
        "amount": 99900,
    });
    let token = gateway_signature_token(&payload, password);
    payload["signatureToken"] = json!(token);
    payload
}

#[test]
fn valid_signature_verifies() {
    let payload = signed_payload("secret");
    assert!(verify_gateway_signature(&payload, "secret"));
}

#[test]
fn any_tampered_field_fails_verification() {
    for (field, value) in [
        ("amount", json!(99901)),
        ("status", json!("REFUNDED")),
        ("orderId", json!("43")),
        ("externalPaymentId", json!("ext-778")),
    ] {
        let mut payload = signed_payload("secret");
        payload[field] = value;
        assert!(
            !verify_gateway_signature(&payload, "secret"),
            "tampered {} must not verify",
            field
        );
    }
}

#[test]
fn wrong_password_fails_verification() {
    let payload = signed_payload("secret");
    assert!(!verify_gateway_signature(&payload, "other-secret"));
}

#[test]
fn missing_or_empty_token_fails_verification() {
    let mut payload = signed_payload("secret");
    payload.as_object_mut().unwrap().remove("signatureToken");
    assert!(!verify_gateway_signature(&payload, "secret"));

    payload["signatureToken"] = json!("");
    assert!(!verify_gateway_signature(&payload, "secret"));
}

#[test]
fn token_covers_fields_in_sorted_order_not_payload_order() {
    let a = json!({
        "amount": 99900,
        "orderId": "42",
        "terminalKey": "TK-100",
    });
    let b = json!({
        "terminalKey": "TK-100",
        "amount": 99900,
        "orderId": "42",
    });
    assert_eq!(
        gateway_signature_token(&a, "secret"),
        gateway_signature_token(&b, "secret")
    );
}

#[test]
fn nested_objects_and_nulls_are_outside_the_signature() {
    let bare = json!({"orderId": "42", "amount": 99900});
    let with_extras = json!({
        "orderId": "42",
        "amount": 99900,
        "receipt": {"email": "user@example.com"},
        "comment": null,
    });
    assert_eq!(
        gateway_signature_token(&bare, "secret"),
        gateway_signature_token(&with_extras, "secret")
    );
}
