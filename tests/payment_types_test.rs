//! Core payment type behavior across the API surface.

use bigdecimal::BigDecimal;
use chrono::Utc;
use payrail_backend::payments::types::{
    minor_unit_scale, CreatedPayment, PaymentAction, PaymentStatus, ProviderName, TierId,
    WebhookOutcome,
};
use std::str::FromStr;

#[test]
fn provider_set_is_closed() {
    assert_eq!(
        ProviderName::from_str("gateway").unwrap(),
        ProviderName::Gateway
    );
    assert_eq!(ProviderName::from_str("token").unwrap(), ProviderName::Token);
    assert_eq!(ProviderName::from_str("chain").unwrap(), ProviderName::Chain);
    assert!(ProviderName::from_str("stripe").is_err());
    assert!(ProviderName::from_str("").is_err());
}

#[test]
fn provider_parsing_is_case_insensitive() {
    assert_eq!(
        ProviderName::from_str("Gateway").unwrap(),
        ProviderName::Gateway
    );
    assert_eq!(
        ProviderName::from_str(" CHAIN ").unwrap(),
        ProviderName::Chain
    );
}

#[test]
fn tier_table() {
    let cases = [
        (TierId::Starter, 10, 499, 250),
        (TierId::Standard, 15, 999, 500),
        (TierId::Premium, 30, 1799, 900),
    ];
    for (tier, photos, rub, tokens) in cases {
        assert_eq!(tier.photo_count(), photos);
        assert_eq!(tier.price_rub(), rub);
        assert_eq!(tier.default_token_price(), tokens);
    }
}

#[test]
fn currency_scales() {
    assert_eq!(minor_unit_scale("RUB"), 2);
    assert_eq!(minor_unit_scale("XTR"), 0);
    assert_eq!(minor_unit_scale("TON"), 9);
}

#[test]
fn payment_actions_serialize_with_a_kind_tag() {
    let redirect = serde_json::to_value(PaymentAction::Redirect {
        url: "https://pay.example/1".to_string(),
    })
    .unwrap();
    assert_eq!(redirect["kind"], "redirect");
    assert_eq!(redirect["url"], "https://pay.example/1");

    let invoice = serde_json::to_value(PaymentAction::Invoice {
        invoice_url: "https://t.example/invoice".to_string(),
    })
    .unwrap();
    assert_eq!(invoice["kind"], "invoice");

    let deposit = serde_json::to_value(PaymentAction::WalletDeposit {
        address: "UQDdWallet".to_string(),
        comment: "42".to_string(),
        expires_at: Utc::now(),
    })
    .unwrap();
    assert_eq!(deposit["kind"], "wallet_deposit");
    assert_eq!(deposit["comment"], "42");
}

#[test]
fn created_payment_round_trips_through_json() {
    let created = CreatedPayment {
        payment_id: 7,
        external_ref: Some("ext_7".to_string()),
        action: PaymentAction::Redirect {
            url: "https://pay.example/7".to_string(),
        },
        amount: BigDecimal::from(999),
        currency: "RUB".to_string(),
        settlement_amount: BigDecimal::from(999),
        rate: None,
        expires_at: None,
    };
    let json = serde_json::to_string(&created).unwrap();
    let parsed: CreatedPayment = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.payment_id, 7);
    assert_eq!(parsed.amount, BigDecimal::from(999));
}

#[test]
fn webhook_outcome_envelope_shape() {
    let ok = WebhookOutcome::ok(9, PaymentStatus::Succeeded);
    assert!(ok.success);
    assert_eq!(ok.payment_id, Some(9));
    assert_eq!(ok.status, Some(PaymentStatus::Succeeded));

    let accepted = WebhookOutcome::accepted();
    assert!(accepted.success);
    assert!(accepted.payment_id.is_none());

    let rejected = WebhookOutcome::rejected("bad event");
    assert!(!rejected.success);
    assert_eq!(rejected.error.as_deref(), Some("bad event"));
}
