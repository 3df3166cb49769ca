//! Refund arithmetic and outcome envelope conventions.

use bigdecimal::BigDecimal;
use payrail_backend::payments::types::{RefundOutcome, TierId};
use payrail_backend::services::refund::partial_amount;

#[test]
fn partial_refund_is_the_rounded_failed_share() {
    // 5 of 15 photos failed on a 999 payment
    assert_eq!(
        partial_amount(&BigDecimal::from(999), "RUB", 5, 15),
        BigDecimal::from(333)
    );
    // 1 of 23 on a 499 payment: 21.7 rounds up
    assert_eq!(
        partial_amount(&BigDecimal::from(499), "RUB", 1, 23),
        BigDecimal::from(22)
    );
}

#[test]
fn chain_partial_refunds_are_not_collapsed_to_whole_coins() {
    use std::str::FromStr;
    // 5 of 15 on a 4.05 TON deposit: the refundable share is 1.35 TON
    let original = BigDecimal::from_str("4.050000000").unwrap();
    assert_eq!(
        partial_amount(&original, "TON", 5, 15),
        BigDecimal::from_str("1.35").unwrap()
    );
    // Whole-unit rounding stays confined to the fiat and token rails
    assert_eq!(
        partial_amount(&BigDecimal::from(500), "XTR", 5, 15),
        BigDecimal::from(167)
    );
}

#[test]
fn all_failed_refunds_the_whole_amount() {
    for tier in [TierId::Starter, TierId::Standard, TierId::Premium] {
        let original = BigDecimal::from(tier.price_rub());
        let count = i64::from(tier.photo_count());
        assert_eq!(partial_amount(&original, "RUB", count, count), original);
    }
}

#[test]
fn sub_unit_fractions_round_to_zero() {
    assert_eq!(
        partial_amount(&BigDecimal::from(1), "RUB", 1, 3),
        BigDecimal::from(0)
    );
    assert_eq!(
        partial_amount(&BigDecimal::from(999), "XTR", 0, 15),
        BigDecimal::from(0)
    );
}

#[test]
fn lock_conflict_is_the_only_unsuccessful_non_error_outcome() {
    let outcome = RefundOutcome::already_in_progress();
    assert!(!outcome.success);
    assert!(!outcome.manual_refund);
    assert!(outcome.refund_amount.is_none());
}

#[test]
fn manual_outcomes_are_successful_with_instructions() {
    let outcome = RefundOutcome::manual(
        "Send 4.05 TON to UQDd...".to_string(),
        Some(BigDecimal::from(999)),
    );
    assert!(outcome.success);
    assert!(outcome.manual_refund);
    assert!(outcome
        .manual_instructions
        .as_deref()
        .unwrap()
        .contains("TON"));
}

#[test]
fn skipped_outcomes_report_a_zero_amount() {
    let outcome = RefundOutcome::skipped();
    assert!(outcome.success);
    assert!(!outcome.manual_refund);
    assert_eq!(outcome.refund_amount, Some(BigDecimal::from(0)));
}

#[test]
fn completed_outcomes_carry_the_provider_refund_reference() {
    let outcome = RefundOutcome::completed(Some("rf_1".to_string()), BigDecimal::from(333));
    assert!(outcome.success);
    assert!(!outcome.manual_refund);
    assert_eq!(outcome.refund_id.as_deref(), Some("rf_1"));
    assert_eq!(outcome.refund_amount, Some(BigDecimal::from(333)));
}
