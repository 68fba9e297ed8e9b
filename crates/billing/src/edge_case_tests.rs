// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing Workflow
//!
//! Boundary conditions and race-adjacent behavior in:
//! - Invoice numbering (collisions, cycle rollover)
//! - Poller status transitions (terminal-only moves, expiry deadline)
//! - Invoice metadata merging (audit stamping, forge attempts)
//! - Money formatting (centavo boundaries)

#[cfg(test)]
mod invoice_numbering_tests {
    use crate::invoices::invoice_number;
    use time::macros::datetime;
    use time::Duration;
    use uuid::Uuid;

    // =========================================================================
    // Two charges numbered in the same millisecond stay distinct
    // =========================================================================
    #[test]
    fn test_same_instant_different_charges_get_distinct_numbers() {
        let now = datetime!(2026-03-10 12:00:00.123 UTC);
        let a = invoice_number(Uuid::new_v4(), now);
        let b = invoice_number(Uuid::new_v4(), now);

        assert_ne!(a, b, "Charge id suffix must disambiguate same-ms invoices");
        let (ts_a, ts_b) = (
            a.split('-').next().unwrap(),
            b.split('-').next().unwrap(),
        );
        assert_eq!(ts_a, ts_b, "Both carry the same millisecond prefix");
    }

    // =========================================================================
    // The next cycle of the same charge gets a fresh number
    // =========================================================================
    #[test]
    fn test_next_cycle_of_same_charge_gets_new_number() {
        let charge_id = Uuid::new_v4();
        let first = datetime!(2026-03-10 00:00 UTC);
        let next = first + Duration::days(30);

        assert_ne!(
            invoice_number(charge_id, first),
            invoice_number(charge_id, next),
            "Each cycle opening must mint a unique invoice number"
        );
    }

    // =========================================================================
    // Number layout: millisecond timestamp, hyphen, 8-char charge prefix
    // =========================================================================
    #[test]
    fn test_number_embeds_timestamp_and_charge_prefix() {
        let charge_id = Uuid::new_v4();
        let now = datetime!(2026-03-10 12:00:00.5 UTC);
        let number = invoice_number(charge_id, now);

        let expected_millis = (now.unix_timestamp_nanos() / 1_000_000).to_string();
        let suffix = number.rsplit('-').next().unwrap();
        assert!(number.starts_with(&expected_millis));
        assert_eq!(suffix.len(), 8);
        assert!(charge_id.simple().to_string().starts_with(suffix));
    }
}

#[cfg(test)]
mod poller_transition_tests {
    use crate::payments::next_status;
    use quadra_shared::types::PaymentStatus;
    use stripe::PaymentIntentStatus;
    use time::macros::datetime;
    use time::OffsetDateTime;

    const NOW: OffsetDateTime = datetime!(2026-03-10 12:00 UTC);

    fn all_statuses() -> [PaymentIntentStatus; 7] {
        [
            PaymentIntentStatus::Canceled,
            PaymentIntentStatus::Processing,
            PaymentIntentStatus::RequiresAction,
            PaymentIntentStatus::RequiresCapture,
            PaymentIntentStatus::RequiresConfirmation,
            PaymentIntentStatus::RequiresPaymentMethod,
            PaymentIntentStatus::Succeeded,
        ]
    }

    // =========================================================================
    // Whatever the processor reports, the poller only ever moves a payment
    // to a terminal state
    // =========================================================================
    #[test]
    fn test_every_transition_lands_on_a_terminal_state() {
        let expiries = [
            None,
            Some(datetime!(2026-03-01 00:00 UTC)),
            Some(datetime!(2026-04-01 00:00 UTC)),
        ];
        for status in all_statuses() {
            for expiry in expiries {
                if let Some(next) = next_status(status, expiry, NOW) {
                    assert!(
                        next.is_terminal(),
                        "{status:?} with expiry {expiry:?} moved to non-terminal {next:?}"
                    );
                }
            }
        }
    }

    // =========================================================================
    // Unrecognized in-flight statuses leave the record untouched even with
    // a long-past expiry on file
    // =========================================================================
    #[test]
    fn test_in_flight_statuses_never_transition() {
        let long_past = Some(datetime!(2025-01-01 00:00 UTC));
        for status in [
            PaymentIntentStatus::Processing,
            PaymentIntentStatus::RequiresAction,
            PaymentIntentStatus::RequiresCapture,
            PaymentIntentStatus::RequiresConfirmation,
        ] {
            assert_eq!(
                next_status(status, long_past, NOW),
                None,
                "{status:?} must be a no-op"
            );
        }
    }

    // =========================================================================
    // Expiry is exclusive: a boleto is payable through its due instant
    // =========================================================================
    #[test]
    fn test_expiry_deadline_is_exclusive() {
        assert_eq!(
            next_status(PaymentIntentStatus::RequiresPaymentMethod, Some(NOW), NOW),
            None,
            "At the exact deadline the boleto is still payable"
        );

        let one_second_past = Some(datetime!(2026-03-10 11:59:59 UTC));
        assert_eq!(
            next_status(PaymentIntentStatus::RequiresPaymentMethod, one_second_past, NOW),
            Some(PaymentStatus::Expired)
        );
    }

    // =========================================================================
    // A success report wins over any local expiry bookkeeping
    // =========================================================================
    #[test]
    fn test_succeeded_beats_recorded_expiry() {
        let long_past = Some(datetime!(2025-01-01 00:00 UTC));
        assert_eq!(
            next_status(PaymentIntentStatus::Succeeded, long_past, NOW),
            Some(PaymentStatus::Paid),
            "Late bank settlement still counts as paid"
        );
    }
}

#[cfg(test)]
mod metadata_merge_tests {
    use crate::invoices::merge_metadata;
    use serde_json::{json, Map, Value};
    use time::macros::datetime;
    use uuid::Uuid;

    // =========================================================================
    // Callers cannot forge the audit keys: the stamp always wins
    // =========================================================================
    #[test]
    fn test_caller_supplied_audit_keys_are_overwritten() {
        let owner = Uuid::new_v4();
        let now = datetime!(2026-03-10 12:00 UTC);

        let mut forged = Map::new();
        forged.insert("last_updated".to_string(), json!("1999-01-01T00:00:00Z"));
        forged.insert("updated_by".to_string(), json!(Uuid::new_v4().to_string()));
        forged.insert("note".to_string(), json!("pago na recepção"));

        let merged = merge_metadata(&json!({}), Some(forged), owner, now);

        assert_eq!(merged["updated_by"], json!(owner.to_string()));
        assert_eq!(merged["last_updated"], json!("2026-03-10T12:00:00Z"));
        assert_eq!(merged["note"], json!("pago na recepção"));
    }

    // =========================================================================
    // A second merge keeps earlier keys and restamps the audit pair
    // =========================================================================
    #[test]
    fn test_repeated_merges_accumulate_and_restamp() {
        let first_owner = Uuid::new_v4();
        let second_owner = Uuid::new_v4();

        let mut first = Map::new();
        first.insert("receipt".to_string(), json!("r-001"));
        let after_first = merge_metadata(
            &json!({}),
            Some(first),
            first_owner,
            datetime!(2026-03-10 12:00 UTC),
        );

        let mut second = Map::new();
        second.insert("channel".to_string(), json!("presencial"));
        let after_second = merge_metadata(
            &after_first,
            Some(second),
            second_owner,
            datetime!(2026-03-11 09:30 UTC),
        );

        assert_eq!(after_second["receipt"], json!("r-001"));
        assert_eq!(after_second["channel"], json!("presencial"));
        assert_eq!(after_second["updated_by"], json!(second_owner.to_string()));
        assert_eq!(after_second["last_updated"], json!("2026-03-11T09:30:00Z"));
    }

    // =========================================================================
    // A corrupt non-object metadata column does not break the merge
    // =========================================================================
    #[test]
    fn test_non_object_existing_metadata_is_replaced() {
        let owner = Uuid::new_v4();
        let now = datetime!(2026-03-10 12:00 UTC);

        for existing in [json!(null), json!("plain string"), json!(42), json!([1, 2])] {
            let merged = merge_metadata(&existing, None, owner, now);
            assert!(merged.is_object(), "{existing} must merge into an object");
            assert_eq!(merged["updated_by"], json!(owner.to_string()));
        }
    }

    // =========================================================================
    // No caller metadata still stamps the audit keys
    // =========================================================================
    #[test]
    fn test_merge_without_caller_metadata_still_stamps() {
        let owner = Uuid::new_v4();
        let merged = merge_metadata(
            &json!({"kept": true}),
            None,
            owner,
            datetime!(2026-03-10 12:00 UTC),
        );

        assert_eq!(merged["kept"], json!(true));
        assert_eq!(merged["updated_by"], json!(owner.to_string()));
        assert!(merged.get("last_updated").is_some());
    }

    // =========================================================================
    // Caller keys overwrite stored keys on collision
    // =========================================================================
    #[test]
    fn test_caller_value_wins_on_key_collision() {
        let owner = Uuid::new_v4();
        let existing: Value = json!({"note": "antiga", "kept": 1});

        let mut caller = Map::new();
        caller.insert("note".to_string(), json!("nova"));

        let merged = merge_metadata(
            &existing,
            Some(caller),
            owner,
            datetime!(2026-03-10 12:00 UTC),
        );
        assert_eq!(merged["note"], json!("nova"));
        assert_eq!(merged["kept"], json!(1));
    }
}

#[cfg(test)]
mod money_value_tests {
    use crate::email::format_brl;

    // =========================================================================
    // Centavo boundaries render with two decimal digits
    // =========================================================================
    #[test]
    fn test_centavo_boundaries() {
        assert_eq!(format_brl(0), "R$ 0,00");
        assert_eq!(format_brl(1), "R$ 0,01");
        assert_eq!(format_brl(99), "R$ 0,99");
        assert_eq!(format_brl(100), "R$ 1,00");
        assert_eq!(format_brl(101), "R$ 1,01");
    }

    // =========================================================================
    // Typical plan prices
    // =========================================================================
    #[test]
    fn test_plan_price_values() {
        assert_eq!(format_brl(10050), "R$ 100,50");
        assert_eq!(format_brl(24990), "R$ 249,90");
        assert_eq!(format_brl(1_000_000), "R$ 10000,00");
    }

    // =========================================================================
    // Refund-style negative amounts keep the sign outside the currency
    // =========================================================================
    #[test]
    fn test_negative_amounts() {
        assert_eq!(format_brl(-1), "-R$ 0,01");
        assert_eq!(format_brl(-10050), "-R$ 100,50");
    }
}
