//! Smoke Screen Unit tests for the consistency rules
//!
//! Each rule is exercised in isolation with the worked examples the rules
//! were designed around. The service layer is covered in `scenarios.rs`.

use chrono::{DateTime, TimeZone, Utc};
use coop_consistency::{
    equation::Equation,
    rules::{
        OrderPolicy, TransitionTable, validate_field_immutability, validate_numeric_identity,
        validate_ordering, validate_paired_presence, validate_transition,
    },
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn operands(pairs: &[(&str, &str)]) -> BTreeMap<String, Decimal> {
    pairs.iter().map(|(k, v)| (k.to_string(), d(v))).collect()
}

fn at(hour: u32) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).single()
}

fn strings(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// NUMERIC IDENTITY TESTS
#[cfg(test)]
mod identity_tests {
    use super::*;

    fn net_equation() -> Equation {
        Equation::parse("net = gross - loss").unwrap()
    }

    /// Balanced operands produce no violation
    #[test]
    fn balanced_transfer_passes() {
        let ops = operands(&[("gross", "100.00"), ("loss", "10.00"), ("net", "90.00")]);
        assert!(validate_numeric_identity(&ops, &net_equation(), d("0.01")).is_none());
    }

    /// An imbalance beyond tolerance is reported on the derived field
    #[test]
    fn imbalance_names_derived_field() {
        let ops = operands(&[("gross", "100.00"), ("loss", "10.00"), ("net", "89.50")]);
        let violation = validate_numeric_identity(&ops, &net_equation(), d("0.01")).unwrap();

        assert_eq!(violation.field, "net");
        assert!(violation.message.contains("89.50"));
    }

    /// The tolerance boundary itself is accepted
    #[test]
    fn difference_equal_to_tolerance_passes() {
        let ops = operands(&[("gross", "100.00"), ("loss", "10.00"), ("net", "90.01")]);
        assert!(validate_numeric_identity(&ops, &net_equation(), d("0.01")).is_none());

        let ops = operands(&[("gross", "100.00"), ("loss", "10.00"), ("net", "90.02")]);
        assert!(validate_numeric_identity(&ops, &net_equation(), d("0.01")).is_some());
    }

    /// A missing operand skips the check whatever the other values are
    #[test]
    fn absent_operand_skips_check() {
        let ops = operands(&[("gross", "100.00"), ("net", "90.00")]);
        assert!(validate_numeric_identity(&ops, &net_equation(), d("0.01")).is_none());

        let ops = operands(&[("gross", "100.00"), ("net", "1.00")]);
        assert!(validate_numeric_identity(&ops, &net_equation(), d("0.01")).is_none());
    }

    /// Zero is a present value, unlike a missing key
    #[test]
    fn zero_is_not_absent() {
        let ops = operands(&[("gross", "100.00"), ("loss", "0"), ("net", "90.00")]);
        assert!(validate_numeric_identity(&ops, &net_equation(), d("0.01")).is_some());
    }

    /// Percentage style identities compare on absolute difference
    #[test]
    fn tax_rate_identity() {
        let eq = Equation::parse("tax_amount = taxable_amount * tax_rate / 100").unwrap();

        let ops = operands(&[
            ("taxable_amount", "250.00"),
            ("tax_rate", "21"),
            ("tax_amount", "52.50"),
        ]);
        assert!(validate_numeric_identity(&ops, &eq, d("0.01")).is_none());

        let ops = operands(&[
            ("taxable_amount", "250.00"),
            ("tax_rate", "21"),
            ("tax_amount", "52.60"),
        ]);
        let violation = validate_numeric_identity(&ops, &eq, d("0.01")).unwrap();
        assert_eq!(violation.field, "tax_amount");
    }
}

// ORDERING TESTS
#[cfg(test)]
mod ordering_tests {
    use super::*;

    /// Absent timestamps are skipped and the chain resumes at the last present value
    #[test]
    fn gap_resumes_from_last_present() {
        let stamps = [("start", at(8)), ("mid", None), ("end", at(4))];
        let violations = validate_ordering(&stamps, OrderPolicy::NonDecreasing);

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "end");
        assert!(violations[0].message.contains("start"));
    }

    /// One violation per failing adjacent pair
    #[test]
    fn reports_each_failing_pair() {
        let stamps = [
            ("scheduled_start", at(10)),
            ("scheduled_end", at(9)),
            ("actual_start", at(11)),
            ("actual_end", at(10)),
        ];
        let violations = validate_ordering(&stamps, OrderPolicy::NonDecreasing);
        let fields: Vec<&str> = violations.iter().map(|v| v.field.as_str()).collect();

        assert_eq!(fields, vec!["scheduled_end", "actual_end"]);
    }

    /// All absent or a single present value never fails
    #[test]
    fn sparse_chains_pass() {
        assert!(validate_ordering(&[("a", None), ("b", None)], OrderPolicy::StrictlyIncreasing).is_empty());
        assert!(validate_ordering(&[("a", None), ("b", at(3))], OrderPolicy::StrictlyIncreasing).is_empty());
    }
}

// TRANSITION TESTS
#[cfg(test)]
mod transition_tests {
    use super::*;

    fn table() -> TransitionTable {
        TransitionTable::new()
            .allow("pending", &["scheduled", "cancelled"])
            .allow("scheduled", &["in_progress", "cancelled"])
            .allow("completed", &[])
    }

    /// Skipping a step is illegal
    #[test]
    fn pending_to_in_progress_is_rejected() {
        let violation = validate_transition("pending", "in_progress", &table()).unwrap();
        assert_eq!(violation.field, "status");
        assert!(violation.message.contains("cancelled, scheduled"));
    }

    #[test]
    fn pending_to_scheduled_is_legal() {
        assert!(validate_transition("pending", "scheduled", &table()).is_none());
    }

    /// A no-op update is legal even from a terminal state
    #[test]
    fn same_status_is_always_legal() {
        assert!(validate_transition("completed", "completed", &table()).is_none());
    }

    /// Terminal states have no way out
    #[test]
    fn terminal_state_rejects_everything() {
        assert!(validate_transition("completed", "pending", &table()).is_some());
    }
}

// IMMUTABILITY AND PAIRING TESTS
#[cfg(test)]
mod lock_and_pair_tests {
    use super::*;

    /// Only critical fields are reported, and only while locked
    #[test]
    fn locked_record_rejects_critical_edits() {
        let locked = strings(&["completed"]);
        let critical = strings(&["amount", "type"]);
        let touched = BTreeSet::from(["amount", "notes"]);

        let violations = validate_field_immutability("completed", &locked, &critical, &touched);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "amount");

        assert!(validate_field_immutability("pending", &locked, &critical, &touched).is_empty());
    }

    #[test]
    fn paired_presence() {
        let by = Some(&5i64);
        let at = Some(&"2024-01-01");

        let v = validate_paired_presence(by, None::<&&str>, "approved_by", "approved_at");
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].field, "approved_at");

        let v = validate_paired_presence(None::<&i64>, at, "approved_by", "approved_at");
        assert_eq!(v[0].field, "approved_by");

        assert!(validate_paired_presence(None::<&i64>, None::<&&str>, "approved_by", "approved_at").is_empty());
        assert!(validate_paired_presence(by, at, "approved_by", "approved_at").is_empty());
    }
}
