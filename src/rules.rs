//! Pure consistency checks over a proposed record state
//!
//! Every function here reads only its arguments and reports problems as
//! [`Violation`]s. Nothing is logged and nothing short-circuits, so callers can
//! run every rule and report the whole batch at once.
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::equation::{Equation, Evaluation};
use super::violation::Violation;

/// Static map from a status to the statuses reachable from it in one update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransitionTable(BTreeMap<String, BTreeSet<String>>);

impl TransitionTable {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn allow(mut self, from: &str, to: &[&str]) -> Self {
        self.0
            .entry(from.to_owned())
            .or_default()
            .extend(to.iter().map(|s| s.to_string()));
        self
    }
    pub fn successors(&self, status: &str) -> Option<&BTreeSet<String>> {
        self.0.get(status)
    }
    /// True when `status` is listed as a key, even with no successors.
    pub fn knows(&self, status: &str) -> bool {
        self.0.contains_key(status)
    }
    pub fn is_terminal(&self, status: &str) -> bool {
        self.0.get(status).is_none_or(BTreeSet::is_empty)
    }
    pub fn is_legal(&self, from: &str, to: &str) -> bool {
        from == to || self.0.get(from).is_some_and(|next| next.contains(to))
    }
    /// Every status mentioned, as a source or a target.
    pub fn statuses(&self) -> BTreeSet<&str> {
        self.0
            .iter()
            .flat_map(|(from, to)| std::iter::once(from).chain(to.iter()))
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPolicy {
    /// t1 <= t2 <= ... <= tn
    #[default]
    NonDecreasing,
    /// t1 < t2 < ... < tn
    StrictlyIncreasing,
}

/// Checks `equation` over `operands` within an absolute `tolerance`.
///
/// A field missing from `operands` is absent, which skips the check entirely.
/// A failure is reported on the equation's derived field.
pub fn validate_numeric_identity(
    operands: &BTreeMap<String, Decimal>,
    equation: &Equation,
    tolerance: Decimal,
) -> Option<Violation> {
    match equation.evaluate(operands) {
        Evaluation::Skipped => None,
        Evaluation::Undefined => Some(Violation::new(
            equation.derived(),
            format!("`{equation}` cannot be evaluated with the given values"),
        )),
        Evaluation::Evaluated { lhs, rhs } => match lhs.checked_sub(rhs) {
            Some(diff) if diff.abs() <= tolerance => None,
            _ => Some(Violation::new(
                equation.derived(),
                format!(
                    "`{equation}` does not hold: left side is {lhs}, right side is {rhs} (tolerance {tolerance})"
                ),
            )),
        },
    }
}

/// Checks that the present timestamps appear in order.
///
/// Absent entries are skipped; each present value is compared with the last
/// present one before it. One violation per failing pair, on the later field.
pub fn validate_ordering(
    timestamps: &[(&str, Option<DateTime<Utc>>)],
    policy: OrderPolicy,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut previous: Option<(&str, DateTime<Utc>)> = None;

    for (name, value) in timestamps {
        let Some(value) = value else { continue };
        if let Some((prev_name, prev_value)) = previous {
            let in_order = match policy {
                OrderPolicy::NonDecreasing => prev_value <= *value,
                OrderPolicy::StrictlyIncreasing => prev_value < *value,
            };
            if !in_order {
                let message = match policy {
                    OrderPolicy::NonDecreasing => format!("must not be earlier than {prev_name}"),
                    OrderPolicy::StrictlyIncreasing => format!("must be later than {prev_name}"),
                };
                violations.push(Violation::new(*name, message));
            }
        }
        previous = Some((*name, *value));
    }

    violations
}

/// Checks that `current -> requested` is an edge of `table`.
///
/// Staying in the same status is always legal. A status the table does not
/// list has no legal successors.
pub fn validate_transition(
    current: &str,
    requested: &str,
    table: &TransitionTable,
) -> Option<Violation> {
    if table.is_legal(current, requested) {
        return None;
    }
    let allowed = match table.successors(current) {
        Some(next) if !next.is_empty() => {
            let list: Vec<&str> = next.iter().map(String::as_str).collect();
            format!("allowed: {}", list.join(", "))
        }
        _ => format!("'{current}' allows no further changes"),
    };
    Some(Violation::new(
        "status",
        format!("cannot change from '{current}' to '{requested}' ({allowed})"),
    ))
}

/// Reports each critical field the request touches while the record is locked.
pub fn validate_field_immutability(
    current: &str,
    locked: &BTreeSet<String>,
    critical: &BTreeSet<String>,
    touched: &BTreeSet<&str>,
) -> Vec<Violation> {
    if !locked.contains(current) {
        return Vec::new();
    }
    critical
        .iter()
        .filter(|field| touched.contains(field.as_str()))
        .map(|field| {
            Violation::new(
                field.as_str(),
                format!("cannot be changed while status is '{current}'"),
            )
        })
        .collect()
}

/// Both values present or both absent.
pub fn validate_paired_presence<A, B>(
    a: Option<&A>,
    b: Option<&B>,
    name_a: &str,
    name_b: &str,
) -> Vec<Violation> {
    match (a, b) {
        (Some(_), None) => vec![Violation::new(
            name_b,
            format!("is required when {name_a} is present"),
        )],
        (None, Some(_)) => vec![Violation::new(
            name_a,
            format!("is required when {name_b} is present"),
        )],
        _ => Vec::new(),
    }
}
