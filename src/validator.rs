//! Composes the rule functions for one entity profile
//!
//! Create and update requests run every configured check and return the whole
//! batch of violations, or the field set that should be persisted.
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

use super::fields::{Fields, TypeMismatch};
use super::profile::EntityProfile;
use super::rules::{
    validate_field_immutability, validate_numeric_identity, validate_ordering,
    validate_paired_presence, validate_transition,
};
use super::violation::{Violation, Violations};

/// Who is acting and when, supplied by the request layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub current_user_id: i64,
    pub current_time: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(current_user_id: i64, current_time: DateTime<Utc>) -> Self {
        Self {
            current_user_id,
            current_time,
        }
    }
}

/// Validates a new record. On success returns the proposed fields with the
/// initial status and configured defaults filled in.
pub fn validate_create(
    profile: &EntityProfile,
    proposed: &Fields,
    ctx: &RequestContext,
) -> Result<Fields, Violations> {
    let mut fields = proposed.clone();
    if !fields.contains("status") {
        fields.insert("status", profile.initial_status.as_str());
    }
    for (name, default) in &profile.defaults {
        if !fields.contains(name) {
            fields.insert(name, default.resolve(ctx.current_user_id, ctx.current_time));
        }
    }
    stamp_approval(profile, None, &mut fields, ctx);

    let mut violations = Violations::new();
    for name in &profile.required {
        if !fields.contains(name) {
            violations.push(Violation::new(name.as_str(), "is required"));
        }
    }
    match fields.text("status") {
        Ok(Some(status)) if !profile.declares(status) => violations.push(Violation::new(
            "status",
            format!("'{status}' is not a {} status", profile.entity_type),
        )),
        Ok(Some(status)) if status != profile.initial_status => violations.push(Violation::new(
            "status",
            format!(
                "a new {} must start as '{}', not '{status}'",
                profile.entity_type, profile.initial_status
            ),
        )),
        Err(mismatch) => violations.push(mismatch.into()),
        _ => {}
    }
    check_consistency(profile, &fields, &fields, None, &mut violations);

    violations.into_result(fields)
}

/// Validates a partial update against the persisted `current` fields.
///
/// Identities only see the proposed fields, so an update touching one operand
/// is not checked against stale stored values. Orderings and pairs run over
/// the merged record, but only those naming a field the update sets. On
/// success returns the merged record fields.
pub fn validate_update(
    profile: &EntityProfile,
    current: &Fields,
    proposed: &Fields,
    ctx: &RequestContext,
) -> Result<Fields, Violations> {
    let current_status = current.status().unwrap_or_default();
    let mut changes = proposed.clone();
    stamp_approval(profile, Some(current_status), &mut changes, ctx);

    let mut violations = Violations::new();
    match changes.text("status") {
        Ok(Some(requested)) => {
            violations.extend(validate_transition(
                current_status,
                requested,
                &profile.transitions,
            ));
        }
        Ok(None) => {}
        Err(mismatch) => violations.push(mismatch.into()),
    }

    let touched: BTreeSet<&str> = proposed.names().collect();
    violations.extend(validate_field_immutability(
        current_status,
        &profile.locked_statuses,
        &profile.critical_fields,
        &touched,
    ));

    let mut merged = current.clone();
    merged.merge(&changes);
    let changed: BTreeSet<&str> = changes.names().collect();
    check_consistency(profile, &changes, &merged, Some(&changed), &mut violations);

    violations.into_result(merged)
}

// Fills the approval pair when a record enters the approval status and the
// request supplied neither half.
fn stamp_approval(
    profile: &EntityProfile,
    current_status: Option<&str>,
    fields: &mut Fields,
    ctx: &RequestContext,
) {
    let Some(approval) = &profile.approval else {
        return;
    };
    let entering = fields.status() == Some(approval.status.as_str())
        && current_status != Some(approval.status.as_str());
    if entering && !fields.contains(&approval.by) && !fields.contains(&approval.at) {
        fields.insert(&approval.by, ctx.current_user_id);
        fields.insert(&approval.at, ctx.current_time);
    }
}

// `operands` feeds the identities and `record` the orderings and pairs. With
// a `scope`, only chains and pairs naming one of its fields are checked.
fn check_consistency(
    profile: &EntityProfile,
    operands_from: &Fields,
    record: &Fields,
    scope: Option<&BTreeSet<&str>>,
    violations: &mut Violations,
) {
    let in_scope = |name: &str| scope.is_none_or(|scope| scope.contains(name));
    let mut mismatches: BTreeMap<String, TypeMismatch> = BTreeMap::new();

    let mut operands: BTreeMap<String, Decimal> = BTreeMap::new();
    for identity in &profile.identities {
        for name in identity.equation.fields() {
            match operands_from.decimal(name) {
                Ok(Some(value)) => {
                    operands.insert(name.to_owned(), value);
                }
                Ok(None) => {}
                Err(mismatch) => {
                    mismatches.insert(name.to_owned(), mismatch);
                }
            }
        }
    }

    let mut ordering_violations = Vec::new();
    for ordering in &profile.orderings {
        if !ordering.fields.iter().any(|name| in_scope(name.as_str())) {
            continue;
        }
        let mut stamps = Vec::with_capacity(ordering.fields.len());
        for name in &ordering.fields {
            let value = record.timestamp(name).unwrap_or_else(|mismatch| {
                mismatches.insert(name.clone(), mismatch);
                None
            });
            stamps.push((name.as_str(), value));
        }
        ordering_violations.extend(validate_ordering(&stamps, ordering.policy));
    }

    violations.extend(mismatches.into_values().map(Violation::from));
    for identity in &profile.identities {
        violations.extend(validate_numeric_identity(
            &operands,
            &identity.equation,
            identity.tolerance,
        ));
    }
    violations.extend(ordering_violations);
    for (a, b) in &profile.pairs {
        if !in_scope(a.as_str()) && !in_scope(b.as_str()) {
            continue;
        }
        violations.extend(validate_paired_presence(record.get(a), record.get(b), a, b));
    }
}
