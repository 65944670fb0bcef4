//! Per entity type configuration: statuses, transitions, locks and identities
use anyhow::Context;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::equation::Equation;
use super::error::ProfileError;
use super::fields::FieldValue;
use super::rules::{OrderPolicy, TransitionTable};

const BUILTIN_PROFILES: &str = include_str!("../config/profiles.json");

fn default_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

/// An identity as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySpec {
    pub equation: String,
    #[serde(default = "default_tolerance")]
    pub tolerance: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IdentityRule {
    pub equation: Equation,
    pub tolerance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingRule {
    pub fields: Vec<String>,
    #[serde(default)]
    pub policy: OrderPolicy,
}

/// Moving into `status` stamps `by` and `at` with the acting user and time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub status: String,
    pub by: String,
    pub at: String,
}

/// Values injected into a new record for fields the request left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    CurrentUser,
    CurrentTime,
    Text(String),
    Decimal(Decimal),
    Bool(bool),
}

impl DefaultValue {
    pub fn resolve(&self, user_id: i64, now: DateTime<Utc>) -> FieldValue {
        match self {
            DefaultValue::CurrentUser => FieldValue::Integer(user_id),
            DefaultValue::CurrentTime => now.into(),
            DefaultValue::Text(v) => FieldValue::Text(v.clone()),
            DefaultValue::Decimal(v) => FieldValue::Decimal(*v),
            DefaultValue::Bool(v) => FieldValue::Bool(*v),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ProfileSpec {
    entity_type: String,
    id_prefix: String,
    initial_status: String,
    transitions: TransitionTable,
    #[serde(default)]
    locked_statuses: BTreeSet<String>,
    #[serde(default)]
    critical_fields: BTreeSet<String>,
    #[serde(default)]
    required: Vec<String>,
    #[serde(default)]
    identities: Vec<IdentitySpec>,
    #[serde(default)]
    orderings: Vec<OrderingRule>,
    #[serde(default)]
    pairs: Vec<(String, String)>,
    #[serde(default)]
    approval: Option<ApprovalRule>,
    #[serde(default)]
    defaults: BTreeMap<String, DefaultValue>,
}

/// Validated configuration for one entity type. Built only through
/// deserialization so every equation has parsed and every status is declared.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "ProfileSpec")]
pub struct EntityProfile {
    pub entity_type: String,
    pub id_prefix: String,
    pub initial_status: String,
    pub transitions: TransitionTable,
    pub locked_statuses: BTreeSet<String>,
    pub critical_fields: BTreeSet<String>,
    pub required: Vec<String>,
    pub identities: Vec<IdentityRule>,
    pub orderings: Vec<OrderingRule>,
    pub pairs: Vec<(String, String)>,
    pub approval: Option<ApprovalRule>,
    pub defaults: BTreeMap<String, DefaultValue>,
}

impl EntityProfile {
    /// A status is declared when the transition table lists it as a key.
    pub fn declares(&self, status: &str) -> bool {
        self.transitions.knows(status)
    }
}

impl TryFrom<ProfileSpec> for EntityProfile {
    type Error = ProfileError;

    fn try_from(spec: ProfileSpec) -> Result<Self, Self::Error> {
        let entity_type = spec.entity_type;
        let table = &spec.transitions;

        let unknown = |status: &str| ProfileError::UnknownStatus {
            entity_type: entity_type.clone(),
            status: status.to_owned(),
        };

        if !table.knows(&spec.initial_status) {
            return Err(unknown(&spec.initial_status));
        }
        // targets must be keys too, so terminal states are spelled out
        if let Some(status) = table.statuses().into_iter().find(|s| !table.knows(s)) {
            return Err(unknown(status));
        }
        if let Some(status) = spec.locked_statuses.iter().find(|s| !table.knows(s)) {
            return Err(unknown(status));
        }
        if let Some(approval) = &spec.approval {
            if !table.knows(&approval.status) {
                return Err(unknown(&approval.status));
            }
        }
        if spec.orderings.iter().any(|o| o.fields.len() < 2) {
            return Err(ProfileError::ShortOrdering { entity_type });
        }

        let mut identities = Vec::with_capacity(spec.identities.len());
        for identity in spec.identities {
            if identity.tolerance.is_sign_negative() {
                return Err(ProfileError::NegativeTolerance {
                    entity_type,
                    equation: identity.equation,
                });
            }
            let parsed = match &identity.derived {
                Some(derived) => Equation::parse_with_derived(&identity.equation, derived),
                None => Equation::parse(&identity.equation),
            };
            let equation = parsed.map_err(|source| ProfileError::Equation {
                entity_type: entity_type.clone(),
                source,
            })?;
            identities.push(IdentityRule {
                equation,
                tolerance: identity.tolerance,
            });
        }

        Ok(Self {
            entity_type,
            id_prefix: spec.id_prefix,
            initial_status: spec.initial_status,
            transitions: spec.transitions,
            locked_statuses: spec.locked_statuses,
            critical_fields: spec.critical_fields,
            required: spec.required,
            identities,
            orderings: spec.orderings,
            pairs: spec.pairs,
            approval: spec.approval,
            defaults: spec.defaults,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    profiles: Vec<EntityProfile>,
}

/// Every configured entity profile, loaded once and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, EntityProfile>,
}

impl ProfileRegistry {
    /// The catalogue shipped with the crate.
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_json_str(BUILTIN_PROFILES).context("built-in profile catalogue is invalid")
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read profiles from {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("invalid profiles in {}", path.display()))
    }

    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        let file: RegistryFile = serde_json::from_str(raw)?;
        let mut registry = Self::default();
        for profile in file.profiles {
            registry.insert(profile)?;
        }
        tracing::info!(profiles = registry.profiles.len(), "entity profiles loaded");
        Ok(registry)
    }

    pub fn insert(&mut self, profile: EntityProfile) -> Result<(), ProfileError> {
        if self.profiles.contains_key(&profile.entity_type) {
            return Err(ProfileError::Duplicate(profile.entity_type));
        }
        self.profiles.insert(profile.entity_type.clone(), profile);
        Ok(())
    }

    pub fn get(&self, entity_type: &str) -> Option<&EntityProfile> {
        self.profiles.get(entity_type)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(extra: &str) -> String {
        format!(
            r#"{{"profiles": [{{
                "entity_type": "meter",
                "id_prefix": "meter",
                "initial_status": "active",
                "transitions": {{"active": ["retired"], "retired": []}}
                {extra}
            }}]}}"#
        )
    }

    #[test]
    fn builtin_catalogue_loads() {
        let registry = ProfileRegistry::builtin().unwrap();
        let types: Vec<&str> = registry.entity_types().collect();

        assert_eq!(
            types,
            vec![
                "automation_rule",
                "energy_trading_order",
                "energy_transfer",
                "sale_order",
                "tax_calculation",
            ]
        );

        let transfer = registry.get("energy_transfer").unwrap();
        assert_eq!(transfer.initial_status, "pending");
        assert!(transfer.transitions.is_terminal("completed"));
        assert!(transfer.locked_statuses.contains("completed"));
        assert_eq!(transfer.orderings.len(), 1);
        assert_eq!(
            transfer.orderings[0].fields,
            vec![
                "scheduled_start",
                "scheduled_end",
                "actual_start",
                "actual_end",
                "completion_time",
            ]
        );
        assert!(
            transfer
                .identities
                .iter()
                .all(|i| i.tolerance == Decimal::new(1, 2))
        );
    }

    #[test]
    fn tolerance_defaults_to_one_cent() {
        let raw = minimal(r#", "identities": [{"equation": "a = b + c"}]"#);
        let registry = ProfileRegistry::from_json_str(&raw).unwrap();
        let meter = registry.get("meter").unwrap();

        assert_eq!(meter.identities[0].tolerance, Decimal::new(1, 2));
        assert_eq!(meter.identities[0].equation.derived(), "a");
    }

    #[test]
    fn rejects_undeclared_target_status() {
        let raw = r#"{"profiles": [{
            "entity_type": "meter",
            "id_prefix": "meter",
            "initial_status": "active",
            "transitions": {"active": ["retired"]}
        }]}"#;

        let err = ProfileRegistry::from_json_str(raw).unwrap_err();
        assert!(err.to_string().contains("retired"), "{err}");
    }

    #[test]
    fn rejects_malformed_equation() {
        let raw = minimal(r#", "identities": [{"equation": "a = b +"}]"#);
        assert!(ProfileRegistry::from_json_str(&raw).is_err());
    }

    #[test]
    fn rejects_negative_tolerance_and_unknown_lock() {
        let raw = minimal(r#", "identities": [{"equation": "a = b", "tolerance": "-0.5"}]"#);
        assert!(ProfileRegistry::from_json_str(&raw).is_err());

        let raw = minimal(r#", "locked_statuses": ["sealed"]"#);
        assert!(ProfileRegistry::from_json_str(&raw).is_err());
    }

    #[test]
    fn rejects_duplicate_profiles() {
        let mut registry = ProfileRegistry::from_json_str(&minimal("")).unwrap();
        let again = registry.get("meter").unwrap().clone();

        assert!(matches!(
            registry.insert(again),
            Err(ProfileError::Duplicate(_))
        ));
    }

    #[test]
    fn defaults_deserialize_by_name() {
        let raw = minimal(
            r#", "defaults": {"created_by": "current_user", "unit": {"text": "kwh"}, "enabled": {"bool": true}}"#,
        );
        let registry = ProfileRegistry::from_json_str(&raw).unwrap();
        let meter = registry.get("meter").unwrap();

        assert_eq!(meter.defaults["created_by"], DefaultValue::CurrentUser);
        assert_eq!(
            meter.defaults["unit"],
            DefaultValue::Text("kwh".to_owned())
        );
        assert_eq!(meter.defaults["enabled"], DefaultValue::Bool(true));
    }
}
