//! Typed errors for the service, equation and profile layers
use super::violation::Violations;

/// Failures surfaced by the service and the store.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("No {entity_type} profile is configured")]
    UnknownEntityType { entity_type: String },
    #[error("Entity {0} does not exist")]
    NotFound(String),
    #[error("Proposed state rejected: {0}")]
    Rejected(Violations),
    #[error("Entity {id} was modified concurrently (expected version {expected:?}, found {found:?})")]
    Conflict {
        id: String,
        expected: Option<u64>,
        found: Option<u64>,
    },
    #[error("Stored entity {0} could not be decoded")]
    Corrupt(String),
}

/// Malformed equation descriptors. These are configuration defects.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum EquationError {
    #[error("Equation '{0}' must contain exactly one '='")]
    MissingEquals(String),
    #[error("Unexpected character '{found}' at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },
    #[error("Invalid number literal '{0}'")]
    InvalidNumber(String),
    #[error("Expected an operand at offset {0}")]
    ExpectedOperand(usize),
    #[error("Unbalanced parenthesis at offset {0}")]
    Unbalanced(usize),
    #[error("Trailing input at offset {0}")]
    TrailingInput(usize),
    #[error("Equation '{0}' references no fields")]
    NoFields(String),
    #[error("Equation '{0}' needs an explicit derived field")]
    NoDerivedField(String),
    #[error("Derived field '{field}' does not appear in '{equation}'")]
    UnknownDerivedField { field: String, equation: String },
}

/// Inconsistent entity profiles, reported while the registry loads.
#[derive(thiserror::Error, Debug)]
pub enum ProfileError {
    #[error("Profile {entity_type}: {source}")]
    Equation {
        entity_type: String,
        #[source]
        source: EquationError,
    },
    #[error("Profile {entity_type}: status '{status}' is not declared")]
    UnknownStatus { entity_type: String, status: String },
    #[error("Profile {entity_type}: tolerance for '{equation}' is negative")]
    NegativeTolerance {
        entity_type: String,
        equation: String,
    },
    #[error("Profile {entity_type}: ordering needs at least two fields")]
    ShortOrdering { entity_type: String },
    #[error("Profile {0} is declared twice")]
    Duplicate(String),
}
