pub mod equation;
pub mod error;
pub mod fields;
pub mod profile;
pub mod record;
pub mod rules;
pub mod service;
pub mod store;
pub mod validator;
pub mod violation;

pub use error::ServiceError;
pub use fields::{FieldValue, Fields, TimeStamp};
pub use violation::{Violation, Violations};
