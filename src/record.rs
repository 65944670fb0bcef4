//! Persisted records and their append-only audit trail
use bech32::Bech32m;
use chrono::Utc;
use uuid7::uuid7;

use super::fields::{Fields, TimeStamp};

// construct a unique entity id then encode using bech32
pub fn new_entity_id(prefix: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(prefix)?;
    let encoded = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encoded)
}

/// The persisted state of one entity. `version` starts at 1 and grows by one
/// with every accepted update.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct EntityRecord {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub entity_type: String,
    #[n(2)]
    pub version: u64,
    #[n(3)]
    pub fields: Fields,
    #[n(4)]
    pub updated_at: TimeStamp<Utc>,
}

impl EntityRecord {
    pub fn new(id: String, entity_type: String, fields: Fields, at: TimeStamp<Utc>) -> Self {
        Self {
            id,
            entity_type,
            version: 1,
            fields,
            updated_at: at,
        }
    }

    /// The next version of this record carrying `fields`.
    pub fn next(&self, fields: Fields, at: TimeStamp<Utc>) -> Self {
        Self {
            id: self.id.clone(),
            entity_type: self.entity_type.clone(),
            version: self.version + 1,
            fields,
            updated_at: at,
        }
    }

    pub fn status(&self) -> Option<&str> {
        self.fields.status()
    }

    /// CBOR encoding and its sha256 digest
    pub fn encode(&self) -> anyhow::Result<(String, Vec<u8>)> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct AuditEntry {
    #[n(0)]
    pub entity_id: String,
    #[n(1)]
    pub version: u64,
    #[n(2)]
    pub user_id: i64,
    #[n(3)]
    pub recorded_at: TimeStamp<Utc>,
    #[n(4)]
    pub action: AuditAction,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub enum AuditAction {
    #[n(0)]
    Created {
        #[n(0)]
        digest: String, // sha256 of the stored record
        #[n(1)]
        status: String,
    },
    #[n(1)]
    Updated {
        #[n(0)]
        digest: String,
        #[n(1)]
        from_status: String,
        #[n(2)]
        to_status: String,
        #[n(3)]
        changed: Vec<String>,
    },
}

impl AuditEntry {
    pub fn new(record: &EntityRecord, user_id: i64, action: AuditAction) -> Self {
        Self {
            entity_id: record.id.clone(),
            version: record.version,
            user_id,
            recorded_at: record.updated_at.clone(),
            action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn entity_ids_carry_the_prefix_and_are_unique() {
        let a = new_entity_id("transfer").unwrap();
        let b = new_entity_id("transfer").unwrap();

        assert!(a.starts_with("transfer1"));
        assert_ne!(a, b);
        assert!(new_entity_id("").is_err());
    }

    #[test]
    fn next_bumps_version_and_keeps_identity() {
        let at = TimeStamp::now();
        let record = EntityRecord::new(
            "transfer1abc".into(),
            "energy_transfer".into(),
            Fields::new().with("status", "pending"),
            at.clone(),
        );
        let next = record.next(Fields::new().with("status", "scheduled"), at);

        assert_eq!(next.version, 2);
        assert_eq!(next.id, record.id);
        assert_eq!(next.status(), Some("scheduled"));
    }

    #[test]
    fn record_digest_changes_with_content() {
        let at = TimeStamp::new_with(2024, 1, 1, 0, 0, 0).unwrap();
        let fields = Fields::new().with("transfer_amount_kwh", Decimal::from(100));
        let a = EntityRecord::new("t".into(), "energy_transfer".into(), fields.clone(), at.clone());
        let b = EntityRecord::new(
            "t".into(),
            "energy_transfer".into(),
            fields.with("loss_amount_kwh", Decimal::from(5)),
            at,
        );

        let (hash_a, cbor_a) = a.encode().unwrap();
        let (hash_b, _) = b.encode().unwrap();

        assert_eq!(hash_a.len(), 64);
        assert_ne!(hash_a, hash_b);
        let decoded: EntityRecord = minicbor::decode(&cbor_a).unwrap();
        assert_eq!(decoded, a);
    }
}
