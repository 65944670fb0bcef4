//! Persistence gateway for entity records
use anyhow::Context;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::sync::Arc;

use super::error::ServiceError;
use super::record::{AuditEntry, EntityRecord};

pub trait EntityStore {
    /// The current persisted record, if any.
    fn load_current(&self, id: &str) -> anyhow::Result<Option<EntityRecord>>;

    /// Writes `record` and appends `audit` atomically. Fails with
    /// [`ServiceError::Conflict`] unless the stored version equals
    /// `expected_version` (`None` for a record that must not exist yet).
    fn save(
        &self,
        record: &EntityRecord,
        expected_version: Option<u64>,
        audit: &AuditEntry,
    ) -> anyhow::Result<()>;

    /// Audit entries for `id`, oldest first.
    fn history(&self, id: &str) -> anyhow::Result<Vec<AuditEntry>>;
}

pub struct SledStore {
    records: sled::Tree,
    audit: sled::Tree,
}

impl SledStore {
    pub fn new(instance: Arc<sled::Db>) -> anyhow::Result<Self> {
        Ok(Self {
            records: instance.open_tree("records")?,
            audit: instance.open_tree("audit")?,
        })
    }
}

// "<id>/" followed by the big endian version keeps entries in version order
fn audit_prefix(id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(id.len() + 9);
    key.extend_from_slice(id.as_bytes());
    key.push(b'/');
    key
}

fn audit_key(id: &str, version: u64) -> Vec<u8> {
    let mut key = audit_prefix(id);
    key.extend_from_slice(&version.to_be_bytes());
    key
}

impl EntityStore for SledStore {
    fn load_current(&self, id: &str) -> anyhow::Result<Option<EntityRecord>> {
        let Some(bytes) = self.records.get(id.as_bytes())? else {
            return Ok(None);
        };
        let record: EntityRecord = minicbor::decode(bytes.as_ref())
            .map_err(|_| ServiceError::Corrupt(id.to_owned()))?;
        Ok(Some(record))
    }

    fn save(
        &self,
        record: &EntityRecord,
        expected_version: Option<u64>,
        audit: &AuditEntry,
    ) -> anyhow::Result<()> {
        let (_, record_cbor) = record.encode()?;
        let audit_cbor = minicbor::to_vec(audit)?;
        let key = record.id.as_bytes();
        let entry_key = audit_key(&record.id, audit.version);

        let outcome = (&self.records, &self.audit).transaction(|(records, audit_tree)| {
            let found = match records.get(key)? {
                Some(bytes) => {
                    let stored: EntityRecord = minicbor::decode(bytes.as_ref()).map_err(|_| {
                        ConflictableTransactionError::Abort(ServiceError::Corrupt(
                            record.id.clone(),
                        ))
                    })?;
                    Some(stored.version)
                }
                None => None,
            };
            if found != expected_version {
                return Err(ConflictableTransactionError::Abort(ServiceError::Conflict {
                    id: record.id.clone(),
                    expected: expected_version,
                    found,
                }));
            }
            records.insert(key, record_cbor.as_slice())?;
            audit_tree.insert(entry_key.as_slice(), audit_cbor.as_slice())?;
            Ok(())
        });

        match outcome {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(err)) => Err(err.into()),
            Err(TransactionError::Storage(err)) => {
                Err(err).context("sled transaction failed while saving entity")
            }
        }
    }

    fn history(&self, id: &str) -> anyhow::Result<Vec<AuditEntry>> {
        self.audit
            .scan_prefix(audit_prefix(id))
            .map(|item| -> anyhow::Result<AuditEntry> {
                let (_, bytes) = item?;
                let entry: AuditEntry = minicbor::decode(bytes.as_ref())
                    .map_err(|_| ServiceError::Corrupt(id.to_owned()))?;
                Ok(entry)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{Fields, TimeStamp};
    use crate::record::AuditAction;
    use tempfile::tempdir;

    fn record(version: u64) -> EntityRecord {
        let mut record = EntityRecord::new(
            "transfer1test".into(),
            "energy_transfer".into(),
            Fields::new().with("status", "pending"),
            TimeStamp::now(),
        );
        record.version = version;
        record
    }

    fn audit(record: &EntityRecord) -> AuditEntry {
        AuditEntry::new(
            record,
            1,
            AuditAction::Created {
                digest: "d".into(),
                status: "pending".into(),
            },
        )
    }

    #[test]
    fn stale_version_is_a_conflict() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = SledStore::new(Arc::new(sled::open(dir.path().join("store.db"))?))?;

        let first = record(1);
        store.save(&first, None, &audit(&first))?;

        // creating the same id twice
        let err = store.save(&first, None, &audit(&first)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ServiceError>(),
            Some(ServiceError::Conflict {
                expected: None,
                found: Some(1),
                ..
            })
        ));

        let second = record(2);
        store.save(&second, Some(1), &audit(&second))?;
        assert!(store.save(&second, Some(1), &audit(&second)).is_err());

        assert_eq!(store.load_current("transfer1test")?, Some(second));
        assert_eq!(store.history("transfer1test")?.len(), 2);
        assert_eq!(store.load_current("transfer1other")?, None);
        Ok(())
    }
}
