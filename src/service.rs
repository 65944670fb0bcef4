//! Service layer API for entity create and update requests
use super::error::ServiceError;
use super::fields::{Fields, TimeStamp};
use super::profile::{EntityProfile, ProfileRegistry};
use super::record::{AuditAction, AuditEntry, EntityRecord, new_entity_id};
use super::store::EntityStore;
use super::validator::{RequestContext, validate_create, validate_update};
use std::sync::Arc;

pub struct EntityService<S: EntityStore> {
    registry: Arc<ProfileRegistry>,
    store: S,
}

impl<S: EntityStore> EntityService<S> {
    pub fn new(registry: Arc<ProfileRegistry>, store: S) -> Self {
        Self { registry, store }
    }

    fn profile(&self, entity_type: &str) -> anyhow::Result<&EntityProfile> {
        self.registry.get(entity_type).ok_or_else(|| {
            ServiceError::UnknownEntityType {
                entity_type: entity_type.to_owned(),
            }
            .into()
        })
    }

    /// Load the persisted record or fail with `NotFound`
    pub fn get(&self, id: &str) -> anyhow::Result<EntityRecord> {
        self.store
            .load_current(id)?
            .ok_or_else(|| ServiceError::NotFound(id.to_owned()).into())
    }

    pub fn history(&self, id: &str) -> anyhow::Result<Vec<AuditEntry>> {
        // distinguish "no such entity" from "no entries"
        self.get(id)?;
        self.store.history(id)
    }

    /// Validate and store a new entity of `entity_type`
    #[tracing::instrument(skip(self, proposed, ctx), fields(user = ctx.current_user_id))]
    pub fn create(
        &self,
        entity_type: &str,
        proposed: Fields,
        ctx: &RequestContext,
    ) -> anyhow::Result<EntityRecord> {
        let profile = self.profile(entity_type)?;

        let fields = match validate_create(profile, &proposed, ctx) {
            Ok(fields) => fields,
            Err(violations) => {
                tracing::warn!(violations = violations.len(), "create rejected");
                return Err(ServiceError::Rejected(violations).into());
            }
        };

        let id = new_entity_id(&profile.id_prefix)?;
        let record = EntityRecord::new(
            id,
            entity_type.to_owned(),
            fields,
            TimeStamp::from(ctx.current_time),
        );
        let (digest, _) = record.encode()?;
        let audit = AuditEntry::new(
            &record,
            ctx.current_user_id,
            AuditAction::Created {
                digest,
                status: record.status().unwrap_or_default().to_owned(),
            },
        );

        self.store.save(&record, None, &audit)?;
        tracing::debug!(id = %record.id, "entity created");

        Ok(record)
    }

    /// Apply a partial update to an existing entity
    #[tracing::instrument(skip(self, proposed, ctx), fields(user = ctx.current_user_id))]
    pub fn update(
        &self,
        id: &str,
        proposed: Fields,
        ctx: &RequestContext,
    ) -> anyhow::Result<EntityRecord> {
        let current = self.get(id)?;
        let profile = self.profile(&current.entity_type)?;

        let fields = match validate_update(profile, &current.fields, &proposed, ctx) {
            Ok(fields) => fields,
            Err(violations) => {
                tracing::warn!(
                    violations = violations.len(),
                    status = current.status().unwrap_or_default(),
                    "update rejected"
                );
                return Err(ServiceError::Rejected(violations).into());
            }
        };

        let record = current.next(fields, TimeStamp::from(ctx.current_time));
        let (digest, _) = record.encode()?;
        let audit = AuditEntry::new(
            &record,
            ctx.current_user_id,
            AuditAction::Updated {
                digest,
                from_status: current.status().unwrap_or_default().to_owned(),
                to_status: record.status().unwrap_or_default().to_owned(),
                changed: proposed.names().map(str::to_owned).collect(),
            },
        );

        // fails with Conflict if someone else saved since we loaded
        self.store.save(&record, Some(current.version), &audit)?;
        tracing::debug!(version = record.version, "entity updated");

        Ok(record)
    }
}
