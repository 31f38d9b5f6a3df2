//! Form-submission use-case over cascading records.
//!
//! # Responsibility
//! - Load a parent and its relations from one submitted payload and save
//!   them as a unit.
//! - Delete a parent together with every declared relation.
//! - Optionally run either inside an immediate SQLite transaction.
//!
//! # Invariants
//! - The service never bypasses record validation or the cascade order.
//! - A transactional call commits only when the cascade report is a success.

use crate::model::entity::EntityDef;
use crate::model::value::RecordId;
use crate::relation::cascade::RelationalRecord;
use crate::relation::loader::reconcile;
use crate::relation::report::CascadeReport;
use crate::relation::RelationError;
use crate::repo::record_repo::{RecordStore, RepoError, SqliteRecordStore};
use log::{info, warn};
use serde_json::Value as JsonValue;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Service error for cascade use-cases.
#[derive(Debug)]
pub enum CascadeServiceError {
    /// Target parent does not exist.
    NotFound { entity: String, id: RecordId },
    /// Relation misuse or store failure while loading a relation.
    Relation(RelationError),
    /// Persistence-layer failure outside of the cascade itself.
    Repo(RepoError),
}

impl Display for CascadeServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Relation(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CascadeServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Relation(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::NotFound { .. } => None,
        }
    }
}

impl From<RelationError> for CascadeServiceError {
    fn from(value: RelationError) -> Self {
        Self::Relation(value)
    }
}

impl From<RepoError> for CascadeServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<rusqlite::Error> for CascadeServiceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(RepoError::from(value))
    }
}

pub type CascadeServiceResult<T> = Result<T, CascadeServiceError>;

/// Cascade service facade over a record store.
pub struct CascadeService<S: RecordStore> {
    store: S,
}

impl<S: RecordStore> CascadeService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads a persisted parent.
    pub fn load(
        &self,
        entity: &Arc<EntityDef>,
        id: RecordId,
    ) -> CascadeServiceResult<RelationalRecord> {
        RelationalRecord::find(&self.store, entity, id)?.ok_or_else(|| {
            CascadeServiceError::NotFound {
                entity: entity.name().to_string(),
                id,
            }
        })
    }

    /// Applies one form payload to `target` and saves the cascade.
    ///
    /// # Contract
    /// - Parent fields are read under the parent's form name.
    /// - Each named relation is reconciled from the same payload under the
    ///   related entity's form name, then assigned.
    /// - The save runs with validation; an invalid payload writes nothing.
    pub fn submit(
        &self,
        target: &mut RelationalRecord,
        data: &JsonValue,
        relations: &[&str],
    ) -> CascadeServiceResult<CascadeReport> {
        target.record_mut().load(data, None);
        for name in relations {
            let definition = target.definition(name)?;
            let old_records = target.relation(&self.store, name)?.to_vec();
            let records = reconcile(&definition.related, old_records, data, None);
            target.set_relation(&self.store, name, records)?;
        }

        let report = target.save(&self.store, true);
        info!(
            "event=cascade_submit module=service status={} entity={} saved={} deleted={} failed={}",
            if report.is_success() { "ok" } else { "error" },
            target.record().entity().name(),
            report.saved(),
            report.deleted(),
            report.failures().len()
        );
        Ok(report)
    }

    /// Deletes a parent and every record of its declared relations.
    pub fn remove(
        &self,
        entity: &Arc<EntityDef>,
        id: RecordId,
    ) -> CascadeServiceResult<CascadeReport> {
        let mut target = self.load(entity, id)?;
        for relation in entity.relations() {
            target.track_relation(&self.store, &relation.name)?;
        }

        let report = target.delete(&self.store);
        info!(
            "event=cascade_remove module=service status={} entity={} id={} deleted={} failed={}",
            if report.is_success() { "ok" } else { "error" },
            entity.name(),
            id,
            report.deleted(),
            report.failures().len()
        );
        Ok(report)
    }
}

impl CascadeService<SqliteRecordStore<'_>> {
    /// `submit` inside an immediate transaction.
    ///
    /// Rolls back unless the report is a success. On rollback `target` is
    /// restored to its state before the call, so it carries no ids of undone
    /// inserts.
    pub fn submit_in_transaction(
        &self,
        target: &mut RelationalRecord,
        data: &JsonValue,
        relations: &[&str],
    ) -> CascadeServiceResult<CascadeReport> {
        let before = target.clone();
        let tx = self.store.begin_immediate()?;
        let report = match self.submit(target, data, relations) {
            Ok(report) => report,
            Err(err) => {
                *target = before;
                return Err(err);
            }
        };
        if report.is_success() {
            tx.commit()?;
        } else {
            warn!(
                "event=cascade_submit module=service status=rolled_back entity={} failed={}",
                target.record().entity().name(),
                report.failures().len()
            );
            tx.rollback()?;
            *target = before;
        }
        Ok(report)
    }

    /// `remove` inside an immediate transaction; rolls back unless successful.
    pub fn remove_in_transaction(
        &self,
        entity: &Arc<EntityDef>,
        id: RecordId,
    ) -> CascadeServiceResult<CascadeReport> {
        let tx = self.store.begin_immediate()?;
        let report = self.remove(entity, id)?;
        if report.is_success() {
            tx.commit()?;
        } else {
            warn!(
                "event=cascade_remove module=service status=rolled_back entity={} id={} failed={}",
                entity.name(),
                id,
                report.failures().len()
            );
            tx.rollback()?;
        }
        Ok(report)
    }
}
