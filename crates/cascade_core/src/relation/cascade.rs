//! Record with cascading has-many relations.
//!
//! # Responsibility
//! - Wrap a `Record` with a relation registry and state tracker.
//! - Compose the parent's validate/save/delete with every tracked relation.
//!
//! # Invariants
//! - Relations are registered on first access, from the entity declaration or
//!   an explicit `has_many` call.
//! - Validation of the parent and of relations always both run.
//! - Relation saves run only after the parent row was saved; relation deletes
//!   only after the parent row was deleted.
//! - Within a relation, one record failing never stops its siblings.

use crate::logging::sanitize_message;
use crate::model::entity::{EntityDef, EntityError};
use crate::model::record::Record;
use crate::model::value::{AttributeValue, RecordId};
use crate::relation::registry::{Link, RelationDef, RelationRegistry};
use crate::relation::report::{CascadeFailure, CascadeReport, CascadeStage};
use crate::relation::tracker::RelationTracker;
use crate::relation::RelationError;
use crate::repo::record_repo::{RecordStore, RepoError, RepoResult};
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;

const MAX_LOGGED_ERROR_CHARS: usize = 200;

/// A record plus the relations cascaded with it.
#[derive(Debug, Clone)]
pub struct RelationalRecord {
    record: Record,
    registry: RelationRegistry,
    tracker: RelationTracker,
}

impl RelationalRecord {
    /// New, unsaved parent record.
    pub fn new(entity: Arc<EntityDef>) -> Self {
        Self::from_record(Record::new(entity))
    }

    pub fn from_record(record: Record) -> Self {
        Self {
            record,
            registry: RelationRegistry::new(),
            tracker: RelationTracker::new(),
        }
    }

    /// Loads a persisted parent by identity.
    pub fn find<S: RecordStore + ?Sized>(
        store: &S,
        entity: &Arc<EntityDef>,
        id: RecordId,
    ) -> RepoResult<Option<Self>> {
        Ok(store.find(entity, id)?.map(Self::from_record))
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    pub fn into_record(self) -> Record {
        self.record
    }

    pub fn registry(&self) -> &RelationRegistry {
        &self.registry
    }

    /// Declares and registers a has-many relation on this instance.
    ///
    /// Intended to be called from the relation accessor; calling it again with
    /// the same arguments is harmless.
    pub fn has_many(
        &mut self,
        name: &str,
        related: Arc<EntityDef>,
        link: Link,
    ) -> Result<&RelationDef, RelationError> {
        if !self.record.entity().has_column(link.parent_key()) {
            return Err(RelationError::InvalidLink(EntityError::InvalidLink {
                relation: name.to_string(),
                attribute: link.parent_key().to_string(),
            }));
        }
        if related.attribute(link.foreign_key()).is_none() {
            return Err(RelationError::InvalidLink(EntityError::InvalidLink {
                relation: name.to_string(),
                attribute: link.foreign_key().to_string(),
            }));
        }
        self.registry
            .register(RelationDef::new(name, related, link))
    }

    /// Current collection of a relation, loading it from the store on first use.
    pub fn relation<S: RecordStore + ?Sized>(
        &mut self,
        store: &S,
        name: &str,
    ) -> Result<&[Record], RelationError> {
        Ok(self.relation_mut(store, name)?.as_slice())
    }

    /// Mutable access to the current collection. Changes made here are
    /// cascaded only once the relation is tracked (see `set_relation`).
    pub fn relation_mut<S: RecordStore + ?Sized>(
        &mut self,
        store: &S,
        name: &str,
    ) -> Result<&mut Vec<Record>, RelationError> {
        let definition = self.definition(name)?;
        if !self.tracker.is_populated(name) {
            let records = self.load_related(store, &definition)?;
            self.tracker.populate(name, records);
        }
        self.tracker
            .current_mut(name)
            .ok_or_else(|| RelationError::UnknownRelation(name.to_string()))
    }

    /// Replaces a relation's collection and starts tracking it.
    ///
    /// The collection held right before (loaded if needed) becomes the old
    /// snapshot that the next save diffs against. Nothing is persisted here.
    pub fn set_relation<S: RecordStore + ?Sized>(
        &mut self,
        store: &S,
        name: &str,
        records: Vec<Record>,
    ) -> Result<(), RelationError> {
        let definition = self.definition(name)?;
        if let Some(stranger) = records
            .iter()
            .find(|record| !same_entity(record.entity(), &definition.related))
        {
            return Err(RelationError::EntityMismatch {
                relation: name.to_string(),
                expected: definition.related.name().to_string(),
                actual: stranger.entity().name().to_string(),
            });
        }

        let parent = &self.record;
        self.tracker.on_assign(name, records, || {
            load_related_for(parent, store, &definition)
        })
    }

    /// Assigns the current collection to itself so it takes part in cascades.
    pub fn track_relation<S: RecordStore + ?Sized>(
        &mut self,
        store: &S,
        name: &str,
    ) -> Result<(), RelationError> {
        let current = self.relation(store, name)?.to_vec();
        self.set_relation(store, name, current)
    }

    /// Collection held right before the most recent assignment.
    pub fn old_snapshot(&self, name: &str) -> Option<&[Record]> {
        self.tracker.old(name)
    }

    /// Relations that will be cascaded, in name order.
    pub fn tracked_relations(&self) -> Vec<String> {
        self.tracker.tracked_names()
    }

    /// Validates the parent and every tracked relation.
    ///
    /// Both sides always run so that errors accumulate everywhere.
    pub fn validate(&mut self) -> bool {
        let own_valid = self.record.validate(None);
        let relations_valid = self.validate_relations();
        own_valid && relations_valid
    }

    /// Validates every tracked relation without short-circuiting.
    pub fn validate_relations(&mut self) -> bool {
        let mut valid = true;
        for definition in self.tracked_definitions() {
            if !self.validate_tracked(&definition, None) {
                valid = false;
            }
        }
        valid
    }

    /// Validates the current collection of one relation, loading it first if
    /// it was never accessed.
    ///
    /// The link's foreign key is never validated: the parent fills it in at
    /// save time.
    pub fn validate_relation<S: RecordStore + ?Sized>(
        &mut self,
        store: &S,
        name: &str,
        attribute_names: Option<&[&str]>,
    ) -> Result<bool, RelationError> {
        self.relation_mut(store, name)?;
        let definition = self.definition(name)?;
        Ok(self.validate_tracked(&definition, attribute_names))
    }

    /// Validates (optionally), saves the parent row, then every tracked relation.
    pub fn save<S: RecordStore + ?Sized>(
        &mut self,
        store: &S,
        run_validation: bool,
    ) -> CascadeReport {
        let mut report = CascadeReport::new();
        if run_validation && !self.validate() {
            info!(
                "event=record_save module=relation status=blocked reason=validation entity={}",
                self.record.entity().name()
            );
            self.collect_validation_failures(&mut report);
            return report;
        }

        if let Err(err) = self.record.save(store, false) {
            log_failure(None, &self.record, CascadeStage::Save, &err);
            report.push(CascadeFailure::new(
                None,
                &self.record,
                CascadeStage::Save,
                err,
            ));
            return report;
        }
        report.record_saved();

        report.merge(self.save_relations(store, false));
        report
    }

    /// Saves every tracked relation, aggregating failures across relations.
    pub fn save_relations<S: RecordStore + ?Sized>(
        &mut self,
        store: &S,
        run_validation: bool,
    ) -> CascadeReport {
        let mut report = CascadeReport::new();
        if run_validation && !self.validate_relations() {
            info!(
                "event=relation_save module=relation status=blocked reason=validation entity={}",
                self.record.entity().name()
            );
            self.collect_relation_validation_failures(&mut report);
            return report;
        }

        for definition in self.tracked_definitions() {
            report.merge(self.save_tracked(store, &definition, false));
        }
        report
    }

    /// Saves one relation: writes the new collection, then deletes records of
    /// the old snapshot that are no longer present.
    ///
    /// An untracked relation has no snapshot, so nothing is deleted.
    pub fn save_relation<S: RecordStore + ?Sized>(
        &mut self,
        store: &S,
        name: &str,
        run_validation: bool,
    ) -> Result<CascadeReport, RelationError> {
        self.relation_mut(store, name)?;
        let definition = self.definition(name)?;
        Ok(self.save_tracked(store, &definition, run_validation))
    }

    /// Deletes the parent row, then every record of each tracked relation.
    pub fn delete<S: RecordStore + ?Sized>(&mut self, store: &S) -> CascadeReport {
        let mut report = CascadeReport::new();
        if let Err(err) = self.record.delete(store) {
            log_failure(None, &self.record, CascadeStage::Delete, &err);
            report.push(CascadeFailure::new(
                None,
                &self.record,
                CascadeStage::Delete,
                err,
            ));
            return report;
        }
        report.record_deleted();

        report.merge(self.delete_relations(store));
        report
    }

    /// Deletes every record of every tracked relation.
    pub fn delete_relations<S: RecordStore + ?Sized>(&mut self, store: &S) -> CascadeReport {
        let mut report = CascadeReport::new();
        for definition in self.tracked_definitions() {
            report.merge(self.delete_tracked(store, &definition));
        }
        report
    }

    /// Deletes every record currently held by one relation, loading it first
    /// if it was never accessed.
    pub fn delete_relation<S: RecordStore + ?Sized>(
        &mut self,
        store: &S,
        name: &str,
    ) -> Result<CascadeReport, RelationError> {
        self.relation_mut(store, name)?;
        let definition = self.definition(name)?;
        Ok(self.delete_tracked(store, &definition))
    }

    /// Definition of a relation, registering the entity declaration on first use.
    pub fn definition(&mut self, name: &str) -> Result<RelationDef, RelationError> {
        if let Some(definition) = self.registry.lookup(name) {
            return Ok(definition.clone());
        }

        let declared = self
            .record
            .entity()
            .relation(name)
            .cloned()
            .ok_or_else(|| RelationError::UnknownRelation(name.to_string()))?;
        self.registry.register(declared).cloned()
    }

    fn tracked_definitions(&self) -> Vec<RelationDef> {
        self.tracker
            .tracked_names()
            .iter()
            .filter_map(|name| self.registry.lookup(name).cloned())
            .collect()
    }

    fn load_related<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        definition: &RelationDef,
    ) -> Result<Vec<Record>, RelationError> {
        load_related_for(&self.record, store, definition)
    }

    fn validate_tracked(
        &mut self,
        definition: &RelationDef,
        attribute_names: Option<&[&str]>,
    ) -> bool {
        let Some(records) = self.tracker.current_mut(&definition.name) else {
            return true;
        };
        let Some(representative) = records.first() else {
            return true;
        };

        let foreign_key = definition.link.foreign_key();
        let candidates = match attribute_names {
            Some(names) => names.iter().map(|name| name.to_string()).collect(),
            None => representative.attribute_names(),
        };
        let names = candidates
            .iter()
            .map(String::as_str)
            .filter(|name| *name != foreign_key)
            .collect::<Vec<_>>();

        let mut valid = true;
        for record in records.iter_mut() {
            if !record.validate(Some(names.as_slice())) {
                valid = false;
            }
        }
        valid
    }

    fn save_tracked<S: RecordStore + ?Sized>(
        &mut self,
        store: &S,
        definition: &RelationDef,
        run_validation: bool,
    ) -> CascadeReport {
        let mut report = CascadeReport::new();
        let name = definition.name.as_str();
        let foreign_key = definition.link.foreign_key();
        let parent_value = self
            .record
            .get_attribute(definition.link.parent_key())
            .clone();

        let mut kept_ids = BTreeSet::new();
        if let Some(records) = self.tracker.current_mut(name) {
            for record in records.iter_mut() {
                match link_and_save(record, store, foreign_key, &parent_value, run_validation) {
                    Ok(_) => report.record_saved(),
                    Err(err) => {
                        log_failure(Some(name), record, CascadeStage::Save, &err);
                        report.push(CascadeFailure::new(
                            Some(name),
                            record,
                            CascadeStage::Save,
                            err,
                        ));
                    }
                }
                if let Some(id) = record.id() {
                    kept_ids.insert(id);
                }
            }
        }

        let mut removed_ids = BTreeSet::new();
        for record in self.tracker.old(name).unwrap_or_default() {
            let Some(id) = record.id() else {
                continue;
            };
            if kept_ids.contains(&id) || !removed_ids.insert(id) {
                continue;
            }
            match record.delete(store) {
                Ok(()) => report.record_deleted(),
                Err(err) => {
                    log_failure(Some(name), record, CascadeStage::Delete, &err);
                    report.push(CascadeFailure::new(
                        Some(name),
                        record,
                        CascadeStage::Delete,
                        err,
                    ));
                }
            }
        }

        debug!(
            "event=relation_save module=relation status={} relation={} saved={} deleted={} failed={}",
            if report.is_success() { "ok" } else { "error" },
            name,
            report.saved(),
            report.deleted(),
            report.failures().len()
        );
        report
    }

    fn delete_tracked<S: RecordStore + ?Sized>(
        &mut self,
        store: &S,
        definition: &RelationDef,
    ) -> CascadeReport {
        let mut report = CascadeReport::new();
        let name = definition.name.as_str();
        for record in self.tracker.current(name).unwrap_or_default() {
            match record.delete(store) {
                Ok(()) => report.record_deleted(),
                Err(err) => {
                    log_failure(Some(name), record, CascadeStage::Delete, &err);
                    report.push(CascadeFailure::new(
                        Some(name),
                        record,
                        CascadeStage::Delete,
                        err,
                    ));
                }
            }
        }

        debug!(
            "event=relation_delete module=relation status={} relation={} deleted={} failed={}",
            if report.is_success() { "ok" } else { "error" },
            name,
            report.deleted(),
            report.failures().len()
        );
        report
    }

    fn collect_validation_failures(&self, report: &mut CascadeReport) {
        if self.record.has_errors() {
            report.push(CascadeFailure::validation(None, &self.record));
        }
        self.collect_relation_validation_failures(report);
    }

    fn collect_relation_validation_failures(&self, report: &mut CascadeReport) {
        for name in self.tracker.tracked_names() {
            for record in self.tracker.current(&name).unwrap_or_default() {
                if record.has_errors() {
                    report.push(CascadeFailure::validation(Some(&name), record));
                }
            }
        }
    }
}

fn load_related_for<S: RecordStore + ?Sized>(
    parent: &Record,
    store: &S,
    definition: &RelationDef,
) -> Result<Vec<Record>, RelationError> {
    let parent_value = parent.get_attribute(definition.link.parent_key());
    if parent_value.is_null() {
        return Ok(Vec::new());
    }

    let records = store.find_by_attribute(
        &definition.related,
        definition.link.foreign_key(),
        parent_value,
    )?;
    debug!(
        "event=relation_load module=relation status=ok relation={} count={}",
        definition.name,
        records.len()
    );
    Ok(records)
}

fn link_and_save<S: RecordStore + ?Sized>(
    record: &mut Record,
    store: &S,
    foreign_key: &str,
    parent_value: &AttributeValue,
    run_validation: bool,
) -> RepoResult<RecordId> {
    record
        .set_attribute(foreign_key, parent_value.clone())
        .map_err(|err| RepoError::InvalidData(err.to_string()))?;
    record.save(store, run_validation)
}

fn same_entity(left: &Arc<EntityDef>, right: &Arc<EntityDef>) -> bool {
    Arc::ptr_eq(left, right) || left == right
}

fn log_failure(relation: Option<&str>, record: &Record, stage: CascadeStage, err: &RepoError) {
    warn!(
        "event=cascade_{} module=relation status=error relation={} entity={} record_id={} error={}",
        stage,
        relation.unwrap_or("-"),
        record.entity().name(),
        record
            .id()
            .map_or_else(|| "new".to_string(), |id| id.to_string()),
        sanitize_message(&err.to_string(), MAX_LOGGED_ERROR_CHARS)
    );
}
