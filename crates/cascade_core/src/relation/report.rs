//! Aggregated outcome of a cascade.

use crate::model::record::Record;
use crate::model::value::RecordId;
use crate::repo::record_repo::RepoError;
use std::fmt::{Display, Formatter};

/// Cascade step a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeStage {
    Validate,
    Save,
    Delete,
}

impl CascadeStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Save => "save",
            Self::Delete => "delete",
        }
    }
}

impl Display for CascadeStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record that could not be validated, saved or deleted.
#[derive(Debug)]
pub struct CascadeFailure {
    /// `None` for the parent record itself.
    pub relation: Option<String>,
    pub entity: String,
    /// `None` for records that were never persisted.
    pub record_id: Option<RecordId>,
    pub stage: CascadeStage,
    pub error: RepoError,
}

impl CascadeFailure {
    pub fn new(
        relation: Option<&str>,
        record: &Record,
        stage: CascadeStage,
        error: RepoError,
    ) -> Self {
        Self {
            relation: relation.map(str::to_string),
            entity: record.entity().name().to_string(),
            record_id: record.id(),
            stage,
            error,
        }
    }

    /// Validation failure carrying the record's current errors.
    pub fn validation(relation: Option<&str>, record: &Record) -> Self {
        let error = RepoError::Validation {
            entity: record.entity().name().to_string(),
            errors: record.errors().clone(),
        };
        Self::new(relation, record, CascadeStage::Validate, error)
    }
}

impl Display for CascadeFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let relation = self.relation.as_deref().unwrap_or("<parent>");
        match self.record_id {
            Some(id) => write!(
                f,
                "{} {}#{} in {}: {}",
                self.stage, self.entity, id, relation, self.error
            ),
            None => write!(
                f,
                "{} new {} in {}: {}",
                self.stage, self.entity, relation, self.error
            ),
        }
    }
}

/// Best-effort cascade result.
///
/// Success means every attempted operation succeeded; failures list each
/// record that did not.
#[derive(Debug, Default)]
pub struct CascadeReport {
    saved: usize,
    deleted: usize,
    failures: Vec<CascadeFailure>,
}

impl CascadeReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Rows written successfully.
    pub fn saved(&self) -> usize {
        self.saved
    }

    /// Rows removed successfully.
    pub fn deleted(&self) -> usize {
        self.deleted
    }

    pub fn failures(&self) -> &[CascadeFailure] {
        &self.failures
    }

    pub fn failures_in(&self, relation: &str) -> impl Iterator<Item = &CascadeFailure> + '_ {
        let relation = relation.to_string();
        self.failures
            .iter()
            .filter(move |failure| failure.relation.as_deref() == Some(relation.as_str()))
    }

    pub fn record_saved(&mut self) {
        self.saved += 1;
    }

    pub fn record_deleted(&mut self) {
        self.deleted += 1;
    }

    pub fn push(&mut self, failure: CascadeFailure) {
        self.failures.push(failure);
    }

    /// Folds another report into this one.
    pub fn merge(&mut self, other: CascadeReport) {
        self.saved += other.saved;
        self.deleted += other.deleted;
        self.failures.extend(other.failures);
    }
}
