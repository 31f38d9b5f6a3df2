//! Cascading has-many relations.
//!
//! # Responsibility
//! - Register relations per record, track replaced collections and cascade
//!   validate/save/delete from a parent record to its tracked relations.
//! - Reconcile submitted collections with previously loaded records.
//!
//! # Invariants
//! - Only relations assigned through `set_relation` are cascaded.
//! - Parent validation gates the parent save; parent save gates relation
//!   saves; parent delete gates relation deletes.
//! - Sibling failures never stop the remaining saves/deletes.
//! - Nothing here opens a transaction; callers wanting atomicity wrap the
//!   cascade themselves.

use crate::model::entity::EntityError;
use crate::repo::record_repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod cascade;
pub mod loader;
pub mod registry;
pub mod report;
pub mod tracker;

/// Programming errors around relation usage.
///
/// Expected failures (validation, persistence) are reported through
/// `CascadeReport` instead.
#[derive(Debug)]
pub enum RelationError {
    /// Name is neither registered nor declared on the entity.
    UnknownRelation(String),
    /// Name already registered with a different definition.
    ConflictingDefinition(String),
    /// Assigned record belongs to another entity than the relation's.
    EntityMismatch {
        relation: String,
        expected: String,
        actual: String,
    },
    InvalidLink(EntityError),
    /// Store failure while loading the current collection.
    Repo(RepoError),
}

impl Display for RelationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownRelation(name) => write!(f, "unknown relation: `{name}`"),
            Self::ConflictingDefinition(name) => {
                write!(f, "relation `{name}` is already registered with another definition")
            }
            Self::EntityMismatch {
                relation,
                expected,
                actual,
            } => write!(
                f,
                "relation `{relation}` holds {expected} records, got {actual}"
            ),
            Self::InvalidLink(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RelationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidLink(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for RelationError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}
