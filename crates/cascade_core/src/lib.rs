//! Cascading has-many relations over an active-record layer.
//! This crate owns record persistence, relation tracking and cascade rules.

pub mod db;
pub mod logging;
pub mod model;
pub mod relation;
pub mod repo;
pub mod service;

pub use db::{open_db, open_db_in_memory, DbError, DbOptions};
pub use logging::{default_log_level, init_logging, logging_status, LoggingConfig};
pub use model::entity::{EntityBuilder, EntityDef, EntityError, Rule};
pub use model::record::{Record, ValidationErrors};
pub use model::value::{AttributeValue, RecordId};
pub use relation::cascade::RelationalRecord;
pub use relation::loader::reconcile;
pub use relation::registry::{Link, RelationDef, RelationRegistry};
pub use relation::report::{CascadeFailure, CascadeReport, CascadeStage};
pub use relation::RelationError;
pub use repo::record_repo::{RecordStore, RepoError, RepoResult, SqliteRecordStore};
pub use service::cascade_service::{CascadeService, CascadeServiceError};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
