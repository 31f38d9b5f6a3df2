//! Record persistence boundary.
//!
//! # Responsibility
//! - Define the own-row store contract records and cascades depend on.
//! - Isolate SQLite statement details from cascade orchestration.
//!
//! # Invariants
//! - Store APIs report semantic failures (`NotFound`, `NotPersisted`) in
//!   addition to DB transport errors.

pub mod record_repo;
