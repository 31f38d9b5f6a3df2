//! Entity and record model.
//!
//! # Responsibility
//! - Define entity types, attribute values and the single-row record.
//!
//! # Invariants
//! - Every persisted record is identified by an integer `id`.
//! - Validation failures are record state, never errors.

pub mod entity;
pub mod record;
pub mod value;
