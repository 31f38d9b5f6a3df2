//! Relation state tracking: current collections and old snapshots.
//!
//! # Invariants
//! - A name has an old snapshot iff it was assigned at least once.
//! - Each assignment overwrites the previous snapshot with the collection held
//!   right before that assignment.

use crate::model::record::Record;
use std::collections::BTreeMap;

/// Current and previous collections of one record's relations.
#[derive(Debug, Clone, Default)]
pub struct RelationTracker {
    current: BTreeMap<String, Vec<Record>>,
    old: BTreeMap<String, Vec<Record>>,
}

impl RelationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the relation holds an in-memory collection (loaded or assigned).
    pub fn is_populated(&self, name: &str) -> bool {
        self.current.contains_key(name)
    }

    /// Stores a freshly loaded collection without touching the snapshot.
    pub fn populate(&mut self, name: &str, records: Vec<Record>) {
        self.current.insert(name.to_string(), records);
    }

    pub fn current(&self, name: &str) -> Option<&[Record]> {
        self.current.get(name).map(Vec::as_slice)
    }

    pub fn current_mut(&mut self, name: &str) -> Option<&mut Vec<Record>> {
        self.current.get_mut(name)
    }

    /// Replaces the relation's collection, snapshotting the previous one.
    ///
    /// `load_current` is called only when nothing is populated yet, so the
    /// snapshot always reflects what the relation held before assignment.
    pub fn on_assign<E>(
        &mut self,
        name: &str,
        records: Vec<Record>,
        load_current: impl FnOnce() -> Result<Vec<Record>, E>,
    ) -> Result<(), E> {
        let previous = match self.current.remove(name) {
            Some(previous) => previous,
            None => load_current()?,
        };
        self.old.insert(name.to_string(), previous);
        self.current.insert(name.to_string(), records);
        Ok(())
    }

    pub fn old(&self, name: &str) -> Option<&[Record]> {
        self.old.get(name).map(Vec::as_slice)
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.old.contains_key(name)
    }

    /// Names with an old snapshot, in sorted order.
    pub fn tracked_names(&self) -> Vec<String> {
        self.old.keys().cloned().collect()
    }
}
