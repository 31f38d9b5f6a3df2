//! Per-record relation registry.
//!
//! # Responsibility
//! - Map relation names to `{related entity, link}` definitions.
//!
//! # Invariants
//! - A registered name is never removed and never changes definition.
//! - Re-registering an identical definition is a no-op.

use crate::model::entity::EntityDef;
use crate::relation::RelationError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Single-entry mapping `child.foreign_key -> parent.parent_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    foreign_key: String,
    parent_key: String,
}

impl Link {
    pub fn new(foreign_key: impl Into<String>, parent_key: impl Into<String>) -> Self {
        Self {
            foreign_key: foreign_key.into(),
            parent_key: parent_key.into(),
        }
    }

    /// Attribute on the child that stores the parent reference.
    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    /// Attribute on the parent whose value is copied into the child.
    pub fn parent_key(&self) -> &str {
        &self.parent_key
    }
}

/// Named has-many relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDef {
    pub name: String,
    pub related: Arc<EntityDef>,
    pub link: Link,
}

impl RelationDef {
    pub fn new(name: impl Into<String>, related: Arc<EntityDef>, link: Link) -> Self {
        Self {
            name: name.into(),
            related,
            link,
        }
    }
}

/// Relation definitions registered on one record instance.
#[derive(Debug, Clone, Default)]
pub struct RelationRegistry {
    entries: BTreeMap<String, RelationDef>,
}

impl RelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `definition` under its name.
    ///
    /// # Errors
    /// - `ConflictingDefinition` when the name is taken by a different definition.
    pub fn register(&mut self, definition: RelationDef) -> Result<&RelationDef, RelationError> {
        if let Some(existing) = self.entries.get(definition.name.as_str()) {
            if *existing != definition {
                return Err(RelationError::ConflictingDefinition(definition.name));
            }
        }

        let name = definition.name.clone();
        Ok(&*self.entries.entry(name).or_insert(definition))
    }

    pub fn lookup(&self, name: &str) -> Option<&RelationDef> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
