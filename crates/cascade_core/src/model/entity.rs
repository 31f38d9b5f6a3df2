//! Entity type definitions.
//!
//! # Responsibility
//! - Describe one persistable entity: table, form scope, attributes and rules.
//! - Carry the has-many relations declared for the entity type.
//!
//! # Invariants
//! - Table, attribute and relation names are plain SQL identifiers.
//! - `id` is the implicit identity column and is never declared as an attribute.
//! - Every declared link points at existing attributes on both sides.

use crate::model::value::AttributeValue;
use crate::relation::registry::{Link, RelationDef};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Identity attribute shared by every entity.
pub const IDENTITY_KEY: &str = "id";

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Errors raised while building an entity definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityError {
    InvalidIdentifier(String),
    ReservedAttribute(String),
    DuplicateAttribute(String),
    DuplicateRelation(String),
    InvalidLink {
        relation: String,
        attribute: String,
    },
    UnknownAttribute {
        entity: String,
        attribute: String,
    },
}

impl Display for EntityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdentifier(value) => write!(f, "invalid identifier: `{value}`"),
            Self::ReservedAttribute(value) => {
                write!(f, "attribute `{value}` is reserved for record identity")
            }
            Self::DuplicateAttribute(value) => write!(f, "attribute declared twice: `{value}`"),
            Self::DuplicateRelation(value) => write!(f, "relation declared twice: `{value}`"),
            Self::InvalidLink {
                relation,
                attribute,
            } => write!(
                f,
                "relation `{relation}` links unknown attribute `{attribute}`"
            ),
            Self::UnknownAttribute { entity, attribute } => {
                write!(f, "entity `{entity}` has no attribute `{attribute}`")
            }
        }
    }
}

impl Error for EntityError {}

/// Validation rule attached to one attribute.
///
/// Every rule except `Required` skips blank values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Required,
    Integer,
    Number,
    MaxLength(usize),
    Range { min: i64, max: i64 },
}

impl Rule {
    /// Returns an error message when `value` violates the rule.
    pub fn check(&self, attribute: &str, value: &AttributeValue) -> Option<String> {
        if value.is_blank() {
            return match self {
                Self::Required => Some(format!("`{attribute}` cannot be blank")),
                _ => None,
            };
        }

        match self {
            Self::Required => None,
            Self::Integer => match value {
                AttributeValue::Integer(_) => None,
                AttributeValue::Text(text) if text.trim().parse::<i64>().is_ok() => None,
                _ => Some(format!("`{attribute}` must be an integer")),
            },
            Self::Number => match value.as_f64() {
                Some(_) => None,
                None => Some(format!("`{attribute}` must be a number")),
            },
            Self::MaxLength(max) => {
                let length = value.to_string().chars().count();
                if length > *max {
                    Some(format!(
                        "`{attribute}` must contain at most {max} characters"
                    ))
                } else {
                    None
                }
            }
            Self::Range { min, max } => match value.as_f64() {
                Some(number) if number >= *min as f64 && number <= *max as f64 => None,
                _ => Some(format!("`{attribute}` must be between {min} and {max}")),
            },
        }
    }
}

/// One declared attribute and its rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDef {
    pub name: String,
    pub rules: Vec<Rule>,
}

/// Definition of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDef {
    name: String,
    table: String,
    form_name: String,
    attributes: Vec<AttributeDef>,
    relations: Vec<RelationDef>,
}

impl EntityDef {
    /// Starts a definition. The form name defaults to `name`.
    pub fn builder(name: impl Into<String>, table: impl Into<String>) -> EntityBuilder {
        let name = name.into();
        EntityBuilder {
            form_name: name.clone(),
            name,
            table: table.into(),
            attributes: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Scope key used for nested form payloads. Empty means "not nested".
    pub fn form_name(&self) -> &str {
        &self.form_name
    }

    pub fn attributes(&self) -> &[AttributeDef] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|attribute| attribute.name == name)
    }

    /// Whether `name` is a column of this entity, identity included.
    pub fn has_column(&self, name: &str) -> bool {
        name == IDENTITY_KEY || self.attribute(name).is_some()
    }

    /// Column list in storage order: identity first, then declared attributes.
    pub fn column_names(&self) -> Vec<&str> {
        std::iter::once(IDENTITY_KEY)
            .chain(self.attributes.iter().map(|attribute| attribute.name.as_str()))
            .collect()
    }

    /// Declared has-many relations.
    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|relation| relation.name == name)
    }
}

/// Builder for [`EntityDef`].
#[derive(Debug, Clone)]
pub struct EntityBuilder {
    name: String,
    table: String,
    form_name: String,
    attributes: Vec<AttributeDef>,
    relations: Vec<RelationDef>,
}

impl EntityBuilder {
    /// Overrides the form scope. Pass `""` for un-nested payloads.
    pub fn form_name(mut self, form_name: impl Into<String>) -> Self {
        self.form_name = form_name.into();
        self
    }

    pub fn attribute(
        mut self,
        name: impl Into<String>,
        rules: impl IntoIterator<Item = Rule>,
    ) -> Self {
        self.attributes.push(AttributeDef {
            name: name.into(),
            rules: rules.into_iter().collect(),
        });
        self
    }

    /// Declares a has-many relation to `related`.
    pub fn has_many(
        mut self,
        name: impl Into<String>,
        related: Arc<EntityDef>,
        link: Link,
    ) -> Self {
        self.relations.push(RelationDef::new(name, related, link));
        self
    }

    pub fn build(self) -> Result<Arc<EntityDef>, EntityError> {
        ensure_identifier(&self.table)?;

        let mut seen = BTreeSet::new();
        for attribute in &self.attributes {
            ensure_identifier(&attribute.name)?;
            if attribute.name == IDENTITY_KEY {
                return Err(EntityError::ReservedAttribute(attribute.name.clone()));
            }
            if !seen.insert(attribute.name.as_str()) {
                return Err(EntityError::DuplicateAttribute(attribute.name.clone()));
            }
        }

        let mut relation_names = BTreeSet::new();
        for relation in &self.relations {
            ensure_identifier(&relation.name)?;
            if !relation_names.insert(relation.name.as_str()) {
                return Err(EntityError::DuplicateRelation(relation.name.clone()));
            }

            let parent_key = relation.link.parent_key();
            if parent_key != IDENTITY_KEY && !seen.contains(parent_key) {
                return Err(EntityError::InvalidLink {
                    relation: relation.name.clone(),
                    attribute: parent_key.to_string(),
                });
            }
            if relation.related.attribute(relation.link.foreign_key()).is_none() {
                return Err(EntityError::InvalidLink {
                    relation: relation.name.clone(),
                    attribute: relation.link.foreign_key().to_string(),
                });
            }
        }

        Ok(Arc::new(EntityDef {
            name: self.name,
            table: self.table,
            form_name: self.form_name,
            attributes: self.attributes,
            relations: self.relations,
        }))
    }
}

/// Checks that `value` can be spliced into SQL as an identifier.
pub fn is_identifier(value: &str) -> bool {
    IDENTIFIER_RE.is_match(value)
}

fn ensure_identifier(value: &str) -> Result<(), EntityError> {
    if is_identifier(value) {
        Ok(())
    } else {
        Err(EntityError::InvalidIdentifier(value.to_string()))
    }
}
