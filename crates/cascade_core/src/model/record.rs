//! Single-row record: the base abstraction cascades are layered on.
//!
//! # Responsibility
//! - Hold attribute values, validation errors and new/existing state for one row.
//! - Provide own-row validate/save/delete against a `RecordStore`.
//! - Assign form payloads to declared attributes.
//!
//! # Invariants
//! - Only declared, non-identity attributes are assignable from payloads.
//! - `validate` clears previous errors before applying rules.
//! - A record is "new" until its first successful insert.

use crate::model::entity::{EntityDef, EntityError, IDENTITY_KEY};
use crate::model::value::{AttributeValue, RecordId};
use crate::repo::record_repo::{RecordStore, RepoError, RepoResult};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;

static NULL_VALUE: AttributeValue = AttributeValue::Null;

/// Attribute name -> validation messages.
pub type ValidationErrors = BTreeMap<String, Vec<String>>;

/// One row of an entity, persisted or not.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    entity: Arc<EntityDef>,
    attributes: BTreeMap<String, AttributeValue>,
    errors: ValidationErrors,
    is_new: bool,
}

impl Record {
    /// Creates an empty, not yet persisted record.
    pub fn new(entity: Arc<EntityDef>) -> Self {
        Self {
            entity,
            attributes: BTreeMap::new(),
            errors: ValidationErrors::new(),
            is_new: true,
        }
    }

    /// Builds a record from values read back from storage.
    ///
    /// Used by `RecordStore` implementations; unknown columns are dropped.
    pub fn from_persisted(
        entity: Arc<EntityDef>,
        values: impl IntoIterator<Item = (String, AttributeValue)>,
    ) -> Self {
        let attributes = values
            .into_iter()
            .filter(|(name, _)| entity.has_column(name))
            .collect();
        Self {
            entity,
            attributes,
            errors: ValidationErrors::new(),
            is_new: false,
        }
    }

    pub fn entity(&self) -> &Arc<EntityDef> {
        &self.entity
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Identity value, when one is set and numeric.
    pub fn id(&self) -> Option<RecordId> {
        self.attributes.get(IDENTITY_KEY).and_then(AttributeValue::as_id)
    }

    /// Returns the attribute value, or `Null` when unset.
    pub fn get_attribute(&self, name: &str) -> &AttributeValue {
        self.attributes.get(name).unwrap_or(&NULL_VALUE)
    }

    /// Attributes that currently carry a value.
    pub fn attribute_values(&self) -> &BTreeMap<String, AttributeValue> {
        &self.attributes
    }

    pub fn set_attribute(
        &mut self,
        name: &str,
        value: impl Into<AttributeValue>,
    ) -> Result<(), EntityError> {
        if !self.entity.has_column(name) {
            return Err(EntityError::UnknownAttribute {
                entity: self.entity.name().to_string(),
                attribute: name.to_string(),
            });
        }
        self.attributes.insert(name.to_string(), value.into());
        Ok(())
    }

    /// Assigns payload fields to declared attributes.
    ///
    /// Identity, unknown keys and nested values are skipped. Returns how many
    /// attributes were assigned.
    pub fn set_attributes(&mut self, values: &Map<String, JsonValue>) -> usize {
        let mut assigned = 0;
        for (name, value) in values {
            if name == IDENTITY_KEY || self.entity.attribute(name).is_none() {
                continue;
            }
            let Some(value) = AttributeValue::from_json(value) else {
                continue;
            };
            self.attributes.insert(name.clone(), value);
            assigned += 1;
        }
        assigned
    }

    /// Loads attributes from a form payload.
    ///
    /// `scope` defaults to the entity form name; a non-empty scope means the
    /// fields are nested one level under that key. Returns `false` when the
    /// payload has no object for this record; an empty object still counts.
    pub fn load(&mut self, data: &JsonValue, scope: Option<&str>) -> bool {
        let scope = scope.unwrap_or_else(|| self.entity.form_name());
        let fields = if scope.is_empty() {
            data.as_object()
        } else {
            data.get(scope).and_then(JsonValue::as_object)
        };

        match fields {
            Some(fields) => {
                self.set_attributes(fields);
                true
            }
            _ => false,
        }
    }

    /// Identity followed by declared attributes.
    pub fn attribute_names(&self) -> Vec<String> {
        self.entity
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Validates the named attributes, or all of them when `None`.
    ///
    /// Errors from a previous run are cleared first.
    pub fn validate(&mut self, attribute_names: Option<&[&str]>) -> bool {
        self.errors.clear();
        let entity = Arc::clone(&self.entity);
        let names = match attribute_names {
            Some(names) => names.to_vec(),
            None => entity.column_names(),
        };

        for name in names {
            let Some(attribute) = entity.attribute(name) else {
                continue;
            };
            let value = self.get_attribute(name).clone();
            for rule in &attribute.rules {
                if let Some(message) = rule.check(name, &value) {
                    self.add_error(name, message);
                }
            }
        }

        !self.has_errors()
    }

    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn add_error(&mut self, attribute: &str, message: impl Into<String>) {
        self.errors
            .entry(attribute.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    /// Inserts or updates this record's own row.
    ///
    /// With `run_validation`, an invalid record is not written and
    /// `RepoError::Validation` is returned; the errors stay on the record.
    pub fn save<S: RecordStore + ?Sized>(
        &mut self,
        store: &S,
        run_validation: bool,
    ) -> RepoResult<RecordId> {
        if run_validation && !self.validate(None) {
            return Err(RepoError::Validation {
                entity: self.entity.name().to_string(),
                errors: self.errors.clone(),
            });
        }

        if self.is_new {
            let id = store.insert(self)?;
            self.attributes
                .insert(IDENTITY_KEY.to_string(), AttributeValue::Integer(id));
            self.is_new = false;
            return Ok(id);
        }

        let id = self.id().ok_or_else(|| RepoError::NotPersisted {
            entity: self.entity.name().to_string(),
        })?;
        store.update(self)?;
        Ok(id)
    }

    /// Deletes this record's own row.
    pub fn delete<S: RecordStore + ?Sized>(&self, store: &S) -> RepoResult<()> {
        let id = match (self.is_new, self.id()) {
            (false, Some(id)) => id,
            _ => {
                return Err(RepoError::NotPersisted {
                    entity: self.entity.name().to_string(),
                })
            }
        };
        store.delete(&self.entity, id)
    }

    /// JSON projection of the current attribute values.
    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::new();
        for name in self.entity.column_names() {
            if let Some(value) = self.attributes.get(name) {
                map.insert(
                    name.to_string(),
                    serde_json::to_value(value).unwrap_or(JsonValue::Null),
                );
            }
        }
        JsonValue::Object(map)
    }
}
