//! Multi-record loader.
//!
//! # Responsibility
//! - Turn a submitted list of records into related records, reusing loaded
//!   ones whose identity matches and creating new ones otherwise.
//!
//! # Invariants
//! - Output order follows the submitted items.
//! - An item's identity never overwrites the identity of a reused record.
//! - Previously loaded records that no item references are left out; the
//!   next relation save deletes them.

use crate::model::entity::{EntityDef, IDENTITY_KEY};
use crate::model::record::Record;
use crate::model::value::{AttributeValue, RecordId};
use log::debug;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reconciles `old_records` with the item list found in `data`.
///
/// `scope` defaults to the form name of the related entity (taken from the
/// first old record when there is one, `related` otherwise). An empty scope
/// reads the items from `data` itself. Items may be given as an array or as
/// an object keyed by arbitrary strings; non-object items are skipped.
///
/// Items whose `id` matches an old record update that record in place. Two
/// items with the same `id` merge into that one record, which is returned
/// once.
pub fn reconcile(
    related: &Arc<EntityDef>,
    old_records: Vec<Record>,
    data: &JsonValue,
    scope: Option<&str>,
) -> Vec<Record> {
    let entity = old_records
        .first()
        .map(|record| Arc::clone(record.entity()))
        .unwrap_or_else(|| Arc::clone(related));
    let scope = scope.unwrap_or_else(|| entity.form_name());

    let items = submitted_items(data, scope);
    let submitted = items.len();

    let mut by_id = BTreeMap::<RecordId, Record>::new();
    let mut unidentified = Vec::new();
    for record in old_records {
        match record.id() {
            Some(id) => {
                by_id.entry(id).or_insert(record);
            }
            None => unidentified.push(record),
        }
    }

    let mut slots = Vec::<Slot>::with_capacity(items.len());
    let mut fresh = Vec::new();
    let mut reused = 0usize;
    for item in items {
        let matched = item
            .get(IDENTITY_KEY)
            .and_then(AttributeValue::from_json)
            .and_then(|value| value.as_id())
            .filter(|id| by_id.contains_key(id));

        match matched {
            Some(id) => {
                if let Some(record) = by_id.get_mut(&id) {
                    record.set_attributes(item);
                }
                if !slots.contains(&Slot::Reused(id)) {
                    slots.push(Slot::Reused(id));
                    reused += 1;
                }
            }
            None => {
                let mut record = Record::new(Arc::clone(&entity));
                record.set_attributes(item);
                slots.push(Slot::Fresh(fresh.len()));
                fresh.push(record);
            }
        }
    }

    let mut fresh = fresh.into_iter().map(Some).collect::<Vec<_>>();
    let records = slots
        .into_iter()
        .filter_map(|slot| match slot {
            Slot::Reused(id) => by_id.remove(&id),
            Slot::Fresh(index) => fresh.get_mut(index).and_then(Option::take),
        })
        .collect::<Vec<_>>();

    debug!(
        "event=relation_reconcile module=relation status=ok entity={} submitted={} reused={} created={} dropped={}",
        entity.name(),
        submitted,
        reused,
        records.len() - reused,
        by_id.len() + unidentified.len()
    );
    records
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Reused(RecordId),
    Fresh(usize),
}

fn submitted_items<'a>(data: &'a JsonValue, scope: &str) -> Vec<&'a Map<String, JsonValue>> {
    let container = if scope.is_empty() {
        Some(data)
    } else {
        data.get(scope)
    };

    let values: Vec<&JsonValue> = match container {
        Some(JsonValue::Array(items)) => items.iter().collect(),
        Some(JsonValue::Object(items)) => items.values().collect(),
        _ => Vec::new(),
    };
    values.into_iter().filter_map(JsonValue::as_object).collect()
}
