mod common;

use cascade_core::{reconcile, CascadeStage, Link, RelationError, RelationalRecord};
use common::{count_rows, line, line_ids, schema, seed_order, setup_db, tag, RecordingStore};
use serde_json::json;
use std::sync::Arc;

fn sku_of(conn: &rusqlite::Connection, line_id: i64) -> String {
    conn.query_row(
        "SELECT sku FROM order_lines WHERE id = ?1;",
        [line_id],
        |row| row.get(0),
    )
    .unwrap()
}

#[test]
fn new_parent_save_inserts_parent_then_links_children() {
    let conn = setup_db();
    let schema = schema();
    let store = RecordingStore::new(&conn, &schema);

    let mut order = RelationalRecord::new(Arc::clone(&schema.order));
    order.record_mut().set_attribute("customer", "ada").unwrap();
    order
        .set_relation(&store, "lines", vec![line(&schema, "A", 1), line(&schema, "B", 2)])
        .unwrap();

    let report = order.save(&store, true);
    assert!(report.is_success(), "{:?}", report.failures());
    assert_eq!(report.saved(), 3);
    assert_eq!(
        store.calls(),
        vec![
            "insert:orders:new".to_string(),
            "insert:order_lines:new".to_string(),
            "insert:order_lines:new".to_string(),
        ]
    );

    let order_id = order.record().id().unwrap();
    assert_eq!(line_ids(&conn, order_id).len(), 2);
    let lines = order.relation(&store, "lines").unwrap();
    assert!(lines.iter().all(|line| !line.is_new()));
    assert!(lines
        .iter()
        .all(|line| line.get_attribute("order_id").as_id() == Some(order_id)));
}

#[test]
fn relation_never_assigned_is_not_written_on_save() {
    let conn = setup_db();
    let schema = schema();
    let order_id = seed_order(&conn, "ada", &["A", "B"]);
    let store = RecordingStore::new(&conn, &schema);

    let mut order = RelationalRecord::find(&store, &schema.order, order_id)
        .unwrap()
        .unwrap();
    let first_line = order.relation(&store, "lines").unwrap()[0].id().unwrap();
    order.relation_mut(&store, "lines").unwrap()[0]
        .set_attribute("sku", "CHANGED")
        .unwrap();
    order.record_mut().set_attribute("note", "rush").unwrap();

    let report = order.save(&store, true);
    assert!(report.is_success());
    assert_eq!(report.saved(), 1);
    assert!(store.writes_to("order_lines").is_empty());
    assert_eq!(sku_of(&conn, first_line), "A");
    assert!(order.tracked_relations().is_empty());
}

#[test]
fn relation_is_loaded_lazily_once_and_ordered_by_id() {
    let conn = setup_db();
    let schema = schema();
    let order_id = seed_order(&conn, "ada", &["A", "B", "C"]);
    let store = RecordingStore::new(&conn, &schema);

    let mut order = RelationalRecord::find(&store, &schema.order, order_id)
        .unwrap()
        .unwrap();
    store.clear_calls();

    let skus = order
        .relation(&store, "lines")
        .unwrap()
        .iter()
        .map(|line| line.get_attribute("sku").to_string())
        .collect::<Vec<_>>();
    assert_eq!(skus, vec!["A", "B", "C"]);
    order.relation(&store, "lines").unwrap();
    assert_eq!(store.calls(), vec![format!("find:order_lines:{order_id}")]);

    let mut fresh = RelationalRecord::new(Arc::clone(&schema.order));
    store.clear_calls();
    assert!(fresh.relation(&store, "lines").unwrap().is_empty());
    assert!(store.calls().is_empty());
}

#[test]
fn reassignment_overwrites_the_old_snapshot() {
    let conn = setup_db();
    let schema = schema();
    let order_id = seed_order(&conn, "ada", &["A"]);
    let store = RecordingStore::new(&conn, &schema);
    let seeded_line = line_ids(&conn, order_id)[0];

    let mut order = RelationalRecord::find(&store, &schema.order, order_id)
        .unwrap()
        .unwrap();
    order
        .set_relation(&store, "lines", vec![line(&schema, "C", 1)])
        .unwrap();
    assert_eq!(order.old_snapshot("lines").unwrap()[0].id(), Some(seeded_line));

    order
        .set_relation(&store, "lines", vec![line(&schema, "D", 1)])
        .unwrap();
    let snapshot = order.old_snapshot("lines").unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].get_attribute("sku").as_str(), Some("C"));

    // The seeded line was only in the overwritten snapshot, so it survives.
    let report = order.save(&store, true);
    assert!(report.is_success());
    assert_eq!(report.deleted(), 0);
    assert_eq!(line_ids(&conn, order_id).len(), 2);
}

#[test]
fn reconciled_save_updates_kept_records_and_deletes_missing_ones() {
    let conn = setup_db();
    let schema = schema();
    let order_id = seed_order(&conn, "ada", &["A", "B"]);
    let store = RecordingStore::new(&conn, &schema);
    let ids = line_ids(&conn, order_id);

    let mut order = RelationalRecord::find(&store, &schema.order, order_id)
        .unwrap()
        .unwrap();
    let old = order.relation(&store, "lines").unwrap().to_vec();
    let data = json!({"OrderLine": [{"id": ids[0], "sku": "A2"}, {"sku": "N", "qty": 3}]});
    let records = reconcile(&schema.line, old, &data, None);
    assert_eq!(records[0].id(), Some(ids[0]));
    assert!(records[1].is_new());
    order.set_relation(&store, "lines", records).unwrap();

    let report = order.save_relation(&store, "lines", false).unwrap();
    assert!(report.is_success(), "{:?}", report.failures());
    assert_eq!(report.saved(), 2);
    assert_eq!(report.deleted(), 1);

    let remaining = line_ids(&conn, order_id);
    assert_eq!(remaining.len(), 2);
    assert_eq!(remaining[0], ids[0]);
    assert!(!remaining.contains(&ids[1]));
    assert_eq!(sku_of(&conn, ids[0]), "A2");
}

#[test]
fn failed_stale_delete_fails_the_save_but_keeps_other_writes() {
    let conn = setup_db();
    let schema = schema();
    let order_id = seed_order(&conn, "ada", &["A", "B"]);
    let store = RecordingStore::new(&conn, &schema);
    let ids = line_ids(&conn, order_id);
    store.fail("delete", "order_lines", Some(ids[1]));

    let mut order = RelationalRecord::find(&store, &schema.order, order_id)
        .unwrap()
        .unwrap();
    let old = order.relation(&store, "lines").unwrap().to_vec();
    let data = json!({"OrderLine": [{"id": ids[0], "sku": "A2"}]});
    order
        .set_relation(&store, "lines", reconcile(&schema.line, old, &data, None))
        .unwrap();

    let report = order.save_relation(&store, "lines", false).unwrap();
    assert!(!report.is_success());
    assert_eq!(report.saved(), 1);
    let failures = report.failures_in("lines").collect::<Vec<_>>();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].stage, CascadeStage::Delete);
    assert_eq!(failures[0].record_id, Some(ids[1]));
    assert_eq!(sku_of(&conn, ids[0]), "A2");
    assert_eq!(line_ids(&conn, order_id), ids);
}

#[test]
fn sibling_save_failure_does_not_stop_remaining_records() {
    let conn = setup_db();
    let schema = schema();
    let order_id = seed_order(&conn, "ada", &["A", "B"]);
    let store = RecordingStore::new(&conn, &schema);
    let ids = line_ids(&conn, order_id);
    store.fail("update", "order_lines", Some(ids[0]));

    let mut order = RelationalRecord::find(&store, &schema.order, order_id)
        .unwrap()
        .unwrap();
    order.track_relation(&store, "lines").unwrap();
    for line in order.relation_mut(&store, "lines").unwrap().iter_mut() {
        line.set_attribute("qty", 9).unwrap();
    }

    let report = order.save(&store, true);
    assert!(!report.is_success());
    assert_eq!(report.saved(), 2);
    assert_eq!(report.failures()[0].stage, CascadeStage::Save);
    let qty_of_second: i64 = conn
        .query_row("SELECT qty FROM order_lines WHERE id = ?1;", [ids[1]], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(qty_of_second, 9);
}

#[test]
fn one_relation_failing_does_not_prevent_another_relation() {
    let conn = setup_db();
    let schema = schema();
    let store = RecordingStore::new(&conn, &schema);
    store.fail("insert", "order_lines", None);

    let mut order = RelationalRecord::new(Arc::clone(&schema.order));
    order.record_mut().set_attribute("customer", "ada").unwrap();
    order
        .set_relation(&store, "lines", vec![line(&schema, "A", 1)])
        .unwrap();
    order
        .set_relation(&store, "tags", vec![tag(&schema, "vip")])
        .unwrap();

    let report = order.save(&store, false);
    assert!(!report.is_success());
    assert_eq!(report.failures_in("lines").count(), 1);
    assert_eq!(report.failures_in("tags").count(), 0);
    assert_eq!(count_rows(&conn, "order_tags"), 1);
    assert_eq!(count_rows(&conn, "order_lines"), 0);
}

#[test]
fn invalid_parent_blocks_every_write_and_children_are_still_validated() {
    let conn = setup_db();
    let schema = schema();
    let store = RecordingStore::new(&conn, &schema);

    let mut order = RelationalRecord::new(Arc::clone(&schema.order));
    order
        .set_relation(&store, "lines", vec![line(&schema, "A", 1), line(&schema, "", 1)])
        .unwrap();

    let report = order.save(&store, true);
    assert!(!report.is_success());
    assert!(store.calls().is_empty());
    assert_eq!(count_rows(&conn, "orders"), 0);

    assert!(order.record().errors().contains_key("customer"));
    let lines = order.relation(&store, "lines").unwrap();
    assert!(!lines[0].has_errors());
    assert!(lines[1].errors().contains_key("sku"));

    let stages = report
        .failures()
        .iter()
        .map(|failure| (failure.relation.clone(), failure.stage))
        .collect::<Vec<_>>();
    assert_eq!(
        stages,
        vec![
            (None, CascadeStage::Validate),
            (Some("lines".to_string()), CascadeStage::Validate),
        ]
    );
}

#[test]
fn relation_validation_skips_the_link_key_and_empty_collections_pass() {
    let conn = setup_db();
    let schema = schema();
    let store = RecordingStore::new(&conn, &schema);

    let mut standalone = line(&schema, "A", 1);
    assert!(!standalone.validate(None));
    assert!(standalone.errors().contains_key("order_id"));

    let mut order = RelationalRecord::new(Arc::clone(&schema.order));
    order
        .set_relation(&store, "lines", vec![line(&schema, "A", 1)])
        .unwrap();
    assert!(order.validate_relation(&store, "lines", None).unwrap());

    order.set_relation(&store, "lines", Vec::new()).unwrap();
    assert!(order.validate_relation(&store, "lines", None).unwrap());
    assert!(order.validate_relation(&store, "tags", None).unwrap());

    order
        .set_relation(&store, "lines", vec![line(&schema, "A", 500)])
        .unwrap();
    assert!(!order.validate_relation(&store, "lines", None).unwrap());
    assert!(order
        .validate_relation(&store, "lines", Some(&["sku", "order_id"][..]))
        .unwrap());
}

#[test]
fn save_relations_with_validation_writes_nothing_when_a_child_is_invalid() {
    let conn = setup_db();
    let schema = schema();
    let order_id = seed_order(&conn, "ada", &["A"]);
    let store = RecordingStore::new(&conn, &schema);

    let mut order = RelationalRecord::find(&store, &schema.order, order_id)
        .unwrap()
        .unwrap();
    order
        .set_relation(&store, "lines", vec![line(&schema, "B", 1), line(&schema, "C", 0)])
        .unwrap();

    let report = order.save_relations(&store, true);
    assert!(!report.is_success());
    assert_eq!(report.failures_in("lines").count(), 1);
    assert!(store.writes_to("order_lines").is_empty());
    assert_eq!(line_ids(&conn, order_id).len(), 1);
}

#[test]
fn parent_save_failure_skips_relation_saves() {
    let conn = setup_db();
    let schema = schema();
    let store = RecordingStore::new(&conn, &schema);
    store.fail("insert", "orders", None);

    let mut order = RelationalRecord::new(Arc::clone(&schema.order));
    order.record_mut().set_attribute("customer", "ada").unwrap();
    order
        .set_relation(&store, "lines", vec![line(&schema, "A", 1)])
        .unwrap();

    let report = order.save(&store, true);
    assert!(!report.is_success());
    assert_eq!(report.failures().len(), 1);
    assert_eq!(report.failures()[0].relation, None);
    assert!(store.writes_to("order_lines").is_empty());
}

#[test]
fn delete_cascades_to_tracked_relations_only() {
    let conn = setup_db();
    let schema = schema();
    let tracked_id = seed_order(&conn, "ada", &["A", "B"]);
    let untracked_id = seed_order(&conn, "bob", &["C"]);
    let store = RecordingStore::new(&conn, &schema);

    let mut tracked = RelationalRecord::find(&store, &schema.order, tracked_id)
        .unwrap()
        .unwrap();
    tracked.track_relation(&store, "lines").unwrap();
    let report = tracked.delete(&store);
    assert!(report.is_success());
    assert_eq!(report.deleted(), 3);
    assert!(line_ids(&conn, tracked_id).is_empty());

    let mut untracked = RelationalRecord::find(&store, &schema.order, untracked_id)
        .unwrap()
        .unwrap();
    let report = untracked.delete(&store);
    assert!(report.is_success());
    assert_eq!(report.deleted(), 1);
    assert_eq!(line_ids(&conn, untracked_id).len(), 1);
}

#[test]
fn failed_parent_delete_never_deletes_relation_records() {
    let conn = setup_db();
    let schema = schema();
    let order_id = seed_order(&conn, "ada", &["A", "B"]);
    let store = RecordingStore::new(&conn, &schema);
    store.fail("delete", "orders", None);

    let mut order = RelationalRecord::find(&store, &schema.order, order_id)
        .unwrap()
        .unwrap();
    order.track_relation(&store, "lines").unwrap();

    let report = order.delete(&store);
    assert!(!report.is_success());
    assert_eq!(report.failures()[0].stage, CascadeStage::Delete);
    assert!(store.writes_to("order_lines").is_empty());
    assert_eq!(count_rows(&conn, "order_lines"), 2);
}

#[test]
fn relation_misuse_is_reported_as_errors() {
    let conn = setup_db();
    let schema = schema();
    let store = RecordingStore::new(&conn, &schema);
    let mut order = RelationalRecord::new(Arc::clone(&schema.order));

    let unknown = order.relation(&store, "missing").unwrap_err();
    assert!(matches!(unknown, RelationError::UnknownRelation(name) if name == "missing"));

    let mismatch = order
        .set_relation(&store, "tags", vec![line(&schema, "A", 1)])
        .unwrap_err();
    assert!(matches!(mismatch, RelationError::EntityMismatch { .. }));
    assert!(order.tracked_relations().is_empty());

    order.relation(&store, "lines").unwrap();
    let conflict = order
        .has_many("lines", Arc::clone(&schema.tag), Link::new("order_id", "id"))
        .unwrap_err();
    assert!(matches!(conflict, RelationError::ConflictingDefinition(_)));

    let bad_link = order
        .has_many("extra", Arc::clone(&schema.line), Link::new("missing", "id"))
        .unwrap_err();
    assert!(matches!(bad_link, RelationError::InvalidLink(_)));
}

#[test]
fn instance_declared_relation_cascades_like_a_declared_one() {
    let conn = setup_db();
    let schema = schema();
    let store = RecordingStore::new(&conn, &schema);

    let mut order = RelationalRecord::new(Arc::clone(&schema.order));
    order.record_mut().set_attribute("customer", "ada").unwrap();
    order
        .has_many("labels", Arc::clone(&schema.tag), Link::new("order_id", "id"))
        .unwrap();
    order
        .has_many("labels", Arc::clone(&schema.tag), Link::new("order_id", "id"))
        .unwrap();
    order
        .set_relation(&store, "labels", vec![tag(&schema, "gift")])
        .unwrap();

    let report = order.save(&store, true);
    assert!(report.is_success());
    assert_eq!(order.registry().names(), vec!["labels".to_string()]);
    assert!(order.registry().contains("labels"));
    assert!(!order.registry().contains("tags"));
    assert_eq!(count_rows(&conn, "order_tags"), 1);
}

#[test]
fn delete_relation_loads_an_unaccessed_relation_before_deleting() {
    let conn = setup_db();
    let schema = schema();
    let order_id = seed_order(&conn, "ada", &["A", "B"]);
    let other_id = seed_order(&conn, "bob", &["C"]);
    let store = RecordingStore::new(&conn, &schema);

    let mut order = RelationalRecord::find(&store, &schema.order, order_id)
        .unwrap()
        .unwrap();
    let report = order.delete_relation(&store, "lines").unwrap();

    assert!(report.is_success(), "{:?}", report.failures());
    assert_eq!(report.deleted(), 2);
    assert!(line_ids(&conn, order_id).is_empty());
    assert_eq!(line_ids(&conn, other_id).len(), 1);
    assert_eq!(count_rows(&conn, "orders"), 2);
}

#[test]
fn validate_relation_checks_stored_children_of_an_unaccessed_relation() {
    let conn = setup_db();
    let schema = schema();
    let long_sku = "X".repeat(33);
    let order_id = seed_order(&conn, "ada", &[long_sku.as_str()]);
    let store = RecordingStore::new(&conn, &schema);

    let mut order = RelationalRecord::find(&store, &schema.order, order_id)
        .unwrap()
        .unwrap();
    assert!(!order.validate_relation(&store, "lines", None).unwrap());
    assert!(order.relation(&store, "lines").unwrap()[0]
        .errors()
        .contains_key("sku"));
}

#[test]
fn save_relation_on_an_unaccessed_relation_rewrites_stored_children() {
    let conn = setup_db();
    let schema = schema();
    let order_id = seed_order(&conn, "ada", &["A", "B"]);
    let store = RecordingStore::new(&conn, &schema);

    let mut order = RelationalRecord::find(&store, &schema.order, order_id)
        .unwrap()
        .unwrap();
    store.clear_calls();
    let report = order.save_relation(&store, "lines", true).unwrap();

    assert!(report.is_success(), "{:?}", report.failures());
    assert_eq!(report.saved(), 2);
    assert_eq!(report.deleted(), 0);
    assert_eq!(store.writes_to("order_lines").len(), 2);
    assert_eq!(line_ids(&conn, order_id).len(), 2);
}
