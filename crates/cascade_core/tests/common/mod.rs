#![allow(dead_code)]

use cascade_core::db::open_db_in_memory;
use cascade_core::{
    AttributeValue, EntityDef, Link, Record, RecordId, RecordStore, RepoError, RepoResult, Rule,
    SqliteRecordStore,
};
use rusqlite::{params, Connection};
use std::cell::RefCell;
use std::sync::Arc;

const SCHEMA_SQL: &str = "
CREATE TABLE orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer TEXT,
    note TEXT
);
CREATE TABLE order_lines (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id INTEGER,
    sku TEXT,
    qty INTEGER
);
CREATE TABLE order_tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id INTEGER,
    label TEXT
);
";

/// Entity definitions shared by integration tests.
pub struct Schema {
    pub order: Arc<EntityDef>,
    pub line: Arc<EntityDef>,
    pub tag: Arc<EntityDef>,
}

pub fn schema() -> Schema {
    let line = EntityDef::builder("OrderLine", "order_lines")
        .attribute("order_id", [Rule::Required, Rule::Integer])
        .attribute("sku", [Rule::Required, Rule::MaxLength(16)])
        .attribute("qty", [Rule::Integer, Rule::Range { min: 1, max: 100 }])
        .build()
        .unwrap();
    let tag = EntityDef::builder("OrderTag", "order_tags")
        .attribute("order_id", [Rule::Required])
        .attribute("label", [Rule::Required])
        .build()
        .unwrap();
    let order = EntityDef::builder("Order", "orders")
        .attribute("customer", [Rule::Required])
        .attribute("note", [])
        .has_many("lines", Arc::clone(&line), Link::new("order_id", "id"))
        .has_many("tags", Arc::clone(&tag), Link::new("order_id", "id"))
        .build()
        .unwrap();
    Schema { order, line, tag }
}

pub fn setup_db() -> Connection {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(SCHEMA_SQL).unwrap();
    conn
}

pub fn seed_order(conn: &Connection, customer: &str, skus: &[&str]) -> RecordId {
    conn.execute("INSERT INTO orders (customer) VALUES (?1);", [customer])
        .unwrap();
    let order_id = conn.last_insert_rowid();
    for sku in skus {
        conn.execute(
            "INSERT INTO order_lines (order_id, sku, qty) VALUES (?1, ?2, 1);",
            params![order_id, sku],
        )
        .unwrap();
    }
    order_id
}

pub fn line(schema: &Schema, sku: &str, qty: i64) -> Record {
    let mut record = Record::new(Arc::clone(&schema.line));
    record.set_attribute("sku", sku).unwrap();
    record.set_attribute("qty", qty).unwrap();
    record
}

pub fn tag(schema: &Schema, label: &str) -> Record {
    let mut record = Record::new(Arc::clone(&schema.tag));
    record.set_attribute("label", label).unwrap();
    record
}

pub fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}

pub fn line_ids(conn: &Connection, order_id: RecordId) -> Vec<RecordId> {
    let mut stmt = conn
        .prepare("SELECT id FROM order_lines WHERE order_id = ?1 ORDER BY id ASC;")
        .unwrap();
    let rows = stmt
        .query_map([order_id], |row| row.get::<_, i64>(0))
        .unwrap();
    let ids = rows.map(Result::unwrap).collect();
    ids
}

/// SQLite store that logs every call and fails the ones it is told to.
pub struct RecordingStore<'conn> {
    inner: SqliteRecordStore<'conn>,
    calls: RefCell<Vec<String>>,
    failures: RefCell<Vec<(String, String, Option<RecordId>)>>,
}

impl<'conn> RecordingStore<'conn> {
    pub fn new(conn: &'conn Connection, schema: &Schema) -> Self {
        Self {
            inner: SqliteRecordStore::try_new(conn, &[Arc::clone(&schema.order)]).unwrap(),
            calls: RefCell::new(Vec::new()),
            failures: RefCell::new(Vec::new()),
        }
    }

    /// Makes `op` on `table` fail; `id: None` fails every row.
    pub fn fail(&self, op: &str, table: &str, id: Option<RecordId>) {
        self.failures
            .borrow_mut()
            .push((op.to_string(), table.to_string(), id));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Write calls (`insert`/`update`/`delete`) against `table`.
    pub fn writes_to(&self, table: &str) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| {
                let mut parts = call.split(':');
                let op = parts.next().unwrap_or_default();
                let call_table = parts.next().unwrap_or_default();
                op != "find" && call_table == table
            })
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    fn enter(&self, op: &str, table: &str, id: Option<RecordId>) -> RepoResult<()> {
        let rendered_id = id.map_or_else(|| "new".to_string(), |id| id.to_string());
        self.calls
            .borrow_mut()
            .push(format!("{op}:{table}:{rendered_id}"));

        let injected = self.failures.borrow().iter().any(|(fail_op, fail_table, fail_id)| {
            fail_op == op && fail_table == table && (fail_id.is_none() || *fail_id == id)
        });
        if injected {
            return Err(RepoError::InvalidData(format!(
                "injected {op} failure on {table}#{rendered_id}"
            )));
        }
        Ok(())
    }
}

impl RecordStore for RecordingStore<'_> {
    fn insert(&self, record: &Record) -> RepoResult<RecordId> {
        self.enter("insert", record.entity().table(), record.id())?;
        self.inner.insert(record)
    }

    fn update(&self, record: &Record) -> RepoResult<()> {
        self.enter("update", record.entity().table(), record.id())?;
        self.inner.update(record)
    }

    fn delete(&self, entity: &EntityDef, id: RecordId) -> RepoResult<()> {
        self.enter("delete", entity.table(), Some(id))?;
        self.inner.delete(entity, id)
    }

    fn find(&self, entity: &Arc<EntityDef>, id: RecordId) -> RepoResult<Option<Record>> {
        self.enter("find", entity.table(), Some(id))?;
        self.inner.find(entity, id)
    }

    fn find_by_attribute(
        &self,
        entity: &Arc<EntityDef>,
        attribute: &str,
        value: &AttributeValue,
    ) -> RepoResult<Vec<Record>> {
        self.enter("find", entity.table(), value.as_id())?;
        self.inner.find_by_attribute(entity, attribute, value)
    }
}
