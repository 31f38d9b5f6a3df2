//! Demo schema: orders with order lines.

use cascade_core::{EntityDef, EntityError, Link, Rule};
use rusqlite::Connection;
use std::sync::Arc;

pub const LINES_RELATION: &str = "lines";

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer TEXT NOT NULL,
    note TEXT
);
CREATE TABLE IF NOT EXISTS order_lines (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id INTEGER NOT NULL,
    sku TEXT NOT NULL,
    qty INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_order_lines_order_id ON order_lines(order_id);
";

/// `Order` entity with its declared `lines` relation.
pub fn order_entity() -> Result<Arc<EntityDef>, EntityError> {
    let line = EntityDef::builder("OrderLine", "order_lines")
        .attribute("order_id", [Rule::Integer])
        .attribute("sku", [Rule::Required, Rule::MaxLength(32)])
        .attribute(
            "qty",
            [Rule::Required, Rule::Integer, Rule::Range { min: 1, max: 999 }],
        )
        .build()?;
    EntityDef::builder("Order", "orders")
        .attribute("customer", [Rule::Required, Rule::MaxLength(64)])
        .attribute("note", [Rule::MaxLength(255)])
        .has_many(LINES_RELATION, line, Link::new("order_id", "id"))
        .build()
}

/// Creates the demo tables when missing.
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
