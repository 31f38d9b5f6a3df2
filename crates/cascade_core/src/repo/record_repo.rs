//! Record store contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide the own-row primitives records need: insert/update/delete/find.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Statements only touch the table and columns declared by the entity.
//! - Update/delete that change no row report `NotFound`.
//! - Related-record lookups are ordered by `id ASC`.

use crate::db::DbError;
use crate::model::entity::{is_identifier, EntityDef, IDENTITY_KEY};
use crate::model::record::{Record, ValidationErrors};
use crate::model::value::{AttributeValue, RecordId};
use rusqlite::{params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type RepoResult<T> = Result<T, RepoError>;

/// Record persistence error.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound {
        table: String,
        id: RecordId,
    },
    /// Operation needs a persisted row, but the record was never saved.
    NotPersisted {
        entity: String,
    },
    Validation {
        entity: String,
        errors: ValidationErrors,
    },
    MissingRequiredTable(String),
    MissingRequiredColumn {
        table: String,
        column: String,
    },
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { table, id } => write!(f, "row not found: {table}#{id}"),
            Self::NotPersisted { entity } => write!(f, "{entity} record is not persisted"),
            Self::Validation { entity, errors } => {
                let attributes = errors.keys().cloned().collect::<Vec<_>>().join(", ");
                write!(f, "{entity} record failed validation on: {attributes}")
            }
            Self::MissingRequiredTable(table) => {
                write!(f, "record store requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "record store requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Own-row persistence primitives consumed by records and cascades.
pub trait RecordStore {
    /// Inserts a new row and returns its identity.
    fn insert(&self, record: &Record) -> RepoResult<RecordId>;
    /// Writes all present attributes of an existing row.
    fn update(&self, record: &Record) -> RepoResult<()>;
    /// Removes one row by identity.
    fn delete(&self, entity: &EntityDef, id: RecordId) -> RepoResult<()>;
    /// Loads one row by identity.
    fn find(&self, entity: &Arc<EntityDef>, id: RecordId) -> RepoResult<Option<Record>>;
    /// Loads every row whose `attribute` equals `value`, ordered by identity.
    fn find_by_attribute(
        &self,
        entity: &Arc<EntityDef>,
        attribute: &str,
        value: &AttributeValue,
    ) -> RepoResult<Vec<Record>>;
}

/// SQLite-backed record store.
pub struct SqliteRecordStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRecordStore<'conn> {
    /// Creates a store after checking that every entity (and every entity
    /// reachable through declared relations) has its table and columns.
    pub fn try_new(conn: &'conn Connection, entities: &[Arc<EntityDef>]) -> RepoResult<Self> {
        let store = Self { conn };
        let mut pending: Vec<&EntityDef> = entities.iter().map(Arc::as_ref).collect();
        let mut checked = Vec::<String>::new();
        while let Some(entity) = pending.pop() {
            if checked.iter().any(|table| table == entity.table()) {
                continue;
            }
            store.ensure_entity_ready(entity)?;
            checked.push(entity.table().to_string());
            pending.extend(entity.relations().iter().map(|relation| relation.related.as_ref()));
        }
        Ok(store)
    }

    /// Checks table and column presence for one entity.
    pub fn ensure_entity_ready(&self, entity: &EntityDef) -> RepoResult<()> {
        if !table_exists(self.conn, entity.table())? {
            return Err(RepoError::MissingRequiredTable(entity.table().to_string()));
        }
        let columns = table_columns(self.conn, entity.table())?;
        for column in entity.column_names() {
            if !columns.iter().any(|current| current == column) {
                return Err(RepoError::MissingRequiredColumn {
                    table: entity.table().to_string(),
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Opens an immediate transaction on the underlying connection.
    ///
    /// Store calls made while it is open run inside it; dropping it without
    /// `commit()` rolls back.
    pub fn begin_immediate(&self) -> RepoResult<Transaction<'conn>> {
        Ok(Transaction::new_unchecked(
            self.conn,
            TransactionBehavior::Immediate,
        )?)
    }
}

impl RecordStore for SqliteRecordStore<'_> {
    fn insert(&self, record: &Record) -> RepoResult<RecordId> {
        let entity = record.entity();
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for name in entity.column_names() {
            let value = record.get_attribute(name);
            if name == IDENTITY_KEY && value.is_null() {
                continue;
            }
            if record.attribute_values().contains_key(name) {
                columns.push(quote(name));
                values.push(value.clone());
            }
        }

        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES;", quote(entity.table()))
        } else {
            let placeholders = (1..=columns.len())
                .map(|index| format!("?{index}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "INSERT INTO {} ({}) VALUES ({placeholders});",
                quote(entity.table()),
                columns.join(", ")
            )
        };

        self.conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(record.id().unwrap_or_else(|| self.conn.last_insert_rowid()))
    }

    fn update(&self, record: &Record) -> RepoResult<()> {
        let entity = record.entity();
        let id = record.id().ok_or_else(|| RepoError::NotPersisted {
            entity: entity.name().to_string(),
        })?;

        let mut assignments = Vec::new();
        let mut values = Vec::new();
        for attribute in entity.attributes() {
            if let Some(value) = record.attribute_values().get(&attribute.name) {
                values.push(value.clone());
                assignments.push(format!("{} = ?{}", quote(&attribute.name), values.len()));
            }
        }
        if assignments.is_empty() {
            return self.find(record.entity(), id).and_then(|found| match found {
                Some(_) => Ok(()),
                None => Err(RepoError::NotFound {
                    table: entity.table().to_string(),
                    id,
                }),
            });
        }

        values.push(AttributeValue::Integer(id));
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{};",
            quote(entity.table()),
            assignments.join(", "),
            quote(IDENTITY_KEY),
            values.len()
        );
        let changed = self.conn.execute(&sql, params_from_iter(values.iter()))?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                table: entity.table().to_string(),
                id,
            });
        }
        Ok(())
    }

    fn delete(&self, entity: &EntityDef, id: RecordId) -> RepoResult<()> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1;",
            quote(entity.table()),
            quote(IDENTITY_KEY)
        );
        let changed = self.conn.execute(&sql, [id])?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                table: entity.table().to_string(),
                id,
            });
        }
        Ok(())
    }

    fn find(&self, entity: &Arc<EntityDef>, id: RecordId) -> RepoResult<Option<Record>> {
        let sql = format!(
            "{} WHERE {} = ?1;",
            select_sql(entity),
            quote(IDENTITY_KEY)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_record_row(entity, row)?));
        }
        Ok(None)
    }

    fn find_by_attribute(
        &self,
        entity: &Arc<EntityDef>,
        attribute: &str,
        value: &AttributeValue,
    ) -> RepoResult<Vec<Record>> {
        if !entity.has_column(attribute) {
            return Err(RepoError::InvalidData(format!(
                "`{attribute}` is not a column of `{}`",
                entity.table()
            )));
        }

        let mut stmt;
        let mut rows = if value.is_null() {
            stmt = self.conn.prepare(&format!(
                "{} WHERE {} IS NULL ORDER BY {} ASC;",
                select_sql(entity),
                quote(attribute),
                quote(IDENTITY_KEY)
            ))?;
            stmt.query([])?
        } else {
            stmt = self.conn.prepare(&format!(
                "{} WHERE {} = ?1 ORDER BY {} ASC;",
                select_sql(entity),
                quote(attribute),
                quote(IDENTITY_KEY)
            ))?;
            stmt.query([value])?
        };

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(entity, row)?);
        }
        Ok(records)
    }
}

fn select_sql(entity: &EntityDef) -> String {
    let columns = entity
        .column_names()
        .into_iter()
        .map(quote)
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {columns} FROM {}", quote(entity.table()))
}

fn parse_record_row(entity: &Arc<EntityDef>, row: &Row<'_>) -> RepoResult<Record> {
    let mut values = Vec::new();
    for (index, name) in entity.column_names().into_iter().enumerate() {
        let value: AttributeValue = row.get(index)?;
        if name == IDENTITY_KEY && value.as_id().is_none() {
            return Err(RepoError::InvalidData(format!(
                "invalid identity `{value}` in {}.{IDENTITY_KEY}",
                entity.table()
            )));
        }
        values.push((name.to_string(), value));
    }
    Ok(Record::from_persisted(Arc::clone(entity), values))
}

/// Quotes an identifier that already passed entity validation.
fn quote(identifier: &str) -> String {
    debug_assert!(is_identifier(identifier));
    format!("\"{identifier}\"")
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_columns(conn: &Connection, table: &str) -> RepoResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", quote(table)))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(row.get(1)?);
    }
    Ok(columns)
}
