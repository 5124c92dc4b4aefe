//! Select-or-insert-then-update, one row per logical key
//!
//! A [`TableShape`] names the key columns and the value columns an upsert
//! writes. Every value column of the shape is written on each call: a column
//! missing from the record, or set to NULL, is cleared.

use crate::guard::LockRegistry;
use crate::storage::Session;
use crate::value::{ColumnKind, Record, Value};
use crate::{Error, Result};
use rusqlite::{ffi, ErrorCode};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnKind,
    /// Maximum length in characters for text columns
    pub max_len: Option<usize>,
}

impl ColumnSpec {
    pub const fn text(name: &'static str, max_len: usize) -> Self {
        Self { name, kind: ColumnKind::Text, max_len: Some(max_len) }
    }

    pub const fn integer(name: &'static str) -> Self {
        Self { name, kind: ColumnKind::Integer, max_len: None }
    }

    pub const fn real(name: &'static str) -> Self {
        Self { name, kind: ColumnKind::Real, max_len: None }
    }

    pub const fn timestamp(name: &'static str) -> Self {
        Self { name, kind: ColumnKind::Timestamp, max_len: None }
    }

    pub const fn blob(name: &'static str) -> Self {
        Self { name, kind: ColumnKind::Blob, max_len: None }
    }
}

/// Key and value columns written by one kind of upsert on one table
#[derive(Debug, Clone, Copy)]
pub struct TableShape {
    pub table: &'static str,
    pub key: &'static [ColumnSpec],
    pub columns: &'static [ColumnSpec],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(i64),
    Updated(i64),
}

impl UpsertOutcome {
    /// Row id of the row now holding the key
    pub fn row_id(&self) -> i64 {
        match self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Updated(id) => *id,
        }
    }
}

impl TableShape {
    fn invalid(&self, message: String) -> Error {
        Error::InvalidRecord {
            table: self.table.to_string(),
            message,
        }
    }

    /// Bound values for `specs`, taken from `record`. Text is cut to its
    /// column width unless it is part of the key: lookups compare keys against
    /// the full value, so a stored key must never differ from it.
    fn bind(&self, specs: &[ColumnSpec], record: &Record, is_key: bool) -> Result<Vec<Value>> {
        specs
            .iter()
            .map(|spec| {
                let value = record.value(spec.name);
                check_kind(self, spec, value)?;
                Ok(match (value, spec.max_len) {
                    (Value::Text(text), Some(max)) if !is_key => {
                        Value::Text(truncate(self.table, spec.name, text, max))
                    }
                    _ => value.clone(),
                })
            })
            .collect()
    }

    fn reject_unknown(&self, specs: &[ColumnSpec], record: &Record, what: &str) -> Result<()> {
        for column in record.columns() {
            if !specs.iter().any(|s| s.name == column) {
                return Err(self.invalid(format!("{} {} is not part of this shape", what, column)));
            }
        }
        Ok(())
    }
}

fn check_kind(shape: &TableShape, spec: &ColumnSpec, value: &Value) -> Result<()> {
    let ok = match (spec.kind, value) {
        (_, Value::Null) => true,
        (ColumnKind::Text, Value::Text(_)) => true,
        (ColumnKind::Integer, Value::Integer(_)) => true,
        (ColumnKind::Timestamp, Value::Timestamp(_) | Value::Integer(_)) => true,
        (ColumnKind::Real, Value::Real(_) | Value::Integer(_)) => true,
        (ColumnKind::Blob, Value::Blob(_)) => true,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(shape.invalid(format!(
            "column {} expects {}, got {:?}",
            spec.name,
            spec.kind.as_str(),
            value
        )))
    }
}

/// Cut `text` to `max` characters, logging when anything is dropped
pub fn truncate(table: &str, column: &str, text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => {
            debug!(
                "Truncating {}.{} from {} to {} characters",
                table,
                column,
                text.chars().count(),
                max
            );
            text[..cut].to_string()
        }
        None => text.to_string(),
    }
}

/// Make the row for `key` reflect `record`, inserting it if absent.
///
/// Runs under the table's write lock inside one unit of work, so concurrent
/// upserts of the same key never leave two rows behind.
pub fn upsert(
    session: &Session,
    locks: &LockRegistry,
    shape: &TableShape,
    key: &Record,
    record: &Record,
) -> Result<UpsertOutcome> {
    shape.reject_unknown(shape.key, key, "key column")?;
    shape.reject_unknown(shape.columns, record, "column")?;
    for spec in shape.key {
        if !key.contains(spec.name) {
            return Err(shape.invalid(format!("key column {} is missing", spec.name)));
        }
    }
    let key_values = shape.bind(shape.key, key, true)?;
    let values = shape.bind(shape.columns, record, false)?;

    locks.with_write(shape.table, || {
        session
            .atomic(|s| write_row(s, shape, &key_values, &values))
            .map_err(|e| map_constraint(shape.table, e))
    })
}

fn write_row(session: &Session, shape: &TableShape, key_values: &[Value], values: &[Value]) -> Result<UpsertOutcome> {
    let predicate = shape
        .key
        .iter()
        .enumerate()
        .map(|(i, spec)| format!("{} IS ?{}", spec.name, i + 1))
        .collect::<Vec<_>>()
        .join(" AND ");
    let select = format!("SELECT rowid FROM {} WHERE {} LIMIT 1", shape.table, predicate);
    let existing: Option<i64> = session.query_scalar(&select, rusqlite::params_from_iter(key_values.iter()))?;

    match existing {
        Some(row_id) => {
            if !shape.columns.is_empty() {
                let assignments = shape
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(i, spec)| format!("{} = ?{}", spec.name, i + 1))
                    .collect::<Vec<_>>()
                    .join(", ");
                let update = format!(
                    "UPDATE {} SET {} WHERE rowid = ?{}",
                    shape.table,
                    assignments,
                    shape.columns.len() + 1
                );
                let mut params: Vec<Value> = values.to_vec();
                params.push(Value::Integer(row_id));
                session.execute(&update, rusqlite::params_from_iter(params.iter()))?;
            }
            Ok(UpsertOutcome::Updated(row_id))
        }
        None => {
            let names = shape
                .key
                .iter()
                .chain(shape.columns.iter())
                .map(|spec| spec.name)
                .collect::<Vec<_>>();
            let placeholders = (1..=names.len())
                .map(|i| format!("?{}", i))
                .collect::<Vec<_>>()
                .join(", ");
            let insert = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                shape.table,
                names.join(", "),
                placeholders
            );
            let params = key_values.iter().chain(values.iter());
            session.execute(&insert, rusqlite::params_from_iter(params))?;
            Ok(UpsertOutcome::Inserted(session.last_insert_rowid()))
        }
    }
}

fn map_constraint(table: &str, err: Error) -> Error {
    match err {
        Error::Storage(rusqlite::Error::SqliteFailure(e, message))
            if e.code == ErrorCode::ConstraintViolation
                && matches!(
                    e.extended_code,
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                ) =>
        {
            Error::DuplicateKey {
                table: table.to_string(),
                message: message.unwrap_or_else(|| e.to_string()),
            }
        }
        other => other,
    }
}
