//! `FAILED_LOOKUPS`: files whose external metadata lookup failed

use crate::guard::LockRegistry;
use crate::media::now_millis;
use crate::migration::TableDescriptor;
use crate::storage::schema;
use crate::storage::Session;
use crate::upsert::{self, ColumnSpec, TableShape};
use crate::value::{Record, Value};
use crate::Result;

pub const TABLE: &str = "FAILED_LOOKUPS";

pub(crate) fn descriptor() -> TableDescriptor {
    TableDescriptor::new(TABLE, 1, |s| {
        schema::create_table(s, schema::CREATE_FAILED_LOOKUPS_TABLE, schema::FAILED_LOOKUPS_INDEXES)
    })
}

const SHAPE: TableShape = TableShape {
    table: TABLE,
    key: &[ColumnSpec::text("FILENAME", 1024)],
    columns: &[
        ColumnSpec::text("FAILUREDETAILS", 20_000),
        ColumnSpec::text("VERSION", 32),
        ColumnSpec::timestamp("LASTATTEMPT"),
    ],
};

/// Remember that looking up `filename` failed with lookup client `version`
pub fn set(session: &Session, locks: &LockRegistry, filename: &str, details: &str, version: Option<&str>) -> Result<()> {
    let record = Record::new()
        .with("FAILUREDETAILS", details)
        .with("VERSION", version.map(String::from))
        .with("LASTATTEMPT", Value::Timestamp(now_millis()));
    upsert::upsert(session, locks, &SHAPE, &Record::new().with("FILENAME", filename), &record)?;
    Ok(())
}

/// Whether a lookup for `filename` failed before. With `version`, only a
/// failure recorded by that same lookup client counts.
pub fn has_failed(session: &Session, locks: &LockRegistry, filename: &str, version: Option<&str>) -> Result<bool> {
    locks.with_read(TABLE, || {
        let found: Option<i64> = match version {
            Some(version) => session.query_scalar(
                "SELECT 1 FROM FAILED_LOOKUPS WHERE FILENAME = ?1 AND VERSION IS ?2",
                [filename, version],
            )?,
            None => session.query_scalar("SELECT 1 FROM FAILED_LOOKUPS WHERE FILENAME = ?1", [filename])?,
        };
        Ok(found.is_some())
    })
}

pub fn remove(session: &Session, locks: &LockRegistry, filename: &str) -> Result<bool> {
    locks.with_write(TABLE, || {
        Ok(session.execute("DELETE FROM FAILED_LOOKUPS WHERE FILENAME = ?1", [filename])? > 0)
    })
}
