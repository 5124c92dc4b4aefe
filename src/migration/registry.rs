//! Recorded schema version per table
//!
//! One bookkeeping table, `TABLES_VERSIONS(NAME, VERSION)`. Reads take its
//! read lock, writes its write lock.

use crate::guard::LockRegistry;
use crate::storage::Session;
use crate::upsert::{self, ColumnSpec, TableShape};
use crate::value::Record;
use crate::{Error, Result};
use tracing::{debug, info};

pub const VERSIONS_TABLE: &str = "TABLES_VERSIONS";

const CREATE_VERSIONS_TABLE: &str = r#"
CREATE TABLE TABLES_VERSIONS (
    NAME TEXT PRIMARY KEY,
    VERSION INTEGER NOT NULL
)
"#;

const VERSIONS_SHAPE: TableShape = TableShape {
    table: VERSIONS_TABLE,
    key: &[ColumnSpec::text("NAME", 50)],
    columns: &[ColumnSpec::integer("VERSION")],
};

pub struct VersionRegistry<'a> {
    session: &'a Session,
    locks: &'a LockRegistry,
}

impl<'a> VersionRegistry<'a> {
    pub fn new(session: &'a Session, locks: &'a LockRegistry) -> Self {
        Self { session, locks }
    }

    /// Create the bookkeeping table on first run
    pub fn ensure(&self) -> Result<()> {
        self.locks.with_write(VERSIONS_TABLE, || {
            if !self.session.table_exists(VERSIONS_TABLE)? {
                info!("Creating table {}", VERSIONS_TABLE);
                self.session.execute_ddl(CREATE_VERSIONS_TABLE)?;
            }
            Ok(())
        })
    }

    pub fn get_version(&self, table: &str) -> Result<Option<u32>> {
        self.locks.with_read(VERSIONS_TABLE, || {
            let version: Option<i64> = self.session.query_scalar(
                "SELECT VERSION FROM TABLES_VERSIONS WHERE NAME = ?1",
                [table],
            )?;
            version.map(|v| checked_version(table, v)).transpose()
        })
    }

    /// Record `version` for `table`; a no-op when it is already recorded
    pub fn set_version(&self, table: &str, version: u32) -> Result<()> {
        self.locks.with_write(VERSIONS_TABLE, || {
            if self.get_version(table)? == Some(version) {
                return Ok(());
            }
            debug!("Recording {} at version {}", table, version);
            upsert::upsert(
                self.session,
                self.locks,
                &VERSIONS_SHAPE,
                &Record::new().with("NAME", table),
                &Record::new().with("VERSION", version),
            )?;
            Ok(())
        })
    }

    pub fn remove(&self, table: &str) -> Result<()> {
        self.locks.with_write(VERSIONS_TABLE, || {
            self.session
                .execute("DELETE FROM TABLES_VERSIONS WHERE NAME = ?1", [table])?;
            Ok(())
        })
    }

    /// Every recorded `(table, version)` pair, ordered by name
    pub fn all(&self) -> Result<Vec<(String, u32)>> {
        self.locks.with_read(VERSIONS_TABLE, || {
            if !self.session.table_exists(VERSIONS_TABLE)? {
                return Ok(Vec::new());
            }
            let rows = self
                .session
                .query_rows("SELECT NAME, VERSION FROM TABLES_VERSIONS ORDER BY NAME", [])?;
            rows.into_iter()
                .filter_map(|r| Some((r.text("NAME")?.to_string(), r.i64("VERSION")?)))
                .map(|(name, v)| checked_version(&name, v).map(|v| (name, v)))
                .collect()
        })
    }
}

fn checked_version(table: &str, raw: i64) -> Result<u32> {
    u32::try_from(raw).map_err(|_| Error::InvalidRecord {
        table: VERSIONS_TABLE.to_string(),
        message: format!("version {} recorded for {} is out of range", raw, table),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_set_and_get_version() {
        let session = Session::new(Connection::open_in_memory().unwrap(), "registry");
        let locks = LockRegistry::new([VERSIONS_TABLE]);
        let registry = VersionRegistry::new(&session, &locks);

        registry.ensure().unwrap();
        registry.ensure().unwrap();
        assert_eq!(session.ddl_count(), 1);

        assert_eq!(registry.get_version("FILES").unwrap(), None);
        registry.set_version("FILES", 2).unwrap();
        registry.set_version("FILES", 3).unwrap();
        registry.set_version("THUMBNAILS", 1).unwrap();

        assert_eq!(registry.get_version("FILES").unwrap(), Some(3));
        assert_eq!(
            registry.all().unwrap(),
            vec![("FILES".to_string(), 3), ("THUMBNAILS".to_string(), 1)]
        );

        registry.remove("FILES").unwrap();
        assert_eq!(registry.get_version("FILES").unwrap(), None);
    }

    #[test]
    fn test_out_of_range_version_is_invalid() {
        let session = Session::new(Connection::open_in_memory().unwrap(), "registry");
        let locks = LockRegistry::new([VERSIONS_TABLE]);
        let registry = VersionRegistry::new(&session, &locks);
        registry.ensure().unwrap();
        session
            .execute("INSERT INTO TABLES_VERSIONS (NAME, VERSION) VALUES ('FILES', -1)", [])
            .unwrap();

        assert!(matches!(registry.get_version("FILES"), Err(Error::InvalidRecord { .. })));
        assert!(matches!(registry.all(), Err(Error::InvalidRecord { .. })));
    }
}
