//! Session over one SQLite connection
//!
//! A session is owned by one worker. It is `Send` but not `Sync`: share the
//! store across threads by opening one session per worker from the
//! [`SessionProvider`](super::SessionProvider).

use crate::value::{Record, Value};
use crate::Result;
use rusqlite::{Connection, OptionalExtension, Params};
use rusqlite::types::FromSql;
use std::cell::Cell;
use std::fmt;
use tracing::{trace, warn};

pub struct Session {
    conn: Connection,
    label: String,
    ddl_count: Cell<u64>,
    savepoint_depth: Cell<u32>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("label", &self.label)
            .field("ddl_count", &self.ddl_count.get())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(conn: Connection, label: impl Into<String>) -> Self {
        Self {
            conn,
            label: label.into(),
            ddl_count: Cell::new(0),
            savepoint_depth: Cell::new(0),
        }
    }

    /// Store this session was opened against (file path or memory name)
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ========== Statements ==========

    /// Execute one DML statement, returning the number of changed rows
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        trace!(sql, "execute");
        Ok(self.conn.execute(sql, params)?)
    }

    /// Execute schema-changing SQL. Counted, so callers can assert that an
    /// up-to-date store sees no DDL at all.
    pub fn execute_ddl(&self, sql: &str) -> Result<()> {
        trace!(sql, "ddl");
        self.conn.execute_batch(sql)?;
        self.ddl_count.set(self.ddl_count.get() + 1);
        Ok(())
    }

    /// Number of DDL batches issued through this session
    pub fn ddl_count(&self) -> u64 {
        self.ddl_count.get()
    }

    pub fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    // ========== Queries ==========

    /// Run a query and collect every row as a [`Record`]
    pub fn query_rows<P: Params>(&self, sql: &str, params: P) -> Result<Vec<Record>> {
        let mut rows = Vec::new();
        self.for_each_row(sql, params, |record| {
            rows.push(record);
            Ok(())
        })?;
        Ok(rows)
    }

    /// First row of a query, if any
    pub fn query_one<P: Params>(&self, sql: &str, params: P) -> Result<Option<Record>> {
        let mut stmt = self.conn.prepare(sql)?;
        let names = column_names(&stmt);
        let mut rows = stmt.query(params)?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_record(&names, row)?)),
            None => Ok(None),
        }
    }

    /// First column of the first row, if any
    pub fn query_scalar<T: FromSql, P: Params>(&self, sql: &str, params: P) -> Result<Option<T>> {
        self.conn
            .query_row(sql, params, |row| row.get::<_, T>(0))
            .optional()
            .map_err(Into::into)
    }

    /// Stream rows through `f` while the statement cursor is open.
    /// Returns the number of rows visited.
    pub fn for_each_row<P, F>(&self, sql: &str, params: P, mut f: F) -> Result<usize>
    where
        P: Params,
        F: FnMut(Record) -> Result<()>,
    {
        trace!(sql, "query");
        let mut stmt = self.conn.prepare(sql)?;
        let names = column_names(&stmt);
        let mut rows = stmt.query(params)?;
        let mut visited = 0;
        while let Some(row) = rows.next()? {
            f(row_to_record(&names, row)?)?;
            visited += 1;
        }
        Ok(visited)
    }

    // ========== Transactions ==========

    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    pub fn begin(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// Run `f` as one unit of work. Outside a transaction this opens an
    /// immediate transaction; inside one it nests through a savepoint. Any
    /// error rolls the unit back and is returned unchanged.
    pub fn atomic<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Session) -> Result<T>,
    {
        if self.in_transaction() {
            let depth = self.savepoint_depth.get();
            let name = format!("mediacache_sp{}", depth);
            self.conn.execute_batch(&format!("SAVEPOINT {}", name))?;
            self.savepoint_depth.set(depth + 1);
            let result = f(self);
            self.savepoint_depth.set(depth);
            match result {
                Ok(value) => {
                    self.conn.execute_batch(&format!("RELEASE {}", name))?;
                    Ok(value)
                }
                Err(e) => {
                    let undo = format!("ROLLBACK TO {name}; RELEASE {name}");
                    if let Err(rollback_err) = self.conn.execute_batch(&undo) {
                        warn!("Failed to roll back savepoint {}: {}", name, rollback_err);
                    }
                    Err(e)
                }
            }
        } else {
            self.begin()?;
            match f(self) {
                Ok(value) => match self.commit() {
                    Ok(()) => Ok(value),
                    Err(e) => {
                        self.rollback_quietly();
                        Err(e)
                    }
                },
                Err(e) => {
                    self.rollback_quietly();
                    Err(e)
                }
            }
        }
    }

    fn rollback_quietly(&self) {
        if self.in_transaction() {
            if let Err(e) = self.rollback() {
                warn!("Rollback failed on {}: {}", self.label, e);
            }
        }
    }

    // ========== Introspection ==========

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        self.schema_object_exists("table", table)
    }

    pub fn index_exists(&self, index: &str) -> Result<bool> {
        self.schema_object_exists("index", index)
    }

    pub fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        let found: Option<i64> = self.query_scalar(
            "SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2 COLLATE NOCASE",
            [table, column],
        )?;
        Ok(found.is_some())
    }

    fn schema_object_exists(&self, kind: &str, name: &str) -> Result<bool> {
        let found: Option<i64> = self.query_scalar(
            "SELECT 1 FROM sqlite_master WHERE type = ?1 AND name = ?2 COLLATE NOCASE",
            [kind, name],
        )?;
        Ok(found.is_some())
    }

    /// Names of every user table in the store
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    pub fn drop_table(&self, table: &str) -> Result<()> {
        self.execute_ddl(&format!("DROP TABLE IF EXISTS {}", table))
    }

    /// Last id handed out by an `AUTOINCREMENT` table. `DROP TABLE` forgets
    /// it, so callers recreating a table carry it across.
    pub fn autoincrement_seq(&self, table: &str) -> Result<Option<i64>> {
        if !self.table_exists("sqlite_sequence")? {
            return Ok(None);
        }
        self.query_scalar("SELECT seq FROM sqlite_sequence WHERE name = ?1", [table])
    }

    /// Make the next `AUTOINCREMENT` id of `table` follow `seq`
    pub fn restore_autoincrement_seq(&self, table: &str, seq: i64) -> Result<()> {
        if !self.table_exists("sqlite_sequence")? {
            return Ok(());
        }
        self.execute("DELETE FROM sqlite_sequence WHERE name = ?1", [table])?;
        self.execute(
            "INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2)",
            rusqlite::params![table, seq],
        )?;
        Ok(())
    }

    pub fn count_rows(&self, table: &str) -> Result<usize> {
        let count: Option<i64> = self.query_scalar(&format!("SELECT COUNT(*) FROM {}", table), [])?;
        Ok(count.unwrap_or(0) as usize)
    }

    /// Close the connection, surfacing any error SQLite reports
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e.into())
    }
}

fn column_names(stmt: &rusqlite::Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(String::from).collect()
}

fn row_to_record(names: &[String], row: &rusqlite::Row<'_>) -> Result<Record> {
    let mut record = Record::new();
    for (i, name) in names.iter().enumerate() {
        record.set(name, Value::from(row.get_ref(i)?));
    }
    Ok(record)
}
