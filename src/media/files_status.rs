//! `FILES_STATUS`: per-user playback state, keyed by file name and user
//!
//! This is user data rather than derived data, so a cache reset keeps it.

use crate::guard::LockRegistry;
use crate::media::now_millis;
use crate::migration::TableDescriptor;
use crate::storage::schema::{self, add_column_if_missing};
use crate::storage::Session;
use crate::upsert::{self, ColumnSpec, TableShape};
use crate::value::{Record, Value};
use crate::Result;
use serde::Serialize;

pub const TABLE: &str = "FILES_STATUS";
pub const TARGET_VERSION: u32 = 2;

pub(crate) fn descriptor() -> TableDescriptor {
    TableDescriptor::new(TABLE, TARGET_VERSION, |s| {
        schema::create_table(s, schema::CREATE_FILES_STATUS_TABLE, schema::FILES_STATUS_INDEXES)
    })
    .step(1, |s, _| {
        add_column_if_missing(s, TABLE, "USERID", "INTEGER NOT NULL DEFAULT 0")?;
        s.execute_ddl("DROP INDEX IF EXISTS FILES_STATUS_FILENAME_IDX")?;
        schema::create_indexes(s, schema::FILES_STATUS_INDEXES)
    })
    .preserve_on_reset()
}

const KEY: &[ColumnSpec] = &[ColumnSpec::text("FILENAME", 1024), ColumnSpec::integer("USERID")];

const FULLY_PLAYED_SHAPE: TableShape = TableShape {
    table: TABLE,
    key: KEY,
    columns: &[ColumnSpec::integer("ISFULLYPLAYED"), ColumnSpec::timestamp("MODIFIED")],
};

const BOOKMARK_SHAPE: TableShape = TableShape {
    table: TABLE,
    key: KEY,
    columns: &[ColumnSpec::integer("BOOKMARK"), ColumnSpec::timestamp("MODIFIED")],
};

const PLAYBACK_SHAPE: TableShape = TableShape {
    table: TABLE,
    key: KEY,
    columns: &[
        ColumnSpec::real("LASTPLAYBACKPOSITION"),
        ColumnSpec::timestamp("DATELASTPLAY"),
        ColumnSpec::timestamp("MODIFIED"),
    ],
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileStatus {
    pub filename: String,
    pub user_id: i64,
    pub fully_played: bool,
    pub bookmark: i64,
    pub play_count: i64,
    pub last_playback_position: f64,
    pub date_last_play: Option<i64>,
    pub modified: Option<i64>,
}

impl FileStatus {
    fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            filename: record.text("FILENAME")?.to_string(),
            user_id: record.i64("USERID").unwrap_or(0),
            fully_played: record.i64("ISFULLYPLAYED").unwrap_or(0) != 0,
            bookmark: record.i64("BOOKMARK").unwrap_or(0),
            play_count: record.i64("PLAYCOUNT").unwrap_or(0),
            last_playback_position: record.f64("LASTPLAYBACKPOSITION").unwrap_or(0.0),
            date_last_play: record.i64("DATELASTPLAY"),
            modified: record.i64("MODIFIED"),
        })
    }
}

fn key(filename: &str, user_id: i64) -> Record {
    Record::new().with("FILENAME", filename).with("USERID", user_id)
}

pub fn set_fully_played(
    session: &Session,
    locks: &LockRegistry,
    filename: &str,
    user_id: i64,
    fully_played: bool,
) -> Result<()> {
    let record = Record::new()
        .with("ISFULLYPLAYED", fully_played)
        .with("MODIFIED", Value::Timestamp(now_millis()));
    upsert::upsert(session, locks, &FULLY_PLAYED_SHAPE, &key(filename, user_id), &record)?;
    Ok(())
}

pub fn set_bookmark(session: &Session, locks: &LockRegistry, filename: &str, user_id: i64, bookmark: i64) -> Result<()> {
    let record = Record::new()
        .with("BOOKMARK", bookmark)
        .with("MODIFIED", Value::Timestamp(now_millis()));
    upsert::upsert(session, locks, &BOOKMARK_SHAPE, &key(filename, user_id), &record)?;
    Ok(())
}

/// Record a playback stop at `position` seconds and bump the play count
pub fn record_playback(session: &Session, locks: &LockRegistry, filename: &str, user_id: i64, position: f64) -> Result<()> {
    let now = now_millis();
    let record = Record::new()
        .with("LASTPLAYBACKPOSITION", position)
        .with("DATELASTPLAY", Value::Timestamp(now))
        .with("MODIFIED", Value::Timestamp(now));
    locks.with_write(TABLE, || {
        session.atomic(|s| {
            let row = upsert::upsert(s, locks, &PLAYBACK_SHAPE, &key(filename, user_id), &record)?;
            s.execute(
                "UPDATE FILES_STATUS SET PLAYCOUNT = PLAYCOUNT + 1 WHERE rowid = ?1",
                [row.row_id()],
            )?;
            Ok(())
        })
    })
}

pub fn get(session: &Session, locks: &LockRegistry, filename: &str, user_id: i64) -> Result<Option<FileStatus>> {
    locks.with_read(TABLE, || {
        let row = session.query_one(
            "SELECT * FROM FILES_STATUS WHERE FILENAME = ?1 AND USERID = ?2",
            rusqlite::params![filename, user_id],
        )?;
        Ok(row.as_ref().and_then(FileStatus::from_record))
    })
}

/// Delete the status rows of `filename` for every user
pub fn remove(session: &Session, locks: &LockRegistry, filename: &str) -> Result<usize> {
    locks.with_write(TABLE, || session.execute("DELETE FROM FILES_STATUS WHERE FILENAME = ?1", [filename]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::testing::open_cache;

    #[test]
    fn test_status_per_user() {
        let (session, locks) = open_cache("status_users");
        set_fully_played(&session, &locks, "/a.mkv", 1, true).unwrap();
        set_bookmark(&session, &locks, "/a.mkv", 2, 300).unwrap();

        let first = get(&session, &locks, "/a.mkv", 1).unwrap().unwrap();
        let second = get(&session, &locks, "/a.mkv", 2).unwrap().unwrap();
        assert!(first.fully_played);
        assert_eq!(first.bookmark, 0);
        assert!(!second.fully_played);
        assert_eq!(second.bookmark, 300);
    }

    #[test]
    fn test_partial_updates_keep_other_columns() {
        let (session, locks) = open_cache("status_partial");
        set_bookmark(&session, &locks, "/a.mkv", 0, 42).unwrap();
        set_fully_played(&session, &locks, "/a.mkv", 0, true).unwrap();
        set_fully_played(&session, &locks, "/a.mkv", 0, false).unwrap();

        let status = get(&session, &locks, "/a.mkv", 0).unwrap().unwrap();
        assert!(!status.fully_played);
        assert_eq!(status.bookmark, 42);
        assert_eq!(session.count_rows(TABLE).unwrap(), 1);
    }

    #[test]
    fn test_record_playback_counts_plays() {
        let (session, locks) = open_cache("status_playback");
        record_playback(&session, &locks, "/a.mkv", 0, 12.5).unwrap();
        record_playback(&session, &locks, "/a.mkv", 0, 99.0).unwrap();

        let status = get(&session, &locks, "/a.mkv", 0).unwrap().unwrap();
        assert_eq!(status.play_count, 2);
        assert_eq!(status.last_playback_position, 99.0);
        assert!(status.date_last_play.is_some());

        assert_eq!(remove(&session, &locks, "/a.mkv").unwrap(), 1);
    }
}
