//! `FILES`: one row per indexed media file
//!
//! A row is a scan result for `FILENAME` as it was at `MODIFIED`. Audio tracks,
//! posters and video metadata cascade from it; awards, ratings, playback status and failed
//! lookups are cleaned up by the sweep.

use crate::guard::LockRegistry;
use crate::media::metadata::POSTERS_TABLE;
use crate::media::{audiotracks, files_status, video_metadata};
use crate::migration::TableDescriptor;
use crate::storage::schema::{self, add_column_if_missing, create_indexes};
use crate::storage::Session;
use crate::upsert::{self, ColumnSpec, TableShape};
use crate::value::{Record, Value};
use crate::Result;
use serde::Serialize;
use tracing::debug;

pub const TABLE: &str = "FILES";
pub const TARGET_VERSION: u32 = 3;

pub(crate) fn descriptor() -> TableDescriptor {
    TableDescriptor::new(TABLE, TARGET_VERSION, |s| {
        schema::create_table(s, schema::CREATE_FILES_TABLE, schema::FILES_INDEXES)
    })
    // Stores from before version tracking hold the version 1 layout
    .legacy_baseline(1)
    .step(1, |s, _| {
        add_column_if_missing(s, TABLE, "API_VERSION", "TEXT")?;
        create_indexes(s, &schema::FILES_INDEXES[1..2])
    })
    .step(2, |s, _| {
        add_column_if_missing(s, TABLE, "THUMBID", "INTEGER")?;
        create_indexes(s, &schema::FILES_INDEXES[2..3])
    })
}

const SHAPE: TableShape = TableShape {
    table: TABLE,
    key: &[ColumnSpec::text("FILENAME", 1024)],
    columns: &[
        ColumnSpec::timestamp("MODIFIED"),
        ColumnSpec::integer("FORMAT_TYPE"),
        ColumnSpec::real("DURATION"),
        ColumnSpec::integer("BITRATE"),
        ColumnSpec::integer("WIDTH"),
        ColumnSpec::integer("HEIGHT"),
        ColumnSpec::integer("MEDIA_SIZE"),
        ColumnSpec::text("CODECV", 32),
        ColumnSpec::text("FRAMERATE", 32),
        ColumnSpec::text("CONTAINER", 32),
        ColumnSpec::text("API_VERSION", 32),
    ],
};

/// Scan result for one file
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaFile {
    pub filename: String,
    /// File mtime in milliseconds since the Unix epoch
    pub modified: i64,
    pub format_type: Option<i64>,
    pub duration: Option<f64>,
    pub bitrate: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub size: Option<i64>,
    pub codec_video: Option<String>,
    pub frame_rate: Option<String>,
    pub container: Option<String>,
    pub api_version: Option<String>,
    /// Set through the thumbnail store, never by `upsert`
    pub thumbnail_id: Option<i64>,
}

impl MediaFile {
    pub fn new(filename: &str, modified: i64) -> Self {
        Self {
            filename: filename.to_string(),
            modified,
            ..Self::default()
        }
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("MODIFIED", Value::Timestamp(self.modified))
            .with("FORMAT_TYPE", self.format_type)
            .with("DURATION", self.duration)
            .with("BITRATE", self.bitrate)
            .with("WIDTH", self.width)
            .with("HEIGHT", self.height)
            .with("MEDIA_SIZE", self.size)
            .with("CODECV", self.codec_video.clone())
            .with("FRAMERATE", self.frame_rate.clone())
            .with("CONTAINER", self.container.clone())
            .with("API_VERSION", self.api_version.clone())
    }

    fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            filename: record.text("FILENAME")?.to_string(),
            modified: record.i64("MODIFIED")?,
            format_type: record.i64("FORMAT_TYPE"),
            duration: record.f64("DURATION"),
            bitrate: record.i64("BITRATE"),
            width: record.i64("WIDTH"),
            height: record.i64("HEIGHT"),
            size: record.i64("MEDIA_SIZE"),
            codec_video: record.text("CODECV").map(String::from),
            frame_rate: record.text("FRAMERATE").map(String::from),
            container: record.text("CONTAINER").map(String::from),
            api_version: record.text("API_VERSION").map(String::from),
            thumbnail_id: record.i64("THUMBID"),
        })
    }
}

/// Insert or refresh the row for `file.filename`, returning its id
pub fn upsert(session: &Session, locks: &LockRegistry, file: &MediaFile) -> Result<i64> {
    let key = Record::new().with("FILENAME", file.filename.as_str());
    let outcome = upsert::upsert(session, locks, &SHAPE, &key, &file.to_record())?;
    Ok(outcome.row_id())
}

/// Whether a scan result for this exact file version is cached
pub fn is_data_exists(session: &Session, locks: &LockRegistry, filename: &str, modified: i64) -> Result<bool> {
    Ok(file_id(session, locks, filename, Some(modified))?.is_some())
}

/// Row id for `filename`, optionally only if its mtime matches
pub fn file_id(session: &Session, locks: &LockRegistry, filename: &str, modified: Option<i64>) -> Result<Option<i64>> {
    locks.with_read(TABLE, || match modified {
        Some(modified) => session.query_scalar(
            "SELECT ID FROM FILES WHERE FILENAME = ?1 AND MODIFIED = ?2 LIMIT 1",
            rusqlite::params![filename, modified],
        ),
        None => session.query_scalar("SELECT ID FROM FILES WHERE FILENAME = ?1 LIMIT 1", [filename]),
    })
}

pub fn get(session: &Session, locks: &LockRegistry, filename: &str) -> Result<Option<MediaFile>> {
    locks.with_read(TABLE, || {
        let row = session.query_one("SELECT * FROM FILES WHERE FILENAME = ?1", [filename])?;
        Ok(row.as_ref().and_then(MediaFile::from_record))
    })
}

/// Point the file at a thumbnail blob. False when the file is not cached.
pub fn set_thumbnail_id(session: &Session, locks: &LockRegistry, filename: &str, thumbnail_id: i64) -> Result<bool> {
    locks.with_write(TABLE, || {
        let changed = session.execute(
            "UPDATE FILES SET THUMBID = ?1 WHERE FILENAME = ?2",
            rusqlite::params![thumbnail_id, filename],
        )?;
        Ok(changed > 0)
    })
}

/// Delete the cached entry for one file. Audio tracks, posters and video
/// metadata go with it; playback status only when `remove_status` is set.
pub fn remove_media_entry(session: &Session, locks: &LockRegistry, filename: &str, remove_status: bool) -> Result<usize> {
    let mut tables = vec![TABLE, audiotracks::TABLE, POSTERS_TABLE, video_metadata::TABLE];
    if remove_status {
        tables.push(files_status::TABLE);
    }
    locks.with_write_all(&tables, || {
        session.atomic(|s| {
            let removed = s.execute("DELETE FROM FILES WHERE FILENAME = ?1", [filename])?;
            if remove_status {
                s.execute("DELETE FROM FILES_STATUS WHERE FILENAME = ?1", [filename])?;
            }
            debug!("Removed {} cached entries for {}", removed, filename);
            Ok(removed)
        })
    })
}

/// Delete the cached entries of every file under `folder`
pub fn remove_entries_in_folder(session: &Session, locks: &LockRegistry, folder: &str) -> Result<usize> {
    let pattern = format!("{}%", like_escape(folder));
    locks.with_write_all(&[TABLE, audiotracks::TABLE, POSTERS_TABLE, video_metadata::TABLE], || {
        let removed = session.execute(
            "DELETE FROM FILES WHERE FILENAME LIKE ?1 ESCAPE '\\'",
            [pattern.as_str()],
        )?;
        debug!("Removed {} cached entries under {}", removed, folder);
        Ok(removed)
    })
}

pub fn count(session: &Session, locks: &LockRegistry) -> Result<usize> {
    locks.with_read(TABLE, || session.count_rows(TABLE))
}

/// Escape LIKE wildcards so `text` matches literally (escape char `\`)
pub fn like_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
