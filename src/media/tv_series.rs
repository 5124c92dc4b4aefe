//! `TV_SERIES`: series-level metadata shared by every episode file

use crate::guard::LockRegistry;
use crate::migration::TableDescriptor;
use crate::storage::schema::{self, add_column_if_missing};
use crate::storage::Session;
use crate::upsert::{self, ColumnSpec, TableShape};
use crate::value::{Record, Value};
use crate::Result;
use serde::Serialize;

pub const TABLE: &str = "TV_SERIES";
pub const TARGET_VERSION: u32 = 2;

pub(crate) fn descriptor() -> TableDescriptor {
    TableDescriptor::new(TABLE, TARGET_VERSION, |s| {
        schema::create_table(s, schema::CREATE_TV_SERIES_TABLE, schema::TV_SERIES_INDEXES)
    })
    .step(1, |s, _| {
        add_column_if_missing(s, TABLE, "THUMBID", "INTEGER")?;
        schema::create_indexes(s, &schema::TV_SERIES_INDEXES[1..])
    })
}

const SHAPE: TableShape = TableShape {
    table: TABLE,
    key: &[ColumnSpec::text("SIMPLIFIEDTITLE", 255)],
    columns: &[
        ColumnSpec::text("TITLE", 255),
        ColumnSpec::text("IMDBID", 16),
        ColumnSpec::integer("STARTYEAR"),
        ColumnSpec::integer("ENDYEAR"),
        ColumnSpec::integer("TOTALSEASONS"),
        ColumnSpec::text("PLOT", 20_000),
        ColumnSpec::timestamp("MODIFIED"),
    ],
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TvSeries {
    pub title: String,
    pub imdb_id: Option<String>,
    pub start_year: Option<i64>,
    pub end_year: Option<i64>,
    pub total_seasons: Option<i64>,
    pub plot: Option<String>,
    pub modified: Option<i64>,
    pub thumbnail_id: Option<i64>,
}

impl TvSeries {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }

    fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            title: record.text("TITLE")?.to_string(),
            imdb_id: record.text("IMDBID").map(String::from),
            start_year: record.i64("STARTYEAR"),
            end_year: record.i64("ENDYEAR"),
            total_seasons: record.i64("TOTALSEASONS"),
            plot: record.text("PLOT").map(String::from),
            modified: record.i64("MODIFIED"),
            thumbnail_id: record.i64("THUMBID"),
        })
    }
}

/// Lookup form of a series title: lower case, alphanumeric words separated
/// by single spaces
pub fn simplify_title(title: &str) -> String {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Insert or refresh a series, returning its id
pub fn upsert(session: &Session, locks: &LockRegistry, series: &TvSeries) -> Result<i64> {
    let key = Record::new().with("SIMPLIFIEDTITLE", simplify_title(&series.title));
    let record = Record::new()
        .with("TITLE", series.title.as_str())
        .with("IMDBID", series.imdb_id.clone())
        .with("STARTYEAR", series.start_year)
        .with("ENDYEAR", series.end_year)
        .with("TOTALSEASONS", series.total_seasons)
        .with("PLOT", series.plot.clone())
        .with("MODIFIED", series.modified.map(Value::Timestamp));
    Ok(upsert::upsert(session, locks, &SHAPE, &key, &record)?.row_id())
}

pub fn id_for_title(session: &Session, locks: &LockRegistry, title: &str) -> Result<Option<i64>> {
    let simplified = simplify_title(title);
    locks.with_read(TABLE, || {
        session.query_scalar(
            "SELECT ID FROM TV_SERIES WHERE SIMPLIFIEDTITLE = ?1",
            [simplified.as_str()],
        )
    })
}

pub fn get(session: &Session, locks: &LockRegistry, id: i64) -> Result<Option<TvSeries>> {
    locks.with_read(TABLE, || {
        let row = session.query_one("SELECT * FROM TV_SERIES WHERE ID = ?1", [id])?;
        Ok(row.as_ref().and_then(TvSeries::from_record))
    })
}

/// Point the series at a thumbnail blob. False when the series is unknown.
pub fn set_thumbnail_id(session: &Session, locks: &LockRegistry, id: i64, thumbnail_id: i64) -> Result<bool> {
    locks.with_write(TABLE, || {
        let changed = session.execute(
            "UPDATE TV_SERIES SET THUMBID = ?1 WHERE ID = ?2",
            [thumbnail_id, id],
        )?;
        Ok(changed > 0)
    })
}
