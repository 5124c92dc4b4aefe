//! Externally fetched video metadata: posters, awards and ratings
//!
//! Posters belong to a file and cascade with it. Awards and ratings belong to
//! either a file or a series, so no single foreign key fits them and the sweep
//! removes rows whose owner is gone.

use crate::guard::LockRegistry;
use crate::migration::TableDescriptor;
use crate::storage::schema::{self, add_column_if_missing};
use crate::storage::Session;
use crate::upsert::{self, ColumnSpec, TableShape};
use crate::value::{Record, Value};
use crate::Result;

pub const POSTERS_TABLE: &str = "VIDEO_METADATA_POSTERS";
pub const AWARDS_TABLE: &str = "VIDEO_METADATA_AWARDS";
pub const RATINGS_TABLE: &str = "VIDEO_METADATA_RATINGS";

pub(crate) fn posters_descriptor() -> TableDescriptor {
    TableDescriptor::new(POSTERS_TABLE, 1, |s| {
        schema::create_table(s, schema::CREATE_POSTERS_TABLE, schema::POSTERS_INDEXES)
    })
}

pub(crate) fn awards_descriptor() -> TableDescriptor {
    TableDescriptor::new(AWARDS_TABLE, 3, |s| {
        schema::create_table(s, schema::CREATE_AWARDS_TABLE, schema::AWARDS_INDEXES)
    })
    .step(1, |s, _| add_column_if_missing(s, AWARDS_TABLE, "TVSERIESID", "INTEGER"))
    .step(2, |s, _| schema::create_indexes(s, schema::AWARDS_INDEXES))
}

pub(crate) fn ratings_descriptor() -> TableDescriptor {
    TableDescriptor::new(RATINGS_TABLE, 2, |s| {
        schema::create_table(s, schema::CREATE_RATINGS_TABLE, schema::RATINGS_INDEXES)
    })
    .step(1, |s, _| {
        add_column_if_missing(s, RATINGS_TABLE, "TVSERIESID", "INTEGER")?;
        schema::create_indexes(s, schema::RATINGS_INDEXES)
    })
}

const POSTER_SHAPE: TableShape = TableShape {
    table: POSTERS_TABLE,
    key: &[ColumnSpec::integer("FILEID")],
    columns: &[ColumnSpec::text("POSTER", 1024)],
};

const AWARD_SHAPE: TableShape = TableShape {
    table: AWARDS_TABLE,
    key: &[
        ColumnSpec::integer("FILEID"),
        ColumnSpec::integer("TVSERIESID"),
        ColumnSpec::text("AWARD", 1024),
    ],
    columns: &[],
};

const RATING_SHAPE: TableShape = TableShape {
    table: RATINGS_TABLE,
    key: &[
        ColumnSpec::integer("FILEID"),
        ColumnSpec::integer("TVSERIESID"),
        ColumnSpec::text("SOURCE", 255),
    ],
    columns: &[ColumnSpec::text("RATING", 32)],
};

/// Row a piece of metadata hangs off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataOwner {
    File(i64),
    TvSeries(i64),
}

impl MetadataOwner {
    fn key(&self) -> Record {
        let (file, series) = match *self {
            MetadataOwner::File(id) => (Value::Integer(id), Value::Null),
            MetadataOwner::TvSeries(id) => (Value::Null, Value::Integer(id)),
        };
        Record::new().with("FILEID", file).with("TVSERIESID", series)
    }

    fn predicate(&self) -> (&'static str, i64) {
        match *self {
            MetadataOwner::File(id) => ("FILEID = ?1", id),
            MetadataOwner::TvSeries(id) => ("TVSERIESID = ?1", id),
        }
    }
}

/// Attach an award; attaching the same award twice keeps one row
pub fn set_award(session: &Session, locks: &LockRegistry, owner: MetadataOwner, award: &str) -> Result<i64> {
    let key = owner.key().with("AWARD", award);
    Ok(upsert::upsert(session, locks, &AWARD_SHAPE, &key, &Record::new())?.row_id())
}

/// Set the rating a `source` gives the owner
pub fn set_rating(
    session: &Session,
    locks: &LockRegistry,
    owner: MetadataOwner,
    source: &str,
    rating: &str,
) -> Result<i64> {
    let key = owner.key().with("SOURCE", source);
    let record = Record::new().with("RATING", rating);
    Ok(upsert::upsert(session, locks, &RATING_SHAPE, &key, &record)?.row_id())
}

pub fn set_poster(session: &Session, locks: &LockRegistry, file_id: i64, poster: Option<&str>) -> Result<i64> {
    let key = Record::new().with("FILEID", file_id);
    let record = Record::new().with("POSTER", poster.map(String::from));
    Ok(upsert::upsert(session, locks, &POSTER_SHAPE, &key, &record)?.row_id())
}

pub fn awards_for(session: &Session, locks: &LockRegistry, owner: MetadataOwner) -> Result<Vec<String>> {
    let (predicate, id) = owner.predicate();
    locks.with_read(AWARDS_TABLE, || {
        let rows = session.query_rows(
            &format!("SELECT AWARD FROM VIDEO_METADATA_AWARDS WHERE {} ORDER BY ID", predicate),
            [id],
        )?;
        Ok(rows.iter().filter_map(|r| r.text("AWARD").map(String::from)).collect())
    })
}

pub fn awards_for_file(session: &Session, locks: &LockRegistry, file_id: i64) -> Result<Vec<String>> {
    awards_for(session, locks, MetadataOwner::File(file_id))
}

/// `(source, rating)` pairs for the owner
pub fn ratings_for(session: &Session, locks: &LockRegistry, owner: MetadataOwner) -> Result<Vec<(String, Option<String>)>> {
    let (predicate, id) = owner.predicate();
    locks.with_read(RATINGS_TABLE, || {
        let rows = session.query_rows(
            &format!("SELECT SOURCE, RATING FROM VIDEO_METADATA_RATINGS WHERE {} ORDER BY ID", predicate),
            [id],
        )?;
        Ok(rows
            .iter()
            .filter_map(|r| Some((r.text("SOURCE")?.to_string(), r.text("RATING").map(String::from))))
            .collect())
    })
}

pub fn ratings_for_file(session: &Session, locks: &LockRegistry, file_id: i64) -> Result<Vec<(String, Option<String>)>> {
    ratings_for(session, locks, MetadataOwner::File(file_id))
}

pub fn poster_for_file(session: &Session, locks: &LockRegistry, file_id: i64) -> Result<Option<String>> {
    locks.with_read(POSTERS_TABLE, || {
        let poster: Option<Option<String>> = session.query_scalar(
            "SELECT POSTER FROM VIDEO_METADATA_POSTERS WHERE FILEID = ?1",
            [file_id],
        )?;
        Ok(poster.flatten())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::files::{self, MediaFile};
    use crate::media::testing::open_cache;
    use crate::media::tv_series::{self, TvSeries};

    #[test]
    fn test_awards_are_deduplicated_per_owner() {
        let (session, locks) = open_cache("metadata_awards");
        let file = files::upsert(&session, &locks, &MediaFile::new("/a.mkv", 1)).unwrap();
        let series = tv_series::upsert(&session, &locks, &TvSeries::new("Show")).unwrap();

        set_award(&session, &locks, MetadataOwner::File(file), "Oscar").unwrap();
        set_award(&session, &locks, MetadataOwner::File(file), "Oscar").unwrap();
        set_award(&session, &locks, MetadataOwner::TvSeries(series), "Oscar").unwrap();

        assert_eq!(awards_for_file(&session, &locks, file).unwrap(), vec!["Oscar".to_string()]);
        assert_eq!(session.count_rows(AWARDS_TABLE).unwrap(), 2);
    }

    #[test]
    fn test_rating_is_updated_in_place() {
        let (session, locks) = open_cache("metadata_ratings");
        let file = files::upsert(&session, &locks, &MediaFile::new("/a.mkv", 1)).unwrap();

        let first = set_rating(&session, &locks, MetadataOwner::File(file), "imdb", "7.9").unwrap();
        let second = set_rating(&session, &locks, MetadataOwner::File(file), "imdb", "8.1").unwrap();

        assert_eq!(first, second);
        assert_eq!(
            ratings_for_file(&session, &locks, file).unwrap(),
            vec![("imdb".to_string(), Some("8.1".to_string()))]
        );
    }

    #[test]
    fn test_poster_cascades_with_file() {
        let (session, locks) = open_cache("metadata_posters");
        let file = files::upsert(&session, &locks, &MediaFile::new("/a.mkv", 1)).unwrap();
        set_poster(&session, &locks, file, Some("https://img.example/a.jpg")).unwrap();
        assert_eq!(
            poster_for_file(&session, &locks, file).unwrap().as_deref(),
            Some("https://img.example/a.jpg")
        );

        files::remove_media_entry(&session, &locks, "/a.mkv", false).unwrap();
        assert_eq!(poster_for_file(&session, &locks, file).unwrap(), None);
    }
}
