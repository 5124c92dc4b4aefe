//! `VIDEO_METADATA`: what a scanned file is, one row per file
//!
//! Episodes name their series by simplified title. That name is the only link
//! keeping a `TV_SERIES` row alive during a sweep.

use crate::guard::LockRegistry;
use crate::media::tv_series::simplify_title;
use crate::migration::TableDescriptor;
use crate::storage::schema;
use crate::storage::Session;
use crate::upsert::{self, ColumnSpec, TableShape};
use crate::value::Record;
use crate::Result;
use serde::Serialize;

pub const TABLE: &str = "VIDEO_METADATA";
pub const TARGET_VERSION: u32 = 1;

pub(crate) fn descriptor() -> TableDescriptor {
    TableDescriptor::new(TABLE, TARGET_VERSION, |s| {
        schema::create_table(s, schema::CREATE_VIDEO_METADATA_TABLE, schema::VIDEO_METADATA_INDEXES)
    })
}

const SHAPE: TableShape = TableShape {
    table: TABLE,
    key: &[ColumnSpec::integer("FILEID")],
    columns: &[
        ColumnSpec::text("IMDBID", 16),
        ColumnSpec::text("MEDIA_YEAR", 4),
        ColumnSpec::text("MOVIEORSHOWNAME", 255),
        ColumnSpec::text("MOVIEORSHOWNAMESIMPLE", 255),
        ColumnSpec::integer("ISTVEPISODE"),
        ColumnSpec::text("TVSEASON", 4),
        ColumnSpec::text("TVEPISODENUMBER", 8),
        ColumnSpec::text("TVEPISODENAME", 255),
        ColumnSpec::text("EXTRAINFORMATION", 255),
    ],
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VideoMetadata {
    /// Movie title, or the series title for an episode
    pub title: Option<String>,
    pub imdb_id: Option<String>,
    pub year: Option<String>,
    pub is_tv_episode: bool,
    pub tv_season: Option<String>,
    pub tv_episode_number: Option<String>,
    pub tv_episode_name: Option<String>,
    pub extra_information: Option<String>,
}

impl VideoMetadata {
    pub fn movie(title: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            ..Self::default()
        }
    }

    pub fn episode(series_title: &str, season: &str, episode: &str) -> Self {
        Self {
            title: Some(series_title.to_string()),
            is_tv_episode: true,
            tv_season: Some(season.to_string()),
            tv_episode_number: Some(episode.to_string()),
            ..Self::default()
        }
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("IMDBID", self.imdb_id.clone())
            .with("MEDIA_YEAR", self.year.clone())
            .with("MOVIEORSHOWNAME", self.title.clone())
            .with("MOVIEORSHOWNAMESIMPLE", self.title.as_deref().map(simplify_title))
            .with("ISTVEPISODE", self.is_tv_episode)
            .with("TVSEASON", self.tv_season.clone())
            .with("TVEPISODENUMBER", self.tv_episode_number.clone())
            .with("TVEPISODENAME", self.tv_episode_name.clone())
            .with("EXTRAINFORMATION", self.extra_information.clone())
    }

    fn from_record(record: &Record) -> Self {
        Self {
            title: record.text("MOVIEORSHOWNAME").map(String::from),
            imdb_id: record.text("IMDBID").map(String::from),
            year: record.text("MEDIA_YEAR").map(String::from),
            is_tv_episode: record.i64("ISTVEPISODE").unwrap_or(0) != 0,
            tv_season: record.text("TVSEASON").map(String::from),
            tv_episode_number: record.text("TVEPISODENUMBER").map(String::from),
            tv_episode_name: record.text("TVEPISODENAME").map(String::from),
            extra_information: record.text("EXTRAINFORMATION").map(String::from),
        }
    }
}

/// Insert or replace the metadata of one file
pub fn set(session: &Session, locks: &LockRegistry, file_id: i64, metadata: &VideoMetadata) -> Result<()> {
    let key = Record::new().with("FILEID", file_id);
    upsert::upsert(session, locks, &SHAPE, &key, &metadata.to_record())?;
    Ok(())
}

pub fn for_file(session: &Session, locks: &LockRegistry, file_id: i64) -> Result<Option<VideoMetadata>> {
    locks.with_read(TABLE, || {
        let row = session.query_one("SELECT * FROM VIDEO_METADATA WHERE FILEID = ?1", [file_id])?;
        Ok(row.as_ref().map(VideoMetadata::from_record))
    })
}

/// Number of cached episodes of the series called `title`
pub fn episode_count(session: &Session, locks: &LockRegistry, title: &str) -> Result<usize> {
    let simplified = simplify_title(title);
    locks.with_read(TABLE, || {
        let count: Option<i64> = session.query_scalar(
            "SELECT COUNT(*) FROM VIDEO_METADATA WHERE MOVIEORSHOWNAMESIMPLE = ?1 AND ISTVEPISODE = 1",
            [simplified.as_str()],
        )?;
        Ok(count.unwrap_or(0) as usize)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::files::{self, MediaFile};
    use crate::media::testing::open_cache;

    #[test]
    fn test_episode_links_series_by_simplified_title() {
        let (session, locks) = open_cache("video_metadata_episode");
        let first = files::upsert(&session, &locks, &MediaFile::new("/tv/s01e01.mkv", 1)).unwrap();
        let second = files::upsert(&session, &locks, &MediaFile::new("/tv/s01e02.mkv", 1)).unwrap();

        set(&session, &locks, first, &VideoMetadata::episode("Mr. Robot", "1", "1")).unwrap();
        set(&session, &locks, second, &VideoMetadata::episode("mr robot", "1", "2")).unwrap();

        assert_eq!(episode_count(&session, &locks, "MR ROBOT").unwrap(), 2);
        let stored = for_file(&session, &locks, first).unwrap().unwrap();
        assert!(stored.is_tv_episode);
        assert_eq!(stored.title.as_deref(), Some("Mr. Robot"));
    }

    #[test]
    fn test_metadata_cascades_with_file() {
        let (session, locks) = open_cache("video_metadata_cascade");
        let file = files::upsert(&session, &locks, &MediaFile::new("/movies/a.mkv", 1)).unwrap();
        set(&session, &locks, file, &VideoMetadata::movie("Heat")).unwrap();
        set(&session, &locks, file, &VideoMetadata::movie("Heat (1995)")).unwrap();
        assert_eq!(session.count_rows(TABLE).unwrap(), 1);

        files::remove_media_entry(&session, &locks, "/movies/a.mkv", false).unwrap();
        assert!(for_file(&session, &locks, file).unwrap().is_none());
    }
}
