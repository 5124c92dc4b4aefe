//! `AUDIOTRACKS`: audio streams of a file, cascading with it

use crate::guard::LockRegistry;
use crate::migration::TableDescriptor;
use crate::storage::schema::{self, add_column_if_missing};
use crate::storage::Session;
use crate::upsert::{self, ColumnSpec, TableShape};
use crate::value::{Record, Value};
use crate::Result;
use serde::Serialize;

pub const TABLE: &str = "AUDIOTRACKS";
pub const TARGET_VERSION: u32 = 2;

pub(crate) fn descriptor() -> TableDescriptor {
    TableDescriptor::new(TABLE, TARGET_VERSION, |s| {
        schema::create_table(s, schema::CREATE_AUDIOTRACKS_TABLE, &[])
    })
    .step(1, |s, _| add_column_if_missing(s, TABLE, "TITLE", "TEXT"))
}

const SHAPE: TableShape = TableShape {
    table: TABLE,
    key: &[ColumnSpec::integer("FILEID"), ColumnSpec::integer("STREAMID")],
    columns: &[
        ColumnSpec::text("LANG", 3),
        ColumnSpec::text("TITLE", 255),
        ColumnSpec::integer("CHANNELS"),
        ColumnSpec::integer("SAMPLEFREQ"),
        ColumnSpec::text("CODECA", 32),
        ColumnSpec::integer("BITRATE"),
    ],
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AudioTrack {
    pub stream_id: i64,
    /// ISO 639-2 code
    pub lang: Option<String>,
    pub title: Option<String>,
    pub channels: Option<i64>,
    pub sample_freq: Option<i64>,
    pub codec: Option<String>,
    pub bitrate: Option<i64>,
}

impl AudioTrack {
    pub fn new(stream_id: i64) -> Self {
        Self {
            stream_id,
            ..Self::default()
        }
    }

    fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            stream_id: record.i64("STREAMID")?,
            lang: record.text("LANG").map(String::from),
            title: record.text("TITLE").map(String::from),
            channels: record.i64("CHANNELS"),
            sample_freq: record.i64("SAMPLEFREQ"),
            codec: record.text("CODECA").map(String::from),
            bitrate: record.i64("BITRATE"),
        })
    }
}

/// Make the stored tracks of `file_id` exactly `tracks`
pub fn replace_for_file(session: &Session, locks: &LockRegistry, file_id: i64, tracks: &[AudioTrack]) -> Result<()> {
    locks.with_write(TABLE, || {
        session.atomic(|s| {
            for track in tracks {
                let key = Record::new()
                    .with("FILEID", file_id)
                    .with("STREAMID", track.stream_id);
                let record = Record::new()
                    .with("LANG", track.lang.clone())
                    .with("TITLE", track.title.clone())
                    .with("CHANNELS", track.channels)
                    .with("SAMPLEFREQ", track.sample_freq)
                    .with("CODECA", track.codec.clone())
                    .with("BITRATE", track.bitrate);
                upsert::upsert(s, locks, &SHAPE, &key, &record)?;
            }

            let mut params = vec![Value::Integer(file_id)];
            params.extend(tracks.iter().map(|t| Value::Integer(t.stream_id)));
            let sql = if tracks.is_empty() {
                "DELETE FROM AUDIOTRACKS WHERE FILEID = ?1".to_string()
            } else {
                let placeholders = (2..=params.len())
                    .map(|i| format!("?{}", i))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "DELETE FROM AUDIOTRACKS WHERE FILEID = ?1 AND STREAMID NOT IN ({})",
                    placeholders
                )
            };
            s.execute(&sql, rusqlite::params_from_iter(params.iter()))?;
            Ok(())
        })
    })
}

pub fn for_file(session: &Session, locks: &LockRegistry, file_id: i64) -> Result<Vec<AudioTrack>> {
    locks.with_read(TABLE, || {
        let rows = session.query_rows(
            "SELECT * FROM AUDIOTRACKS WHERE FILEID = ?1 ORDER BY STREAMID",
            [file_id],
        )?;
        Ok(rows.iter().filter_map(AudioTrack::from_record).collect())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::files::{self, MediaFile};
    use crate::media::testing::open_cache;

    fn track(stream_id: i64, lang: &str) -> AudioTrack {
        AudioTrack {
            lang: Some(lang.to_string()),
            channels: Some(6),
            ..AudioTrack::new(stream_id)
        }
    }

    #[test]
    fn test_replace_drops_missing_streams() {
        let (session, locks) = open_cache("audio_replace");
        let file = files::upsert(&session, &locks, &MediaFile::new("/a.mkv", 1)).unwrap();

        replace_for_file(&session, &locks, file, &[track(1, "eng"), track(2, "fre")]).unwrap();
        replace_for_file(&session, &locks, file, &[track(2, "ger")]).unwrap();

        let tracks = for_file(&session, &locks, file).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].stream_id, 2);
        assert_eq!(tracks[0].lang.as_deref(), Some("ger"));

        replace_for_file(&session, &locks, file, &[]).unwrap();
        assert!(for_file(&session, &locks, file).unwrap().is_empty());
    }

    #[test]
    fn test_language_code_is_truncated() {
        let (session, locks) = open_cache("audio_truncate");
        let file = files::upsert(&session, &locks, &MediaFile::new("/a.mkv", 1)).unwrap();
        replace_for_file(&session, &locks, file, &[track(1, "english")]).unwrap();

        let tracks = for_file(&session, &locks, file).unwrap();
        assert_eq!(tracks[0].lang.as_deref(), Some("eng"));
    }

    #[test]
    fn test_unknown_file_is_rejected() {
        let (session, locks) = open_cache("audio_fk");
        assert!(replace_for_file(&session, &locks, 4242, &[track(1, "eng")]).is_err());
    }
}
