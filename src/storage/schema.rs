//! Database schema definitions
//!
//! Current DDL of every media table. Column names are upper case, matching
//! the stores written by earlier releases. The few historical definitions kept
//! here describe what the migration steps start from.

use crate::storage::Session;
use crate::Result;

/// Indexed files; `FILENAME` + `MODIFIED` identify a scan result
pub const CREATE_FILES_TABLE: &str = r#"
CREATE TABLE FILES (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    FILENAME TEXT NOT NULL,
    MODIFIED INTEGER NOT NULL,
    FORMAT_TYPE INTEGER,
    DURATION REAL,
    BITRATE INTEGER,
    WIDTH INTEGER,
    HEIGHT INTEGER,
    MEDIA_SIZE INTEGER,
    CODECV TEXT,
    FRAMERATE TEXT,
    CONTAINER TEXT,
    API_VERSION TEXT,
    THUMBID INTEGER
)
"#;

pub const FILES_INDEXES: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS FILES_FILENAME_IDX ON FILES(FILENAME)",
    "CREATE INDEX IF NOT EXISTS FILES_FILENAME_MODIFIED_IDX ON FILES(FILENAME, MODIFIED)",
    "CREATE INDEX IF NOT EXISTS FILES_THUMBID_IDX ON FILES(THUMBID)",
];

/// `FILES` as version 1 stores hold it, before API_VERSION and THUMBID
pub const CREATE_FILES_TABLE_V1: &str = r#"
CREATE TABLE FILES (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    FILENAME TEXT NOT NULL,
    MODIFIED INTEGER NOT NULL,
    FORMAT_TYPE INTEGER,
    DURATION REAL,
    BITRATE INTEGER,
    WIDTH INTEGER,
    HEIGHT INTEGER,
    MEDIA_SIZE INTEGER,
    CODECV TEXT,
    FRAMERATE TEXT,
    CONTAINER TEXT
);
CREATE UNIQUE INDEX FILES_FILENAME_IDX ON FILES(FILENAME);
"#;

/// Per-user playback state. Survives cache resets.
pub const CREATE_FILES_STATUS_TABLE: &str = r#"
CREATE TABLE FILES_STATUS (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    FILENAME TEXT NOT NULL,
    USERID INTEGER NOT NULL DEFAULT 0,
    MODIFIED INTEGER,
    ISFULLYPLAYED INTEGER NOT NULL DEFAULT 0,
    BOOKMARK INTEGER NOT NULL DEFAULT 0,
    PLAYCOUNT INTEGER NOT NULL DEFAULT 0,
    LASTPLAYBACKPOSITION REAL NOT NULL DEFAULT 0,
    DATELASTPLAY INTEGER
)
"#;

pub const FILES_STATUS_INDEXES: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS FILES_STATUS_FILENAME_USERID_IDX ON FILES_STATUS(FILENAME, USERID)",
];

/// `FILES_STATUS` as version 1 stores hold it, one row per file
pub const CREATE_FILES_STATUS_TABLE_V1: &str = r#"
CREATE TABLE FILES_STATUS (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    FILENAME TEXT NOT NULL,
    MODIFIED INTEGER,
    ISFULLYPLAYED INTEGER NOT NULL DEFAULT 0,
    BOOKMARK INTEGER NOT NULL DEFAULT 0,
    PLAYCOUNT INTEGER NOT NULL DEFAULT 0,
    LASTPLAYBACKPOSITION REAL NOT NULL DEFAULT 0,
    DATELASTPLAY INTEGER
);
CREATE UNIQUE INDEX FILES_STATUS_FILENAME_IDX ON FILES_STATUS(FILENAME);
"#;

pub const CREATE_TV_SERIES_TABLE: &str = r#"
CREATE TABLE TV_SERIES (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    SIMPLIFIEDTITLE TEXT NOT NULL,
    TITLE TEXT,
    IMDBID TEXT,
    STARTYEAR INTEGER,
    ENDYEAR INTEGER,
    TOTALSEASONS INTEGER,
    PLOT TEXT,
    MODIFIED INTEGER,
    THUMBID INTEGER
)
"#;

pub const TV_SERIES_INDEXES: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS TV_SERIES_SIMPLIFIEDTITLE_IDX ON TV_SERIES(SIMPLIFIEDTITLE)",
    "CREATE INDEX IF NOT EXISTS TV_SERIES_THUMBID_IDX ON TV_SERIES(THUMBID)",
];

/// Content-addressed thumbnail blobs
pub const CREATE_THUMBNAILS_TABLE: &str = r#"
CREATE TABLE THUMBNAILS (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    PAYLOAD BLOB NOT NULL,
    CONTENTHASH TEXT NOT NULL,
    CREATED INTEGER NOT NULL
)
"#;

pub const THUMBNAILS_INDEXES: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS THUMBNAILS_CONTENTHASH_IDX ON THUMBNAILS(CONTENTHASH)",
];

pub const CREATE_AUDIOTRACKS_TABLE: &str = r#"
CREATE TABLE AUDIOTRACKS (
    FILEID INTEGER NOT NULL REFERENCES FILES(ID) ON DELETE CASCADE,
    STREAMID INTEGER NOT NULL,
    LANG TEXT,
    TITLE TEXT,
    CHANNELS INTEGER,
    SAMPLEFREQ INTEGER,
    CODECA TEXT,
    BITRATE INTEGER,
    PRIMARY KEY (FILEID, STREAMID)
)
"#;

pub const CREATE_POSTERS_TABLE: &str = r#"
CREATE TABLE VIDEO_METADATA_POSTERS (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    FILEID INTEGER NOT NULL REFERENCES FILES(ID) ON DELETE CASCADE,
    POSTER TEXT
)
"#;

pub const POSTERS_INDEXES: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS VIDEO_METADATA_POSTERS_FILEID_IDX ON VIDEO_METADATA_POSTERS(FILEID)",
];

/// What a file turned out to be: a movie, or an episode of a series. Series
/// rows are kept only while some file names them here.
pub const CREATE_VIDEO_METADATA_TABLE: &str = r#"
CREATE TABLE VIDEO_METADATA (
    FILEID INTEGER PRIMARY KEY REFERENCES FILES(ID) ON DELETE CASCADE,
    IMDBID TEXT,
    MEDIA_YEAR TEXT,
    MOVIEORSHOWNAME TEXT,
    MOVIEORSHOWNAMESIMPLE TEXT,
    ISTVEPISODE INTEGER NOT NULL DEFAULT 0,
    TVSEASON TEXT,
    TVEPISODENUMBER TEXT,
    TVEPISODENAME TEXT,
    EXTRAINFORMATION TEXT
)
"#;

pub const VIDEO_METADATA_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS VIDEO_METADATA_MOVIEORSHOWNAMESIMPLE_IDX ON VIDEO_METADATA(MOVIEORSHOWNAMESIMPLE)",
];

/// Awards belong to a file or to a series, so they cannot cascade
pub const CREATE_AWARDS_TABLE: &str = r#"
CREATE TABLE VIDEO_METADATA_AWARDS (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    FILEID INTEGER,
    TVSERIESID INTEGER,
    AWARD TEXT NOT NULL
)
"#;

pub const AWARDS_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS VIDEO_METADATA_AWARDS_FILEID_IDX ON VIDEO_METADATA_AWARDS(FILEID)",
    "CREATE INDEX IF NOT EXISTS VIDEO_METADATA_AWARDS_TVSERIESID_IDX ON VIDEO_METADATA_AWARDS(TVSERIESID)",
];

pub const CREATE_RATINGS_TABLE: &str = r#"
CREATE TABLE VIDEO_METADATA_RATINGS (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    FILEID INTEGER,
    TVSERIESID INTEGER,
    SOURCE TEXT NOT NULL,
    RATING TEXT
)
"#;

pub const RATINGS_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS VIDEO_METADATA_RATINGS_FILEID_IDX ON VIDEO_METADATA_RATINGS(FILEID)",
    "CREATE INDEX IF NOT EXISTS VIDEO_METADATA_RATINGS_TVSERIESID_IDX ON VIDEO_METADATA_RATINGS(TVSERIESID)",
];

/// Files whose external metadata lookup failed, so it is not retried every scan
pub const CREATE_FAILED_LOOKUPS_TABLE: &str = r#"
CREATE TABLE FAILED_LOOKUPS (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    FILENAME TEXT NOT NULL,
    FAILUREDETAILS TEXT,
    VERSION TEXT,
    LASTATTEMPT INTEGER
)
"#;

pub const FAILED_LOOKUPS_INDEXES: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS FAILED_LOOKUPS_FILENAME_IDX ON FAILED_LOOKUPS(FILENAME)",
];

/// Run a table definition followed by its indexes
pub fn create_table(session: &Session, table: &str, indexes: &[&str]) -> Result<()> {
    session.execute_ddl(table)?;
    for index in indexes {
        session.execute_ddl(index)?;
    }
    Ok(())
}

/// Add `column` to `table` unless an earlier, partial run already did
pub fn add_column_if_missing(session: &Session, table: &str, column: &str, definition: &str) -> Result<()> {
    if !session.column_exists(table, column)? {
        session.execute_ddl(&format!("ALTER TABLE {} ADD {} {}", table, column, definition))?;
    }
    Ok(())
}

/// Create each index unless it already exists
pub fn create_indexes(session: &Session, indexes: &[&str]) -> Result<()> {
    for index in indexes {
        session.execute_ddl(index)?;
    }
    Ok(())
}
