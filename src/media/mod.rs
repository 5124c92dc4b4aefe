//! The media schema: table modules, their migration plan and sweep plan

pub mod audiotracks;
pub mod failed_lookups;
pub mod files;
pub mod files_status;
pub mod metadata;
pub mod tv_series;
pub mod video_metadata;

use crate::dedup;
use crate::guard::LockRegistry;
use crate::migration::{MigrationPlan, VERSIONS_TABLE};
use crate::sweep::{FileBackedTable, SweepPlan};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Every media table, parents first
pub fn migration_plan() -> MigrationPlan {
    MigrationPlan::new()
        .with(files::descriptor())
        .with(files_status::descriptor())
        .with(video_metadata::descriptor())
        .with(tv_series::descriptor())
        .with(dedup::descriptor())
        .with(audiotracks::descriptor())
        .with(metadata::posters_descriptor())
        .with(metadata::awards_descriptor())
        .with(metadata::ratings_descriptor())
        .with(failed_lookups::descriptor())
}

/// Names of every table a lock is needed for, the version registry included
pub fn table_names() -> Vec<String> {
    let mut names: Vec<String> = migration_plan().table_names().map(String::from).collect();
    names.push(VERSIONS_TABLE.to_string());
    names
}

pub fn lock_registry() -> LockRegistry {
    LockRegistry::new(table_names())
}

/// Which rows outlive their parents and how to recognise them
pub fn sweep_plan() -> SweepPlan {
    use metadata::{AWARDS_TABLE, POSTERS_TABLE, RATINGS_TABLE};

    SweepPlan::new()
        .file_backed(FileBackedTable::new(files::TABLE, "ID", "FILENAME", "MODIFIED"))
        .depends(audiotracks::TABLE, "FILEID", files::TABLE, "ID")
        .depends(POSTERS_TABLE, "FILEID", files::TABLE, "ID")
        .depends(video_metadata::TABLE, "FILEID", files::TABLE, "ID")
        .depends(tv_series::TABLE, "SIMPLIFIEDTITLE", video_metadata::TABLE, "MOVIEORSHOWNAMESIMPLE")
        .depends(AWARDS_TABLE, "FILEID", files::TABLE, "ID")
        .depends(AWARDS_TABLE, "TVSERIESID", tv_series::TABLE, "ID")
        .depends(RATINGS_TABLE, "FILEID", files::TABLE, "ID")
        .depends(RATINGS_TABLE, "TVSERIESID", tv_series::TABLE, "ID")
        .depends(files_status::TABLE, "FILENAME", files::TABLE, "FILENAME")
        .depends(failed_lookups::TABLE, "FILENAME", files::TABLE, "FILENAME")
        .depends(dedup::THUMBNAILS_TABLE, "ID", files::TABLE, "THUMBID")
        .depends(dedup::THUMBNAILS_TABLE, "ID", tv_series::TABLE, "THUMBID")
}
