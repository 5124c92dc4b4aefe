//! Cleanup sweep against real files

use mediacache::dedup::{self, BlobOwner};
use mediacache::media::audiotracks::{self, AudioTrack};
use mediacache::media::files::{self, MediaFile};
use mediacache::media::metadata::{self, MetadataOwner, AWARDS_TABLE, RATINGS_TABLE};
use mediacache::media::{failed_lookups, files_status};
use mediacache::sweep::modified_millis;
use mediacache::{CacheConfig, MediaCache, StatusMessage, StatusSink};
use std::fs;
use std::path::{Path, PathBuf};

fn media_file(path: &Path) -> MediaFile {
    let metadata = fs::metadata(path).unwrap();
    MediaFile::new(path.to_str().unwrap(), modified_millis(&metadata).unwrap())
}

fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, b"video").unwrap();
    path
}

#[test]
fn test_sweep_removes_stale_files_and_their_dependents() {
    let store = tempfile::tempdir().unwrap();
    let library = tempfile::tempdir().unwrap();
    let elsewhere = tempfile::tempdir().unwrap();

    let kept = touch(library.path(), "kept.mkv");
    let deleted = touch(library.path(), "deleted.mkv");
    let changed = touch(library.path(), "changed.mkv");
    let outside = touch(elsewhere.path(), "outside.mkv");

    let mut config = CacheConfig::on_disk(store.path(), "medias");
    config.shared_roots = vec![library.path().to_path_buf()];
    let cache = MediaCache::open(config, StatusSink::disabled()).unwrap();
    let (session, locks) = (cache.session(), cache.locks());

    let kept_id = files::upsert(session, locks, &media_file(&kept)).unwrap();
    let deleted_id = files::upsert(session, locks, &media_file(&deleted)).unwrap();
    let mut stale = media_file(&changed);
    stale.modified -= 60_000;
    files::upsert(session, locks, &stale).unwrap();
    files::upsert(session, locks, &media_file(&outside)).unwrap();

    let deleted_name = deleted.to_str().unwrap();
    audiotracks::replace_for_file(session, locks, deleted_id, &[AudioTrack::new(1)]).unwrap();
    metadata::set_award(session, locks, MetadataOwner::File(deleted_id), "Oscar").unwrap();
    metadata::set_rating(session, locks, MetadataOwner::File(kept_id), "imdb", "7.0").unwrap();
    files_status::set_fully_played(session, locks, deleted_name, 0, true).unwrap();
    failed_lookups::set(session, locks, deleted_name, "not found", None).unwrap();
    let shared = dedup::store(session, locks, b"thumb", BlobOwner::File(deleted_name), false).unwrap();
    let own = dedup::store(session, locks, b"kept thumb", BlobOwner::File(kept.to_str().unwrap()), false).unwrap();

    fs::remove_file(&deleted).unwrap();

    let report = cache.sweep().unwrap();
    assert_eq!(report.deleted_from(files::TABLE), 3);
    assert_eq!(report.deleted_from(AWARDS_TABLE), 1);
    assert_eq!(report.deleted_from(RATINGS_TABLE), 0);
    assert_eq!(report.deleted_from(files_status::TABLE), 1);
    assert_eq!(report.deleted_from(failed_lookups::TABLE), 1);
    assert_eq!(report.deleted_from(dedup::THUMBNAILS_TABLE), 1);

    assert_eq!(files::count(session, locks).unwrap(), 1);
    assert!(audiotracks::for_file(session, locks, deleted_id).unwrap().is_empty());
    assert_eq!(metadata::ratings_for_file(session, locks, kept_id).unwrap().len(), 1);
    assert!(dedup::get(session, locks, shared).unwrap().is_none());
    assert!(dedup::get(session, locks, own).unwrap().is_some());

    let again = cache.sweep().unwrap();
    assert_eq!(again.total(), 0);
}

#[test]
fn test_sweep_reports_progress() {
    let store = tempfile::tempdir().unwrap();
    let library = tempfile::tempdir().unwrap();
    let (status, rx) = StatusSink::channel();
    let cache = MediaCache::open(CacheConfig::on_disk(store.path(), "medias"), status).unwrap();

    for i in 0..4 {
        let path = touch(library.path(), &format!("{}.mkv", i));
        files::upsert(cache.session(), cache.locks(), &media_file(&path)).unwrap();
    }
    cache.sweep().unwrap();
    drop(cache);

    let progress: Vec<String> = rx
        .iter()
        .filter(|m| matches!(m, StatusMessage::Progress { .. }))
        .map(|m| m.to_string())
        .collect();
    assert!(progress.contains(&"Cleaning up database 25% complete".to_string()));
    assert!(progress.contains(&"Cleaning up database 100% complete".to_string()));
}
