//! Worker threads sharing one on-disk store

use mediacache::media::files::{self, MediaFile};
use mediacache::media::files_status;
use mediacache::{CacheConfig, MediaCache, StatusSink};
use std::sync::Barrier;
use std::thread;

const WORKERS: usize = 4;
const FILES_PER_WORKER: usize = 25;

#[test]
fn test_concurrent_upserts_keep_one_row_per_key() {
    let dir = tempfile::tempdir().unwrap();
    let cache = MediaCache::open(CacheConfig::on_disk(dir.path(), "medias"), StatusSink::disabled()).unwrap();
    let context = cache.context().clone();
    let barrier = Barrier::new(WORKERS);

    thread::scope(|scope| {
        for worker in 0..WORKERS {
            let context = context.clone();
            let barrier = &barrier;
            scope.spawn(move || {
                let session = context.open_session().unwrap();
                let locks = context.locks();
                barrier.wait();
                // Every worker writes the same keys, each with its own mtime
                for i in 0..FILES_PER_WORKER {
                    let name = format!("/media/{}.mkv", i);
                    files::upsert(&session, locks, &MediaFile::new(&name, worker as i64)).unwrap();
                    files_status::record_playback(&session, locks, &name, 0, i as f64).unwrap();
                }
            });
        }
    });

    let (session, locks) = (cache.session(), cache.locks());
    assert_eq!(files::count(session, locks).unwrap(), FILES_PER_WORKER);
    for i in 0..FILES_PER_WORKER {
        let status = files_status::get(session, locks, &format!("/media/{}.mkv", i), 0)
            .unwrap()
            .unwrap();
        assert_eq!(status.play_count, WORKERS as i64);
    }
}

#[test]
fn test_readers_see_whole_rows_during_writes() {
    let dir = tempfile::tempdir().unwrap();
    let cache = MediaCache::open(CacheConfig::on_disk(dir.path(), "medias"), StatusSink::disabled()).unwrap();
    let context = cache.context().clone();

    thread::scope(|scope| {
        let writer_context = context.clone();
        scope.spawn(move || {
            let session = writer_context.open_session().unwrap();
            for round in 0..50i64 {
                let file = MediaFile {
                    width: Some(round),
                    height: Some(round),
                    ..MediaFile::new("/media/a.mkv", round)
                };
                files::upsert(&session, writer_context.locks(), &file).unwrap();
            }
        });

        for _ in 0..2 {
            let reader_context = context.clone();
            scope.spawn(move || {
                let session = reader_context.open_session().unwrap();
                for _ in 0..50 {
                    if let Some(file) = files::get(&session, reader_context.locks(), "/media/a.mkv").unwrap() {
                        assert_eq!(file.width, file.height);
                        assert_eq!(file.width, Some(file.modified));
                    }
                }
            });
        }
    });
}
