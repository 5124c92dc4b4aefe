//! Content-addressed blob store for thumbnails
//!
//! Blobs are keyed by the BLAKE3 hash of their payload. Owners (files and
//! series) keep only the blob id in their `THUMBID` column, so identical
//! thumbnails are stored once.

use crate::guard::LockRegistry;
use crate::media::{files, now_millis, tv_series};
use crate::migration::TableDescriptor;
use crate::storage::schema;
use crate::storage::Session;
use crate::Result;
use serde::Serialize;
use tracing::{debug, warn};

pub const THUMBNAILS_TABLE: &str = "THUMBNAILS";

pub(crate) fn descriptor() -> TableDescriptor {
    TableDescriptor::new(THUMBNAILS_TABLE, 1, |s| {
        schema::create_table(s, schema::CREATE_THUMBNAILS_TABLE, schema::THUMBNAILS_INDEXES)
    })
}

/// Hex BLAKE3 digest of `payload`
pub fn content_hash(payload: &[u8]) -> String {
    blake3::hash(payload).to_string()
}

/// Row that gets pointed at a stored blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobOwner<'a> {
    File(&'a str),
    TvSeries(i64),
}

impl BlobOwner<'_> {
    fn table(&self) -> &'static str {
        match self {
            BlobOwner::File(_) => files::TABLE,
            BlobOwner::TvSeries(_) => tv_series::TABLE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentBlob {
    pub id: i64,
    #[serde(skip)]
    pub payload: Vec<u8>,
    pub content_hash: String,
    pub created: i64,
}

/// Store `payload` for `owner` and return the blob id the owner now points at.
///
/// A blob with the same hash is reused unless `force_new` is set; then the
/// old blob row is deleted and a new one inserted. Other owners of the old
/// blob keep a dangling id until they are repointed or swept.
pub fn store(
    session: &Session,
    locks: &LockRegistry,
    payload: &[u8],
    owner: BlobOwner<'_>,
    force_new: bool,
) -> Result<i64> {
    let hash = content_hash(payload);
    locks.with_write_all(&[THUMBNAILS_TABLE, owner.table()], || {
        session.atomic(|s| {
            let existing: Option<i64> =
                s.query_scalar("SELECT ID FROM THUMBNAILS WHERE CONTENTHASH = ?1", [hash.as_str()])?;

            let id = match existing {
                Some(id) if !force_new => {
                    debug!("Reusing thumbnail {} for {:?}", id, owner);
                    id
                }
                existing => {
                    if let Some(old) = existing {
                        debug!("Replacing thumbnail {} for {:?}", old, owner);
                        s.execute("DELETE FROM THUMBNAILS WHERE ID = ?1", [old])?;
                    }
                    s.execute(
                        "INSERT INTO THUMBNAILS (PAYLOAD, CONTENTHASH, CREATED) VALUES (?1, ?2, ?3)",
                        rusqlite::params![payload, hash, now_millis()],
                    )?;
                    s.last_insert_rowid()
                }
            };

            let pointed = match owner {
                BlobOwner::File(filename) => files::set_thumbnail_id(s, locks, filename, id)?,
                BlobOwner::TvSeries(series) => tv_series::set_thumbnail_id(s, locks, series, id)?,
            };
            if !pointed {
                warn!("Thumbnail owner {:?} is not cached; blob {} left for the sweep", owner, id);
            }
            Ok(id)
        })
    })
}

pub fn get(session: &Session, locks: &LockRegistry, id: i64) -> Result<Option<ContentBlob>> {
    locks.with_read(THUMBNAILS_TABLE, || {
        let row = session.query_one("SELECT * FROM THUMBNAILS WHERE ID = ?1", [id])?;
        Ok(row.and_then(|r| {
            Some(ContentBlob {
                id: r.i64("ID")?,
                payload: r.blob("PAYLOAD")?.to_vec(),
                content_hash: r.text("CONTENTHASH")?.to_string(),
                created: r.i64("CREATED")?,
            })
        }))
    })
}

pub fn find_by_hash(session: &Session, locks: &LockRegistry, hash: &str) -> Result<Option<i64>> {
    locks.with_read(THUMBNAILS_TABLE, || {
        session.query_scalar("SELECT ID FROM THUMBNAILS WHERE CONTENTHASH = ?1", [hash])
    })
}

/// Delete one blob. Owners are not touched.
pub fn delete(session: &Session, locks: &LockRegistry, id: i64) -> Result<bool> {
    locks.with_write(THUMBNAILS_TABLE, || {
        Ok(session.execute("DELETE FROM THUMBNAILS WHERE ID = ?1", [id])? > 0)
    })
}

pub fn count(session: &Session, locks: &LockRegistry) -> Result<usize> {
    locks.with_read(THUMBNAILS_TABLE, || session.count_rows(THUMBNAILS_TABLE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::files::MediaFile;
    use crate::media::testing::open_cache;
    use crate::media::tv_series::TvSeries;

    #[test]
    fn test_identical_payloads_share_one_blob() {
        let (session, locks) = open_cache("dedup_share");
        files::upsert(&session, &locks, &MediaFile::new("/a.mkv", 1)).unwrap();
        let series = tv_series::upsert(&session, &locks, &TvSeries::new("Show")).unwrap();

        let first = store(&session, &locks, b"jpeg bytes", BlobOwner::File("/a.mkv"), false).unwrap();
        let second = store(&session, &locks, b"jpeg bytes", BlobOwner::TvSeries(series), false).unwrap();

        assert_eq!(first, second);
        assert_eq!(count(&session, &locks).unwrap(), 1);
        let file = files::get(&session, &locks, "/a.mkv").unwrap().unwrap();
        assert_eq!(file.thumbnail_id, Some(first));
        let show = tv_series::get(&session, &locks, series).unwrap().unwrap();
        assert_eq!(show.thumbnail_id, Some(first));
    }

    #[test]
    fn test_force_new_replaces_blob() {
        let (session, locks) = open_cache("dedup_force");
        files::upsert(&session, &locks, &MediaFile::new("/a.mkv", 1)).unwrap();

        let first = store(&session, &locks, b"jpeg bytes", BlobOwner::File("/a.mkv"), false).unwrap();
        let second = store(&session, &locks, b"jpeg bytes", BlobOwner::File("/a.mkv"), true).unwrap();

        assert_ne!(first, second);
        assert_eq!(count(&session, &locks).unwrap(), 1);
        assert!(get(&session, &locks, first).unwrap().is_none());
        assert_eq!(
            find_by_hash(&session, &locks, &content_hash(b"jpeg bytes")).unwrap(),
            Some(second)
        );
    }

    #[test]
    fn test_delete_leaves_owner_pointer() {
        let (session, locks) = open_cache("dedup_delete");
        files::upsert(&session, &locks, &MediaFile::new("/a.mkv", 1)).unwrap();
        let id = store(&session, &locks, b"png", BlobOwner::File("/a.mkv"), false).unwrap();

        let blob = get(&session, &locks, id).unwrap().unwrap();
        assert_eq!(blob.payload, b"png".to_vec());

        assert!(delete(&session, &locks, id).unwrap());
        assert!(!delete(&session, &locks, id).unwrap());
        let file = files::get(&session, &locks, "/a.mkv").unwrap().unwrap();
        assert_eq!(file.thumbnail_id, Some(id));
    }
}
