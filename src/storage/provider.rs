//! Session provider and store recovery
//!
//! Opening a store either yields a session or tells the caller to retry:
//!
//! - an older store format written by this crate is upgraded in place
//! - a damaged, foreign or newer store has its directory deleted and is
//!   created fresh on the next attempt
//! - busy, locked and I/O failures back off and retry
//!
//! The store signature lives in the SQLite header: `application_id` marks the
//! file as ours, `user_version` carries the store format.

use crate::config::{check_store_name, CacheConfig, RetryPolicy};
use crate::storage::Session;
use crate::{Error, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OpenFlags};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// `application_id` stamped into every store ("MCCH")
pub const APPLICATION_ID: i32 = 0x4D43_4348;

/// Current store format, kept in `user_version`
pub const STORE_FORMAT_VERSION: i32 = 2;

/// Result of one open attempt
#[derive(Debug)]
pub enum OpenOutcome {
    Open(Session),
    Retry(RetryInstruction),
}

/// Why the caller should try again
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryInstruction {
    /// An older store format was upgraded in place
    FormatUpgraded { from: i32 },
    /// The store directory was deleted; the next open creates a fresh store
    Recreate { reason: String },
    /// Transient failure; wait before the next attempt
    Backoff { delay: Duration, reason: String },
}

/// What the probe found on disk
#[derive(Debug)]
enum StoreState {
    Fresh,
    Current,
    OldFormat(i32),
    Damaged(String),
}

#[derive(Debug, Clone)]
enum Location {
    Disk { dir: PathBuf, file: PathBuf },
    Memory { uri: String },
}

pub struct SessionProvider {
    location: Location,
    store_name: String,
    busy_timeout: Duration,
    cache_size_kib: u32,
    backoff: Duration,
    /// Keeps a shared-cache in-memory store alive between sessions
    keeper: Mutex<Option<Connection>>,
}

impl SessionProvider {
    pub fn new(config: &CacheConfig) -> Self {
        let location = if config.in_memory {
            Location::Memory {
                uri: format!("file:{}?mode=memory&cache=shared", config.store_name),
            }
        } else {
            Location::Disk {
                dir: config.store_dir(),
                file: config.store_file(),
            }
        };
        Self {
            location,
            store_name: config.store_name.clone(),
            busy_timeout: config.busy_timeout(),
            cache_size_kib: config.cache_size_kib,
            backoff: config.retry.backoff(),
            keeper: Mutex::new(None),
        }
    }

    /// File path or memory URI sessions are opened against
    pub fn describe(&self) -> String {
        match &self.location {
            Location::Disk { file, .. } => file.display().to_string(),
            Location::Memory { uri } => uri.clone(),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self.location, Location::Memory { .. })
    }

    /// One attempt at opening the store, recovering from a bad store state
    pub fn open_or_recover(&self) -> Result<OpenOutcome> {
        match &self.location {
            Location::Memory { uri } => {
                let conn = self.open_memory(uri)?;
                Ok(OpenOutcome::Open(self.configure(conn, uri)?))
            }
            Location::Disk { dir, file } => {
                // Recovery deletes the store directory
                check_store_name(&self.store_name)?;
                self.open_disk(dir, file)
            }
        }
    }

    /// Drive [`open_or_recover`](Self::open_or_recover) until a session is
    /// open or the policy gives up
    pub fn open_with_policy(&self, policy: &RetryPolicy) -> Result<Session> {
        let mut last = String::from("no attempt made");
        for attempt in 1..=policy.max_attempts {
            match self.open_or_recover()? {
                OpenOutcome::Open(session) => return Ok(session),
                OpenOutcome::Retry(RetryInstruction::Backoff { delay, reason }) => {
                    debug!("Open attempt {} failed ({}), retrying in {:?}", attempt, reason, delay);
                    last = reason;
                    if attempt < policy.max_attempts {
                        std::thread::sleep(delay);
                    }
                }
                OpenOutcome::Retry(instruction) => {
                    debug!("Open attempt {} asked for a retry: {:?}", attempt, instruction);
                    last = format!("{:?}", instruction);
                }
            }
        }
        Err(Error::RetriesExhausted {
            attempts: policy.max_attempts,
            last,
        })
    }

    /// Open an additional session on a store that is already known good.
    /// Used by worker threads after startup; no recovery is attempted.
    pub fn session(&self) -> Result<Session> {
        match &self.location {
            Location::Memory { uri } => {
                let conn = self.open_memory(uri)?;
                self.configure(conn, uri)
            }
            Location::Disk { file, .. } => {
                let conn = Connection::open_with_flags(file, Self::flags())?;
                self.configure(conn, &file.display().to_string())
            }
        }
    }

    fn flags() -> OpenFlags {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
    }

    fn open_memory(&self, uri: &str) -> Result<Connection> {
        let mut keeper = self.keeper.lock();
        if keeper.is_none() {
            debug!("Creating in-memory store {}", uri);
            *keeper = Some(Connection::open_with_flags(uri, Self::flags())?);
        }
        Ok(Connection::open_with_flags(uri, Self::flags())?)
    }

    fn open_disk(&self, dir: &Path, file: &Path) -> Result<OpenOutcome> {
        if dir.exists() && !file.exists() {
            return self.delete_store(dir, "store file is missing");
        }
        if !dir.exists() {
            info!("Creating store directory {}", dir.display());
            fs::create_dir_all(dir)?;
        }

        let label = file.display().to_string();
        let conn = match Connection::open_with_flags(file, Self::flags()) {
            Ok(conn) => conn,
            Err(e) => return self.classify_failure(dir, e),
        };
        if let Err(e) = conn.busy_timeout(self.busy_timeout) {
            return self.classify_failure(dir, e);
        }

        let state = match probe(&conn) {
            Ok(state) => state,
            Err(e) => {
                drop(conn);
                return self.classify_failure(dir, e);
            }
        };

        match state {
            StoreState::Current => Ok(OpenOutcome::Open(self.configure(conn, &label)?)),
            StoreState::Fresh => {
                info!("Initializing new store {}", label);
                if let Err(e) = stamp_signature(&conn) {
                    drop(conn);
                    return self.classify_failure(dir, e);
                }
                Ok(OpenOutcome::Open(self.configure(conn, &label)?))
            }
            StoreState::OldFormat(from) => {
                info!("Upgrading store format of {} from {} to {}", label, from, STORE_FORMAT_VERSION);
                if let Err(e) = upgrade_format(&conn, from) {
                    drop(conn);
                    return self.classify_failure(dir, e);
                }
                drop(conn);
                Ok(OpenOutcome::Retry(RetryInstruction::FormatUpgraded { from }))
            }
            StoreState::Damaged(reason) => {
                drop(conn);
                self.delete_store(dir, &reason)
            }
        }
    }

    fn classify_failure(&self, dir: &Path, e: rusqlite::Error) -> Result<OpenOutcome> {
        if matches!(
            e.sqlite_error_code(),
            Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt)
        ) {
            return self.delete_store(dir, &format!("store is damaged: {}", e));
        }
        let e = Error::from(e);
        if !e.is_transient() {
            error!("Store in {} cannot be opened: {}", dir.display(), e);
            return Err(e);
        }
        warn!("Transient failure opening store: {}", e);
        Ok(OpenOutcome::Retry(RetryInstruction::Backoff {
            delay: self.backoff,
            reason: e.to_string(),
        }))
    }

    fn delete_store(&self, dir: &Path, reason: &str) -> Result<OpenOutcome> {
        warn!("Deleting store directory {}: {}", dir.display(), reason);
        let removed = fs::remove_dir_all(dir).and_then(|()| {
            if dir.exists() {
                Err(std::io::Error::other("directory still present after removal"))
            } else {
                Ok(())
            }
        });
        match removed {
            Ok(()) => Ok(OpenOutcome::Retry(RetryInstruction::Recreate {
                reason: reason.to_string(),
            })),
            Err(source) => {
                error!(
                    "Damaged cache can't be deleted. Stop the program and delete the folder {} manually",
                    dir.display()
                );
                Err(Error::StoreDeletionBlocked {
                    path: dir.to_path_buf(),
                    source,
                })
            }
        }
    }

    /// Per-session pragmas
    fn configure(&self, conn: Connection, label: &str) -> Result<Session> {
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch(&format!(
            "PRAGMA foreign_keys = ON; PRAGMA cache_size = -{};",
            self.cache_size_kib
        ))?;
        if !self.is_in_memory() {
            let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            debug!("Journal mode for {}: {}", label, mode);
        }
        Ok(Session::new(conn, label))
    }
}

fn probe(conn: &Connection) -> rusqlite::Result<StoreState> {
    let app_id: i32 = conn.pragma_query_value(None, "application_id", |row| row.get(0))?;
    let format: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if app_id == 0 && format == 0 {
        let objects: i64 = conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get(0))?;
        return Ok(if objects == 0 {
            StoreState::Fresh
        } else {
            StoreState::Damaged("store has no signature".to_string())
        });
    }
    if app_id != APPLICATION_ID {
        return Ok(StoreState::Damaged(format!(
            "foreign application id {:#x}",
            app_id
        )));
    }
    Ok(match format.cmp(&STORE_FORMAT_VERSION) {
        std::cmp::Ordering::Equal => StoreState::Current,
        std::cmp::Ordering::Less if format >= 1 => StoreState::OldFormat(format),
        std::cmp::Ordering::Less => StoreState::Damaged(format!("invalid store format {}", format)),
        std::cmp::Ordering::Greater => {
            StoreState::Damaged(format!("store format {} is newer than {}", format, STORE_FORMAT_VERSION))
        }
    })
}

fn stamp_signature(conn: &Connection) -> rusqlite::Result<()> {
    conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
    conn.execute_batch(&format!(
        "PRAGMA application_id = {}; PRAGMA user_version = {};",
        APPLICATION_ID, STORE_FORMAT_VERSION
    ))
}

/// Format 1 stores used a rollback journal; format 2 runs in WAL mode.
fn upgrade_format(conn: &Connection, from: i32) -> rusqlite::Result<()> {
    if from < 2 {
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
    }
    conn.execute_batch(&format!("PRAGMA user_version = {};", STORE_FORMAT_VERSION))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sessions_share_store() {
        let provider = SessionProvider::new(&CacheConfig::in_memory("provider_shared"));
        let first = match provider.open_or_recover().unwrap() {
            OpenOutcome::Open(s) => s,
            other => panic!("expected open session, got {:?}", other),
        };
        first.execute_ddl("CREATE TABLE T (ID INTEGER)").unwrap();
        first.close().unwrap();

        let second = provider.session().unwrap();
        assert!(second.table_exists("T").unwrap());
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let provider = SessionProvider::new(&CacheConfig::in_memory("provider_fk"));
        let session = provider.open_with_policy(&RetryPolicy::default()).unwrap();
        let enabled: Option<i64> = session.query_scalar("PRAGMA foreign_keys", []).unwrap();
        assert_eq!(enabled, Some(1));
    }

    #[test]
    fn test_fresh_disk_store_is_stamped() {
        let dir = tempfile::tempdir().unwrap();
        let provider = SessionProvider::new(&CacheConfig::on_disk(dir.path(), "fresh"));
        let session = provider.open_with_policy(&RetryPolicy::default()).unwrap();

        let app_id: Option<i32> = session.query_scalar("PRAGMA application_id", []).unwrap();
        let format: Option<i32> = session.query_scalar("PRAGMA user_version", []).unwrap();
        assert_eq!(app_id, Some(APPLICATION_ID));
        assert_eq!(format, Some(STORE_FORMAT_VERSION));
    }

    #[test]
    fn test_old_format_is_upgraded_then_retried() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::on_disk(dir.path(), "old");
        fs::create_dir_all(config.store_dir()).unwrap();
        {
            let conn = Connection::open(config.store_file()).unwrap();
            conn.execute_batch(&format!(
                "PRAGMA application_id = {}; PRAGMA user_version = 1; CREATE TABLE KEEP (ID INTEGER);",
                APPLICATION_ID
            ))
            .unwrap();
        }

        let provider = SessionProvider::new(&config);
        match provider.open_or_recover().unwrap() {
            OpenOutcome::Retry(RetryInstruction::FormatUpgraded { from }) => assert_eq!(from, 1),
            other => panic!("expected format upgrade, got {:?}", other),
        }
        let session = match provider.open_or_recover().unwrap() {
            OpenOutcome::Open(s) => s,
            other => panic!("expected open session, got {:?}", other),
        };
        assert!(session.table_exists("KEEP").unwrap());
    }

    #[test]
    fn test_foreign_database_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::on_disk(dir.path(), "foreign");
        fs::create_dir_all(config.store_dir()).unwrap();
        {
            let conn = Connection::open(config.store_file()).unwrap();
            conn.execute_batch("CREATE TABLE OTHER (ID INTEGER);").unwrap();
        }

        let provider = SessionProvider::new(&config);
        match provider.open_or_recover().unwrap() {
            OpenOutcome::Retry(RetryInstruction::Recreate { .. }) => {}
            other => panic!("expected recreate, got {:?}", other),
        }
        assert!(!config.store_dir().exists());

        let session = provider.open_with_policy(&RetryPolicy::default()).unwrap();
        assert!(!session.table_exists("OTHER").unwrap());
    }

    #[test]
    fn test_locked_store_backs_off_until_attempts_run_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CacheConfig::on_disk(dir.path(), "locked");
        config.busy_timeout_ms = 10;
        config.retry = RetryPolicy {
            max_attempts: 2,
            backoff_ms: 1,
        };
        fs::create_dir_all(config.store_dir()).unwrap();
        let holder = Connection::open(config.store_file()).unwrap();
        holder
            .execute_batch(&format!(
                "PRAGMA application_id = {}; PRAGMA user_version = {}; CREATE TABLE KEEP (ID INTEGER); BEGIN EXCLUSIVE;",
                APPLICATION_ID, STORE_FORMAT_VERSION
            ))
            .unwrap();

        let provider = SessionProvider::new(&config);
        match provider.open_or_recover().unwrap() {
            OpenOutcome::Retry(RetryInstruction::Backoff { delay, .. }) => {
                assert_eq!(delay, Duration::from_millis(1))
            }
            other => panic!("expected backoff, got {:?}", other),
        }
        let err = provider.open_with_policy(&config.retry).unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 2, .. }));

        holder.execute_batch("COMMIT").unwrap();
        let session = provider.open_with_policy(&config.retry).unwrap();
        assert!(session.table_exists("KEEP").unwrap());
    }

    #[test]
    fn test_undeletable_store_dir_blocks_startup() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::on_disk(dir.path(), "blocked");
        // A plain file where the store directory belongs cannot be removed
        // as a directory
        fs::write(config.store_dir(), b"not a directory").unwrap();

        let provider = SessionProvider::new(&config);
        match provider.open_or_recover() {
            Err(Error::StoreDeletionBlocked { path, .. }) => assert_eq!(path, config.store_dir()),
            other => panic!("expected blocked deletion, got {:?}", other),
        }
        assert!(config.store_dir().is_file());
    }

    #[test]
    fn test_parent_dir_store_name_is_refused() {
        let root = tempfile::tempdir().unwrap();
        let database_dir = root.path().join("db");
        fs::create_dir_all(&database_dir).unwrap();
        fs::write(root.path().join("precious.txt"), b"keep").unwrap();

        let provider = SessionProvider::new(&CacheConfig::on_disk(&database_dir, ".."));
        assert!(matches!(provider.open_or_recover(), Err(Error::Config(_))));
        assert!(root.path().join("precious.txt").exists());
        assert!(database_dir.exists());
    }

    #[test]
    fn test_garbage_file_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::on_disk(dir.path(), "garbage");
        fs::create_dir_all(config.store_dir()).unwrap();
        fs::write(config.store_file(), vec![0x42u8; 8192]).unwrap();

        let provider = SessionProvider::new(&config);
        match provider.open_or_recover().unwrap() {
            OpenOutcome::Retry(RetryInstruction::Recreate { .. }) => {}
            other => panic!("expected recreate, got {:?}", other),
        }
    }
}
