//! `MediaCache`: the open store with its schema brought up to date
//!
//! Opening runs store recovery, then checks every table of the plan. The
//! cache keeps one maintenance session; workers open their own through
//! [`CacheContext::open_session`].

use crate::config::CacheConfig;
use crate::context::CacheContext;
use crate::guard::LockRegistry;
use crate::migration::{MigrationEngine, TableVersion, UpgradeOutcome};
use crate::status::StatusSink;
use crate::storage::Session;
use crate::sweep::{SweepReport, Sweeper};
use crate::Result;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

/// Row counts per table
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub store: String,
    pub tables: Vec<(String, usize)>,
}

impl CacheStats {
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|(_, n)| n).sum()
    }

    pub fn rows(&self, table: &str) -> Option<usize> {
        self.tables.iter().find(|(t, _)| t == table).map(|(_, n)| *n)
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cache Statistics ({}):", self.store)?;
        for (table, rows) in &self.tables {
            writeln!(f, "  {}: {}", table, rows)?;
        }
        write!(f, "  Total rows: {}", self.total_rows())
    }
}

pub struct MediaCache {
    context: CacheContext,
    session: Session,
    tables_checked: Mutex<bool>,
}

impl MediaCache {
    /// Open the media schema described by `config`
    pub fn open(config: CacheConfig, status: StatusSink) -> Result<Self> {
        Self::open_context(CacheContext::new(config, status))
    }

    /// Open the store behind `context` and check its tables
    pub fn open_context(context: CacheContext) -> Result<Self> {
        let cache = Self::connect(context)?;
        cache.check_tables(false)?;
        Ok(cache)
    }

    /// Open the store without touching any table, so [`versions`](Self::versions)
    /// reports what is on disk rather than what a check would leave behind
    pub fn open_unchecked(config: CacheConfig, status: StatusSink) -> Result<Self> {
        Self::connect(CacheContext::new(config, status))
    }

    fn connect(context: CacheContext) -> Result<Self> {
        context.config().validate()?;
        let session = context.provider().open_with_policy(&context.config().retry)?;
        info!("Opened store {}", session.label());
        Ok(Self {
            context,
            session,
            tables_checked: Mutex::new(false),
        })
    }

    pub fn context(&self) -> &CacheContext {
        &self.context
    }

    /// Maintenance session owned by the cache
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn locks(&self) -> &LockRegistry {
        self.context.locks()
    }

    fn engine(&self) -> MigrationEngine<'_> {
        MigrationEngine::new(&self.session, self.context.locks(), self.context.status())
    }

    /// Bring every table to its target version. Runs once per cache unless
    /// `force` is set; a skipped check returns no outcomes.
    pub fn check_tables(&self, force: bool) -> Result<Vec<(String, UpgradeOutcome)>> {
        let mut checked = self.tables_checked.lock();
        if *checked && !force {
            debug!("Tables already checked");
            return Ok(Vec::new());
        }
        let outcomes = self.engine().check_all(self.context.plan())?;
        *checked = true;
        Ok(outcomes)
    }

    pub fn versions(&self) -> Result<Vec<TableVersion>> {
        self.engine().versions(self.context.plan())
    }

    pub fn sweep(&self) -> Result<SweepReport> {
        let config = self.context.config();
        Sweeper::new(
            &self.session,
            self.context.locks(),
            self.context.status(),
            &config.shared_roots,
        )
        .run(self.context.sweep_plan())
    }

    /// Empty every derived table; tables holding user data are kept
    pub fn reset_cache(&self) -> Result<Vec<(String, UpgradeOutcome)>> {
        let mut checked = self.tables_checked.lock();
        let outcomes = self.engine().reset(self.context.plan())?;
        *checked = true;
        Ok(outcomes)
    }

    /// Drop every table, the version registry included. The next
    /// [`check_tables`](Self::check_tables) recreates them.
    pub fn drop_all(&self) -> Result<()> {
        let mut checked = self.tables_checked.lock();
        self.engine().drop_all(self.context.plan())?;
        *checked = false;
        Ok(())
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let locks = self.context.locks();
        let tables = self
            .context
            .plan()
            .table_names()
            .map(|table| {
                let rows = locks.with_read(table, || {
                    if self.session.table_exists(table)? {
                        self.session.count_rows(table)
                    } else {
                        Ok(0)
                    }
                })?;
                Ok((table.to_string(), rows))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(CacheStats {
            store: self.session.label().to_string(),
            tables,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::files::{self, MediaFile};
    use crate::media::files_status;
    use crate::migration::{VersionRegistry, VersionState};

    fn open(name: &str) -> MediaCache {
        MediaCache::open(CacheConfig::in_memory(name), StatusSink::disabled()).unwrap()
    }

    #[test]
    fn test_open_creates_every_table() {
        let cache = open("cache_open");
        let versions = cache.versions().unwrap();
        assert!(!versions.is_empty());
        assert!(versions.iter().all(|v| v.state == VersionState::Current));
    }

    #[test]
    fn test_unchecked_open_reports_outdated_tables() {
        let cache = open("cache_unchecked");
        VersionRegistry::new(cache.session(), cache.locks())
            .set_version(files::TABLE, 2)
            .unwrap();

        let unchecked =
            MediaCache::open_unchecked(CacheConfig::in_memory("cache_unchecked"), StatusSink::disabled()).unwrap();
        let versions = unchecked.versions().unwrap();
        let files_version = versions.iter().find(|v| v.table == files::TABLE).unwrap();
        assert_eq!(files_version.state, VersionState::Outdated);
        assert_eq!(files_version.recorded, Some(2));
    }

    #[test]
    fn test_check_tables_runs_once() {
        let cache = open("cache_check_once");
        assert!(cache.check_tables(false).unwrap().is_empty());
        let forced = cache.check_tables(true).unwrap();
        assert!(forced
            .iter()
            .all(|(_, outcome)| matches!(outcome, UpgradeOutcome::Current { .. })));
    }

    #[test]
    fn test_reset_keeps_playback_status() {
        let cache = open("cache_reset");
        let (session, locks) = (cache.session(), cache.locks());
        files::upsert(session, locks, &MediaFile::new("/a.mkv", 1)).unwrap();
        files_status::set_bookmark(session, locks, "/a.mkv", 0, 120).unwrap();

        cache.reset_cache().unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.rows(files::TABLE), Some(0));
        assert_eq!(stats.rows(files_status::TABLE), Some(1));
    }

    #[test]
    fn test_drop_all_then_check_recreates() {
        let cache = open("cache_drop_all");
        cache.drop_all().unwrap();
        assert!(!cache.session().table_exists(files::TABLE).unwrap());

        let outcomes = cache.check_tables(false).unwrap();
        assert!(outcomes
            .iter()
            .all(|(_, outcome)| matches!(outcome, UpgradeOutcome::Created { .. })));
        assert_eq!(cache.stats().unwrap().total_rows(), 0);
    }
}
