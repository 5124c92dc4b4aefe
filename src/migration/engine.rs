//! Brings tables to their target schema version
//!
//! For each table: create it if absent, leave it alone if current or newer,
//! otherwise apply the registered steps in order inside one transaction
//! together with the version bump. A failing step rolls back and the table is
//! dropped and recreated empty. The store is a derived cache, so losing rows
//! is acceptable where a broken schema is not.

use crate::guard::LockRegistry;
use crate::migration::plan::{MigrationPlan, StepProvider, TableDescriptor};
use crate::migration::registry::{VersionRegistry, VERSIONS_TABLE};
use crate::status::{StatusMessage, StatusPhase, StatusSink};
use crate::storage::Session;
use crate::{Error, Result};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use tracing::{debug, error, info, warn};

/// What `check_and_upgrade` did to a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpgradeOutcome {
    Created { version: u32 },
    Current { version: u32 },
    Upgraded { from: u32, to: u32 },
    Recreated { from: Option<u32>, to: u32 },
    /// Written by a newer release; left untouched
    NewerVersion { found: u32, target: u32 },
}

impl fmt::Display for UpgradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeOutcome::Created { version } => write!(f, "created at v{}", version),
            UpgradeOutcome::Current { version } => write!(f, "current at v{}", version),
            UpgradeOutcome::Upgraded { from, to } => write!(f, "upgraded v{} -> v{}", from, to),
            UpgradeOutcome::Recreated { from: Some(from), to } => {
                write!(f, "recreated v{} -> v{}", from, to)
            }
            UpgradeOutcome::Recreated { from: None, to } => write!(f, "recreated at v{}", to),
            UpgradeOutcome::NewerVersion { found, target } => {
                write!(f, "newer v{} (expected v{}), untouched", found, target)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionState {
    Missing,
    Unrecorded,
    Outdated,
    Current,
    Newer,
}

/// Reporting row for `versions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableVersion {
    pub table: String,
    pub recorded: Option<u32>,
    pub target: u32,
    pub state: VersionState,
}

pub struct MigrationEngine<'a> {
    session: &'a Session,
    locks: &'a LockRegistry,
    status: &'a StatusSink,
}

impl<'a> MigrationEngine<'a> {
    pub fn new(session: &'a Session, locks: &'a LockRegistry, status: &'a StatusSink) -> Self {
        Self {
            session,
            locks,
            status,
        }
    }

    fn registry(&self) -> VersionRegistry<'a> {
        VersionRegistry::new(self.session, self.locks)
    }

    /// Guarantee that `table` exists at `target` on return, unless it was
    /// written by a newer release
    pub fn check_and_upgrade(
        &self,
        table: &str,
        target: u32,
        creator: &dyn Fn(&Session) -> Result<()>,
        steps: &dyn StepProvider,
        legacy_baseline: Option<u32>,
    ) -> Result<UpgradeOutcome> {
        let registry = self.registry();
        registry.ensure()?;

        self.locks.with_write_all(&[table, VERSIONS_TABLE], || {
            if !self.session.table_exists(table)? {
                info!("Creating table {} at version {}", table, target);
                self.session.atomic(|s| {
                    creator(s)?;
                    registry.set_version(table, target)
                })?;
                return Ok(UpgradeOutcome::Created { version: target });
            }

            let recorded = registry.get_version(table)?;
            let current = match (recorded, legacy_baseline) {
                (Some(v), _) => v,
                (None, Some(baseline)) => {
                    debug!("Table {} has no recorded version, assuming {}", table, baseline);
                    baseline
                }
                (None, None) => {
                    warn!("Database table {} is from an unknown version, dropping and recreating", table);
                    self.recreate(table, target, creator)?;
                    return Ok(UpgradeOutcome::Recreated { from: None, to: target });
                }
            };

            match current.cmp(&target) {
                Ordering::Equal => {
                    if recorded.is_none() {
                        registry.set_version(table, target)?;
                    }
                    Ok(UpgradeOutcome::Current { version: target })
                }
                Ordering::Greater => {
                    warn!(
                        "Database table {} is from a newer version (v{}, expected v{}). \
                         If you experience problems, move, rename or delete the database file {}",
                        table,
                        current,
                        target,
                        self.session.label()
                    );
                    self.status.send(StatusMessage::Warning(format!(
                        "Table {} was written by a newer release and is left untouched",
                        table
                    )));
                    Ok(UpgradeOutcome::NewerVersion { found: current, target })
                }
                Ordering::Less => self.upgrade(table, current, target, creator, steps),
            }
        })
    }

    fn upgrade(
        &self,
        table: &str,
        current: u32,
        target: u32,
        creator: &dyn Fn(&Session) -> Result<()>,
        steps: &dyn StepProvider,
    ) -> Result<UpgradeOutcome> {
        let mut plan = Vec::with_capacity((target - current) as usize);
        for version in current..target {
            match steps.step(version) {
                Some(step) => plan.push((version, step)),
                None => {
                    error!(
                        "Cannot upgrade table {} from version {} to {}: no step from version {}",
                        table, current, target, version
                    );
                    return Err(Error::MissingMigrationStep {
                        table: table.to_string(),
                        from: version,
                        target,
                    });
                }
            }
        }

        info!("Upgrading table {} from version {} to {}", table, current, target);
        self.status.send(StatusMessage::Migrating {
            table: table.to_string(),
            version: target,
        });

        let registry = self.registry();
        let applied = self.session.atomic(|s| {
            for (version, step) in &plan {
                debug!("Applying {} step {} -> {}", table, version, version + 1);
                step(s, *version)?;
            }
            registry.set_version(table, target)
        });

        match applied {
            Ok(()) => Ok(UpgradeOutcome::Upgraded { from: current, to: target }),
            Err(e) => {
                error!(
                    "Failed upgrading table {} from version {} to {}: {}. Dropping and recreating it",
                    table, current, target, e
                );
                self.recreate(table, target, creator)?;
                Ok(UpgradeOutcome::Recreated { from: Some(current), to: target })
            }
        }
    }

    fn recreate(&self, table: &str, target: u32, creator: &dyn Fn(&Session) -> Result<()>) -> Result<()> {
        let registry = self.registry();
        self.session
            .atomic(|s| {
                // Rows elsewhere may still hold ids of the dropped rows; the
                // new table must not hand them out again
                let seq = s.autoincrement_seq(table)?;
                s.drop_table(table)?;
                creator(s)?;
                if let Some(seq) = seq {
                    s.restore_autoincrement_seq(table, seq)?;
                }
                registry.set_version(table, target)
            })
            .map_err(|e| {
                error!("Recreating table {} failed: {}", table, e);
                Error::RecreateFailed {
                    table: table.to_string(),
                    source: Box::new(e),
                }
            })
    }

    pub fn check_table(&self, table: &TableDescriptor) -> Result<UpgradeOutcome> {
        self.check_and_upgrade(
            table.name(),
            table.target_version(),
            table.creator().as_ref(),
            table,
            table.baseline(),
        )
    }

    /// Check every table of `plan` in order
    pub fn check_all(&self, plan: &MigrationPlan) -> Result<Vec<(String, UpgradeOutcome)>> {
        self.registry().ensure()?;
        self.status.send(StatusMessage::Started {
            phase: StatusPhase::Migrating,
            total: plan.tables().len(),
        });
        let mut outcomes = Vec::with_capacity(plan.tables().len());
        for (done, table) in plan.tables().iter().enumerate() {
            let outcome = self.check_table(table)?;
            debug!("Table {}: {}", table.name(), outcome);
            outcomes.push((table.name().to_string(), outcome));
            self.status.progress(StatusPhase::Migrating, done + 1, plan.tables().len());
        }
        self.status.send(StatusMessage::Finished {
            phase: StatusPhase::Migrating,
        });
        Ok(outcomes)
    }

    /// Drop every table not marked to survive a reset, then check the plan
    /// again so they come back empty at their target version
    pub fn reset(&self, plan: &MigrationPlan) -> Result<Vec<(String, UpgradeOutcome)>> {
        self.status.send(StatusMessage::Started {
            phase: StatusPhase::Resetting,
            total: plan.tables().len(),
        });
        let registry = self.registry();
        registry.ensure()?;
        for table in plan.tables().iter().rev().filter(|t| !t.is_preserved_on_reset()) {
            self.locks.with_write_all(&[table.name(), VERSIONS_TABLE], || {
                info!("Dropping table {}", table.name());
                self.session.atomic(|s| {
                    s.drop_table(table.name())?;
                    registry.remove(table.name())
                })
            })?;
        }
        self.status.send(StatusMessage::Finished {
            phase: StatusPhase::Resetting,
        });
        self.check_all(plan)
    }

    /// Drop every table of the plan and the version registry itself
    pub fn drop_all(&self, plan: &MigrationPlan) -> Result<()> {
        let mut tables: Vec<&str> = plan.table_names().collect();
        tables.push(VERSIONS_TABLE);
        self.locks.with_write_all(&tables, || {
            self.session.atomic(|s| {
                for table in plan.tables().iter().rev() {
                    s.drop_table(table.name())?;
                }
                s.drop_table(VERSIONS_TABLE)
            })
        })?;
        info!("Dropped all tables");
        Ok(())
    }

    /// Recorded and target version of every table in `plan`
    pub fn versions(&self, plan: &MigrationPlan) -> Result<Vec<TableVersion>> {
        let recorded = self.registry().all()?;
        plan.tables()
            .iter()
            .map(|table| {
                let version = recorded
                    .iter()
                    .find(|(name, _)| name == table.name())
                    .map(|(_, v)| *v);
                let exists = self
                    .locks
                    .with_read(table.name(), || self.session.table_exists(table.name()))?;
                let state = match (exists, version) {
                    (false, _) => VersionState::Missing,
                    (true, None) => VersionState::Unrecorded,
                    (true, Some(v)) => match v.cmp(&table.target_version()) {
                        Ordering::Less => VersionState::Outdated,
                        Ordering::Equal => VersionState::Current,
                        Ordering::Greater => VersionState::Newer,
                    },
                };
                Ok(TableVersion {
                    table: table.name().to_string(),
                    recorded: version,
                    target: table.target_version(),
                    state,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::plan::StepFn;
    use rusqlite::Connection;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn setup() -> (Session, LockRegistry, StatusSink) {
        let session = Session::new(Connection::open_in_memory().unwrap(), "engine");
        let locks = LockRegistry::new([VERSIONS_TABLE, "MEDIA"]);
        (session, locks, StatusSink::disabled())
    }

    fn create_media(s: &Session) -> Result<()> {
        s.execute_ddl("CREATE TABLE MEDIA (ID INTEGER PRIMARY KEY, NAME TEXT, B TEXT, C TEXT)")
    }

    /// MEDIA at version 2 with one row, as an older release left it
    fn seed_v2(session: &Session, locks: &LockRegistry) {
        session
            .execute_ddl("CREATE TABLE MEDIA (ID INTEGER PRIMARY KEY, NAME TEXT)")
            .unwrap();
        session.execute("INSERT INTO MEDIA (NAME) VALUES ('kept')", []).unwrap();
        let registry = VersionRegistry::new(session, locks);
        registry.ensure().unwrap();
        registry.set_version("MEDIA", 2).unwrap();
    }

    fn steps_2_to_4() -> BTreeMap<u32, StepFn> {
        let mut steps: BTreeMap<u32, StepFn> = BTreeMap::new();
        steps.insert(
            2,
            Arc::new(|s: &Session, _: u32| {
                if !s.column_exists("MEDIA", "B")? {
                    s.execute_ddl("ALTER TABLE MEDIA ADD B TEXT")?;
                }
                Ok(())
            }),
        );
        steps.insert(
            3,
            Arc::new(|s: &Session, _: u32| {
                if !s.column_exists("MEDIA", "C")? {
                    s.execute_ddl("ALTER TABLE MEDIA ADD C TEXT")?;
                }
                Ok(())
            }),
        );
        steps
    }

    #[test]
    fn test_absent_table_is_created() {
        let (session, locks, status) = setup();
        let engine = MigrationEngine::new(&session, &locks, &status);
        let outcome = engine
            .check_and_upgrade("MEDIA", 4, &create_media, &steps_2_to_4(), None)
            .unwrap();
        assert_eq!(outcome, UpgradeOutcome::Created { version: 4 });
        assert_eq!(VersionRegistry::new(&session, &locks).get_version("MEDIA").unwrap(), Some(4));
    }

    #[test]
    fn test_upgrade_applies_steps_in_order() {
        let (session, locks, status) = setup();
        seed_v2(&session, &locks);
        let engine = MigrationEngine::new(&session, &locks, &status);

        let outcome = engine
            .check_and_upgrade("MEDIA", 4, &create_media, &steps_2_to_4(), None)
            .unwrap();
        assert_eq!(outcome, UpgradeOutcome::Upgraded { from: 2, to: 4 });
        assert!(session.column_exists("MEDIA", "B").unwrap());
        assert!(session.column_exists("MEDIA", "C").unwrap());
        assert_eq!(session.count_rows("MEDIA").unwrap(), 1);
        assert_eq!(VersionRegistry::new(&session, &locks).get_version("MEDIA").unwrap(), Some(4));
    }

    #[test]
    fn test_second_run_issues_no_ddl() {
        let (session, locks, status) = setup();
        let engine = MigrationEngine::new(&session, &locks, &status);
        engine
            .check_and_upgrade("MEDIA", 4, &create_media, &steps_2_to_4(), None)
            .unwrap();

        let before = session.ddl_count();
        let outcome = engine
            .check_and_upgrade("MEDIA", 4, &create_media, &steps_2_to_4(), None)
            .unwrap();
        assert_eq!(outcome, UpgradeOutcome::Current { version: 4 });
        assert_eq!(session.ddl_count(), before);
    }

    #[test]
    fn test_missing_step_fails_before_any_change() {
        let (session, locks, status) = setup();
        seed_v2(&session, &locks);
        let engine = MigrationEngine::new(&session, &locks, &status);

        let mut steps = steps_2_to_4();
        steps.remove(&3);
        let before = session.ddl_count();
        let err = engine
            .check_and_upgrade("MEDIA", 4, &create_media, &steps, None)
            .unwrap_err();

        assert!(matches!(
            err,
            Error::MissingMigrationStep { ref table, from: 3, target: 4 } if table == "MEDIA"
        ));
        assert_eq!(session.ddl_count(), before);
        assert!(!session.column_exists("MEDIA", "B").unwrap());
        assert_eq!(VersionRegistry::new(&session, &locks).get_version("MEDIA").unwrap(), Some(2));
    }

    #[test]
    fn test_failing_step_recreates_table() {
        let (session, locks, status) = setup();
        seed_v2(&session, &locks);
        let engine = MigrationEngine::new(&session, &locks, &status);

        let mut steps = steps_2_to_4();
        steps.insert(
            3,
            Arc::new(|s: &Session, _: u32| s.execute_ddl("ALTER TABLE MEDIA ADD B TEXT")),
        );
        let outcome = engine
            .check_and_upgrade("MEDIA", 4, &create_media, &steps, None)
            .unwrap();

        assert_eq!(outcome, UpgradeOutcome::Recreated { from: Some(2), to: 4 });
        assert_eq!(session.count_rows("MEDIA").unwrap(), 0);
        assert!(session.column_exists("MEDIA", "C").unwrap());
        assert_eq!(VersionRegistry::new(&session, &locks).get_version("MEDIA").unwrap(), Some(4));
    }

    #[test]
    fn test_recreated_table_continues_id_sequence() {
        let (session, locks, status) = setup();
        session
            .execute_ddl("CREATE TABLE MEDIA (ID INTEGER PRIMARY KEY AUTOINCREMENT, NAME TEXT)")
            .unwrap();
        for name in ["a", "b", "c"] {
            session.execute("INSERT INTO MEDIA (NAME) VALUES (?1)", [name]).unwrap();
        }
        let registry = VersionRegistry::new(&session, &locks);
        registry.ensure().unwrap();
        registry.set_version("MEDIA", 2).unwrap();

        let create = |s: &Session| -> Result<()> {
            s.execute_ddl("CREATE TABLE MEDIA (ID INTEGER PRIMARY KEY AUTOINCREMENT, NAME TEXT, B TEXT, C TEXT)")
        };
        let mut steps = steps_2_to_4();
        steps.insert(2, Arc::new(|_: &Session, _: u32| -> Result<()> { Err(Error::Config("step fails".to_string())) }));
        let outcome = MigrationEngine::new(&session, &locks, &status)
            .check_and_upgrade("MEDIA", 4, &create, &steps, None)
            .unwrap();
        assert_eq!(outcome, UpgradeOutcome::Recreated { from: Some(2), to: 4 });

        session.execute("INSERT INTO MEDIA (NAME) VALUES ('d')", []).unwrap();
        let id: Option<i64> = session.query_scalar("SELECT ID FROM MEDIA WHERE NAME = 'd'", []).unwrap();
        assert_eq!(id, Some(4));
    }

    #[test]
    fn test_failing_recreate_is_fatal() {
        let (session, locks, status) = setup();
        seed_v2(&session, &locks);
        let engine = MigrationEngine::new(&session, &locks, &status);

        let mut steps = steps_2_to_4();
        steps.insert(2, Arc::new(|_: &Session, _: u32| -> Result<()> { Err(Error::Config("step fails".to_string())) }));
        let broken_create = |_: &Session| -> Result<()> { Err(Error::Config("create fails".to_string())) };
        let err = engine
            .check_and_upgrade("MEDIA", 4, &broken_create, &steps, None)
            .unwrap_err();

        assert!(matches!(err, Error::RecreateFailed { ref table, .. } if table == "MEDIA"));
        // The recreate rolled back too, so the old table and version remain
        assert_eq!(session.count_rows("MEDIA").unwrap(), 1);
        assert_eq!(VersionRegistry::new(&session, &locks).get_version("MEDIA").unwrap(), Some(2));
    }

    #[test]
    fn test_newer_version_left_untouched() {
        let (session, locks, status) = setup();
        seed_v2(&session, &locks);
        VersionRegistry::new(&session, &locks).set_version("MEDIA", 9).unwrap();
        let engine = MigrationEngine::new(&session, &locks, &status);

        let before = session.ddl_count();
        let outcome = engine
            .check_and_upgrade("MEDIA", 4, &create_media, &steps_2_to_4(), None)
            .unwrap();
        assert_eq!(outcome, UpgradeOutcome::NewerVersion { found: 9, target: 4 });
        assert_eq!(session.ddl_count(), before);
        assert_eq!(VersionRegistry::new(&session, &locks).get_version("MEDIA").unwrap(), Some(9));
    }

    #[test]
    fn test_unrecorded_version_uses_baseline() {
        let (session, locks, status) = setup();
        session
            .execute_ddl("CREATE TABLE MEDIA (ID INTEGER PRIMARY KEY, NAME TEXT)")
            .unwrap();
        session.execute("INSERT INTO MEDIA (NAME) VALUES ('kept')", []).unwrap();
        let engine = MigrationEngine::new(&session, &locks, &status);

        let outcome = engine
            .check_and_upgrade("MEDIA", 4, &create_media, &steps_2_to_4(), Some(2))
            .unwrap();
        assert_eq!(outcome, UpgradeOutcome::Upgraded { from: 2, to: 4 });
        assert_eq!(session.count_rows("MEDIA").unwrap(), 1);
    }

    #[test]
    fn test_unrecorded_version_without_baseline_recreates() {
        let (session, locks, status) = setup();
        session
            .execute_ddl("CREATE TABLE MEDIA (ID INTEGER PRIMARY KEY, NAME TEXT)")
            .unwrap();
        let engine = MigrationEngine::new(&session, &locks, &status);

        let outcome = engine
            .check_and_upgrade("MEDIA", 4, &create_media, &steps_2_to_4(), None)
            .unwrap();
        assert_eq!(outcome, UpgradeOutcome::Recreated { from: None, to: 4 });
        assert!(session.column_exists("MEDIA", "C").unwrap());
    }

    #[test]
    fn test_migration_reports_status() {
        let (session, locks, _) = setup();
        seed_v2(&session, &locks);
        let (status, rx) = StatusSink::channel();
        let engine = MigrationEngine::new(&session, &locks, &status);
        engine
            .check_and_upgrade("MEDIA", 4, &create_media, &steps_2_to_4(), None)
            .unwrap();

        let messages: Vec<String> = rx.try_iter().map(|m| m.to_string()).collect();
        assert!(messages.iter().any(|m| m.starts_with("Migrating database to v4")));
    }
}
