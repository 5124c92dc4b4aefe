//! Shared handles every component works from
//!
//! One context per open store. Cloning it is cheap; worker threads take a
//! clone and open their own session through it.

use crate::config::CacheConfig;
use crate::guard::LockRegistry;
use crate::media;
use crate::migration::MigrationPlan;
use crate::status::StatusSink;
use crate::storage::{Session, SessionProvider};
use crate::sweep::SweepPlan;
use crate::Result;
use std::sync::Arc;

#[derive(Clone)]
pub struct CacheContext {
    config: Arc<CacheConfig>,
    locks: Arc<LockRegistry>,
    provider: Arc<SessionProvider>,
    plan: Arc<MigrationPlan>,
    sweep_plan: Arc<SweepPlan>,
    status: StatusSink,
}

impl std::fmt::Debug for CacheContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheContext")
            .field("store", &self.provider.describe())
            .field("tables", &self.locks.tables())
            .finish()
    }
}

impl CacheContext {
    /// Context for the media schema
    pub fn new(config: CacheConfig, status: StatusSink) -> Self {
        Self::with_plans(config, status, media::migration_plan(), media::sweep_plan())
    }

    /// Context for a custom set of tables. Locks are built for every table of
    /// `plan` plus the version registry.
    pub fn with_plans(config: CacheConfig, status: StatusSink, plan: MigrationPlan, sweep_plan: SweepPlan) -> Self {
        let mut tables: Vec<String> = plan.table_names().map(String::from).collect();
        tables.push(crate::migration::VERSIONS_TABLE.to_string());
        Self {
            provider: Arc::new(SessionProvider::new(&config)),
            locks: Arc::new(LockRegistry::new(tables)),
            config: Arc::new(config),
            plan: Arc::new(plan),
            sweep_plan: Arc::new(sweep_plan),
            status,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    pub fn provider(&self) -> &SessionProvider {
        &self.provider
    }

    pub fn plan(&self) -> &MigrationPlan {
        &self.plan
    }

    pub fn sweep_plan(&self) -> &SweepPlan {
        &self.sweep_plan
    }

    pub fn status(&self) -> &StatusSink {
        &self.status
    }

    /// Session for a worker thread on a store that is already open
    pub fn open_session(&self) -> Result<Session> {
        self.provider.session()
    }
}
