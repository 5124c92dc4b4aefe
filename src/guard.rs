//! Per-table read/write locks
//!
//! Every table has one lock, created when the registry is built. Readers of a
//! table run concurrently, a writer excludes everyone else on that table only.
//! The locks are task-fair: once a writer waits, new readers queue behind it.
//!
//! Rules enforced here:
//! - multi-table operations lock in lexicographic table order
//! - a thread that already holds a table lock in the same or a stronger mode
//!   re-enters without locking again
//! - a held read lock is never upgraded; that attempt fails with
//!   [`Error::LockUpgrade`]

use crate::{Error, Result};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Locks held by the current thread, keyed by (registry, table)
    static HELD: RefCell<HashMap<(u64, String), LockMode>> = RefCell::new(HashMap::new());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

/// Lock per table name, built once and shared by every worker
#[derive(Debug)]
pub struct LockRegistry {
    id: u64,
    locks: HashMap<String, RwLock<()>>,
}

impl LockRegistry {
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let locks = tables
            .into_iter()
            .map(|t| (t.into(), RwLock::new(())))
            .collect();
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            locks,
        }
    }

    /// Registered table names in lock order
    pub fn tables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.locks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn contains(&self, table: &str) -> bool {
        self.locks.contains_key(table)
    }

    /// Mode in which the current thread holds `table`, if at all
    pub fn held_mode(&self, table: &str) -> Option<LockMode> {
        HELD.with(|held| held.borrow().get(&(self.id, table.to_string())).copied())
    }

    fn lock(&self, table: &str) -> Result<&RwLock<()>> {
        self.locks
            .get(table)
            .ok_or_else(|| Error::UnknownTable(table.to_string()))
    }

    /// Run `f` under the read lock of `table`
    pub fn with_read<T>(&self, table: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self.read_guard(table)?;
        f()
    }

    /// Run `f` under the write lock of `table`
    pub fn with_write<T>(&self, table: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self.write_guard(table)?;
        f()
    }

    /// Run `f` holding the write locks of every table in `tables`, acquired
    /// in lexicographic order
    pub fn with_write_all<T>(&self, tables: &[&str], f: impl FnOnce() -> Result<T>) -> Result<T> {
        let mut ordered: Vec<&str> = tables.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        for table in &ordered {
            self.lock(table)?;
            if self.held_mode(table) == Some(LockMode::Read) {
                return Err(Error::LockUpgrade(table.to_string()));
            }
        }

        let mut guards = Vec::with_capacity(ordered.len());
        for table in ordered {
            guards.push(self.write_guard(table)?);
        }
        f()
    }

    /// Read lock that lives as long as the returned guard. Use it when the
    /// result is a live cursor rather than a collected value.
    pub fn read_guard(&self, table: &str) -> Result<TableGuard<'_>> {
        let lock = self.lock(table)?;
        if self.held_mode(table).is_some() {
            return Ok(TableGuard::reentrant());
        }
        let guard = lock.read();
        trace!(table, "read lock acquired");
        Ok(TableGuard {
            _marker: Some(HeldMarker::new(self.id, table, LockMode::Read)),
            _inner: Some(Inner::Read(guard)),
        })
    }

    /// Write lock that lives as long as the returned guard
    pub fn write_guard(&self, table: &str) -> Result<TableGuard<'_>> {
        let lock = self.lock(table)?;
        match self.held_mode(table) {
            Some(LockMode::Write) => return Ok(TableGuard::reentrant()),
            Some(LockMode::Read) => return Err(Error::LockUpgrade(table.to_string())),
            None => {}
        }
        let guard = lock.write();
        trace!(table, "write lock acquired");
        Ok(TableGuard {
            _marker: Some(HeldMarker::new(self.id, table, LockMode::Write)),
            _inner: Some(Inner::Write(guard)),
        })
    }
}

enum Inner<'a> {
    Read(#[allow(dead_code)] RwLockReadGuard<'a, ()>),
    Write(#[allow(dead_code)] RwLockWriteGuard<'a, ()>),
}

/// Held table lock; released on drop
pub struct TableGuard<'a> {
    _marker: Option<HeldMarker>,
    _inner: Option<Inner<'a>>,
}

impl TableGuard<'_> {
    fn reentrant() -> Self {
        Self {
            _marker: None,
            _inner: None,
        }
    }

    /// False when the lock was already held by this thread
    pub fn is_owner(&self) -> bool {
        self._inner.is_some()
    }
}

struct HeldMarker {
    registry: u64,
    table: String,
}

impl HeldMarker {
    fn new(registry: u64, table: &str, mode: LockMode) -> Self {
        HELD.with(|held| {
            held.borrow_mut().insert((registry, table.to_string()), mode);
        });
        Self {
            registry,
            table: table.to_string(),
        }
    }
}

impl Drop for HeldMarker {
    fn drop(&mut self) {
        HELD.with(|held| {
            held.borrow_mut().remove(&(self.registry, std::mem::take(&mut self.table)));
        });
        trace!("table lock released");
    }
}
