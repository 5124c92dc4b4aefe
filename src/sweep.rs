//! Referential cleanup sweep
//!
//! Deletes rows nothing live points at any more. Two passes run, parents
//! first:
//!
//! 1. File-backed tables: a row goes when its file is gone, its mtime moved,
//!    or it lies outside the shared roots.
//! 2. Dependent tables: a row goes when none of its declared links resolves
//!    to a parent row.
//!
//! Each delete holds the write lock of the table it deletes from. Running the
//! sweep twice in a row deletes nothing the second time.

use crate::guard::LockRegistry;
use crate::status::{StatusMessage, StatusPhase, StatusSink};
use crate::storage::Session;
use crate::{Error, Result};
use rusqlite::params_from_iter;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, trace};

/// Ids deleted per statement in the file pass
const DELETE_BATCH: usize = 500;

/// `child.child_column` refers to `parent.parent_column`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub child: String,
    pub child_column: String,
    pub parent: String,
    pub parent_column: String,
}

/// A table whose rows describe files on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBackedTable {
    pub table: String,
    pub id_column: String,
    pub path_column: String,
    /// File mtime in milliseconds since the Unix epoch
    pub modified_column: String,
}

impl FileBackedTable {
    pub fn new(table: &str, id_column: &str, path_column: &str, modified_column: &str) -> Self {
        Self {
            table: table.to_string(),
            id_column: id_column.to_string(),
            path_column: path_column.to_string(),
            modified_column: modified_column.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SweepPlan {
    file_backed: Vec<FileBackedTable>,
    dependencies: Vec<Dependency>,
}

impl SweepPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_backed(mut self, table: FileBackedTable) -> Self {
        self.file_backed.push(table);
        self
    }

    pub fn depends(mut self, child: &str, child_column: &str, parent: &str, parent_column: &str) -> Self {
        self.dependencies.push(Dependency {
            child: child.to_string(),
            child_column: child_column.to_string(),
            parent: parent.to_string(),
            parent_column: parent_column.to_string(),
        });
        self
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn file_backed_tables(&self) -> &[FileBackedTable] {
        &self.file_backed
    }

    fn links_of(&self, child: &str) -> Vec<&Dependency> {
        self.dependencies.iter().filter(|d| d.child == child).collect()
    }

    /// Every table of the plan, parents before the tables depending on them.
    /// Ties are broken by name so the order is stable.
    pub fn order(&self) -> Result<Vec<String>> {
        let mut tables: BTreeSet<&str> = self.file_backed.iter().map(|t| t.table.as_str()).collect();
        let mut children: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();

        for dep in &self.dependencies {
            tables.insert(dep.child.as_str());
            tables.insert(dep.parent.as_str());
            if dep.child == dep.parent {
                return Err(Error::DependencyCycle(format!("{} refers to itself", dep.child)));
            }
            if children.entry(dep.parent.as_str()).or_default().insert(dep.child.as_str()) {
                *in_degree.entry(dep.child.as_str()).or_default() += 1;
            }
        }

        let mut ready: BTreeSet<&str> = tables
            .iter()
            .copied()
            .filter(|t| in_degree.get(t).copied().unwrap_or(0) == 0)
            .collect();
        let mut order = Vec::with_capacity(tables.len());

        while let Some(table) = ready.pop_first() {
            order.push(table.to_string());
            for &child in children.get(table).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(child);
                    }
                }
            }
        }

        if order.len() < tables.len() {
            let stuck: Vec<&str> = tables
                .iter()
                .copied()
                .filter(|t| !order.iter().any(|o| o == t))
                .collect();
            return Err(Error::DependencyCycle(stuck.join(", ")));
        }
        Ok(order)
    }

    /// Reject identifiers that could not have come from a table definition
    fn validate(&self) -> Result<()> {
        let names = self
            .file_backed
            .iter()
            .flat_map(|t| [&t.table, &t.id_column, &t.path_column, &t.modified_column])
            .chain(
                self.dependencies
                    .iter()
                    .flat_map(|d| [&d.child, &d.child_column, &d.parent, &d.parent_column]),
            );
        for name in names {
            let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(Error::Config(format!("invalid identifier in sweep plan: {:?}", name)));
            }
        }
        Ok(())
    }
}

/// Rows deleted per table by one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub deleted: BTreeMap<String, usize>,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.deleted.values().sum()
    }

    pub fn deleted_from(&self, table: &str) -> usize {
        self.deleted.get(table).copied().unwrap_or(0)
    }

    fn add(&mut self, table: &str, count: usize) {
        *self.deleted.entry(table.to_string()).or_default() += count;
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sweep Report:")?;
        for (table, count) in &self.deleted {
            writeln!(f, "  {:<24} {}", table, count)?;
        }
        write!(f, "  {:<24} {}", "total", self.total())
    }
}

pub struct Sweeper<'a> {
    session: &'a Session,
    locks: &'a LockRegistry,
    status: &'a StatusSink,
    shared_roots: &'a [PathBuf],
}

impl<'a> Sweeper<'a> {
    /// An empty `shared_roots` puts no restriction on file locations
    pub fn new(session: &'a Session, locks: &'a LockRegistry, status: &'a StatusSink, shared_roots: &'a [PathBuf]) -> Self {
        Self {
            session,
            locks,
            status,
            shared_roots,
        }
    }

    pub fn run(&self, plan: &SweepPlan) -> Result<SweepReport> {
        plan.validate()?;
        let order = plan.order()?;
        let mut report = SweepReport::default();

        self.status.send(StatusMessage::Started {
            phase: StatusPhase::Sweeping,
            total: order.len(),
        });

        for table in &order {
            if let Some(backed) = plan.file_backed.iter().find(|t| &t.table == table) {
                let removed = self.sweep_files(plan, backed)?;
                report.add(table, removed);
            }
        }
        for table in &order {
            let links = plan.links_of(table);
            if links.is_empty() {
                continue;
            }
            let removed = self.sweep_unreachable(table, &links)?;
            report.add(table, removed);
        }

        self.status.send(StatusMessage::Finished {
            phase: StatusPhase::Sweeping,
        });
        info!("Sweep removed {} rows", report.total());
        Ok(report)
    }

    /// Delete rows of a file-backed table whose file is stale. The table's
    /// direct dependents are locked too, since deleting may cascade into them.
    fn sweep_files(&self, plan: &SweepPlan, backed: &FileBackedTable) -> Result<usize> {
        let mut tables: Vec<&str> = vec![backed.table.as_str()];
        tables.extend(
            plan.dependencies
                .iter()
                .filter(|d| d.parent == backed.table)
                .map(|d| d.child.as_str()),
        );

        self.locks.with_write_all(&tables, || {
            let total = self.session.count_rows(&backed.table)?;
            let mut checked = 0usize;
            let mut last_percent = None;
            let mut stale = Vec::new();

            let sql = format!(
                "SELECT {}, {}, {} FROM {}",
                backed.id_column, backed.path_column, backed.modified_column, backed.table
            );
            self.session.for_each_row(&sql, [], |row| {
                checked += 1;
                let id = row.i64(&backed.id_column);
                let path = row.text(&backed.path_column);
                let modified = row.i64(&backed.modified_column);
                if let (Some(id), Some(path)) = (id, path) {
                    if let Some(reason) = self.stale_reason(Path::new(path), modified) {
                        trace!("Sweeping {} row {} ({}): {}", backed.table, id, path, reason);
                        stale.push(id);
                    }
                }

                let percent = if total == 0 { 100 } else { (checked.min(total) * 100 / total) as u8 };
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    self.status.send(StatusMessage::Progress {
                        phase: StatusPhase::Sweeping,
                        percent,
                    });
                }
                Ok(())
            })?;

            if stale.is_empty() {
                return Ok(0);
            }
            self.session.atomic(|s| {
                let mut removed = 0;
                for batch in stale.chunks(DELETE_BATCH) {
                    let placeholders = vec!["?"; batch.len()].join(", ");
                    removed += s.execute(
                        &format!(
                            "DELETE FROM {} WHERE {} IN ({})",
                            backed.table, backed.id_column, placeholders
                        ),
                        params_from_iter(batch.iter()),
                    )?;
                }
                debug!("Removed {} stale rows from {}", removed, backed.table);
                Ok(removed)
            })
        })
    }

    fn stale_reason(&self, path: &Path, modified: Option<i64>) -> Option<&'static str> {
        if !self.shared_roots.is_empty() && !self.shared_roots.iter().any(|root| path.starts_with(root)) {
            return Some("outside shared roots");
        }
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(_) => return Some("file is gone"),
        };
        match (modified, modified_millis(&metadata)) {
            (Some(recorded), Some(actual)) if recorded != actual => Some("file changed"),
            (None, _) => Some("no recorded mtime"),
            _ => None,
        }
    }

    /// Delete rows of `child` none of whose links resolve
    fn sweep_unreachable(&self, child: &str, links: &[&Dependency]) -> Result<usize> {
        let reachable = links
            .iter()
            .map(|d| {
                format!(
                    "({child}.{col} IS NOT NULL AND EXISTS (SELECT 1 FROM {parent} WHERE {parent}.{pcol} = {child}.{col}))",
                    child = child,
                    col = d.child_column,
                    parent = d.parent,
                    pcol = d.parent_column,
                )
            })
            .collect::<Vec<_>>()
            .join(" OR ");
        let sql = format!("DELETE FROM {} WHERE NOT ({})", child, reachable);

        self.locks.with_write(child, || {
            let removed = self.session.execute(&sql, [])?;
            if removed > 0 {
                debug!("Removed {} unreachable rows from {}", removed, child);
            }
            Ok(removed)
        })
    }
}

/// File mtime in milliseconds since the Unix epoch
pub fn modified_millis(metadata: &fs::Metadata) -> Option<i64> {
    let modified = metadata.modified().ok()?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).ok()?;
    Some(since_epoch.as_millis() as i64)
}
