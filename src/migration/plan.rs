//! Table descriptors and the migration plan
//!
//! A descriptor carries everything needed to bring one table to its target
//! version: the create function for a fresh table and one step per version
//! transition. A plan lists descriptors in dependency order, parents first.

use crate::storage::Session;
use crate::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Builds the table at its target version
pub type CreateFn = Arc<dyn Fn(&Session) -> Result<()> + Send + Sync>;

/// Moves the table from the given version to the next one
pub type StepFn = Arc<dyn Fn(&Session, u32) -> Result<()> + Send + Sync>;

/// Lookup of migration steps by the version they start from
pub trait StepProvider {
    fn step(&self, from: u32) -> Option<&StepFn>;
}

impl StepProvider for BTreeMap<u32, StepFn> {
    fn step(&self, from: u32) -> Option<&StepFn> {
        self.get(&from)
    }
}

#[derive(Clone)]
pub struct TableDescriptor {
    name: String,
    target_version: u32,
    legacy_baseline: Option<u32>,
    preserve_on_reset: bool,
    create: CreateFn,
    steps: BTreeMap<u32, StepFn>,
}

impl fmt::Debug for TableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableDescriptor")
            .field("name", &self.name)
            .field("target_version", &self.target_version)
            .field("legacy_baseline", &self.legacy_baseline)
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TableDescriptor {
    pub fn new<F>(name: &str, target_version: u32, create: F) -> Self
    where
        F: Fn(&Session) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            target_version,
            legacy_baseline: None,
            preserve_on_reset: false,
            create: Arc::new(create),
            steps: BTreeMap::new(),
        }
    }

    /// Register the step moving the table from `from` to `from + 1`
    pub fn step<F>(mut self, from: u32, step: F) -> Self
    where
        F: Fn(&Session, u32) -> Result<()> + Send + Sync + 'static,
    {
        self.steps.insert(from, Arc::new(step));
        self
    }

    /// Version assumed for a table that exists with no recorded version
    pub fn legacy_baseline(mut self, version: u32) -> Self {
        self.legacy_baseline = Some(version);
        self
    }

    /// Keep this table (and its rows) when the cache is reset
    pub fn preserve_on_reset(mut self) -> Self {
        self.preserve_on_reset = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_version(&self) -> u32 {
        self.target_version
    }

    pub fn baseline(&self) -> Option<u32> {
        self.legacy_baseline
    }

    pub fn is_preserved_on_reset(&self) -> bool {
        self.preserve_on_reset
    }

    pub fn creator(&self) -> &CreateFn {
        &self.create
    }
}

impl StepProvider for TableDescriptor {
    fn step(&self, from: u32) -> Option<&StepFn> {
        self.steps.get(&from)
    }
}

/// Descriptors in the order they are checked
#[derive(Debug, Clone, Default)]
pub struct MigrationPlan {
    tables: Vec<TableDescriptor>,
}

impl MigrationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, table: TableDescriptor) -> Self {
        self.tables.push(table);
        self
    }

    pub fn tables(&self) -> &[TableDescriptor] {
        &self.tables
    }

    pub fn get(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }
}
