//! Schema versioning
//!
//! - `registry`: the `TABLES_VERSIONS` bookkeeping table
//! - `plan`: table descriptors and their ordered steps
//! - `engine`: applies a plan to a store

pub mod engine;
pub mod plan;
pub mod registry;

pub use engine::{MigrationEngine, TableVersion, UpgradeOutcome, VersionState};
pub use plan::{CreateFn, MigrationPlan, StepFn, StepProvider, TableDescriptor};
pub use registry::{VersionRegistry, VERSIONS_TABLE};
