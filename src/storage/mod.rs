//! Storage Layer - SQLite-backed persistence
//!
//! - `session`: one connection with typed queries, transactions and schema
//!   introspection
//! - `provider`: opens sessions and recovers damaged or outdated stores
//! - `schema`: DDL of the media tables, current and historical

pub mod provider;
pub mod schema;
pub mod session;

pub use provider::{OpenOutcome, RetryInstruction, SessionProvider, APPLICATION_ID, STORE_FORMAT_VERSION};
pub use session::Session;
