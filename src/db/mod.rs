//! SQLite persistence for positions, their ledgers and sync state.

pub mod migrations;
pub mod repo;

pub use migrations::{init_db, SCHEMA_VERSION};
pub use repo::{InsertOutcome, Repository};
