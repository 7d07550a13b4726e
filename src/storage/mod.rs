//! Storage Layer - SQLite-backed persistence
//!
//! System of record is one SQLite table:
//! - entity_reference_tree(id, field_name, field_delta, entity_*, referenced_entity_*)

pub mod schema;
pub mod sqlite;

pub use sqlite::{SqliteStore, DbStats};
