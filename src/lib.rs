//! # Reftree - Entity Reference Tree Tracking
//!
//! Persistent index of reference edges between versioned content entities.
//!
//! Reftree provides:
//! - SQLite-backed edge storage (`entity_reference_tree` table)
//! - Incremental reconciliation of stored edges on every entity save
//! - Parent, root and published-ancestor queries with bounded memoization
//! - An `EntityStore` trait at the seam to the host content system

pub mod key;
pub mod edge;
pub mod entity;
pub mod cache;
pub mod fields;
pub mod storage;
pub mod reconcile;
pub mod tree;
pub mod manager;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use key::{EntityKey, EntityRef, UNVERSIONED};
pub use edge::{EdgeFilter, ReferenceEdge};
pub use entity::{Entity, EntityStore, FieldCapability, FieldDefinition};
pub use reconcile::{IdentityPolicy, Reconciler, SaveReport};
pub use tree::{EntityGrouping, TreeResolver};
pub use manager::ReferenceTreeManager;
pub use storage::SqliteStore;

/// Result type alias for Reftree operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Reftree operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid entity key: {0}")]
    InvalidKey(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Edge already stored for {referencing} at {field_name}[{field_delta}]")]
    ConstraintViolation {
        referencing: EntityKey,
        field_name: String,
        field_delta: i64,
    },

    #[error("Referenced {entity_type} entity at {field_name}[{field_delta}] has no durable identity")]
    MissingReferencedIdentity {
        field_name: String,
        field_delta: i64,
        entity_type: String,
    },

    #[error("Entity has no identity: {0}")]
    UnsavedEntity(String),

    #[error("Reference cycle detected at {0}")]
    CycleDetected(EntityRef),

    #[error("Entity store error: {0}")]
    EntityStore(String),
}
