//! SQLite storage implementation

use std::path::Path;
use rusqlite::{Connection, params, params_from_iter};
use serde::Serialize;
use crate::{Result, Error};
use crate::edge::{EdgeFilter, ReferenceEdge};
use crate::key::EntityKey;
use super::schema;

const EDGE_COLUMNS: &str = "id, field_name, field_delta, \
    entity_type, entity_bundle, entity_id, entity_version_id, \
    referenced_entity_type, referenced_entity_bundle, referenced_entity_id, referenced_entity_version_id";

const SAVEPOINT: &str = "reftree_write";

/// SQLite-backed storage for reference edges
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the database schema
    fn initialize_schema(&self) -> Result<()> {
        for stmt in schema::all_schema_statements() {
            self.conn.execute(stmt, [])?;
        }
        Ok(())
    }

    // ========== Edge Operations ==========

    /// Insert a new edge and return its assigned id.
    ///
    /// Fails with [`Error::ConstraintViolation`] when the referencing entity
    /// version already has a row at the same field position.
    pub fn insert_edge(&self, edge: &ReferenceEdge) -> Result<i64> {
        let result = self.conn.execute(
            r#"
            INSERT INTO entity_reference_tree (
                field_name, field_delta,
                entity_type, entity_bundle, entity_id, entity_version_id,
                referenced_entity_type, referenced_entity_bundle, referenced_entity_id, referenced_entity_version_id
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                edge.field_name,
                edge.field_delta,
                edge.referencing.entity_type,
                edge.referencing.bundle,
                edge.referencing.entity_id,
                edge.referencing.version_id,
                edge.referenced.entity_type,
                edge.referenced.bundle,
                edge.referenced.entity_id,
                edge.referenced.version_id,
            ],
        );

        match result {
            Ok(_) => Ok(self.conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::ConstraintViolation {
                    referencing: edge.referencing.clone(),
                    field_name: edge.field_name.clone(),
                    field_delta: edge.field_delta,
                })
            }
            Err(e) => Err(Error::Storage(e)),
        }
    }

    /// Move the row identified by `id` to `new_delta`.
    ///
    /// Returns `false` when no row matched.
    pub fn update_delta(&self, id: i64, new_delta: i64) -> Result<bool> {
        let result = self.conn.execute(
            "UPDATE entity_reference_tree SET field_delta = ?1 WHERE id = ?2",
            params![new_delta, id],
        );

        match result {
            Ok(changed) => Ok(changed > 0),
            Err(rusqlite::Error::SqliteFailure(err, detail))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                match self.get_edge(id)? {
                    Some(edge) => Err(Error::ConstraintViolation {
                        referencing: edge.referencing,
                        field_name: edge.field_name,
                        field_delta: new_delta,
                    }),
                    None => Err(Error::Storage(rusqlite::Error::SqliteFailure(err, detail))),
                }
            }
            Err(e) => Err(Error::Storage(e)),
        }
    }

    /// Delete every row matching `filter`, returning the number removed
    pub fn delete_matching(&self, filter: &EdgeFilter) -> Result<usize> {
        let (clause, values) = filter.to_sql();
        let sql = format!("DELETE FROM entity_reference_tree WHERE {}", clause);
        let deleted = self.conn.execute(&sql, params_from_iter(values))?;
        Ok(deleted)
    }

    /// Get rows matching `filter`, ordered by referencing key, field and delta
    pub fn query_matching(&self, filter: &EdgeFilter) -> Result<Vec<ReferenceEdge>> {
        let (clause, values) = filter.to_sql();
        let sql = format!(
            "SELECT {} FROM entity_reference_tree WHERE {} \
             ORDER BY entity_type, entity_bundle, entity_id, entity_version_id, field_name, field_delta, id",
            EDGE_COLUMNS, clause
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let edges = stmt
            .query_map(params_from_iter(values), |row| self.row_to_edge(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(edges)
    }

    /// Get edges pointing at `key` (reverse lookup, child to parent)
    pub fn query_by_referenced(&self, key: &EntityKey) -> Result<Vec<ReferenceEdge>> {
        self.query_matching(&EdgeFilter::new().referenced(key))
    }

    /// Get edges recorded for `key`, optionally restricted to one field
    pub fn query_by_referencing(&self, key: &EntityKey, field_name: Option<&str>) -> Result<Vec<ReferenceEdge>> {
        let mut filter = EdgeFilter::referencing(key);
        if let Some(field_name) = field_name {
            filter = filter.field(field_name);
        }
        self.query_matching(&filter)
    }

    /// Get a single edge by id
    pub fn get_edge(&self, id: i64) -> Result<Option<ReferenceEdge>> {
        let sql = format!("SELECT {} FROM entity_reference_tree WHERE id = ?1", EDGE_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map([id], |row| self.row_to_edge(row))?;
        let edge = rows.next().transpose()?;
        Ok(edge)
    }

    /// Get all edges
    pub fn all_edges(&self) -> Result<Vec<ReferenceEdge>> {
        self.query_matching(&EdgeFilter::new())
    }

    /// Count all edges
    pub fn count_edges(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM entity_reference_tree", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Helper to convert a row to a ReferenceEdge
    fn row_to_edge(&self, row: &rusqlite::Row) -> rusqlite::Result<ReferenceEdge> {
        Ok(ReferenceEdge {
            id: row.get(0)?,
            field_name: row.get(1)?,
            field_delta: row.get(2)?,
            referencing: EntityKey {
                entity_type: row.get(3)?,
                bundle: row.get(4)?,
                entity_id: row.get(5)?,
                version_id: row.get(6)?,
            },
            referenced: EntityKey {
                entity_type: row.get(7)?,
                bundle: row.get(8)?,
                entity_id: row.get(9)?,
                version_id: row.get(10)?,
            },
        })
    }

    // ========== Bulk Operations ==========

    /// Run `f` inside a savepoint: released on success, rolled back on error.
    ///
    /// Savepoints nest, so this composes with a caller's own transaction.
    pub fn in_savepoint<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.conn.execute_batch(&format!("SAVEPOINT {}", SAVEPOINT))?;
        match f(self) {
            Ok(value) => {
                self.conn.execute_batch(&format!("RELEASE {}", SAVEPOINT))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self
                    .conn
                    .execute_batch(&format!("ROLLBACK TO {0}; RELEASE {0}", SAVEPOINT))
                {
                    tracing::error!("Failed to roll back savepoint: {}", rollback);
                }
                Err(e)
            }
        }
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let distinct = |columns: &str| -> Result<usize> {
            let sql = format!(
                "SELECT COUNT(*) FROM (SELECT DISTINCT {} FROM entity_reference_tree)",
                columns
            );
            let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(count as usize)
        };

        Ok(DbStats {
            edges: self.count_edges()?,
            referencing_entities: distinct("entity_type, entity_id")?,
            referenced_entities: distinct("referenced_entity_type, referenced_entity_id")?,
            fields: distinct("entity_type, entity_bundle, field_name")?,
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, Serialize)]
pub struct DbStats {
    pub edges: usize,
    pub referencing_entities: usize,
    pub referenced_entities: usize,
    pub fields: usize,
}

impl std::fmt::Display for DbStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Reference Tree Statistics:")?;
        writeln!(f, "  Edges: {}", self.edges)?;
        writeln!(f, "  Referencing entities: {}", self.referencing_entities)?;
        writeln!(f, "  Referenced entities: {}", self.referenced_entities)?;
        writeln!(f, "  Fields: {}", self.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(id: i64, version: i64) -> EntityKey {
        EntityKey::new("node", "article", id, version)
    }

    fn image(id: i64) -> EntityKey {
        EntityKey::unversioned("media", "image", id)
    }

    #[test]
    fn test_edge_crud() {
        let store = SqliteStore::open_in_memory().unwrap();

        let edge = ReferenceEdge::new("field_media", 0, article(1, 10), image(5));
        let id = store.insert_edge(&edge).unwrap();
        assert!(id > 0);

        let from = store.query_by_referencing(&article(1, 10), None).unwrap();
        assert_eq!(from.len(), 1);
        assert_eq!(from[0].id, id);
        assert_eq!(from[0].referenced, image(5));

        let to = store.query_by_referenced(&image(5)).unwrap();
        assert_eq!(to.len(), 1);
        assert_eq!(to[0].referencing, article(1, 10));
    }

    #[test]
    fn test_duplicate_position_is_constraint_violation() {
        let store = SqliteStore::open_in_memory().unwrap();

        store
            .insert_edge(&ReferenceEdge::new("field_media", 0, article(1, 10), image(5)))
            .unwrap();
        let err = store
            .insert_edge(&ReferenceEdge::new("field_media", 0, article(1, 10), image(6)))
            .unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation { field_delta: 0, .. }));

        // Same position on another version is a distinct row
        store
            .insert_edge(&ReferenceEdge::new("field_media", 0, article(1, 11), image(6)))
            .unwrap();
        assert_eq!(store.count_edges().unwrap(), 2);
    }

    #[test]
    fn test_update_delta() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .insert_edge(&ReferenceEdge::new("field_media", 0, article(1, 10), image(5)))
            .unwrap();

        assert!(store.update_delta(id, 3).unwrap());
        assert_eq!(store.get_edge(id).unwrap().unwrap().field_delta, 3);

        assert!(!store.update_delta(id + 100, 1).unwrap());
    }

    #[test]
    fn test_query_by_referencing_field() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_edge(&ReferenceEdge::new("field_media", 0, article(1, 10), image(5)))
            .unwrap();
        store
            .insert_edge(&ReferenceEdge::new("field_related", 0, article(1, 10), article(2, 20)))
            .unwrap();

        let media = store.query_by_referencing(&article(1, 10), Some("field_media")).unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].field_name, "field_media");
        assert_eq!(store.query_by_referencing(&article(1, 10), None).unwrap().len(), 2);
    }

    #[test]
    fn test_delete_matching_by_type_and_bundle() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_edge(&ReferenceEdge::new("field_media", 0, article(1, 10), image(5)))
            .unwrap();
        store
            .insert_edge(&ReferenceEdge::new(
                "field_media",
                0,
                EntityKey::new("node", "page", 2, 20),
                image(5),
            ))
            .unwrap();

        let filter = EdgeFilter::new().entity_type("node").entity_bundle("article");
        assert_eq!(store.delete_matching(&filter).unwrap(), 1);
        assert_eq!(store.count_edges().unwrap(), 1);

        assert_eq!(store.delete_matching(&EdgeFilter::new().entity_type("node")).unwrap(), 1);
        assert_eq!(store.count_edges().unwrap(), 0);
    }

    #[test]
    fn test_savepoint_rolls_back_on_error() {
        let store = SqliteStore::open_in_memory().unwrap();

        let result: Result<()> = store.in_savepoint(|s| {
            s.insert_edge(&ReferenceEdge::new("field_media", 0, article(1, 10), image(5)))?;
            s.insert_edge(&ReferenceEdge::new("field_media", 0, article(1, 10), image(6)))?;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(store.count_edges().unwrap(), 0);

        store
            .in_savepoint(|s| s.insert_edge(&ReferenceEdge::new("field_media", 0, article(1, 10), image(5))))
            .unwrap();
        assert_eq!(store.count_edges().unwrap(), 1);
    }

    #[test]
    fn test_stats() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_edge(&ReferenceEdge::new("field_media", 0, article(1, 10), image(5)))
            .unwrap();
        store
            .insert_edge(&ReferenceEdge::new("field_media", 1, article(1, 10), image(6)))
            .unwrap();
        store
            .insert_edge(&ReferenceEdge::new("field_media", 0, article(1, 11), image(5)))
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.edges, 3);
        assert_eq!(stats.referencing_entities, 1);
        assert_eq!(stats.referenced_entities, 2);
        assert_eq!(stats.fields, 1);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reftree.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .insert_edge(&ReferenceEdge::new("field_media", 0, article(1, 10), image(5)))
                .unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.count_edges().unwrap(), 1);
    }
}
