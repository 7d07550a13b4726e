//! Reference edges - one stored row per field position
//!
//! An edge records that the entity version `referencing` points at the
//! entity version `referenced` from position `field_delta` of `field_name`.

use crate::key::EntityKey;
use serde::{Deserialize, Serialize};

/// A stored reference edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceEdge {
    /// Surrogate id (0 until the row is inserted)
    pub id: i64,
    /// Field on the referencing entity that holds the reference
    pub field_name: String,
    /// Position of the reference within the field
    pub field_delta: i64,
    /// Source entity version
    pub referencing: EntityKey,
    /// Target entity version
    pub referenced: EntityKey,
}

impl ReferenceEdge {
    /// Create a new edge for insertion (id will be set by DB)
    pub fn new(
        field_name: impl Into<String>,
        field_delta: i64,
        referencing: EntityKey,
        referenced: EntityKey,
    ) -> Self {
        Self {
            id: 0,
            field_name: field_name.into(),
            field_delta,
            referencing,
            referenced,
        }
    }

    /// Whether this row records `referenced` at `delta`
    pub fn points_at(&self, referenced: &EntityKey, delta: i64) -> bool {
        self.field_delta == delta && &self.referenced == referenced
    }

    /// Filter matching exactly this row's position and endpoints
    pub fn exact_filter(&self) -> EdgeFilter {
        EdgeFilter::referencing(&self.referencing)
            .field(&self.field_name)
            .delta(self.field_delta)
            .referenced(&self.referenced)
    }
}

/// Conjunction of column conditions used for bulk deletes and lookups.
///
/// Unset conditions match everything, so `EdgeFilter::default()` matches
/// the whole table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeFilter {
    pub field_name: Option<String>,
    pub field_delta: Option<i64>,
    pub entity_type: Option<String>,
    pub entity_bundle: Option<String>,
    pub entity_id: Option<i64>,
    pub entity_version_id: Option<i64>,
    pub referenced_entity_type: Option<String>,
    pub referenced_entity_bundle: Option<String>,
    pub referenced_entity_id: Option<i64>,
    pub referenced_entity_version_id: Option<i64>,
}

impl EdgeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match rows whose referencing endpoint is exactly `key`
    pub fn referencing(key: &EntityKey) -> Self {
        Self::new()
            .entity_type(&key.entity_type)
            .entity_bundle(&key.bundle)
            .entity_id(key.entity_id)
            .entity_version_id(key.version_id)
    }

    /// Match every version of the referencing entity
    pub fn referencing_entity(key: &EntityKey) -> Self {
        Self::new()
            .entity_type(&key.entity_type)
            .entity_bundle(&key.bundle)
            .entity_id(key.entity_id)
    }

    /// Match every version of the referenced entity
    pub fn referenced_entity(key: &EntityKey) -> Self {
        Self {
            referenced_entity_type: Some(key.entity_type.clone()),
            referenced_entity_bundle: Some(key.bundle.clone()),
            referenced_entity_id: Some(key.entity_id),
            ..Self::default()
        }
    }

    /// Additionally require the referenced endpoint to be exactly `key`
    pub fn referenced(mut self, key: &EntityKey) -> Self {
        self.referenced_entity_type = Some(key.entity_type.clone());
        self.referenced_entity_bundle = Some(key.bundle.clone());
        self.referenced_entity_id = Some(key.entity_id);
        self.referenced_entity_version_id = Some(key.version_id);
        self
    }

    pub fn field(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = Some(field_name.into());
        self
    }

    pub fn delta(mut self, delta: i64) -> Self {
        self.field_delta = Some(delta);
        self
    }

    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn entity_bundle(mut self, bundle: impl Into<String>) -> Self {
        self.entity_bundle = Some(bundle.into());
        self
    }

    pub fn entity_id(mut self, entity_id: i64) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    pub fn entity_version_id(mut self, version_id: i64) -> Self {
        self.entity_version_id = Some(version_id);
        self
    }

    /// True when no condition is set (the filter matches every row)
    pub fn is_unrestricted(&self) -> bool {
        self == &Self::default()
    }

    /// Render as a SQL `WHERE` body with positional parameters.
    ///
    /// Column names are fixed identifiers, only values are bound.
    pub(crate) fn to_sql(&self) -> (String, Vec<rusqlite::types::Value>) {
        use rusqlite::types::Value;

        let mut clauses = Vec::new();
        let mut values = Vec::new();

        let text = [
            ("field_name", &self.field_name),
            ("entity_type", &self.entity_type),
            ("entity_bundle", &self.entity_bundle),
            ("referenced_entity_type", &self.referenced_entity_type),
            ("referenced_entity_bundle", &self.referenced_entity_bundle),
        ];
        for (column, value) in text {
            if let Some(v) = value {
                values.push(Value::Text(v.clone()));
                clauses.push(format!("{} = ?{}", column, values.len()));
            }
        }

        let ints = [
            ("field_delta", self.field_delta),
            ("entity_id", self.entity_id),
            ("entity_version_id", self.entity_version_id),
            ("referenced_entity_id", self.referenced_entity_id),
            ("referenced_entity_version_id", self.referenced_entity_version_id),
        ];
        for (column, value) in ints {
            if let Some(v) = value {
                values.push(Value::Integer(v));
                clauses.push(format!("{} = ?{}", column, values.len()));
            }
        }

        if clauses.is_empty() {
            ("1 = 1".to_string(), values)
        } else {
            (clauses.join(" AND "), values)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = EdgeFilter::new();
        assert!(filter.is_unrestricted());
        let (sql, values) = filter.to_sql();
        assert_eq!(sql, "1 = 1");
        assert!(values.is_empty());
    }

    #[test]
    fn test_filter_binds_only_set_columns() {
        let filter = EdgeFilter::new().entity_type("node").entity_bundle("article");
        let (sql, values) = filter.to_sql();
        assert_eq!(sql, "entity_type = ?1 AND entity_bundle = ?2");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_exact_filter_covers_position_and_endpoints() {
        let edge = ReferenceEdge::new(
            "field_media",
            2,
            EntityKey::new("node", "article", 1, 5),
            EntityKey::unversioned("media", "image", 9),
        );
        let filter = edge.exact_filter();
        assert_eq!(filter.field_name.as_deref(), Some("field_media"));
        assert_eq!(filter.field_delta, Some(2));
        assert_eq!(filter.entity_version_id, Some(5));
        assert_eq!(filter.referenced_entity_id, Some(9));
        assert_eq!(filter.referenced_entity_version_id, Some(0));
    }
}
