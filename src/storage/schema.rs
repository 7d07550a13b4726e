//! Database schema definitions

/// SQL to create the reference edge table
pub const CREATE_REFERENCE_TREE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entity_reference_tree (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    field_name TEXT NOT NULL,
    field_delta INTEGER NOT NULL,
    entity_type TEXT NOT NULL,
    entity_bundle TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    entity_version_id INTEGER NOT NULL DEFAULT 0,
    referenced_entity_type TEXT NOT NULL,
    referenced_entity_bundle TEXT NOT NULL,
    referenced_entity_id INTEGER NOT NULL,
    referenced_entity_version_id INTEGER NOT NULL DEFAULT 0
)
"#;

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_reference_tree_position ON entity_reference_tree(
        entity_type, entity_bundle, entity_id, entity_version_id, field_name, field_delta
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_reference_tree_referenced ON entity_reference_tree(
        referenced_entity_type, referenced_entity_bundle, referenced_entity_id, referenced_entity_version_id
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_reference_tree_field ON entity_reference_tree(field_name)",
];

/// All schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![CREATE_REFERENCE_TREE_TABLE];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}
