//! Entity store seam
//!
//! The host content system owns entities, their schema and their storage.
//! Reftree only sees it through [`EntityStore`] and the [`Entity`] snapshot.

pub mod memory;

use std::collections::BTreeMap;
use std::fmt;
use crate::Result;
use crate::key::{EntityKey, EntityRef, UNVERSIONED};

pub use memory::{EntityTypeInfo, MemoryEntityStore};

/// A loaded content entity.
///
/// `fields` holds only reference-valued fields: each position is either the
/// referenced entity or `None` for an empty slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub entity_type: String,
    pub bundle: String,
    /// `None` until the entity store assigns one
    pub id: Option<i64>,
    /// `None` until saved; unused for non-versioned types
    pub version_id: Option<i64>,
    pub default_version: bool,
    pub published: bool,
    pub fields: BTreeMap<String, Vec<Option<Entity>>>,
}

impl Entity {
    /// Create a new, unsaved entity
    pub fn new(entity_type: impl Into<String>, bundle: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            bundle: bundle.into(),
            id: None,
            version_id: None,
            default_version: true,
            published: false,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_version(mut self, version_id: i64) -> Self {
        self.version_id = Some(version_id);
        self
    }

    pub fn with_published(mut self, published: bool) -> Self {
        self.published = published;
        self
    }

    /// Append a reference (or an empty slot) to `field_name`
    pub fn with_reference(mut self, field_name: &str, target: Option<Entity>) -> Self {
        self.fields.entry(field_name.to_string()).or_default().push(target);
        self
    }

    /// Replace the whole value list of `field_name`
    pub fn set_references(&mut self, field_name: &str, targets: Vec<Option<Entity>>) {
        self.fields.insert(field_name.to_string(), targets);
    }

    pub fn clear_field(&mut self, field_name: &str) {
        self.fields.remove(field_name);
    }

    /// Value list of `field_name`, if the field is set at all
    pub fn references(&self, field_name: &str) -> Option<&[Option<Entity>]> {
        self.fields.get(field_name).map(|v| v.as_slice())
    }

    pub fn is_default_version(&self) -> bool {
        self.default_version
    }

    pub fn is_published(&self) -> bool {
        self.published
    }

    /// `(type, id)` identity, once the entity has been saved
    pub fn entity_ref(&self) -> Option<EntityRef> {
        self.id.map(|id| EntityRef::new(self.entity_type.clone(), id))
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.id, self.version_id) {
            (Some(id), Some(version)) => write!(f, "{}/{}/{}@{}", self.entity_type, self.bundle, id, version),
            (Some(id), None) => write!(f, "{}/{}/{}", self.entity_type, self.bundle, id),
            (None, _) => write!(f, "{}/{} (unsaved)", self.entity_type, self.bundle),
        }
    }
}

/// What a field-type descriptor can hold.
///
/// The entity store tags every field type statically; reference tracking
/// only looks at this tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldCapability {
    /// Any non-reference value
    Value,
    /// A reference to entities of `target_type`
    Reference { target_type: String },
    /// A list type built on references to `target_type`
    ReferenceList { target_type: String },
}

impl FieldCapability {
    /// Target entity type when the field holds references
    pub fn reference_target(&self) -> Option<&str> {
        match self {
            FieldCapability::Value => None,
            FieldCapability::Reference { target_type }
            | FieldCapability::ReferenceList { target_type } => Some(target_type),
        }
    }
}

/// A field attached to an entity type and bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: String,
    /// Base fields exist on every bundle of the type and are never tracked
    pub base: bool,
    pub capability: FieldCapability,
}

impl FieldDefinition {
    pub fn value(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            base: false,
            capability: FieldCapability::Value,
        }
    }

    pub fn reference(name: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: "entity_reference".to_string(),
            base: false,
            capability: FieldCapability::Reference {
                target_type: target_type.into(),
            },
        }
    }

    pub fn reference_list(
        name: impl Into<String>,
        field_type: impl Into<String>,
        target_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            base: false,
            capability: FieldCapability::ReferenceList {
                target_type: target_type.into(),
            },
        }
    }

    /// Mark as a base field of the entity type
    pub fn base_field(mut self) -> Self {
        self.base = true;
        self
    }
}

/// The host content system, seen from the reference tree.
pub trait EntityStore {
    /// Load the canonical (default) version of an entity
    fn load(&self, entity_type: &str, entity_id: i64) -> Result<Option<Entity>>;

    /// Load one specific version of a versioned entity
    fn load_version(&self, entity_type: &str, version_id: i64) -> Result<Option<Entity>>;

    /// Persist `entity`, assigning id and version as needed
    fn save(&self, entity: &mut Entity) -> Result<()>;

    /// All fields attached to a type and bundle, base fields included
    fn field_definitions(&self, entity_type: &str, bundle: &str) -> Result<Vec<FieldDefinition>>;

    fn is_versioned(&self, entity_type: &str) -> bool;

    /// Whether entities of this type carry a publication state
    fn is_publishable_kind(&self, entity_type: &str) -> bool;

    /// Configuration-kind types are schema/settings, not content
    fn is_config_kind(&self, entity_type: &str) -> bool;

    /// Composite key of a saved entity, `None` if it lacks durable identity
    fn key_of(&self, entity: &Entity) -> Option<EntityKey> {
        let id = entity.id?;
        let version_id = if self.is_versioned(&entity.entity_type) {
            entity.version_id?
        } else {
            UNVERSIONED
        };
        Some(EntityKey::new(
            entity.entity_type.clone(),
            entity.bundle.clone(),
            id,
            version_id,
        ))
    }

    /// Load the entity a stored key points at
    fn load_key(&self, key: &EntityKey) -> Result<Option<Entity>> {
        if self.is_versioned(&key.entity_type) {
            self.load_version(&key.entity_type, key.version_id)
        } else {
            self.load(&key.entity_type, key.entity_id)
        }
    }
}
