//! In-memory entity store
//!
//! A small, self-contained [`EntityStore`] used by the test suites and handy
//! for embedding the reference tree without a real content system.

use std::cell::RefCell;
use std::collections::HashMap;
use crate::Result;
use super::{Entity, EntityStore, FieldDefinition};

/// Per-type capabilities known to the memory store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityTypeInfo {
    pub versioned: bool,
    pub publishable: bool,
    pub config: bool,
}

impl EntityTypeInfo {
    /// A plain content type: not versioned, no publication state
    pub fn content() -> Self {
        Self::default()
    }

    /// A configuration-kind type
    pub fn config() -> Self {
        Self {
            config: true,
            ..Self::default()
        }
    }

    pub fn versioned(mut self) -> Self {
        self.versioned = true;
        self
    }

    pub fn publishable(mut self) -> Self {
        self.publishable = true;
        self
    }
}

#[derive(Debug, Default)]
struct Inner {
    types: HashMap<String, EntityTypeInfo>,
    fields: HashMap<(String, String), Vec<FieldDefinition>>,
    /// Default version of every entity, keyed by (type, id)
    canonical: HashMap<(String, i64), Entity>,
    /// Every saved version of versioned entities, keyed by (type, version)
    versions: HashMap<(String, i64), Entity>,
    next_id: i64,
    next_version: i64,
    saves: usize,
}

/// [`EntityStore`] backed by hash maps.
///
/// Single-threaded: state sits in a `RefCell`, so the store is not `Sync`.
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    inner: RefCell<Inner>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_type(&self, entity_type: &str, info: EntityTypeInfo) {
        self.inner.borrow_mut().types.insert(entity_type.to_string(), info);
    }

    /// Replace the field definitions attached to a type and bundle
    pub fn define_fields(&self, entity_type: &str, bundle: &str, fields: Vec<FieldDefinition>) {
        self.inner
            .borrow_mut()
            .fields
            .insert((entity_type.to_string(), bundle.to_string()), fields);
    }

    /// Save `entity` as a brand new version (versioned types only)
    pub fn save_new_version(&self, entity: &mut Entity, default_version: bool) -> Result<()> {
        entity.version_id = None;
        entity.default_version = default_version;
        self.save(entity)
    }

    /// Drop an entity and all of its versions
    pub fn delete(&self, entity_type: &str, entity_id: i64) {
        let mut inner = self.inner.borrow_mut();
        inner.canonical.remove(&(entity_type.to_string(), entity_id));
        inner
            .versions
            .retain(|(t, _), e| !(t == entity_type && e.id == Some(entity_id)));
    }

    /// Number of `save` calls so far
    pub fn save_count(&self) -> usize {
        self.inner.borrow().saves
    }

    fn info(&self, entity_type: &str) -> EntityTypeInfo {
        self.inner
            .borrow()
            .types
            .get(entity_type)
            .copied()
            .unwrap_or_default()
    }
}

impl EntityStore for MemoryEntityStore {
    fn load(&self, entity_type: &str, entity_id: i64) -> Result<Option<Entity>> {
        let inner = self.inner.borrow();
        let entity = inner
            .canonical
            .get(&(entity_type.to_string(), entity_id))
            .cloned()
            .map(|mut e| {
                e.default_version = true;
                e
            });
        Ok(entity)
    }

    fn load_version(&self, entity_type: &str, version_id: i64) -> Result<Option<Entity>> {
        let inner = self.inner.borrow();
        let Some(entity) = inner.versions.get(&(entity_type.to_string(), version_id)) else {
            return Ok(None);
        };

        let mut entity = entity.clone();
        entity.default_version = entity
            .id
            .and_then(|id| inner.canonical.get(&(entity_type.to_string(), id)))
            .map(|current| current.version_id == Some(version_id))
            .unwrap_or(false);
        Ok(Some(entity))
    }

    fn save(&self, entity: &mut Entity) -> Result<()> {
        let info = self.info(&entity.entity_type);
        let mut inner = self.inner.borrow_mut();

        let id = match entity.id {
            Some(id) => id,
            None => {
                inner.next_id += 1;
                entity.id = Some(inner.next_id);
                inner.next_id
            }
        };

        if info.versioned {
            let version = match entity.version_id {
                Some(version) => version,
                None => {
                    inner.next_version += 1;
                    entity.version_id = Some(inner.next_version);
                    inner.next_version
                }
            };
            inner
                .versions
                .insert((entity.entity_type.clone(), version), entity.clone());
        }

        let replaces_default = !info.versioned
            || entity.default_version
            || !inner.canonical.contains_key(&(entity.entity_type.clone(), id));
        if replaces_default {
            inner
                .canonical
                .insert((entity.entity_type.clone(), id), entity.clone());
        }

        inner.saves += 1;
        Ok(())
    }

    fn field_definitions(&self, entity_type: &str, bundle: &str) -> Result<Vec<FieldDefinition>> {
        Ok(self
            .inner
            .borrow()
            .fields
            .get(&(entity_type.to_string(), bundle.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn is_versioned(&self, entity_type: &str) -> bool {
        self.info(entity_type).versioned
    }

    fn is_publishable_kind(&self, entity_type: &str) -> bool {
        self.info(entity_type).publishable
    }

    fn is_config_kind(&self, entity_type: &str) -> bool {
        self.info(entity_type).config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryEntityStore {
        let store = MemoryEntityStore::new();
        store.define_type("node", EntityTypeInfo::content().versioned().publishable());
        store.define_type("media", EntityTypeInfo::content());
        store
    }

    #[test]
    fn test_save_assigns_identity() {
        let store = store();
        let mut node = Entity::new("node", "article");
        store.save(&mut node).unwrap();
        assert!(node.id.is_some());
        assert!(node.version_id.is_some());

        let mut media = Entity::new("media", "image");
        store.save(&mut media).unwrap();
        assert!(media.id.is_some());
        assert_eq!(media.version_id, None);
        assert_eq!(store.save_count(), 2);
    }

    #[test]
    fn test_versions_track_default() {
        let store = store();
        let mut node = Entity::new("node", "article").with_published(true);
        store.save(&mut node).unwrap();
        let first = node.version_id.unwrap();

        store.save_new_version(&mut node, true).unwrap();
        let second = node.version_id.unwrap();
        assert_ne!(first, second);

        let old = store.load_version("node", first).unwrap().unwrap();
        assert!(!old.is_default_version());
        let current = store.load_version("node", second).unwrap().unwrap();
        assert!(current.is_default_version());

        let canonical = store.load("node", node.id.unwrap()).unwrap().unwrap();
        assert_eq!(canonical.version_id, Some(second));
    }

    #[test]
    fn test_non_default_version_keeps_canonical() {
        let store = store();
        let mut node = Entity::new("node", "article");
        store.save(&mut node).unwrap();
        let published = node.version_id.unwrap();

        let mut draft = node.clone();
        store.save_new_version(&mut draft, false).unwrap();

        let canonical = store.load("node", node.id.unwrap()).unwrap().unwrap();
        assert_eq!(canonical.version_id, Some(published));
    }

    #[test]
    fn test_delete_removes_all_versions() {
        let store = store();
        let mut node = Entity::new("node", "article");
        store.save(&mut node).unwrap();
        let version = node.version_id.unwrap();
        let id = node.id.unwrap();

        store.delete("node", id);
        assert!(store.load("node", id).unwrap().is_none());
        assert!(store.load_version("node", version).unwrap().is_none());
    }
}
