//! Reference tree manager
//!
//! One value per logical session: it owns the field map and the lookup
//! caches, and borrows the edge store and the entity store. Entity save and
//! delete hooks go to the reconciler, queries go to the tree resolver.

use serde::Serialize;
use crate::Result;
use crate::cache::CacheStats;
use crate::config::ReftreeConfig;
use crate::edge::ReferenceEdge;
use crate::entity::{Entity, EntityStore};
use crate::reconcile::{Reconciler, SaveReport};
use crate::storage::SqliteStore;
use crate::tree::{EntityGrouping, ResolverStats, TreeResolver};

/// Cache counters across the whole manager.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ManagerStats {
    pub field_map: CacheStats,
    pub lookups: ResolverStats,
}

pub struct ReferenceTreeManager<'a, S: EntityStore + ?Sized> {
    reconciler: Reconciler<'a, S>,
    resolver: TreeResolver<'a, S>,
}

impl<'a, S: EntityStore + ?Sized> ReferenceTreeManager<'a, S> {
    /// Manager with default cache sizes and identity policy
    pub fn new(edges: &'a SqliteStore, entities: &'a S) -> Self {
        Self::with_config(edges, entities, &ReftreeConfig::default())
    }

    pub fn with_config(edges: &'a SqliteStore, entities: &'a S, config: &ReftreeConfig) -> Self {
        let cache = config.cache;
        Self {
            reconciler: Reconciler::new(edges, entities, cache.field_map, config.identity_policy),
            resolver: TreeResolver::new(edges, entities, cache.parents, cache.roots, cache.published),
        }
    }

    // ========== Entity Hooks ==========

    /// Entity was saved: converge its stored edges
    pub fn on_save(&mut self, entity: &mut Entity) -> Result<SaveReport> {
        self.reconciler.on_save(entity)
    }

    /// Entity was deleted: drop every edge touching it
    pub fn on_delete(&mut self, entity: &Entity) -> Result<usize> {
        self.reconciler.on_delete(entity)
    }

    pub fn delete_by_field(&mut self, entity: &Entity, field_name: &str) -> Result<usize> {
        self.reconciler.delete_by_field(entity, field_name)
    }

    pub fn delete_by_type(&mut self, entity_type: &str, bundle: Option<&str>) -> Result<usize> {
        self.reconciler.delete_by_type(entity_type, bundle)
    }

    // ========== Queries ==========

    pub fn existing_references(&self, entity: &Entity, field_name: &str) -> Result<Vec<ReferenceEdge>> {
        self.reconciler.existing_references(entity, field_name)
    }

    pub fn get_parents(&mut self, entity: &Entity) -> Result<EntityGrouping> {
        self.resolver.get_parents(entity)
    }

    pub fn has_parents(&mut self, entity: &Entity) -> Result<bool> {
        self.resolver.has_parents(entity)
    }

    pub fn parents_if_any(&mut self, entity: &Entity) -> Result<Option<EntityGrouping>> {
        self.resolver.parents_if_any(entity)
    }

    pub fn get_roots(&mut self, entity: &Entity) -> Result<EntityGrouping> {
        self.resolver.get_roots(entity)
    }

    pub fn is_published_descendant(&mut self, entity: &Entity) -> Result<bool> {
        self.resolver.is_published_descendant(entity)
    }

    pub fn get_published_ancestors(&mut self, entity: &Entity) -> Result<Vec<Entity>> {
        self.resolver.get_published_ancestors(entity)
    }

    /// Drop memoized parent, root and published lookups.
    ///
    /// Writes never invalidate these on their own.
    pub fn clear_caches(&mut self) {
        self.resolver.clear_caches();
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            field_map: self.reconciler.field_resolver().stats(),
            lookups: self.resolver.stats(),
        }
    }
}
