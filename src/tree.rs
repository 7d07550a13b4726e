//! Tree Resolver - parent, root and published-ancestor queries
//!
//! Walks edges upward (child to parent) through `query_by_referenced`,
//! loading each referencing entity version through the entity store.
//! Public root and published answers are memoized per
//! `(entity_type, entity_id)`. Parent lookups are per entity version, since
//! each revision carries its own edges.

use std::collections::{BTreeMap, HashMap, HashSet};
use crate::{Error, Result};
use crate::cache::{BoundedCache, CacheStats};
use crate::entity::{Entity, EntityStore};
use crate::key::{EntityKey, EntityRef};
use crate::storage::SqliteStore;

/// Loaded entities grouped as `entity_type -> entity_id -> version_id -> entity`.
///
/// Non-versioned entities sit under version `0`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityGrouping {
    groups: BTreeMap<String, BTreeMap<i64, BTreeMap<i64, Entity>>>,
}

impl EntityGrouping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &EntityKey, entity: Entity) {
        self.groups
            .entry(key.entity_type.clone())
            .or_default()
            .entry(key.entity_id)
            .or_default()
            .insert(key.version_id, entity);
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of entity versions held
    pub fn len(&self) -> usize {
        self.groups
            .values()
            .flat_map(|ids| ids.values())
            .map(|versions| versions.len())
            .sum()
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(|t| t.as_str())
    }

    /// All versions of all entities of one type, keyed by id
    pub fn of_type(&self, entity_type: &str) -> Option<&BTreeMap<i64, BTreeMap<i64, Entity>>> {
        self.groups.get(entity_type)
    }

    pub fn get(&self, entity_type: &str, entity_id: i64, version_id: i64) -> Option<&Entity> {
        self.groups.get(entity_type)?.get(&entity_id)?.get(&version_id)
    }

    /// Whether any version of `(entity_type, entity_id)` is present
    pub fn contains(&self, entity_ref: &EntityRef) -> bool {
        self.groups
            .get(&entity_ref.entity_type)
            .is_some_and(|ids| ids.contains_key(&entity_ref.entity_id))
    }

    /// Every held entity with the key it is filed under
    pub fn iter(&self) -> impl Iterator<Item = (EntityKey, &Entity)> {
        self.groups.iter().flat_map(|(entity_type, ids)| {
            ids.iter().flat_map(move |(entity_id, versions)| {
                versions.iter().map(move |(version_id, entity)| {
                    (
                        EntityKey::new(entity_type.clone(), entity.bundle.clone(), *entity_id, *version_id),
                        entity,
                    )
                })
            })
        })
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.groups
            .values()
            .flat_map(|ids| ids.values())
            .flat_map(|versions| versions.values())
    }
}

/// Cache counters of a resolver.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ResolverStats {
    pub parents: CacheStats,
    pub roots: CacheStats,
    pub published: CacheStats,
}

/// Read-only traversal of the reference tree.
pub struct TreeResolver<'a, S: EntityStore + ?Sized> {
    edges: &'a SqliteStore,
    entities: &'a S,
    parents: BoundedCache<EntityKey, EntityGrouping>,
    roots: BoundedCache<EntityRef, EntityGrouping>,
    published: BoundedCache<EntityRef, Vec<Entity>>,
}

impl<'a, S: EntityStore + ?Sized> TreeResolver<'a, S> {
    pub fn new(
        edges: &'a SqliteStore,
        entities: &'a S,
        parents_capacity: usize,
        roots_capacity: usize,
        published_capacity: usize,
    ) -> Self {
        Self {
            edges,
            entities,
            parents: BoundedCache::new(parents_capacity),
            roots: BoundedCache::new(roots_capacity),
            published: BoundedCache::new(published_capacity),
        }
    }

    /// Direct parents of `entity`: every loadable entity version that
    /// references it. Edges whose parent no longer loads are skipped.
    pub fn get_parents(&mut self, entity: &Entity) -> Result<EntityGrouping> {
        let key = self.key_of(entity)?;
        self.parents_of(&key)
    }

    pub fn has_parents(&mut self, entity: &Entity) -> Result<bool> {
        Ok(!self.get_parents(entity)?.is_empty())
    }

    /// The parent grouping, or `None` when `entity` has no parents
    pub fn parents_if_any(&mut self, entity: &Entity) -> Result<Option<EntityGrouping>> {
        let parents = self.get_parents(entity)?;
        Ok((!parents.is_empty()).then_some(parents))
    }

    /// Ancestors reachable upward that have no parents of their own.
    ///
    /// An entity without parents has no roots (it is not its own root).
    pub fn get_roots(&mut self, entity: &Entity) -> Result<EntityGrouping> {
        let key = self.key_of(entity)?;
        let cache_key = key.entity_ref();
        if let Some(roots) = self.roots.get(&cache_key) {
            return Ok(roots);
        }

        let mut roots = EntityGrouping::new();
        let mut path = vec![key.clone()];
        let mut settled = HashMap::new();
        self.collect_roots(&key, &mut path, &mut settled, &mut roots)?;

        self.roots.put(cache_key, roots.clone());
        Ok(roots)
    }

    /// Published ancestors at any depth.
    ///
    /// An ancestor counts when its type is publishable, the loaded version is
    /// the default version and it is published.
    pub fn get_published_ancestors(&mut self, entity: &Entity) -> Result<Vec<Entity>> {
        let key = self.key_of(entity)?;
        let cache_key = key.entity_ref();
        if let Some(published) = self.published.get(&cache_key) {
            return Ok(published);
        }

        let mut published = Vec::new();
        let mut path = vec![key.clone()];
        let mut visited = HashSet::new();
        self.collect_published(&key, &mut path, &mut visited, &mut published)?;

        self.published.put(cache_key, published.clone());
        Ok(published)
    }

    /// Whether `entity` belongs to published content
    pub fn is_published_descendant(&mut self, entity: &Entity) -> Result<bool> {
        Ok(!self.get_published_ancestors(entity)?.is_empty())
    }

    /// Forget every memoized lookup
    pub fn clear_caches(&mut self) {
        self.parents.clear();
        self.roots.clear();
        self.published.clear();
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            parents: self.parents.stats(),
            roots: self.roots.stats(),
            published: self.published.stats(),
        }
    }

    fn key_of(&self, entity: &Entity) -> Result<EntityKey> {
        self.entities
            .key_of(entity)
            .ok_or_else(|| Error::UnsavedEntity(entity.to_string()))
    }

    fn parents_of(&mut self, key: &EntityKey) -> Result<EntityGrouping> {
        if let Some(parents) = self.parents.get(key) {
            return Ok(parents);
        }

        let mut parents = EntityGrouping::new();
        for edge in self.edges.query_by_referenced(key)? {
            match self.entities.load_key(&edge.referencing)? {
                Some(parent) => parents.insert(&edge.referencing, parent),
                None => tracing::debug!("Skipping stale edge {}: {} no longer loads", edge.id, edge.referencing),
            }
        }

        self.parents.put(key.clone(), parents.clone());
        Ok(parents)
    }

    fn enter(path: &[EntityKey], key: &EntityKey) -> Result<()> {
        if path.contains(key) {
            tracing::warn!("Reference cycle through {}", key);
            return Err(Error::CycleDetected(key.entity_ref()));
        }
        Ok(())
    }

    /// Returns whether `key` has any loadable parent
    fn collect_roots(
        &mut self,
        key: &EntityKey,
        path: &mut Vec<EntityKey>,
        settled: &mut HashMap<EntityKey, bool>,
        roots: &mut EntityGrouping,
    ) -> Result<bool> {
        let parents = self.parents_of(key)?;

        for (parent_key, parent) in parents.iter() {
            Self::enter(path, &parent_key)?;

            let has_parents = match settled.get(&parent_key) {
                Some(has_parents) => *has_parents,
                None => {
                    path.push(parent_key.clone());
                    let has_parents = self.collect_roots(&parent_key, path, settled, roots)?;
                    path.pop();
                    settled.insert(parent_key.clone(), has_parents);
                    has_parents
                }
            };

            if !has_parents {
                roots.insert(&parent_key, parent.clone());
            }
        }

        Ok(!parents.is_empty())
    }

    fn collect_published(
        &mut self,
        key: &EntityKey,
        path: &mut Vec<EntityKey>,
        visited: &mut HashSet<EntityKey>,
        published: &mut Vec<Entity>,
    ) -> Result<()> {
        let parents = self.parents_of(key)?;

        for (parent_key, parent) in parents.iter() {
            Self::enter(path, &parent_key)?;
            if !visited.insert(parent_key.clone()) {
                continue;
            }

            if self.counts_as_published(parent) {
                published.push(parent.clone());
            }

            path.push(parent_key.clone());
            self.collect_published(&parent_key, path, visited, published)?;
            path.pop();
        }

        Ok(())
    }

    fn counts_as_published(&self, entity: &Entity) -> bool {
        if !self.entities.is_publishable_kind(&entity.entity_type) {
            return false;
        }
        let canonical = !self.entities.is_versioned(&entity.entity_type) || entity.is_default_version();
        canonical && entity.is_published()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::ReferenceEdge;
    use crate::entity::{EntityTypeInfo, MemoryEntityStore};

    struct Fixture {
        edges: SqliteStore,
        entities: MemoryEntityStore,
    }

    impl Fixture {
        fn new() -> Self {
            let entities = MemoryEntityStore::new();
            entities.define_type("node", EntityTypeInfo::content().versioned().publishable());
            entities.define_type("paragraph", EntityTypeInfo::content().versioned());
            entities.define_type("media", EntityTypeInfo::content());
            Self {
                edges: SqliteStore::open_in_memory().unwrap(),
                entities,
            }
        }

        fn resolver(&self) -> TreeResolver<'_, MemoryEntityStore> {
            TreeResolver::new(&self.edges, &self.entities, 64, 64, 64)
        }

        fn save(&self, mut entity: Entity) -> Entity {
            self.entities.save(&mut entity).unwrap();
            entity
        }

        fn node(&self, published: bool) -> Entity {
            self.save(Entity::new("node", "article").with_published(published))
        }

        fn paragraph(&self) -> Entity {
            self.save(Entity::new("paragraph", "text"))
        }

        fn media(&self) -> Entity {
            self.save(Entity::new("media", "image"))
        }

        /// Record `parent -> child` at the next free delta of "field_ref"
        fn link(&self, parent: &Entity, child: &Entity) {
            let parent_key = self.entities.key_of(parent).unwrap();
            let delta = self.edges.query_by_referencing(&parent_key, Some("field_ref")).unwrap().len() as i64;
            self.edges
                .insert_edge(&ReferenceEdge::new(
                    "field_ref",
                    delta,
                    parent_key,
                    self.entities.key_of(child).unwrap(),
                ))
                .unwrap();
        }
    }

    fn ids(grouping: &EntityGrouping, entity_type: &str) -> Vec<i64> {
        grouping
            .of_type(entity_type)
            .map(|ids| ids.keys().copied().collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_get_parents_groups_by_type_id_version() {
        let fx = Fixture::new();
        let media = fx.media();
        let node = fx.node(false);
        let paragraph = fx.paragraph();
        fx.link(&node, &media);
        fx.link(&paragraph, &media);

        let parents = fx.resolver().get_parents(&media).unwrap();
        assert_eq!(parents.len(), 2);
        assert_eq!(ids(&parents, "node"), vec![node.id.unwrap()]);
        assert_eq!(ids(&parents, "paragraph"), vec![paragraph.id.unwrap()]);
        assert!(parents
            .get("node", node.id.unwrap(), node.version_id.unwrap())
            .is_some());
    }

    #[test]
    fn test_has_parents_and_parents_if_any() {
        let fx = Fixture::new();
        let media = fx.media();
        let orphan = fx.media();
        let node = fx.node(false);
        fx.link(&node, &media);

        let mut resolver = fx.resolver();
        assert!(resolver.has_parents(&media).unwrap());
        assert!(!resolver.has_parents(&orphan).unwrap());
        assert!(resolver.parents_if_any(&orphan).unwrap().is_none());
        let parents = resolver.parents_if_any(&media).unwrap().unwrap();
        assert!(parents.contains(&node.entity_ref().unwrap()));
    }

    #[test]
    fn test_stale_edges_are_skipped() {
        let fx = Fixture::new();
        let media = fx.media();
        let node = fx.node(false);
        let gone = fx.node(false);
        fx.link(&node, &media);
        fx.link(&gone, &media);
        fx.entities.delete("node", gone.id.unwrap());

        let parents = fx.resolver().get_parents(&media).unwrap();
        assert_eq!(ids(&parents, "node"), vec![node.id.unwrap()]);
    }

    #[test]
    fn test_roots_of_chain_are_topmost_only() {
        let fx = Fixture::new();
        let a = fx.node(false);
        let b = fx.paragraph();
        let c = fx.media();
        fx.link(&a, &b);
        fx.link(&b, &c);

        let roots = fx.resolver().get_roots(&c).unwrap();
        assert_eq!(roots.len(), 1);
        assert!(roots.contains(&a.entity_ref().unwrap()));
        assert!(!roots.contains(&b.entity_ref().unwrap()));
    }

    #[test]
    fn test_roots_of_diamond_and_unrooted_entity() {
        let fx = Fixture::new();
        let top = fx.node(false);
        let left = fx.paragraph();
        let right = fx.paragraph();
        let other_top = fx.node(false);
        let leaf = fx.media();
        fx.link(&top, &left);
        fx.link(&top, &right);
        fx.link(&other_top, &right);
        fx.link(&left, &leaf);
        fx.link(&right, &leaf);

        let mut resolver = fx.resolver();
        let roots = resolver.get_roots(&leaf).unwrap();
        assert_eq!(ids(&roots, "node"), {
            let mut expected = vec![top.id.unwrap(), other_top.id.unwrap()];
            expected.sort();
            expected
        });
        assert!(roots.of_type("paragraph").is_none());

        assert!(resolver.get_roots(&top).unwrap().is_empty());
    }

    #[test]
    fn test_cycle_is_detected() {
        let fx = Fixture::new();
        let a = fx.paragraph();
        let b = fx.paragraph();
        let leaf = fx.media();
        fx.link(&a, &b);
        fx.link(&b, &a);
        fx.link(&a, &leaf);

        let mut resolver = fx.resolver();
        assert!(matches!(resolver.get_roots(&leaf), Err(Error::CycleDetected(_))));
        assert!(matches!(
            resolver.get_published_ancestors(&leaf),
            Err(Error::CycleDetected(_))
        ));
    }

    #[test]
    fn test_published_ancestor_at_any_depth() {
        let fx = Fixture::new();
        let top = fx.node(true);
        let paragraph = fx.paragraph();
        let media = fx.media();
        fx.link(&top, &paragraph);
        fx.link(&paragraph, &media);

        let mut resolver = fx.resolver();
        assert!(resolver.is_published_descendant(&media).unwrap());
        let ancestors = resolver.get_published_ancestors(&media).unwrap();
        assert_eq!(ancestors.len(), 1);
        assert_eq!(ancestors[0].id, top.id);
    }

    #[test]
    fn test_unpublished_tree_is_not_published() {
        let fx = Fixture::new();
        let top = fx.node(false);
        let media = fx.media();
        fx.link(&top, &media);

        assert!(!fx.resolver().is_published_descendant(&media).unwrap());
    }

    #[test]
    fn test_published_non_default_version_does_not_count() {
        let fx = Fixture::new();
        let media = fx.media();

        // Default version is unpublished; a newer published draft references media
        let node = fx.node(false);
        let mut draft = node.clone().with_published(true);
        fx.entities.save_new_version(&mut draft, false).unwrap();
        fx.link(&draft, &media);

        let mut resolver = fx.resolver();
        assert!(resolver.has_parents(&media).unwrap());
        assert!(!resolver.is_published_descendant(&media).unwrap());
    }

    #[test]
    fn test_outdated_published_version_does_not_count() {
        let fx = Fixture::new();
        let media = fx.media();
        let mut node = fx.node(true);
        fx.link(&node, &media);
        node.published = false;
        fx.entities.save_new_version(&mut node, true).unwrap();

        assert!(!fx.resolver().is_published_descendant(&media).unwrap());
    }

    #[test]
    fn test_non_publishable_kind_never_counts() {
        let fx = Fixture::new();
        let media = fx.media();
        let paragraph = fx.save(Entity::new("paragraph", "text").with_published(true));
        fx.link(&paragraph, &media);

        assert!(!fx.resolver().is_published_descendant(&media).unwrap());
    }

    #[test]
    fn test_each_revision_is_walked_for_published() {
        let fx = Fixture::new();
        let media = fx.media();

        // node@1 -> paragraph@1 -> media, unpublished
        let paragraph = fx.paragraph();
        let node = fx.node(false);
        fx.link(&node, &paragraph);
        fx.link(&paragraph, &media);

        // node@2 -> paragraph@2 -> media, published default
        let mut paragraph_v2 = paragraph.clone();
        fx.entities.save_new_version(&mut paragraph_v2, true).unwrap();
        fx.link(&paragraph_v2, &media);
        let mut node_v2 = node.clone().with_published(true);
        fx.entities.save_new_version(&mut node_v2, true).unwrap();
        fx.link(&node_v2, &paragraph_v2);

        for (parents, roots, published) in [(0, 0, 0), (64, 64, 64)] {
            let mut resolver = TreeResolver::new(&fx.edges, &fx.entities, parents, roots, published);
            let ancestors = resolver.get_published_ancestors(&media).unwrap();
            assert_eq!(ancestors.len(), 1);
            assert_eq!(ancestors[0].version_id, node_v2.version_id);
            assert!(resolver.is_published_descendant(&media).unwrap());
        }
    }

    #[test]
    fn test_roots_include_parentless_revision() {
        let fx = Fixture::new();
        let media = fx.media();
        let paragraph = fx.paragraph();
        let node = fx.node(false);
        fx.link(&node, &paragraph);
        fx.link(&paragraph, &media);

        // A newer paragraph revision nobody references yet
        let mut paragraph_v2 = paragraph.clone();
        fx.entities.save_new_version(&mut paragraph_v2, true).unwrap();
        fx.link(&paragraph_v2, &media);

        let roots = fx.resolver().get_roots(&media).unwrap();
        assert_eq!(roots.len(), 2);
        assert!(roots
            .get("node", node.id.unwrap(), node.version_id.unwrap())
            .is_some());
        assert!(roots
            .get("paragraph", paragraph.id.unwrap(), paragraph_v2.version_id.unwrap())
            .is_some());
        assert!(roots
            .get("paragraph", paragraph.id.unwrap(), paragraph.version_id.unwrap())
            .is_none());
    }

    #[test]
    fn test_results_are_memoized_until_cleared() {
        let fx = Fixture::new();
        let media = fx.media();
        let node = fx.node(true);

        let mut resolver = fx.resolver();
        assert!(!resolver.is_published_descendant(&media).unwrap());

        fx.link(&node, &media);
        assert!(!resolver.is_published_descendant(&media).unwrap());
        assert!(resolver.stats().published.hits >= 1);

        resolver.clear_caches();
        assert!(resolver.is_published_descendant(&media).unwrap());
    }

    #[test]
    fn test_unsaved_entity_is_rejected() {
        let fx = Fixture::new();
        let err = fx.resolver().get_parents(&Entity::new("media", "image")).unwrap_err();
        assert!(matches!(err, Error::UnsavedEntity(_)));
    }
}
