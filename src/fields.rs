//! Reference Field Resolver
//!
//! Decides which fields of a type+bundle produce tracked edges. A field is
//! tracked when:
//! 1. its field type carries the reference capability,
//! 2. it is not a base field of the entity type,
//! 3. its target type is not a configuration kind.

use crate::Result;
use crate::cache::{BoundedCache, CacheStats};
use crate::entity::EntityStore;

/// Cached map of (entity_type, bundle) to tracked field names.
#[derive(Debug)]
pub struct ReferenceFieldResolver {
    cache: BoundedCache<(String, String), Vec<String>>,
}

impl ReferenceFieldResolver {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: BoundedCache::new(capacity),
        }
    }

    /// Tracked field names in definition order. Empty means "do not track".
    pub fn resolve<S: EntityStore + ?Sized>(
        &mut self,
        store: &S,
        entity_type: &str,
        bundle: &str,
    ) -> Result<Vec<String>> {
        let cache_key = (entity_type.to_string(), bundle.to_string());
        if let Some(fields) = self.cache.get(&cache_key) {
            return Ok(fields);
        }

        let mut fields: Vec<String> = Vec::new();
        for definition in store.field_definitions(entity_type, bundle)? {
            let Some(target_type) = definition.capability.reference_target() else {
                continue;
            };
            if definition.base {
                continue;
            }
            if store.is_config_kind(target_type) {
                tracing::debug!(
                    "Not tracking {}.{}: target {} is configuration",
                    entity_type,
                    definition.name,
                    target_type
                );
                continue;
            }
            if !fields.contains(&definition.name) {
                fields.push(definition.name);
            }
        }

        self.cache.put(cache_key, fields.clone());
        Ok(fields)
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
