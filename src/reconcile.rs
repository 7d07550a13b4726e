//! Reconciler - converge stored edges to an entity's live reference values
//!
//! For every tracked field of a saved entity the reconciler compares the
//! current `(delta, referenced)` pairs with the stored rows and applies the
//! smallest change set:
//! - exact `(referenced, delta)` matches are left alone,
//! - rows whose referenced entity moved position get their delta updated,
//! - new references are inserted,
//! - rows for references that disappeared are deleted.
//!
//! Each field is written inside its own savepoint.

use serde::{Deserialize, Serialize};
use crate::{Error, Result};
use crate::edge::{EdgeFilter, ReferenceEdge};
use crate::entity::{Entity, EntityStore};
use crate::fields::ReferenceFieldResolver;
use crate::key::EntityKey;
use crate::storage::SqliteStore;

/// What to do when a referenced entity has no durable identity yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPolicy {
    /// Skip the position and report `MissingReferencedIdentity`
    #[default]
    Require,
    /// Save the referenced entity through the entity store first
    SaveFirst,
}

/// Outcome of one `on_save` call.
#[derive(Debug, Default)]
pub struct SaveReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub untouched: usize,
    /// Rows removed because the bundle has no tracked fields
    pub purged: usize,
    /// Positions skipped for lack of referenced identity
    pub skipped: Vec<Error>,
}

impl SaveReport {
    /// True when storage was not written at all
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0 && self.purged == 0
    }

    fn absorb(&mut self, field: FieldOutcome) {
        self.inserted += field.inserted;
        self.updated += field.updated;
        self.deleted += field.deleted;
        self.untouched += field.untouched;
    }
}

impl std::fmt::Display for SaveReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "inserted {}, updated {}, deleted {}, untouched {}, purged {}, skipped {}",
            self.inserted,
            self.updated,
            self.deleted,
            self.untouched,
            self.purged,
            self.skipped.len()
        )
    }
}

#[derive(Debug, Default)]
struct FieldOutcome {
    inserted: usize,
    updated: usize,
    deleted: usize,
    untouched: usize,
}

/// Planned writes for one field of one entity version.
#[derive(Debug, Default)]
struct FieldPlan {
    untouched: usize,
    /// (row id, new delta)
    updates: Vec<(i64, i64)>,
    /// (delta, referenced)
    inserts: Vec<(i64, EntityKey)>,
    deletes: Vec<ReferenceEdge>,
}

impl FieldPlan {
    fn build(current: &[(i64, EntityKey)], existing: Vec<ReferenceEdge>) -> Self {
        let mut plan = FieldPlan::default();
        let mut claimed = vec![false; existing.len()];
        let mut unmatched = Vec::new();

        // Exact matches first so they are never stolen by a moved reference
        for (delta, target) in current {
            let exact = (0..existing.len()).find(|&i| !claimed[i] && existing[i].points_at(target, *delta));
            match exact {
                Some(i) => {
                    claimed[i] = true;
                    plan.untouched += 1;
                }
                None => unmatched.push((*delta, target)),
            }
        }

        for (delta, target) in unmatched {
            let moved = (0..existing.len()).find(|&i| !claimed[i] && &existing[i].referenced == target);
            match moved {
                Some(i) => {
                    claimed[i] = true;
                    plan.updates.push((existing[i].id, delta));
                }
                None => plan.inserts.push((delta, target.clone())),
            }
        }

        plan.deletes = existing
            .into_iter()
            .zip(claimed)
            .filter_map(|(edge, claimed)| (!claimed).then_some(edge))
            .collect();

        plan
    }

    /// Deletes, then delta moves, then inserts.
    ///
    /// Moved rows are first parked on negative deltas so that swapping two
    /// positions never collides with the unique position index.
    fn apply(self, store: &SqliteStore, referencing: &EntityKey, field_name: &str) -> Result<FieldOutcome> {
        let mut outcome = FieldOutcome {
            untouched: self.untouched,
            ..FieldOutcome::default()
        };

        for edge in &self.deletes {
            outcome.deleted += store.delete_matching(&edge.exact_filter())?;
            tracing::debug!(
                "Removed {} -> {} at {}[{}]",
                referencing,
                edge.referenced,
                field_name,
                edge.field_delta
            );
        }

        if self.updates.len() > 1 {
            for (slot, (id, _)) in self.updates.iter().enumerate() {
                store.update_delta(*id, -(slot as i64) - 1)?;
            }
        }
        for (id, delta) in &self.updates {
            if store.update_delta(*id, *delta)? {
                outcome.updated += 1;
            }
        }

        for (delta, target) in self.inserts {
            let edge = ReferenceEdge::new(field_name, delta, referencing.clone(), target);
            store.insert_edge(&edge)?;
            tracing::debug!("Recorded {} -> {} at {}[{}]", referencing, edge.referenced, field_name, delta);
            outcome.inserted += 1;
        }

        Ok(outcome)
    }
}

/// Delete every edge recorded by entities of `entity_type` (and `bundle`).
pub fn purge_edges(store: &SqliteStore, entity_type: &str, bundle: Option<&str>) -> Result<usize> {
    let mut filter = EdgeFilter::new().entity_type(entity_type);
    if let Some(bundle) = bundle {
        filter = filter.entity_bundle(bundle);
    }
    let purged = store.delete_matching(&filter)?;
    if purged > 0 {
        tracing::info!("Purged {} edges for {} {:?}", purged, entity_type, bundle);
    }
    Ok(purged)
}

/// Delete every edge touching an entity, in both directions and all versions.
pub fn sever_edges(store: &SqliteStore, entity_type: &str, bundle: &str, entity_id: i64) -> Result<usize> {
    // Version is ignored by the whole-entity filters
    let anchor = EntityKey::unversioned(entity_type, bundle, entity_id);
    store.in_savepoint(|s| {
        let incoming = s.delete_matching(&EdgeFilter::referenced_entity(&anchor))?;
        let outgoing = s.delete_matching(&EdgeFilter::referencing_entity(&anchor))?;
        tracing::info!(
            "Severed {} incoming and {} outgoing edges of {}/{}/{}",
            incoming,
            outgoing,
            entity_type,
            bundle,
            entity_id
        );
        Ok(incoming + outgoing)
    })
}

/// Applies entity save/delete events to the edge store.
pub struct Reconciler<'a, S: EntityStore + ?Sized> {
    edges: &'a SqliteStore,
    entities: &'a S,
    fields: ReferenceFieldResolver,
    policy: IdentityPolicy,
}

impl<'a, S: EntityStore + ?Sized> Reconciler<'a, S> {
    pub fn new(edges: &'a SqliteStore, entities: &'a S, field_map_capacity: usize, policy: IdentityPolicy) -> Self {
        Self {
            edges,
            entities,
            fields: ReferenceFieldResolver::new(field_map_capacity),
            policy,
        }
    }

    pub fn policy(&self) -> IdentityPolicy {
        self.policy
    }

    pub fn field_resolver(&self) -> &ReferenceFieldResolver {
        &self.fields
    }

    /// Converge stored edges for `entity` to its current field values.
    ///
    /// `entity` is mutable because referenced entities may be saved first
    /// under [`IdentityPolicy::SaveFirst`].
    pub fn on_save(&mut self, entity: &mut Entity) -> Result<SaveReport> {
        let key = self.key_of(entity)?;
        let mut report = SaveReport::default();

        let field_names = self.fields.resolve(self.entities, &entity.entity_type, &entity.bundle)?;
        if field_names.is_empty() {
            report.purged = purge_edges(self.edges, &entity.entity_type, Some(&entity.bundle))?;
            return Ok(report);
        }

        for field_name in &field_names {
            let current = self.current_references(entity, field_name, &mut report.skipped)?;
            let existing = self.edges.query_by_referencing(&key, Some(field_name))?;

            if current.is_empty() {
                if !existing.is_empty() {
                    report.deleted += self.delete_field_rows(&key, field_name)?;
                }
                continue;
            }

            let plan = FieldPlan::build(&current, existing);
            let outcome = self.edges.in_savepoint(|store| plan.apply(store, &key, field_name))?;
            report.absorb(outcome);
        }

        tracing::debug!("Reconciled {}: {}", key, report);
        Ok(report)
    }

    /// Remove every edge touching `entity`, in both directions
    pub fn on_delete(&mut self, entity: &Entity) -> Result<usize> {
        let entity_id = entity
            .id
            .ok_or_else(|| Error::UnsavedEntity(entity.to_string()))?;
        sever_edges(self.edges, &entity.entity_type, &entity.bundle, entity_id)
    }

    /// Remove the edges recorded by one field of this entity version
    pub fn delete_by_field(&mut self, entity: &Entity, field_name: &str) -> Result<usize> {
        let key = self.key_of(entity)?;
        self.delete_field_rows(&key, field_name)
    }

    /// Remove the edges recorded by a whole entity type, or one of its bundles
    pub fn delete_by_type(&mut self, entity_type: &str, bundle: Option<&str>) -> Result<usize> {
        purge_edges(self.edges, entity_type, bundle)
    }

    /// Stored edges for one field of this entity version
    pub fn existing_references(&self, entity: &Entity, field_name: &str) -> Result<Vec<ReferenceEdge>> {
        let key = self.key_of(entity)?;
        self.edges.query_by_referencing(&key, Some(field_name))
    }

    fn key_of(&self, entity: &Entity) -> Result<EntityKey> {
        self.entities
            .key_of(entity)
            .ok_or_else(|| Error::UnsavedEntity(entity.to_string()))
    }

    fn delete_field_rows(&self, key: &EntityKey, field_name: &str) -> Result<usize> {
        let deleted = self
            .edges
            .delete_matching(&EdgeFilter::referencing(key).field(field_name))?;
        tracing::debug!("Cleared {} edges of {} field {}", deleted, key, field_name);
        Ok(deleted)
    }

    /// Current `(delta, referenced key)` pairs of a field, empty slots skipped
    fn current_references(
        &self,
        entity: &mut Entity,
        field_name: &str,
        skipped: &mut Vec<Error>,
    ) -> Result<Vec<(i64, EntityKey)>> {
        let Some(items) = entity.fields.get_mut(field_name) else {
            return Ok(Vec::new());
        };

        let mut pairs = Vec::with_capacity(items.len());
        for (delta, item) in items.iter_mut().enumerate() {
            let Some(target) = item.as_mut() else {
                continue;
            };
            let delta = delta as i64;

            if self.entities.key_of(target).is_none() && self.policy == IdentityPolicy::SaveFirst {
                tracing::debug!("Saving referenced {} before recording {}[{}]", target, field_name, delta);
                self.entities.save(target)?;
            }

            match self.entities.key_of(target) {
                Some(target_key) => pairs.push((delta, target_key)),
                None => {
                    let err = Error::MissingReferencedIdentity {
                        field_name: field_name.to_string(),
                        field_delta: delta,
                        entity_type: target.entity_type.clone(),
                    };
                    tracing::warn!("Skipping reference: {}", err);
                    skipped.push(err);
                }
            }
        }

        Ok(pairs)
    }
}
