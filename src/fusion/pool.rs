//! Per-class fusion pools.

use std::collections::BTreeMap;

use tracing::debug;

use crate::entity::{Entity, EntityType};

/// Fusion candidates grouped by class, in processing order.
#[derive(Debug, Clone, Default)]
pub struct FusionPool {
    classes: BTreeMap<EntityType, Vec<Entity>>,
    excluded: usize,
}

impl FusionPool {
    /// Classes with their ordered candidates.
    #[must_use]
    pub fn classes(&self) -> &BTreeMap<EntityType, Vec<Entity>> {
        &self.classes
    }

    /// Candidates of one class; empty if the class has none.
    #[must_use]
    pub fn class(&self, class: &EntityType) -> &[Entity] {
        self.classes.get(class).map(Vec::as_slice).unwrap_or_default()
    }

    /// Inputs dropped for carrying no external link of any kind.
    #[must_use]
    pub fn excluded(&self) -> usize {
        self.excluded
    }

    /// Candidates across all classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_classes(self) -> BTreeMap<EntityType, Vec<Entity>> {
        self.classes
    }

    fn push(&mut self, entity: Entity) {
        if !entity.has_external_links() {
            debug!(entity = %entity.name, class = %entity.entity_type, "no link or reference; excluded from fusion");
            self.excluded += 1;
            return;
        }
        self.classes.entry(entity.entity_type.clone()).or_default().push(entity);
    }
}

/// Builds the per-class pool: linked entities first, then entities that
/// gained references, each in input order.
#[must_use]
pub fn build_fusion_pool(linked_entities: Vec<Entity>, entities_with_refs: Vec<Entity>) -> FusionPool {
    let mut pool = FusionPool::default();
    for entity in linked_entities.into_iter().chain(entities_with_refs) {
        pool.push(entity);
    }
    pool
}
