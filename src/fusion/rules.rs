//! Rule-based fusion of one class.
//!
//! Grouping is pairwise first-match absorption, not a transitive closure:
//! each new entity is folded into the first candidate that matches it,
//! scanning new entities before existing survivors.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::entity::{Entity, EntityId, EntityType};
use crate::matcher::NameMatching;
use crate::storage::{FusionGroupStore, StorageError};

use super::pool::FusionPool;

/// Result of fusing one class.
#[derive(Debug, Clone, Default)]
pub struct ClassFusion {
    /// New survivors followed by existing ones; replaces the class entry.
    pub combined: Vec<Entity>,
    /// New entities that were never absorbed, in pool order.
    pub survivors: Vec<Entity>,
    /// New entities folded into another entity.
    pub absorbed: usize,
}

/// Applies the name heuristics and shared Wikipedia links.
pub struct RuleBasedFuser {
    matcher: Arc<dyn NameMatching>,
}

impl RuleBasedFuser {
    #[must_use]
    pub fn new(matcher: Arc<dyn NameMatching>) -> Self {
        Self { matcher }
    }

    /// True if `candidate` should absorb `entity`.
    #[must_use]
    pub fn is_match(&self, candidate: &Entity, entity: &Entity) -> bool {
        candidate.id != entity.id
            && (self.matcher.is_same_name(&candidate.name, &entity.name) || candidate.is_same_wikipedia_link(entity))
    }

    /// Fuses `new_entities` into `existing` survivors of the same class.
    ///
    /// An existing survivor with the id of a new entity is superseded by it.
    #[must_use]
    pub fn fuse_class(&self, new_entities: Vec<Entity>, existing: Vec<Entity>) -> ClassFusion {
        let new_ids: Vec<EntityId> = new_entities.iter().map(|e| e.id).collect();
        let fresh: HashSet<EntityId> = new_ids.iter().copied().collect();

        let mut combined = new_entities;
        combined.extend(existing.into_iter().filter(|e| !fresh.contains(&e.id)));

        let mut absorbed = HashSet::new();
        for id in &new_ids {
            let Some(pos) = combined.iter().position(|e| e.id == *id) else {
                continue;
            };
            let Some(target) = (0..combined.len()).find(|&i| self.is_match(&combined[i], &combined[pos])) else {
                continue;
            };

            let entity = combined.remove(pos);
            let target = if target > pos { target - 1 } else { target };
            debug!(
                entity = %entity.name,
                into = %combined[target].name,
                class = %entity.entity_type,
                "absorbed by rule"
            );
            combined[target].merge_with(&entity);
            absorbed.insert(*id);
        }

        let survivors = combined
            .iter()
            .filter(|e| fresh.contains(&e.id) && !absorbed.contains(&e.id))
            .cloned()
            .collect();
        ClassFusion {
            combined,
            survivors,
            absorbed: absorbed.len(),
        }
    }

    /// Fuses every class of `pool` against `groups`, replacing each class
    /// entry. Returns the new survivors across all classes.
    pub fn fuse_pool(&self, pool: FusionPool, groups: &FusionGroupStore) -> Result<Vec<Entity>, StorageError> {
        let mut survivors = Vec::new();
        for (class, candidates) in pool.into_classes() {
            let existing = groups.class(&class)?;
            let outcome = self.fuse_class(candidates, existing);
            log_class(&class, &outcome);
            groups.replace_class(class, outcome.combined)?;
            survivors.extend(outcome.survivors);
        }
        Ok(survivors)
    }
}

fn log_class(class: &EntityType, outcome: &ClassFusion) {
    info!(
        class = %class,
        survivors = outcome.survivors.len(),
        absorbed = outcome.absorbed,
        group_size = outcome.combined.len(),
        "fused class"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::LINK_WIKIPEDIA;
    use crate::fusion::pool::build_fusion_pool;
    use crate::matcher::NameMatcher;

    fn fuser() -> RuleBasedFuser {
        RuleBasedFuser::new(Arc::new(NameMatcher::new()))
    }

    fn wiki(name: &str, url: &str) -> Entity {
        let mut e = Entity::new(name, EntityType::Component);
        e.add_external_link(LINK_WIKIPEDIA, url);
        e
    }

    fn names(entities: &[Entity]) -> Vec<&str> {
        entities.iter().map(|e| e.name.as_str()).collect()
    }

    /// Matches only the listed pairs, in either order.
    struct PairMatcher(&'static [(&'static str, &'static str)]);

    impl NameMatching for PairMatcher {
        fn is_abbreviation(&self, _long: &str, _short: &str) -> bool {
            false
        }
        fn is_synonym(&self, a: &str, b: &str) -> bool {
            self.0.iter().any(|&(x, y)| (x == a && y == b) || (x == b && y == a))
        }
        fn is_singular_plural(&self, _a: &str, _b: &str) -> bool {
            false
        }
        fn is_gerund(&self, _a: &str, _b: &str) -> bool {
            false
        }
        fn is_naming_convention_variant(&self, _a: &str, _b: &str) -> bool {
            false
        }
    }

    const CHAIN: &[(&str, &str)] = &[("rcu", "rcu_read_lock"), ("rcu_read_lock", "read-copy update")];

    fn concept(name: &str) -> Entity {
        Entity::new(name, EntityType::Concept)
    }

    #[test]
    fn test_shared_wikipedia_link_merges() {
        let url = "https://en.wikipedia.org/wiki/Kernel-based_Virtual_Machine";
        let outcome = fuser().fuse_class(vec![wiki("KVM", url), wiki("Kernel-based Virtual Machine", url)], Vec::new());
        assert_eq!(outcome.survivors.len(), 1);
        assert_eq!(outcome.absorbed, 1);
        assert_eq!(outcome.combined.len(), 1);
    }

    #[test]
    fn test_naming_convention_variants_merge() {
        let outcome = fuser().fuse_class(
            vec![
                Entity::new("memory_manager", EntityType::Component),
                Entity::new("MemoryManager", EntityType::Component),
            ],
            Vec::new(),
        );
        assert_eq!(names(&outcome.survivors), vec!["MemoryManager"]);
        assert_eq!(outcome.survivors[0].aliases, vec!["memory_manager"]);
    }

    #[test]
    fn test_chain_among_new_entities_collapses_forward() {
        let fuser = RuleBasedFuser::new(Arc::new(PairMatcher(CHAIN)));
        let outcome = fuser.fuse_class(
            vec![concept("rcu"), concept("rcu_read_lock"), concept("read-copy update")],
            Vec::new(),
        );
        // rcu folds into rcu_read_lock, which then folds into read-copy update.
        assert_eq!(names(&outcome.survivors), vec!["read-copy update"]);
        assert_eq!(outcome.survivors[0].aliases, vec!["rcu", "rcu_read_lock"]);
        assert_eq!(outcome.absorbed, 2);
    }

    #[test]
    fn test_chain_through_existing_survivors_is_not_transitive() {
        let fuser = RuleBasedFuser::new(Arc::new(PairMatcher(CHAIN)));
        let outcome = fuser.fuse_class(
            vec![concept("rcu_read_lock")],
            vec![concept("rcu"), concept("read-copy update")],
        );
        // The middle link is absorbed by its first match only; the ends stay apart.
        assert!(outcome.survivors.is_empty());
        assert_eq!(names(&outcome.combined), vec!["rcu", "read-copy update"]);
        assert_eq!(outcome.combined[0].aliases, vec!["rcu_read_lock"]);
        assert!(outcome.combined[1].aliases.is_empty());
    }

    #[test]
    fn test_new_entity_absorbed_by_existing_survivor() {
        let existing = vec![Entity::new("page tables", EntityType::Concept)];
        let outcome = fuser().fuse_class(vec![Entity::new("page table", EntityType::Concept)], existing);
        assert!(outcome.survivors.is_empty());
        assert_eq!(names(&outcome.combined), vec!["page tables"]);
        assert_eq!(outcome.combined[0].aliases, vec!["page table"]);
    }

    #[test]
    fn test_unrelated_entities_stay_apart() {
        let outcome = fuser().fuse_class(
            vec![
                Entity::new("scheduler", EntityType::Component),
                Entity::new("slab allocator", EntityType::Component),
            ],
            vec![Entity::new("workqueue", EntityType::Component)],
        );
        assert_eq!(names(&outcome.survivors), vec!["scheduler", "slab allocator"]);
        assert_eq!(outcome.combined.len(), 3);
        assert_eq!(outcome.absorbed, 0);
    }

    #[test]
    fn test_refused_entity_supersedes_stored_copy() {
        let stored = Entity::new("kswapd", EntityType::Component);
        let mut again = stored.clone();
        again.description = "page reclaim daemon".to_string();
        let outcome = fuser().fuse_class(vec![again], vec![stored]);
        assert_eq!(outcome.combined.len(), 1);
        assert_eq!(outcome.combined[0].description, "page reclaim daemon");
        assert_eq!(outcome.survivors.len(), 1);
    }

    #[test]
    fn test_fuse_pool_updates_group_store() {
        let groups = FusionGroupStore::new();
        groups
            .replace_class(EntityType::Concept, vec![Entity::new("interrupts", EntityType::Concept)])
            .unwrap();
        let mut irq = Entity::new("interrupt", EntityType::Concept);
        irq.add_external_link(LINK_WIKIPEDIA, "https://en.wikipedia.org/wiki/Interrupt");
        let mut slab = Entity::new("slab", EntityType::Component);
        slab.add_external_link(LINK_WIKIPEDIA, "https://en.wikipedia.org/wiki/Slab_allocation");

        let survivors = fuser().fuse_pool(build_fusion_pool(vec![irq, slab], Vec::new()), &groups).unwrap();
        assert_eq!(names(&survivors), vec!["slab"]);
        let concepts = groups.class(&EntityType::Concept).unwrap();
        assert_eq!(names(&concepts), vec!["interrupts"]);
        assert!(concepts[0].has_wikipedia_link());
        assert_eq!(groups.class(&EntityType::Component).unwrap().len(), 1);
    }
}
