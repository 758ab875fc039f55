//! Fusion group store: survivors partitioned by entity class.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tracing::info;

use crate::entity::{Entity, EntityType};

use super::{ClassStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Point-in-time copy of every class, tagged with the store revision it
/// was taken at.
#[derive(Debug, Clone, Default)]
pub struct GroupSnapshot {
    pub revision: u64,
    pub classes: Vec<(EntityType, Vec<Entity>)>,
}

/// Mutable survivor lists, one per entity class.
///
/// Single writer (the fusion pipeline), any number of snapshot readers
/// (the checkpoint worker). Every replacement bumps a revision counter so
/// readers can tell whether anything changed since their last look.
#[derive(Debug, Default)]
pub struct FusionGroupStore {
    groups: RwLock<HashMap<EntityType, Vec<Entity>>>,
    revision: AtomicU64,
}

impl FusionGroupStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every class the backing store knows about.
    pub fn load_from(store: &dyn ClassStore) -> Result<Self, StorageError> {
        let mut groups = HashMap::new();
        let mut total = 0usize;
        for class in store.list_classes()? {
            let entities = store.load_class(&class)?;
            total += entities.len();
            groups.insert(class, entities);
        }
        info!(classes = groups.len(), entities = total, "loaded fusion groups");
        Ok(Self {
            groups: RwLock::new(groups),
            revision: AtomicU64::new(0),
        })
    }

    /// Survivors of one class, in order. Empty if the class is unknown.
    pub fn class(&self, class: &EntityType) -> Result<Vec<Entity>, StorageError> {
        let guard = self.groups.read().map_err(|_| lock_err("fusion groups"))?;
        Ok(guard.get(class).cloned().unwrap_or_default())
    }

    /// Replaces the survivor list of one class.
    pub fn replace_class(&self, class: EntityType, entities: Vec<Entity>) -> Result<(), StorageError> {
        let mut guard = self.groups.write().map_err(|_| lock_err("fusion groups"))?;
        guard.insert(class, entities);
        self.revision.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Classes currently held, sorted.
    pub fn classes(&self) -> Result<Vec<EntityType>, StorageError> {
        let guard = self.groups.read().map_err(|_| lock_err("fusion groups"))?;
        let mut classes: Vec<EntityType> = guard.keys().cloned().collect();
        classes.sort();
        Ok(classes)
    }

    /// Total survivors across all classes.
    pub fn total_entities(&self) -> Result<usize, StorageError> {
        let guard = self.groups.read().map_err(|_| lock_err("fusion groups"))?;
        Ok(guard.values().map(Vec::len).sum())
    }

    /// Monotonic change counter.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Copies every class under the read lock.
    pub fn snapshot(&self) -> Result<GroupSnapshot, StorageError> {
        let guard = self.groups.read().map_err(|_| lock_err("fusion groups"))?;
        let revision = self.revision.load(Ordering::SeqCst);
        let mut classes: Vec<(EntityType, Vec<Entity>)> =
            guard.iter().map(|(class, entities)| (class.clone(), entities.clone())).collect();
        classes.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(GroupSnapshot { revision, classes })
    }

    /// Writes every class to `store` synchronously.
    pub fn persist_to(&self, store: &dyn ClassStore) -> Result<usize, StorageError> {
        let snapshot = self.snapshot()?;
        for (class, entities) in &snapshot.classes {
            store.save_class(class, entities)?;
        }
        Ok(snapshot.classes.len())
    }
}
