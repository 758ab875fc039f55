//! In-memory class store.
//!
//! Used by tests and by callers that do not want checkpoints on disk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::entity::{Entity, EntityType};

use super::{ClassStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// [`ClassStore`] backed by a hash map.
#[derive(Debug, Default)]
pub struct InMemoryClassStore {
    classes: RwLock<HashMap<EntityType, Vec<Entity>>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl InMemoryClassStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save_class` calls so far.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Makes every subsequent save fail until switched off again.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl ClassStore for InMemoryClassStore {
    fn load_class(&self, class: &EntityType) -> Result<Vec<Entity>, StorageError> {
        let guard = self.classes.read().map_err(|_| lock_err("memory class store"))?;
        Ok(guard.get(class).cloned().unwrap_or_default())
    }

    fn save_class(&self, class: &EntityType, entities: &[Entity]) -> Result<(), StorageError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::BackendError(format!("injected save failure for {class}")));
        }
        let mut guard = self.classes.write().map_err(|_| lock_err("memory class store"))?;
        guard.insert(class.clone(), entities.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn list_classes(&self) -> Result<Vec<EntityType>, StorageError> {
        let guard = self.classes.read().map_err(|_| lock_err("memory class store"))?;
        let mut classes: Vec<EntityType> = guard
            .iter()
            .filter(|(_, entities)| !entities.is_empty())
            .map(|(class, _)| class.clone())
            .collect();
        classes.sort();
        Ok(classes)
    }
}
