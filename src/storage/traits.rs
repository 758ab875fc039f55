//! Abstract storage traits for fusion groups.
//!
//! A class store persists the survivor list of one entity class at a time.
//! Implementations decide the medium; the pipeline only relies on
//! whole-class load and replace.

use thiserror::Error;

use crate::entity::{Entity, EntityType};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend error (I/O failure, poisoned lock, worker gone).
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed or a stored record violates the entity contract.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::BackendError(err.to_string())
    }
}

/// Per-class survivor storage.
///
/// # Safety Considerations
/// - `save_class` must replace the class atomically: a reader never sees a
///   half-written class, and a failed save leaves the previous content
/// - A missing class loads as an empty list
pub trait ClassStore: Send + Sync {
    /// Load every survivor of one class.
    fn load_class(&self, class: &EntityType) -> Result<Vec<Entity>, StorageError>;

    /// Replace the stored survivors of one class.
    fn save_class(&self, class: &EntityType, entities: &[Entity]) -> Result<(), StorageError>;

    /// Classes with at least one stored survivor.
    fn list_classes(&self) -> Result<Vec<EntityType>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify trait is object-safe
    fn _assert_class_store_object_safe(_: &dyn ClassStore) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::SerializationError("expected array".to_string());
        assert!(format!("{err}").contains("expected array"));
    }

    #[test]
    fn test_io_error_maps_to_backend() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: StorageError = io.into();
        assert!(matches!(err, StorageError::BackendError(msg) if msg.contains("read-only")));
    }
}
