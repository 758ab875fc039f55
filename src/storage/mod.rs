//! Persistence of fusion groups.
//!
//! - [`ClassStore`]: whole-class load/replace interface
//! - [`JsonClassStore`]: one JSON array file per class, atomic replace
//! - [`InMemoryClassStore`]: map-backed store for tests
//! - [`FusionGroupStore`]: in-memory survivors, single writer / snapshot readers
//! - [`CheckpointWorker`]: background thread that checkpoints the group store

mod checkpoint;
mod groups;
mod json;
mod memory;
mod traits;

pub use checkpoint::CheckpointWorker;
pub use groups::{FusionGroupStore, GroupSnapshot};
pub use json::{CheckpointWriter, JsonClassStore};
pub(crate) use json::write_atomic;
pub use memory::InMemoryClassStore;
pub use traits::{ClassStore, StorageError};
