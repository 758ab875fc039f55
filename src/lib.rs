//! # kgfusion - entity fusion for Linux-kernel knowledge graphs
//!
//! Extracted entity mentions are noisy: the same kernel concept shows up as
//! `KVM`, `kvm`, "Kernel-based Virtual Machine", `memory_manager` and
//! `MemoryManager`. This crate folds such mentions into canonical entities.
//!
//! ## Pipeline
//!
//! 1. **Reference resolution**: each mention (or an LLM-proposed variation
//!    of it) is looked up in the kernel code index and the documentation
//!    index; hits become external links.
//! 2. **Pooling**: per entity class, Wikipedia-linked entities first, then
//!    entities with references. Entities with neither are dropped.
//! 3. **Rule-based fusion**: name heuristics (abbreviations, plurals,
//!    gerunds, naming conventions, near-identical spelling) and shared
//!    Wikipedia links fold each new entity into the first match among the
//!    class's survivors.
//! 4. **Adjudication**: survivors that still share a name are merged when a
//!    context is blank, otherwise when the LLM confirms.
//!
//! Survivors live in a [`FusionGroupStore`] that a background
//! [`CheckpointWorker`] persists as one JSON file per class.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kgfusion::{EntityFusion, FusionConfig, FusionGroupStore, HttpLlmClient, NameMatcher};
//!
//! let cfg = FusionConfig::from_env()?;
//! let llm = Arc::new(HttpLlmClient::new(&cfg.llm, cfg.retry.clone())?);
//! let fusion = EntityFusion::from_config(&cfg, Arc::new(NameMatcher::new()), llm, Arc::new(FusionGroupStore::new()))?;
//! let (canonical, report) = fusion.process_fusion_with_report(entities, linked).await?;
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

// Core types
pub mod config;
pub mod entity;
pub mod error;
pub mod matcher;

// External services
pub mod cache;
pub mod llm;
pub mod reference;
pub mod retry;
pub mod variation;

// Survivors and their persistence
pub mod storage;

// Orchestration
pub mod fusion;

#[cfg(feature = "cli")]
pub mod telemetry;

pub use cache::{CacheKeyPolicy, CacheStats, LookupCache};
pub use config::{CheckpointConfig, FusionConfig, LlmConfig, RetryPolicy};
pub use entity::{alias_mapping, select_canonical_form, Entity, EntityId, EntityType, ExternalLinks};
pub use error::{FusionError, FusionResult, LlmError, LookupError, ValidationError};
pub use fusion::{
    build_fusion_pool, Adjudication, ClassFusion, EntityFusion, FusionPool, FusionReport, LlmAdjudicator,
    RuleBasedFuser,
};
pub use llm::{HttpLlmClient, LlmClient, ScriptedLlmClient};
pub use matcher::{NameMatcher, NameMatching};
pub use reference::{CodeIndexSource, DocIndexSource, Reference, ReferenceResolver, ReferenceSource};
pub use storage::{
    CheckpointWorker, ClassStore, FusionGroupStore, InMemoryClassStore, JsonClassStore, StorageError,
};
pub use variation::VariationGenerator;
