//! Entity fusion.
//!
//! [`EntityFusion`] drives the pass; the stages are usable on their own:
//! [`build_fusion_pool`] groups candidates per class, [`RuleBasedFuser`]
//! folds them into the stored survivors, and [`LlmAdjudicator`] settles
//! survivors that still share a name.

mod adjudicator;
mod pipeline;
mod pool;
mod rules;

pub use adjudicator::{Adjudication, LlmAdjudicator};
pub use pipeline::{EntityFusion, FusionReport};
pub use pool::{build_fusion_pool, FusionPool};
pub use rules::{ClassFusion, RuleBasedFuser};
