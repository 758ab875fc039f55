//! End-to-end fusion: resolve, pool, fuse by rule, adjudicate.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::FusionConfig;
use crate::entity::Entity;
use crate::error::FusionResult;
use crate::llm::LlmClient;
use crate::matcher::NameMatching;
use crate::reference::{Reference, ReferenceResolver};
use crate::storage::FusionGroupStore;
use crate::variation::VariationGenerator;

use super::adjudicator::LlmAdjudicator;
use super::pool::build_fusion_pool;
use super::rules::RuleBasedFuser;

/// Statistics for one `process_fusion` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusionReport {
    /// Entities that entered the fusion pool.
    pub total_entities: usize,
    /// Inputs dropped for having no link and no reference.
    pub excluded: usize,
    /// Canonical entities returned.
    pub total_groups: usize,
    pub average_group_size: f64,
    /// `(total_entities - total_groups) / total_entities`
    pub fusion_rate: f64,
    pub llm_calls: usize,
    pub llm_merges: usize,
}

impl FusionReport {
    fn new(total_entities: usize, excluded: usize, total_groups: usize) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let (average_group_size, fusion_rate) = {
            let total = total_entities as f64;
            let groups = total_groups as f64;
            let average = if total_groups > 0 { total / groups } else { 0.0 };
            let rate = if total_entities > 0 {
                total_entities.saturating_sub(total_groups) as f64 / total
            } else {
                0.0
            };
            (average, rate)
        };
        Self {
            total_entities,
            excluded,
            total_groups,
            average_group_size,
            fusion_rate,
            ..Self::default()
        }
    }
}

/// The fusion orchestrator.
///
/// Survivors are written into the shared [`FusionGroupStore`]; persisting
/// it is left to a [`crate::storage::CheckpointWorker`].
pub struct EntityFusion {
    resolver: Arc<ReferenceResolver>,
    variations: Arc<VariationGenerator>,
    fuser: RuleBasedFuser,
    adjudicator: LlmAdjudicator,
    groups: Arc<FusionGroupStore>,
    kernel_version: String,
}

impl EntityFusion {
    #[must_use]
    pub fn new(
        resolver: Arc<ReferenceResolver>,
        variations: Arc<VariationGenerator>,
        matcher: Arc<dyn NameMatching>,
        llm: Arc<dyn LlmClient>,
        groups: Arc<FusionGroupStore>,
        kernel_version: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            variations,
            fuser: RuleBasedFuser::new(matcher),
            adjudicator: LlmAdjudicator::new(llm),
            groups,
            kernel_version: kernel_version.into(),
        }
    }

    /// Orchestrator over the HTTP sources and caches named in `cfg`.
    pub fn from_config(
        cfg: &FusionConfig,
        matcher: Arc<dyn NameMatching>,
        llm: Arc<dyn LlmClient>,
        groups: Arc<FusionGroupStore>,
    ) -> FusionResult<Self> {
        let resolver = ReferenceResolver::from_config(cfg)?;
        let variations = VariationGenerator::from_config(Arc::clone(&llm), cfg)?;
        Ok(Self::new(
            Arc::new(resolver),
            Arc::new(variations),
            matcher,
            llm,
            groups,
            cfg.kernel_version.clone(),
        ))
    }

    #[must_use]
    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    #[must_use]
    pub fn variations(&self) -> &VariationGenerator {
        &self.variations
    }

    #[must_use]
    pub fn groups(&self) -> &Arc<FusionGroupStore> {
        &self.groups
    }

    #[must_use]
    pub fn kernel_version(&self) -> &str {
        &self.kernel_version
    }

    /// Fuses `entities` and `linked_entities` into canonical entities.
    pub async fn process_fusion(&self, entities: Vec<Entity>, linked_entities: Vec<Entity>) -> FusionResult<Vec<Entity>> {
        let (canonical, _) = self.process_fusion_with_report(entities, linked_entities).await?;
        Ok(canonical)
    }

    /// [`Self::process_fusion`] plus statistics.
    ///
    /// Lookup and LLM failures never fail the call; only a broken group
    /// store does.
    pub async fn process_fusion_with_report(
        &self,
        entities: Vec<Entity>,
        linked_entities: Vec<Entity>,
    ) -> FusionResult<(Vec<Entity>, FusionReport)> {
        let input = entities.len() + linked_entities.len();
        info!(entities = entities.len(), linked = linked_entities.len(), "starting fusion");

        let mut with_refs = Vec::with_capacity(entities.len());
        let mut unresolved = 0usize;
        for mut entity in entities {
            if self.attach_references(&mut entity).await || entity.has_external_links() {
                with_refs.push(entity);
            } else {
                debug!(entity = %entity.name, class = %entity.entity_type, "no references found; dropped");
                unresolved += 1;
            }
        }

        let pool = build_fusion_pool(linked_entities, with_refs);
        let excluded = unresolved + pool.excluded();
        let pooled = pool.len();

        let survivors = self.fuser.fuse_pool(pool, &self.groups)?;
        let adjudication = self.adjudicator.adjudicate(&survivors).await;

        let mut report = FusionReport::new(pooled, excluded, adjudication.entities.len());
        report.llm_calls = adjudication.llm_calls;
        report.llm_merges = adjudication.llm_merges;
        info!(
            input,
            excluded = report.excluded,
            groups = report.total_groups,
            fusion_rate = report.fusion_rate,
            llm_calls = report.llm_calls,
            "fusion finished"
        );
        Ok((adjudication.entities, report))
    }

    /// Resolves the name, then its variations, until one yields references.
    /// Returns true if references were attached.
    async fn attach_references(&self, entity: &mut Entity) -> bool {
        let version = self.kernel_version.as_str();
        let mut references = self.resolver.resolve(&entity.name, version).await;
        let mut variation = entity.name.clone();

        if references.is_empty() {
            let candidates = self.variations.generate(&entity.name, version).await;
            for candidate in candidates.into_iter().filter(|c| *c != entity.name) {
                references = self.resolver.resolve(&candidate, version).await;
                if !references.is_empty() {
                    variation = candidate;
                    break;
                }
            }
        }
        if references.is_empty() {
            return false;
        }

        for reference in &mut references {
            reference.variation = Some(variation.clone());
        }
        attach(entity, &references);
        entity.matched_variation = Some(variation);
        true
    }
}

fn attach(entity: &mut Entity, references: &[Reference]) {
    for reference in references {
        entity.add_external_links(&reference.url_type, reference.url.iter().cloned());
        debug!(
            entity = %entity.name,
            url_type = %reference.url_type,
            variation = reference.variation.as_deref().unwrap_or_default(),
            "attached reference"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::cache::{CacheKeyPolicy, LookupCache};
    use crate::config::RetryPolicy;
    use crate::entity::{EntityType, LINK_CODE, LINK_WIKIPEDIA};
    use crate::error::LookupError;
    use crate::llm::ScriptedLlmClient;
    use crate::matcher::NameMatcher;
    use crate::reference::ReferenceSource;

    /// Finds only the listed identifiers.
    struct KnownIdents(&'static [&'static str]);

    #[async_trait]
    impl ReferenceSource for KnownIdents {
        fn name(&self) -> &'static str {
            "code_index"
        }

        async fn search(&self, term: &str, version: &str) -> Result<Option<Reference>, LookupError> {
            Ok(self.0.contains(&term).then(|| {
                Reference::new(LINK_CODE, vec![format!("https://elixir.bootlin.com/linux/{version}/A/ident/{term}")])
            }))
        }
    }

    fn fusion(known: &'static [&'static str], llm: Arc<ScriptedLlmClient>) -> EntityFusion {
        let resolver = ReferenceResolver::new(
            Arc::new(KnownIdents(known)),
            Arc::new(KnownIdents(&[])),
            2,
            Duration::from_secs(1),
            RetryPolicy::no_retry(),
            LookupCache::new("references", CacheKeyPolicy::NameOnly),
        );
        let variations = VariationGenerator::new(llm.clone(), LookupCache::new("variations", CacheKeyPolicy::NameOnly));
        EntityFusion::new(
            Arc::new(resolver),
            Arc::new(variations),
            Arc::new(NameMatcher::new()),
            llm,
            Arc::new(FusionGroupStore::new()),
            "v6.12.6",
        )
    }

    #[test]
    fn test_report_ratios() {
        let report = FusionReport::new(10, 2, 4);
        assert!((report.average_group_size - 2.5).abs() < f64::EPSILON);
        assert!((report.fusion_rate - 0.6).abs() < 1e-9);
        let empty = FusionReport::new(0, 0, 0);
        assert_eq!(empty.average_group_size, 0.0);
        assert_eq!(empty.fusion_rate, 0.0);
    }

    #[tokio::test]
    async fn test_direct_hit_skips_variations() {
        let llm = Arc::new(ScriptedLlmClient::new());
        let fusion = fusion(&["kvm_vcpu_block"], llm.clone());
        let (out, report) = fusion
            .process_fusion_with_report(vec![Entity::new("kvm_vcpu_block", EntityType::Operation)], Vec::new())
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].matched_variation.as_deref(), Some("kvm_vcpu_block"));
        assert_eq!(out[0].urls(LINK_CODE).len(), 1);
        assert_eq!(report.total_entities, 1);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_variation_finds_reference() {
        let llm = Arc::new(ScriptedLlmClient::new().then("Variant: vmalloc"));
        let fusion = fusion(&["vmalloc"], llm);
        let out = fusion
            .process_fusion(vec![Entity::new("virtual memory allocator", EntityType::Operation)], Vec::new())
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "virtual memory allocator");
        assert_eq!(out[0].matched_variation.as_deref(), Some("vmalloc"));
    }

    #[tokio::test]
    async fn test_unresolved_entities_are_excluded() {
        let llm = Arc::new(ScriptedLlmClient::always("Variant: None"));
        let fusion = fusion(&[], llm);
        let mut linked = Entity::new("Linux kernel", EntityType::Concept);
        linked.add_external_link(LINK_WIKIPEDIA, "https://en.wikipedia.org/wiki/Linux_kernel");

        let (out, report) = fusion
            .process_fusion_with_report(
                vec![Entity::new("frobnicator", EntityType::Component), Entity::new("zz", EntityType::Component)],
                vec![linked],
            )
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(report.excluded, 2);
        assert_eq!(report.total_entities, 1);
        assert_eq!(fusion.groups().total_entities().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_excluded_entity_never_becomes_alias() {
        let llm = Arc::new(ScriptedLlmClient::always("Variant: None"));
        let fusion = fusion(&[], llm);
        let mut linked = Entity::new("KVM", EntityType::Component);
        linked.add_external_link(LINK_WIKIPEDIA, "https://en.wikipedia.org/wiki/Kernel-based_Virtual_Machine");

        let (out, report) = fusion
            .process_fusion_with_report(vec![Entity::new("kvm", EntityType::Component)], vec![linked])
            .await
            .unwrap();
        assert_eq!(report.excluded, 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "KVM");
        assert!(out.iter().all(|e| !e.aliases.iter().any(|a| a.eq_ignore_ascii_case("kvm"))));

        let stored = fusion.groups().class(&EntityType::Component).unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].aliases.is_empty());
    }
}
