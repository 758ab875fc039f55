//! LLM-proposed surface forms for a mention.
//!
//! Variations widen the net before reference resolution: "mem" may only
//! resolve as "memory", "THP" only as "transparent huge pages".

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{CacheKeyPolicy, LookupCache};
use crate::config::FusionConfig;
use crate::llm::LlmClient;
use crate::storage::StorageError;

/// Cache file name inside the cache directory.
pub const VARIATION_CACHE_FILE: &str = "variations.json";

/// Mentions shorter than this are not sent to the LLM.
pub const MIN_MENTION_LEN: usize = 3;

const VARIANT_PREFIX: &str = "Variant:";

/// Cache-backed variation generator.
pub struct VariationGenerator {
    llm: Arc<dyn LlmClient>,
    cache: LookupCache<Vec<String>>,
}

impl VariationGenerator {
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>, cache: LookupCache<Vec<String>>) -> Self {
        Self { llm, cache }
    }

    /// Generator whose cache is loaded from `cfg.cache_dir` when set.
    pub fn from_config(llm: Arc<dyn LlmClient>, cfg: &FusionConfig) -> Result<Self, StorageError> {
        let cache = match &cfg.cache_dir {
            Some(dir) => LookupCache::load("variations", cfg.cache_key_policy, &dir.join(VARIATION_CACHE_FILE))?,
            None => LookupCache::new("variations", cfg.cache_key_policy),
        };
        Ok(Self::new(llm, cache))
    }

    #[must_use]
    pub fn cache(&self) -> &LookupCache<Vec<String>> {
        &self.cache
    }

    #[must_use]
    pub fn cache_policy(&self) -> CacheKeyPolicy {
        self.cache.policy()
    }

    /// Writes the variation cache into `dir`.
    pub fn flush_cache(&self, dir: &Path) -> Result<(), StorageError> {
        std::fs::create_dir_all(dir)?;
        self.cache.flush(&dir.join(VARIATION_CACHE_FILE))
    }

    /// Variations of `mention`, the mention itself first.
    ///
    /// Never fails: an LLM error or an answer without usable `Variant:`
    /// lines yields just the mention. Only successful calls are cached.
    pub async fn generate(&self, mention: &str, version: &str) -> Vec<String> {
        let mention = mention.trim();
        if mention.is_empty() {
            return Vec::new();
        }
        if mention.chars().count() < MIN_MENTION_LEN {
            return vec![mention.to_string()];
        }
        if let Some(hit) = self.cache.get(mention, version) {
            return hit;
        }

        let variations = match self.llm.complete(&variation_prompt(mention)).await {
            Ok(answer) => {
                let variations = with_mention_first(mention, parse_variants(&answer));
                self.cache.put(mention, version, variations.clone());
                variations
            }
            Err(e) => {
                warn!(entity = %mention, error = %e, "variation request failed");
                vec![mention.to_string()]
            }
        };
        debug!(entity = %mention, count = variations.len(), "generated variations");
        variations
    }
}

fn variation_prompt(mention: &str) -> String {
    format!(
        r#"As a Linux kernel expert, consider the term "{mention}".
1. If it is a full word or phrase, give its common abbreviation.
2. If it is an abbreviation, give its full form.
3. Only answer when you are highly confident.

Put each variation on its own line prefixed with "{VARIANT_PREFIX} ". If unsure, answer "{VARIANT_PREFIX} None".
Example for "memory":
{VARIANT_PREFIX} mem

Example for "mem":
{VARIANT_PREFIX} memory

Example for "unknown_term":
{VARIANT_PREFIX} None
"#
    )
}

/// Lower-cased, de-duplicated `Variant:` values, `None` dropped.
#[must_use]
pub fn parse_variants(answer: &str) -> Vec<String> {
    let mut variants: Vec<String> = Vec::new();
    for line in answer.lines() {
        let Some(value) = line.trim().strip_prefix(VARIANT_PREFIX) else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("none") {
            continue;
        }
        let value = value.to_lowercase();
        if !variants.contains(&value) {
            variants.push(value);
        }
    }
    variants
}

fn with_mention_first(mention: &str, variants: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(variants.len() + 1);
    out.push(mention.to_string());
    out.extend(variants.into_iter().filter(|v| v != mention));
    out
}
