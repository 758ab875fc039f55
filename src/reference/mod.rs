//! External reference resolution.
//!
//! A name is looked up in the kernel code index and the documentation
//! index concurrently. Each sub-lookup gets its own per-request timeout and
//! rate-limit backoff; a failing sub-lookup is logged and counted as "not
//! found" so the other one can still produce a reference.

mod code_index;
mod doc_index;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::cache::{CacheKeyPolicy, LookupCache};
use crate::config::{FusionConfig, RetryPolicy};
use crate::error::{FusionResult, LookupError};
use crate::retry::with_backoff;
use crate::storage::StorageError;

pub use code_index::CodeIndexSource;
pub use doc_index::{DocIndex, DocIndexSource};

/// Cache file name inside the cache directory.
pub const REFERENCE_CACHE_FILE: &str = "references.json";

/// URLs found for a name in one external source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Link-type tag (`code`, `documentation`)
    pub url_type: String,
    pub url: Vec<String>,
    /// Variation string that produced this reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<String>,
}

impl Reference {
    #[must_use]
    pub fn new(url_type: impl Into<String>, url: Vec<String>) -> Self {
        Self {
            url_type: url_type.into(),
            url,
            variation: None,
        }
    }
}

/// One external index.
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Looks `term` up; `Ok(None)` means not found.
    async fn search(&self, term: &str, version: &str) -> Result<Option<Reference>, LookupError>;
}

/// Concurrent, cache-backed lookup against the code and documentation indexes.
pub struct ReferenceResolver {
    code: Arc<dyn ReferenceSource>,
    docs: Arc<dyn ReferenceSource>,
    doc_permits: Semaphore,
    request_timeout: Duration,
    retry: RetryPolicy,
    cache: LookupCache<Vec<Reference>>,
}

impl ReferenceResolver {
    /// Resolver over explicit sources.
    #[must_use]
    pub fn new(
        code: Arc<dyn ReferenceSource>,
        docs: Arc<dyn ReferenceSource>,
        doc_concurrency: usize,
        request_timeout: Duration,
        retry: RetryPolicy,
        cache: LookupCache<Vec<Reference>>,
    ) -> Self {
        Self {
            code,
            docs,
            doc_permits: Semaphore::new(doc_concurrency.max(1)),
            request_timeout,
            retry,
            cache,
        }
    }

    /// Resolver over the HTTP sources named in `cfg`, with its cache loaded
    /// from `cfg.cache_dir` when set.
    pub fn from_config(cfg: &FusionConfig) -> FusionResult<Self> {
        let code = CodeIndexSource::new(&cfg.code_index_base, cfg.request_timeout)?;
        let docs = DocIndexSource::new(&cfg.docs_base, cfg.request_timeout)?;
        let cache = match &cfg.cache_dir {
            Some(dir) => LookupCache::load("references", cfg.cache_key_policy, &dir.join(REFERENCE_CACHE_FILE))?,
            None => LookupCache::new("references", cfg.cache_key_policy),
        };
        Ok(Self::new(
            Arc::new(code),
            Arc::new(docs),
            cfg.doc_concurrency,
            cfg.request_timeout,
            cfg.retry.clone(),
            cache,
        ))
    }

    #[must_use]
    pub fn cache(&self) -> &LookupCache<Vec<Reference>> {
        &self.cache
    }

    #[must_use]
    pub fn cache_policy(&self) -> CacheKeyPolicy {
        self.cache.policy()
    }

    /// Writes the lookup cache into `dir`.
    pub fn flush_cache(&self, dir: &Path) -> Result<(), StorageError> {
        std::fs::create_dir_all(dir)?;
        self.cache.flush(&dir.join(REFERENCE_CACHE_FILE))
    }

    /// References for `name` at kernel `version`; empty when nothing is found.
    ///
    /// Results are cached only when both sub-lookups completed, so a
    /// transient failure is retried on the next call.
    pub async fn resolve(&self, name: &str, version: &str) -> Vec<Reference> {
        let name = name.trim();
        if name.is_empty() {
            return Vec::new();
        }
        if let Some(hit) = self.cache.get(name, version) {
            return hit;
        }

        let (code, docs) = tokio::join!(self.lookup_code(name, version), self.lookup_docs(name, version));

        let complete = code.is_ok() && docs.is_ok();
        let references: Vec<Reference> = [code, docs].into_iter().filter_map(|r| r.ok().flatten()).collect();

        if complete {
            self.cache.put(name, version, references.clone());
        }
        debug!(entity = %name, found = references.len(), complete, "resolved references");
        references
    }

    async fn lookup_code(&self, name: &str, version: &str) -> Result<Option<Reference>, LookupError> {
        self.lookup(self.code.as_ref(), name, version).await
    }

    async fn lookup_docs(&self, name: &str, version: &str) -> Result<Option<Reference>, LookupError> {
        let _permit = self
            .doc_permits
            .acquire()
            .await
            .map_err(|_| LookupError::Network("documentation lookup semaphore closed".to_string()))?;
        self.lookup(self.docs.as_ref(), name, version).await
    }

    async fn lookup(
        &self,
        source: &dyn ReferenceSource,
        name: &str,
        version: &str,
    ) -> Result<Option<Reference>, LookupError> {
        let timeout = self.request_timeout;
        let result = with_backoff(&self.retry, source.name(), move || async move {
            tokio::time::timeout(timeout, source.search(name, version))
                .await
                .unwrap_or(Err(LookupError::Timeout(timeout)))
        })
        .await;

        if let Err(e) = &result {
            warn!(source = source.name(), entity = %name, error = %e, "reference lookup failed");
        }
        result
    }
}
