//! Runtime configuration.
//!
//! Every knob has a default that works against the public kernel indexes.
//! `from_env` applies `KGFUSION_*` overrides on top of the defaults and
//! `validate` enforces the lower bounds the pipeline relies on.

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::CacheKeyPolicy;
use crate::error::{FusionResult, ValidationError};

/// Kernel release whose identifiers the code index is queried against.
pub const DEFAULT_KERNEL_VERSION: &str = "v6.12.6";
/// Bootlin elixir base URL (version and `/A/ident/<name>` are appended).
pub const DEFAULT_CODE_INDEX_BASE: &str = "https://elixir.bootlin.com/linux";
/// Kernel documentation site.
pub const DEFAULT_DOCS_BASE: &str = "https://docs.kernel.org";

/// Bounded exponential backoff for HTTP 429 responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    ///
    /// A server-provided `Retry-After` wins when present, still capped at
    /// `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let computed = retry_after.unwrap_or_else(|| {
            let factor = 2u32.saturating_pow(attempt);
            self.base_delay.saturating_mul(factor)
        });
        computed.min(self.max_delay)
    }
}

/// OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL; `/chat/completions` is appended.
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.deepseek.com/v1".to_string(),
            model: "deepseek-chat".to_string(),
            api_key: None,
            timeout: Duration::from_secs(60),
            temperature: 0.0,
        }
    }
}

/// Where and how often the fusion groups are checkpointed.
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// Directory holding one JSON file per entity class. `None` disables
    /// persistence.
    pub dir: Option<PathBuf>,
    /// Minimum interval between two checkpoint writes.
    pub persist_interval: Duration,
    /// Capacity of the worker's control channel.
    pub channel_capacity: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: None,
            persist_interval: Duration::from_secs(30),
            channel_capacity: 16,
        }
    }
}

/// Top-level configuration for the fusion pipeline.
#[derive(Debug, Clone)]
pub struct FusionConfig {
    pub kernel_version: String,
    pub code_index_base: String,
    pub docs_base: String,
    /// Permits for concurrent documentation-index lookups.
    pub doc_concurrency: usize,
    /// Per-request timeout for reference lookups.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// Directory for the lookup cache files; `None` keeps caches in memory only.
    pub cache_dir: Option<PathBuf>,
    pub cache_key_policy: CacheKeyPolicy,
    pub llm: LlmConfig,
    pub checkpoint: CheckpointConfig,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            kernel_version: DEFAULT_KERNEL_VERSION.to_string(),
            code_index_base: DEFAULT_CODE_INDEX_BASE.to_string(),
            docs_base: DEFAULT_DOCS_BASE.to_string(),
            doc_concurrency: 2,
            request_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            cache_dir: None,
            cache_key_policy: CacheKeyPolicy::default(),
            llm: LlmConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }
}

impl FusionConfig {
    const MIN_PERSIST_INTERVAL: Duration = Duration::from_millis(100);
    const MIN_REQUEST_TIMEOUT: Duration = Duration::from_millis(100);

    /// Defaults overridden by `KGFUSION_*` environment variables.
    ///
    /// Unparseable numeric values are rejected rather than silently ignored.
    pub fn from_env() -> FusionResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`FusionConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> FusionResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = lookup("KGFUSION_KERNEL_VERSION") {
            cfg.kernel_version = v;
        }
        if let Some(v) = lookup("KGFUSION_CODE_INDEX_URL") {
            cfg.code_index_base = v;
        }
        if let Some(v) = lookup("KGFUSION_DOCS_URL") {
            cfg.docs_base = v;
        }
        if let Some(v) = lookup("KGFUSION_DOC_CONCURRENCY") {
            cfg.doc_concurrency = parse_num("KGFUSION_DOC_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("KGFUSION_REQUEST_TIMEOUT_MS") {
            cfg.request_timeout = Duration::from_millis(parse_num("KGFUSION_REQUEST_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("KGFUSION_RETRY_ATTEMPTS") {
            cfg.retry.max_attempts = parse_num("KGFUSION_RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("KGFUSION_RETRY_BASE_MS") {
            cfg.retry.base_delay = Duration::from_millis(parse_num("KGFUSION_RETRY_BASE_MS", &v)?);
        }
        if let Some(v) = lookup("KGFUSION_RETRY_MAX_MS") {
            cfg.retry.max_delay = Duration::from_millis(parse_num("KGFUSION_RETRY_MAX_MS", &v)?);
        }
        if let Some(v) = lookup("KGFUSION_CACHE_DIR") {
            cfg.cache_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("KGFUSION_CACHE_KEY") {
            cfg.cache_key_policy = v.parse().map_err(|reason| ValidationError::InvalidConfig {
                field: "KGFUSION_CACHE_KEY".to_string(),
                reason,
            })?;
        }
        if let Some(v) = lookup("KGFUSION_LLM_ENDPOINT") {
            cfg.llm.endpoint = v;
        }
        if let Some(v) = lookup("KGFUSION_LLM_MODEL") {
            cfg.llm.model = v;
        }
        if let Some(v) = lookup("KGFUSION_LLM_API_KEY") {
            cfg.llm.api_key = Some(v);
        }
        if let Some(v) = lookup("KGFUSION_LLM_TIMEOUT_MS") {
            cfg.llm.timeout = Duration::from_millis(parse_num("KGFUSION_LLM_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("KGFUSION_CHECKPOINT_DIR") {
            cfg.checkpoint.dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("KGFUSION_PERSIST_INTERVAL_MS") {
            cfg.checkpoint.persist_interval = Duration::from_millis(parse_num("KGFUSION_PERSIST_INTERVAL_MS", &v)?);
        }

        cfg.validate()
    }

    /// Enforces lower bounds; returns the config unchanged on success.
    pub fn validate(self) -> FusionResult<Self> {
        if self.doc_concurrency == 0 {
            return Err(invalid("doc_concurrency", "must be at least 1".to_string()));
        }
        if self.request_timeout < Self::MIN_REQUEST_TIMEOUT {
            return Err(invalid(
                "request_timeout",
                format!("must be at least {:?} (got {:?})", Self::MIN_REQUEST_TIMEOUT, self.request_timeout),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1".to_string()));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(invalid(
                "retry.base_delay",
                format!("{:?} exceeds max_delay {:?}", self.retry.base_delay, self.retry.max_delay),
            ));
        }
        if self.checkpoint.persist_interval < Self::MIN_PERSIST_INTERVAL {
            return Err(invalid(
                "checkpoint.persist_interval",
                format!(
                    "must be at least {:?} (got {:?})",
                    Self::MIN_PERSIST_INTERVAL,
                    self.checkpoint.persist_interval
                ),
            ));
        }
        if self.checkpoint.channel_capacity == 0 {
            return Err(invalid("checkpoint.channel_capacity", "must be at least 1".to_string()));
        }
        if self.cache_dir.is_some() && self.cache_dir == self.checkpoint.dir {
            return Err(invalid("cache_dir", "must differ from the checkpoint directory".to_string()));
        }
        if self.kernel_version.trim().is_empty() {
            return Err(invalid("kernel_version", "cannot be empty".to_string()));
        }
        for (field, url) in [
            ("code_index_base", &self.code_index_base),
            ("docs_base", &self.docs_base),
            ("llm.endpoint", &self.llm.endpoint),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid(field, format!("not an http(s) URL: {url}")));
            }
        }
        Ok(self)
    }
}

fn invalid(field: &str, reason: String) -> crate::error::FusionError {
    ValidationError::InvalidConfig {
        field: field.to_string(),
        reason,
    }
    .into()
}

fn parse_num<T: std::str::FromStr>(field: &str, raw: &str) -> FusionResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| invalid(field, format!("{raw:?}: {e}")))
}
