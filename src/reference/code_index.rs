//! Bootlin elixir identifier lookup.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tracing::debug;

use crate::entity::LINK_CODE;
use crate::error::LookupError;

use super::{Reference, ReferenceSource};

/// Code index at `{base}/{version}/A/ident/{identifier}`.
///
/// HTTP 200 means the identifier exists in that kernel release.
pub struct CodeIndexSource {
    client: reqwest::Client,
    base: Url,
    timeout: Duration,
}

impl CodeIndexSource {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, LookupError> {
        let base = Url::parse(base).map_err(|e| LookupError::Parse(format!("invalid code index URL {base:?}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("kgfusion/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LookupError::Network(e.to_string()))?;
        Ok(Self { client, base, timeout })
    }

    fn ident_url(&self, version: &str, identifier: &str) -> Result<Url, LookupError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| LookupError::Parse(format!("code index URL cannot be a base: {}", self.base)))?
            .pop_if_empty()
            .extend([version, "A", "ident", identifier]);
        Ok(url)
    }

    async fn lookup_ident(&self, version: &str, identifier: &str) -> Result<Option<String>, LookupError> {
        let url = self.ident_url(version, identifier)?;
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                LookupError::Timeout(self.timeout)
            } else {
                LookupError::Network(e.to_string())
            }
        })?;

        match response.status() {
            StatusCode::OK => Ok(Some(url.to_string())),
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(LookupError::RateLimited(retry_after))
            }
            other => Err(LookupError::Status { status: other.as_u16() }),
        }
    }
}

/// Identifier candidates for a mention: the name without a trailing `()`,
/// then its underscore-joined form when it contains whitespace.
#[must_use]
pub fn identifier_candidates(term: &str) -> Vec<String> {
    let raw = term.trim();
    let raw = raw.strip_suffix("()").unwrap_or(raw).trim();
    if raw.is_empty() {
        return Vec::new();
    }
    let mut candidates = vec![raw.to_string()];
    if raw.contains(char::is_whitespace) {
        candidates.push(raw.split_whitespace().collect::<Vec<_>>().join("_"));
    }
    candidates
}

#[async_trait]
impl ReferenceSource for CodeIndexSource {
    fn name(&self) -> &'static str {
        "code_index"
    }

    async fn search(&self, term: &str, version: &str) -> Result<Option<Reference>, LookupError> {
        for candidate in identifier_candidates(term) {
            if let Some(url) = self.lookup_ident(version, &candidate).await? {
                debug!(entity = %term, identifier = %candidate, "found in code index");
                return Ok(Some(Reference::new(LINK_CODE, vec![url])));
            }
        }
        Ok(None)
    }
}
