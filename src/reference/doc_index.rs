//! Kernel documentation lookup through the Sphinx search index.
//!
//! docs.kernel.org is a Sphinx site; its client-side search reads
//! `searchindex.js`, a JSON term index wrapped in `Search.setIndex(...)`.
//! The index is fetched once per source and queried locally.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::entity::LINK_DOCUMENTATION;
use crate::error::LookupError;
use crate::matcher::lemmatize;

use super::{Reference, ReferenceSource};

/// Most documentation URLs attached for one name.
pub const MAX_DOC_LINKS: usize = 5;

/// Stem suffixes tried when a word is not indexed verbatim. Sphinx stores
/// Porter stems ("management" -> "manag"), which these approximate.
const STEM_SUFFIXES: &[&str] = &[
    "ations", "ation", "ments", "ment", "ings", "ing", "ness", "ence", "ance", "ent", "ant", "ers", "er",
    "ous", "ive", "ize", "ity", "al", "ed", "es", "s", "e",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Postings {
    One(usize),
    Many(Vec<usize>),
}

impl Postings {
    fn docs(&self) -> Vec<usize> {
        match self {
            Self::One(doc) => vec![*doc],
            Self::Many(docs) => docs.clone(),
        }
    }
}

/// Parsed Sphinx search index.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocIndex {
    #[serde(default)]
    docnames: Vec<String>,
    #[serde(default)]
    terms: HashMap<String, Postings>,
    #[serde(default)]
    titleterms: HashMap<String, Postings>,
}

impl DocIndex {
    /// Parses `searchindex.js` (or the bare JSON object inside it).
    pub fn parse(text: &str) -> Result<Self, LookupError> {
        let body = match text.find("Search.setIndex(") {
            Some(pos) => &text[pos..],
            None => text,
        };
        let start = body
            .find('{')
            .ok_or_else(|| LookupError::Parse("search index has no JSON object".to_string()))?;
        let end = body
            .rfind('}')
            .ok_or_else(|| LookupError::Parse("search index JSON is not closed".to_string()))?;
        if end < start {
            return Err(LookupError::Parse("search index JSON is malformed".to_string()));
        }
        serde_json::from_str(&body[start..=end]).map_err(|e| LookupError::Parse(format!("search index: {e}")))
    }

    /// Number of indexed documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.docnames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docnames.is_empty()
    }

    fn word_docs(&self, word: &str) -> (BTreeSet<usize>, BTreeSet<usize>) {
        let mut candidates = vec![word.to_string(), lemmatize(word)];
        for suffix in STEM_SUFFIXES {
            if let Some(stem) = word.strip_suffix(suffix) {
                if stem.len() >= 3 {
                    candidates.push(stem.to_string());
                }
            }
        }

        let mut body = BTreeSet::new();
        let mut title = BTreeSet::new();
        for candidate in &candidates {
            if let Some(postings) = self.terms.get(candidate) {
                body.extend(postings.docs());
            }
            if let Some(postings) = self.titleterms.get(candidate) {
                title.extend(postings.docs());
            }
        }
        (body, title)
    }

    /// Docnames containing every word of `term`, title hits first.
    #[must_use]
    pub fn lookup(&self, term: &str) -> Vec<&str> {
        let lower = term.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| c.is_whitespace() || c == '-')
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            return Vec::new();
        }

        let mut all: Option<BTreeSet<usize>> = None;
        let mut in_title: Option<BTreeSet<usize>> = None;
        for word in words {
            let (body, title) = self.word_docs(word);
            let any: BTreeSet<usize> = body.union(&title).copied().collect();
            all = Some(match all {
                None => any,
                Some(acc) => acc.intersection(&any).copied().collect(),
            });
            in_title = Some(match in_title {
                None => title,
                Some(acc) => acc.intersection(&title).copied().collect(),
            });
        }

        let all = all.unwrap_or_default();
        let in_title = in_title.unwrap_or_default();
        let mut ordered: Vec<usize> = in_title.intersection(&all).copied().collect();
        ordered.extend(all.iter().filter(|doc| !in_title.contains(doc)));
        ordered
            .into_iter()
            .filter_map(|doc| self.docnames.get(doc).map(String::as_str))
            .collect()
    }
}

/// Documentation index backed by a Sphinx site.
pub struct DocIndexSource {
    client: reqwest::Client,
    base: String,
    timeout: Duration,
    index: OnceCell<Arc<DocIndex>>,
}

impl DocIndexSource {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("kgfusion/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LookupError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            timeout,
            index: OnceCell::new(),
        })
    }

    /// Source over an already parsed index; never touches the network.
    #[must_use]
    pub fn with_index(base: &str, index: DocIndex) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(5),
            index: OnceCell::new_with(Some(Arc::new(index))),
        }
    }

    async fn fetch_index(&self) -> Result<Arc<DocIndex>, LookupError> {
        let url = format!("{}/searchindex.js", self.base);
        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                LookupError::Timeout(self.timeout)
            } else {
                LookupError::Network(e.to_string())
            }
        })?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                return Err(LookupError::RateLimited(retry_after));
            }
            other => return Err(LookupError::Status { status: other.as_u16() }),
        }

        let text = response.text().await.map_err(|e| LookupError::Network(e.to_string()))?;
        let index = DocIndex::parse(&text)?;
        info!(url = %url, documents = index.len(), "loaded documentation search index");
        Ok(Arc::new(index))
    }
}

#[async_trait]
impl ReferenceSource for DocIndexSource {
    fn name(&self) -> &'static str {
        "doc_index"
    }

    async fn search(&self, term: &str, _version: &str) -> Result<Option<Reference>, LookupError> {
        let index = self.index.get_or_try_init(|| self.fetch_index()).await?;
        let urls: Vec<String> = index
            .lookup(term)
            .into_iter()
            .take(MAX_DOC_LINKS)
            .map(|doc| format!("{}/{doc}.html", self.base))
            .collect();
        if urls.is_empty() {
            return Ok(None);
        }
        debug!(entity = %term, hits = urls.len(), "found in documentation index");
        Ok(Some(Reference::new(LINK_DOCUMENTATION, urls)))
    }
}
