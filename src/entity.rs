//! Entity types and merge semantics.
//!
//! An [`Entity`] is the unit of fusion: one mention of a kernel concept,
//! enriched with external links by reference resolution and folded into a
//! survivor when fusion decides two mentions denote the same thing.
//!
//! Merging is deliberately asymmetric. `a.merge_with(&b)` keeps `a`'s id
//! and name, fills `a`'s empty fields from `b`, and unions the set-like
//! fields (aliases, external links, commit ids).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FusionResult, ValidationError};

/// Link-type tag for Wikipedia URLs.
pub const LINK_WIKIPEDIA: &str = "wikipedia";
/// Link-type tag for source-code index URLs.
pub const LINK_CODE: &str = "code";
/// Link-type tag for documentation index URLs.
pub const LINK_DOCUMENTATION: &str = "documentation";

/// Hex digits of the name digest appended to custom class slugs.
const SLUG_DIGEST_LEN: usize = 12;

/// Placeholder some upstream extractors write instead of leaving the context empty.
pub const CONTEXT_PLACEHOLDER: &str = "None";

/// Process-unique, stable entity identifier.
///
/// Assigned at creation and never reused. The survivor of a merge keeps
/// its own id; the absorbed entity's id simply stops circulating.
///
/// # Examples
///
/// ```
/// use kgfusion::EntityId;
///
/// let id = EntityId::new();
/// assert!(!id.is_nil());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Creates a new random entity ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an entity ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns true if this is a nil (all zeros) UUID.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EntityId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Entity class tag.
///
/// Classes partition fusion pools: entities of different classes are never
/// compared. Unrecognized tags are kept as [`EntityType::Custom`] so new
/// classes emitted by upstream extractors do not need a code change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EntityType {
    /// Class not determined by the extractor
    Unknown,
    /// A kernel component (driver, allocator, scheduler class, ...)
    Component,
    /// An abstract concept
    Concept,
    /// An operation or activity
    Operation,
    /// A kernel subsystem
    Subsystem,
    /// A user- or kernel-facing interface (syscall, sysfs knob, API)
    Interface,
    /// A custom class
    Custom(String),
}

impl EntityType {
    /// Built-in classes, in declaration order.
    pub const BUILTIN: [Self; 6] = [
        Self::Unknown,
        Self::Component,
        Self::Concept,
        Self::Operation,
        Self::Subsystem,
        Self::Interface,
    ];

    /// Returns a filesystem-safe slug for this class.
    ///
    /// Distinct classes get distinct slugs: custom names are cleaned for
    /// readability and suffixed with a digest of the raw name.
    #[must_use]
    pub fn slug(&self) -> String {
        match self {
            Self::Custom(name) => {
                let cleaned: String = name
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
                    .collect();
                let digest = blake3::hash(name.as_bytes()).to_hex();
                format!("custom_{cleaned}_{}", &digest[..SLUG_DIGEST_LEN])
            }
            other => other.to_string(),
        }
    }
}

impl Default for EntityType {
    fn default() -> Self {
        Self::Unknown
    }
}

impl TryFrom<String> for EntityType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let value = value.trim();
        if value.is_empty() {
            return Err("entity type cannot be empty".to_string());
        }

        let bytes = value.as_bytes();
        if bytes.len() >= 7 && bytes[..7].eq_ignore_ascii_case(b"custom:") {
            let rest = value[7..].trim();
            if rest.is_empty() {
                return Err("custom entity type cannot be empty".to_string());
            }
            return Ok(Self::Custom(rest.to_string()));
        }

        Ok(if value.eq_ignore_ascii_case("unknown") {
            Self::Unknown
        } else if value.eq_ignore_ascii_case("component") {
            Self::Component
        } else if value.eq_ignore_ascii_case("concept") {
            Self::Concept
        } else if value.eq_ignore_ascii_case("operation") {
            Self::Operation
        } else if value.eq_ignore_ascii_case("subsystem") {
            Self::Subsystem
        } else if value.eq_ignore_ascii_case("interface") {
            Self::Interface
        } else {
            Self::Custom(value.to_ascii_lowercase())
        })
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Component => write!(f, "component"),
            Self::Concept => write!(f, "concept"),
            Self::Operation => write!(f, "operation"),
            Self::Subsystem => write!(f, "subsystem"),
            Self::Interface => write!(f, "interface"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// External links keyed by link-type tag (`wikipedia`, `code`, ...).
///
/// URL lists keep insertion order and never hold duplicates.
pub type ExternalLinks = BTreeMap<String, Vec<String>>;

/// One extracted mention of a kernel concept.
///
/// Every optional field has a serde default so checkpoint files written by
/// older versions, or by upstream producers that omit fields, still load.
///
/// # Examples
///
/// ```
/// use kgfusion::{Entity, EntityType};
///
/// let mut kvm = Entity::new("KVM", EntityType::Component);
/// let mut lower = Entity::new("kvm", EntityType::Component);
/// lower.add_external_link("wikipedia", "https://en.wikipedia.org/wiki/Kernel-based_Virtual_Machine");
///
/// kvm.merge_with(&lower);
/// assert_eq!(kvm.aliases, vec!["kvm".to_string()]);
/// assert_eq!(kvm.urls("wikipedia").len(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier
    #[serde(default)]
    pub id: EntityId,

    /// Display name
    pub name: String,

    /// Class tag; defaults to `unknown`
    #[serde(default)]
    pub entity_type: EntityType,

    /// Originating feature; defaults to 0
    #[serde(default)]
    pub feature_id: i64,

    /// Free-text context used by adjudication; defaults to empty
    #[serde(default)]
    pub context: String,

    /// Human-readable summary; defaults to empty
    #[serde(default)]
    pub description: String,

    /// Alternate names, insertion-ordered and duplicate-free
    #[serde(default)]
    pub aliases: Vec<String>,

    /// External links by link type
    #[serde(default)]
    pub external_links: ExternalLinks,

    /// Originating commit identifiers
    #[serde(default)]
    pub commit_ids: Vec<String>,

    /// Variation string that produced this entity's references, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_variation: Option<String>,

    /// Free-form properties; first writer wins on merge
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Creates a new entity with the given name and class.
    #[must_use]
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self::with_id(EntityId::new(), name, entity_type)
    }

    /// Creates a new entity with a specific ID.
    ///
    /// Useful when reloading records or in tests that need stable ids.
    #[must_use]
    pub fn with_id(id: EntityId, name: impl Into<String>, entity_type: EntityType) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            entity_type,
            feature_id: 0,
            context: String::new(),
            description: String::new(),
            aliases: Vec::new(),
            external_links: ExternalLinks::new(),
            commit_ids: Vec::new(),
            matched_variation: None,
            properties: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the originating feature id.
    #[must_use]
    pub fn with_feature(mut self, feature_id: i64) -> Self {
        self.feature_id = feature_id;
        self
    }

    /// Sets the adjudication context.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Checks the fields every downstream stage relies on.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyEntityName);
        }
        Ok(())
    }

    /// Parses an entity from JSON and validates it.
    pub fn from_json(json: &str) -> FusionResult<Self> {
        let entity: Self = serde_json::from_str(json).map_err(|e| ValidationError::MalformedEntity {
            reason: e.to_string(),
        })?;
        entity.validate()?;
        Ok(entity)
    }

    /// Serializes this entity as pretty-printed JSON.
    pub fn to_json(&self) -> FusionResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| crate::error::FusionError::internal(format!("entity serialization failed: {e}")))
    }

    /// Renames the entity, keeping the alias invariant.
    ///
    /// The previous name becomes an alias; the new name is removed from the
    /// alias list if it was there.
    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if name == self.name {
            return;
        }
        let previous = std::mem::replace(&mut self.name, name);
        self.aliases.retain(|a| *a != self.name);
        self.push_alias(previous);
        self.touch();
    }

    /// Adds an alias. Empty strings, the current name and duplicates are skipped.
    pub fn add_alias(&mut self, alias: impl Into<String>) {
        if self.push_alias(alias.into()) {
            self.touch();
        }
    }

    fn push_alias(&mut self, alias: String) -> bool {
        if alias.trim().is_empty() || alias == self.name || self.aliases.contains(&alias) {
            return false;
        }
        self.aliases.push(alias);
        true
    }

    /// Adds one URL under a link type; duplicates are skipped.
    pub fn add_external_link(&mut self, url_type: impl Into<String>, url: impl Into<String>) {
        if self.push_link(url_type.into(), url.into()) {
            self.touch();
        }
    }

    /// Adds several URLs under a link type; duplicates are skipped.
    pub fn add_external_links<I, S>(&mut self, url_type: &str, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut changed = false;
        for url in urls {
            changed |= self.push_link(url_type.to_string(), url.into());
        }
        if changed {
            self.touch();
        }
    }

    fn push_link(&mut self, url_type: String, url: String) -> bool {
        if url.trim().is_empty() {
            return false;
        }
        let urls = self.external_links.entry(url_type).or_default();
        if urls.contains(&url) {
            return false;
        }
        urls.push(url);
        true
    }

    /// URLs recorded under a link type.
    #[must_use]
    pub fn urls(&self, url_type: &str) -> &[String] {
        self.external_links.get(url_type).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns true if the entity has at least one Wikipedia URL.
    #[must_use]
    pub fn has_wikipedia_link(&self) -> bool {
        !self.urls(LINK_WIKIPEDIA).is_empty()
    }

    /// Returns true if any link type holds at least one URL.
    #[must_use]
    pub fn has_external_links(&self) -> bool {
        self.external_links.values().any(|urls| !urls.is_empty())
    }

    /// Returns true if the context carries no disambiguating signal.
    #[must_use]
    pub fn has_blank_context(&self) -> bool {
        let ctx = self.context.trim();
        ctx.is_empty() || ctx == CONTEXT_PLACEHOLDER
    }

    /// Builds the context from feature headings and description.
    pub fn set_context(&mut self, h1: Option<&str>, h2: Option<&str>, feature_description: Option<&str>) {
        let mut parts = Vec::with_capacity(3);
        if let Some(h1) = h1.filter(|s| !s.is_empty()) {
            parts.push(format!("h1: {h1}"));
        }
        if let Some(h2) = h2.filter(|s| !s.is_empty()) {
            parts.push(format!("h2: {h2}"));
        }
        if let Some(desc) = feature_description {
            parts.push(format!("feature_description: {desc}"));
        }
        if !parts.is_empty() {
            self.context = parts.join("\n");
            self.touch();
        }
    }

    /// Returns true if both entities carry a Wikipedia URL in common.
    ///
    /// Symmetric: `a.is_same_wikipedia_link(&b) == b.is_same_wikipedia_link(&a)`.
    #[must_use]
    pub fn is_same_wikipedia_link(&self, other: &Entity) -> bool {
        let ours = self.urls(LINK_WIKIPEDIA);
        let theirs = other.urls(LINK_WIKIPEDIA);
        ours.iter().any(|url| theirs.contains(url))
    }

    /// Case-insensitive overlap check over names and aliases.
    #[must_use]
    pub fn is_same_entity(&self, other: &Entity) -> bool {
        let ours: Vec<String> = self.all_names().map(str::to_lowercase).collect();
        other
            .all_names()
            .map(str::to_lowercase)
            .any(|name| ours.contains(&name))
    }

    /// Name followed by aliases.
    pub fn all_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    /// Preferred display form among the name and aliases.
    ///
    /// See [`select_canonical_form`]. Merge never renames; callers that want
    /// the preferred form applied use [`Entity::set_name`].
    #[must_use]
    pub fn preferred_name(&self) -> String {
        select_canonical_form(self.all_names()).unwrap_or_else(|| self.name.clone())
    }

    /// Folds `other` into `self`.
    ///
    /// - `description` is copied only if ours is empty.
    /// - `other`'s aliases, then `other.name`, become aliases (never our own name).
    /// - External links are unioned per link type.
    /// - Commit ids are unioned, keeping order.
    /// - Properties we already hold win.
    ///
    /// Merging an entity with a copy of itself changes nothing but `updated_at`.
    pub fn merge_with(&mut self, other: &Entity) {
        if self.description.trim().is_empty() && !other.description.trim().is_empty() {
            self.description = other.description.clone();
        }

        for alias in &other.aliases {
            self.push_alias(alias.clone());
        }
        if other.name != self.name {
            self.push_alias(other.name.clone());
        }

        for (url_type, urls) in &other.external_links {
            for url in urls {
                self.push_link(url_type.clone(), url.clone());
            }
        }

        for commit in &other.commit_ids {
            if !self.commit_ids.contains(commit) {
                self.commit_ids.push(commit.clone());
            }
        }

        for (key, value) in &other.properties {
            self.properties.entry(key.clone()).or_insert_with(|| value.clone());
        }

        if self.matched_variation.is_none() {
            self.matched_variation = other.matched_variation.clone();
        }

        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Entity {}

impl std::hash::Hash for Entity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Longest form that is not a short acronym.
///
/// A form counts as an acronym when it is all-uppercase and at most five
/// characters long. When every form is an acronym, the longest wins. Ties
/// keep the earliest form.
pub fn select_canonical_form<'a, I>(forms: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let forms: Vec<&str> = forms.into_iter().filter(|f| !f.trim().is_empty()).collect();
    let is_acronym = |f: &str| f.chars().count() <= 5 && f.chars().any(char::is_alphabetic) && f == f.to_uppercase();

    longest_form(forms.iter().copied().filter(|f| !is_acronym(f)))
        .or_else(|| longest_form(forms.iter().copied()))
        .map(str::to_string)
}

fn longest_form<'a>(forms: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    forms.fold(None, |best, f| match best {
        Some(b) if b.chars().count() >= f.chars().count() => Some(b),
        _ => Some(f),
    })
}

/// Alias-to-canonical-name mapping for rewriting downstream triples.
///
/// Every canonical name maps to itself. An alias claimed by several
/// entities maps to the first one in `entities`.
#[must_use]
pub fn alias_mapping(entities: &[Entity]) -> BTreeMap<String, String> {
    let mut mapping = BTreeMap::new();
    for entity in entities {
        mapping.entry(entity.name.clone()).or_insert_with(|| entity.name.clone());
        for alias in &entity.aliases {
            mapping.entry(alias.clone()).or_insert_with(|| entity.name.clone());
        }
    }
    mapping
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIKI_KVM: &str = "https://en.wikipedia.org/wiki/Kernel-based_Virtual_Machine";

    #[test]
    fn test_entity_id_creation() {
        let id1 = EntityId::new();
        let id2 = EntityId::new();
        assert_ne!(id1, id2);
        assert!(!id1.is_nil());
    }

    #[test]
    fn test_entity_type_roundtrip_and_custom() {
        assert_eq!(EntityType::try_from("Component".to_string()).unwrap(), EntityType::Component);
        assert_eq!(
            EntityType::try_from("custom:Hardware".to_string()).unwrap(),
            EntityType::Custom("Hardware".to_string())
        );
        assert_eq!(
            EntityType::try_from("syscall".to_string()).unwrap(),
            EntityType::Custom("syscall".to_string())
        );
        assert!(EntityType::try_from("  ".to_string()).is_err());
        assert_eq!(String::from(EntityType::Custom("x".to_string())), "custom:x");
    }

    #[test]
    fn test_entity_type_slug_is_filesystem_safe() {
        assert_eq!(EntityType::Concept.slug(), "concept");
        let slug = EntityType::Custom("Bus/Device".to_string()).slug();
        assert!(slug.starts_with("custom_bus_device_"));
        assert!(slug.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn test_custom_slugs_are_distinct() {
        let classes = [
            EntityType::Custom("bus device".to_string()),
            EntityType::Custom("bus_device".to_string()),
            EntityType::Custom("Hardware".to_string()),
            EntityType::Custom("hardware".to_string()),
            EntityType::Custom("concept".to_string()),
        ];
        let mut slugs: Vec<String> = classes.iter().map(EntityType::slug).collect();
        slugs.push(EntityType::Concept.slug());
        let unique: std::collections::HashSet<&String> = slugs.iter().collect();
        assert_eq!(unique.len(), slugs.len());
        assert_eq!(classes[0].slug(), classes[0].clone().slug());
    }

    #[test]
    fn test_add_alias_skips_name_and_duplicates() {
        let mut e = Entity::new("kvm", EntityType::Component);
        e.add_alias("kvm");
        e.add_alias("KVM");
        e.add_alias("KVM");
        e.add_alias("");
        assert_eq!(e.aliases, vec!["KVM".to_string()]);
    }

    #[test]
    fn test_merge_collects_name_and_aliases() {
        let mut a = Entity::new("memory management", EntityType::Concept);
        let mut b = Entity::new("mm", EntityType::Concept);
        b.add_alias("memory mgmt");
        b.description = "Manages physical and virtual memory".to_string();

        a.merge_with(&b);
        assert_eq!(a.aliases, vec!["memory mgmt".to_string(), "mm".to_string()]);
        assert_eq!(a.description, "Manages physical and virtual memory");
    }

    #[test]
    fn test_merge_keeps_existing_description() {
        let mut a = Entity::new("slab", EntityType::Component);
        a.description = "ours".to_string();
        let mut b = Entity::new("slabs", EntityType::Component);
        b.description = "theirs".to_string();
        a.merge_with(&b);
        assert_eq!(a.description, "ours");
    }

    #[test]
    fn test_merge_never_adds_own_name_as_alias() {
        let mut a = Entity::new("process", EntityType::Concept);
        let mut b = Entity::new("processes", EntityType::Concept);
        b.add_alias("process");
        a.merge_with(&b);
        assert!(!a.aliases.contains(&a.name));
        assert_eq!(a.aliases, vec!["processes".to_string()]);
    }

    #[test]
    fn test_self_merge_is_idempotent() {
        let mut e = Entity::new("KVM", EntityType::Component);
        e.add_alias("kvm");
        e.add_external_link(LINK_WIKIPEDIA, WIKI_KVM);
        e.add_external_link(LINK_CODE, "https://elixir.bootlin.com/linux/v6.6/A/ident/kvm");
        let copy = e.clone();
        let aliases = e.aliases.clone();
        let links = e.external_links.clone();

        e.merge_with(&copy);
        assert_eq!(e.aliases, aliases);
        assert_eq!(e.external_links, links);
    }

    #[test]
    fn test_merge_unions_links_without_duplicates() {
        let mut a = Entity::new("KVM", EntityType::Component);
        a.add_external_link(LINK_WIKIPEDIA, WIKI_KVM);
        let mut b = Entity::new("kvm", EntityType::Component);
        b.add_external_links(LINK_WIKIPEDIA, [WIKI_KVM, WIKI_KVM]);
        b.add_external_link(LINK_CODE, "https://elixir.bootlin.com/linux/v6.6/A/ident/kvm");

        for _ in 0..3 {
            a.merge_with(&b);
        }
        assert_eq!(a.urls(LINK_WIKIPEDIA), &[WIKI_KVM.to_string()]);
        assert_eq!(a.urls(LINK_CODE).len(), 1);
        for urls in a.external_links.values() {
            let mut dedup = urls.clone();
            dedup.dedup();
            assert_eq!(&dedup, urls);
        }
    }

    #[test]
    fn test_merge_commit_ids_and_properties() {
        let mut a = Entity::new("mglru", EntityType::Component);
        a.commit_ids = vec!["c1".to_string()];
        a.properties.insert("origin".to_string(), serde_json::json!("ours"));
        let mut b = Entity::new("MGLRU", EntityType::Component);
        b.commit_ids = vec!["c1".to_string(), "c2".to_string()];
        b.properties.insert("origin".to_string(), serde_json::json!("theirs"));
        b.properties.insert("version".to_string(), serde_json::json!("6.1"));

        a.merge_with(&b);
        assert_eq!(a.commit_ids, vec!["c1".to_string(), "c2".to_string()]);
        assert_eq!(a.properties["origin"], serde_json::json!("ours"));
        assert_eq!(a.properties["version"], serde_json::json!("6.1"));
    }

    #[test]
    fn test_wikipedia_link_overlap_is_symmetric() {
        let mut a = Entity::new("KVM", EntityType::Component);
        let mut b = Entity::new("kvm", EntityType::Component);
        let c = Entity::new("qemu", EntityType::Component);
        assert!(!a.is_same_wikipedia_link(&b));

        a.add_external_link(LINK_WIKIPEDIA, WIKI_KVM);
        assert!(!a.is_same_wikipedia_link(&b));
        assert!(!b.is_same_wikipedia_link(&a));

        b.add_external_links(LINK_WIKIPEDIA, ["https://en.wikipedia.org/wiki/QEMU", WIKI_KVM]);
        assert!(a.is_same_wikipedia_link(&b));
        assert!(b.is_same_wikipedia_link(&a));
        assert_eq!(a.is_same_wikipedia_link(&c), c.is_same_wikipedia_link(&a));
    }

    #[test]
    fn test_code_links_do_not_count_as_wikipedia_overlap() {
        let url = "https://elixir.bootlin.com/linux/v6.6/A/ident/kvm";
        let mut a = Entity::new("kvm", EntityType::Component);
        let mut b = Entity::new("KVM", EntityType::Component);
        a.add_external_link(LINK_CODE, url);
        b.add_external_link(LINK_CODE, url);
        assert!(!a.is_same_wikipedia_link(&b));
    }

    #[test]
    fn test_set_name_keeps_alias_invariant() {
        let mut e = Entity::new("MM", EntityType::Concept);
        e.add_alias("memory management");
        e.set_name("memory management");
        assert_eq!(e.name, "memory management");
        assert_eq!(e.aliases, vec!["MM".to_string()]);
    }

    #[test]
    fn test_blank_context_detection() {
        assert!(Entity::new("a", EntityType::Unknown).has_blank_context());
        assert!(Entity::new("a", EntityType::Unknown).with_context("None").has_blank_context());
        assert!(Entity::new("a", EntityType::Unknown).with_context("  \n").has_blank_context());
        assert!(!Entity::new("a", EntityType::Unknown).with_context("h1: Memory").has_blank_context());
    }

    #[test]
    fn test_set_context_formats_parts() {
        let mut e = Entity::new("thp", EntityType::Component);
        e.set_context(Some("Memory management"), None, Some("Transparent huge pages"));
        assert_eq!(e.context, "h1: Memory management\nfeature_description: Transparent huge pages");
    }

    #[test]
    fn test_is_same_entity_uses_aliases() {
        let mut a = Entity::new("Memory Management", EntityType::Concept);
        a.add_alias("MM");
        let b = Entity::new("mm", EntityType::Concept);
        assert!(a.is_same_entity(&b));
        assert!(b.is_same_entity(&a));
    }

    #[test]
    fn test_select_canonical_form_prefers_full_form() {
        assert_eq!(
            select_canonical_form(["THP", "transparent huge pages", "thp"]).as_deref(),
            Some("transparent huge pages")
        );
        assert_eq!(select_canonical_form(["KVM", "MM"]).as_deref(), Some("KVM"));
        assert_eq!(select_canonical_form(Vec::<&str>::new()), None);
    }

    #[test]
    fn test_alias_mapping() {
        let mut a = Entity::new("memory management", EntityType::Concept);
        a.add_alias("mm");
        let mapping = alias_mapping(&[a]);
        assert_eq!(mapping["mm"], "memory management");
        assert_eq!(mapping["memory management"], "memory management");
    }

    #[test]
    fn test_json_defaults_for_missing_fields() {
        let entity = Entity::from_json(r#"{"name": "kvm_vcpu", "entity_type": "component"}"#).unwrap();
        assert_eq!(entity.name, "kvm_vcpu");
        assert_eq!(entity.entity_type, EntityType::Component);
        assert!(entity.aliases.is_empty());
        assert!(entity.external_links.is_empty());
        assert_eq!(entity.feature_id, 0);
        assert!(!entity.id.is_nil());
    }

    #[test]
    fn test_json_rejects_empty_name() {
        let err = Entity::from_json(r#"{"name": "  "}"#).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_entity_serialization_roundtrip() {
        let mut e = Entity::new("kvm", EntityType::Component);
        e.add_external_link(LINK_WIKIPEDIA, WIKI_KVM);
        let json = e.to_json().unwrap();
        let back = Entity::from_json(&json).unwrap();
        assert_eq!(back.id, e.id);
        assert_eq!(back.external_links, e.external_links);
    }
}
