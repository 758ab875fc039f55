//! Surface-form comparison for entity names.
//!
//! Every predicate here is pure: no I/O, no shared mutable state. Names are
//! compared after [`normalize`], which lower-cases, lemmatizes each word as
//! a noun, turns hyphens into spaces and collapses whitespace.
//!
//! The lemmatizer is rule based (suffix rules plus a small irregular table).
//! It is tuned for kernel vocabulary, where most plurals are regular and
//! identifiers with digits or underscores must stay untouched.

use std::sync::OnceLock;

use regex::Regex;

/// Maximum absolute edit distance for two words to count as synonyms.
pub const MAX_WORD_DISTANCE: usize = 2;
/// Normalized edit distance must be strictly below this.
pub const MAX_NORMALIZED_DISTANCE: f64 = 0.25;

/// Irregular noun plurals, `(singular, plural)`.
const IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("mouse", "mice"),
    ("goose", "geese"),
    ("foot", "feet"),
    ("tooth", "teeth"),
    ("person", "people"),
    ("index", "indices"),
    ("vertex", "vertices"),
    ("matrix", "matrices"),
    ("appendix", "appendices"),
    ("analysis", "analyses"),
    ("axis", "axes"),
    ("basis", "bases"),
    ("crisis", "crises"),
    ("thesis", "theses"),
    ("criterion", "criteria"),
    ("phenomenon", "phenomena"),
    ("datum", "data"),
    ("medium", "media"),
];

/// Final consonants that double before `-ing` after a short vowel
/// (`map` -> `mapping`, `commit` -> `committing`).
const DOUBLING_CONSONANTS: &[char] = &['b', 'd', 'g', 'l', 'm', 'n', 'p', 'r', 't'];

static DIGITS: OnceLock<Regex> = OnceLock::new();

fn digit_runs(word: &str) -> Vec<&str> {
    let re = DIGITS.get_or_init(|| Regex::new(r"[0-9]+").expect("digit pattern is valid"));
    re.find_iter(word).map(|m| m.as_str()).collect()
}

/// Injected name comparison strategy.
///
/// The fusion passes take a `&dyn NameMatching` so tests can stub the
/// heuristics; [`NameMatcher`] is the production implementation.
pub trait NameMatching: Send + Sync {
    /// `short` is a plausible abbreviation of `long`. Directional.
    fn is_abbreviation(&self, long: &str, short: &str) -> bool;
    /// Word-wise near-identical spelling.
    fn is_synonym(&self, a: &str, b: &str) -> bool;
    /// Singular/plural pair, either direction.
    fn is_singular_plural(&self, a: &str, b: &str) -> bool;
    /// Verb base and `-ing` form, either direction.
    fn is_gerund(&self, a: &str, b: &str) -> bool;
    /// Same words under different identifier conventions.
    fn is_naming_convention_variant(&self, a: &str, b: &str) -> bool;

    /// True if any heuristic says the two names denote the same thing.
    fn is_same_name(&self, a: &str, b: &str) -> bool {
        a == b
            || self.is_abbreviation(a, b)
            || self.is_abbreviation(b, a)
            || self.is_synonym(a, b)
            || self.is_singular_plural(a, b)
            || self.is_gerund(a, b)
            || self.is_naming_convention_variant(a, b)
    }
}

/// Rule-based [`NameMatching`] implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameMatcher;

impl NameMatcher {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl NameMatching for NameMatcher {
    fn is_abbreviation(&self, long: &str, short: &str) -> bool {
        is_abbreviation(long, short)
    }

    fn is_synonym(&self, a: &str, b: &str) -> bool {
        is_synonym(a, b)
    }

    fn is_singular_plural(&self, a: &str, b: &str) -> bool {
        is_singular_plural(a, b)
    }

    fn is_gerund(&self, a: &str, b: &str) -> bool {
        is_gerund(a, b)
    }

    fn is_naming_convention_variant(&self, a: &str, b: &str) -> bool {
        is_naming_convention_variant(a, b)
    }
}

/// Lower-case noun lemma of a single word.
///
/// Words containing anything but ASCII letters (digits, underscores,
/// parentheses) are only lower-cased.
#[must_use]
pub fn lemmatize(word: &str) -> String {
    let lower = word.to_lowercase();
    if lower.len() <= 3 || !lower.bytes().all(|b| b.is_ascii_lowercase()) {
        return lower;
    }
    if let Some((singular, _)) = IRREGULAR_PLURALS.iter().find(|(_, plural)| *plural == lower) {
        return (*singular).to_string();
    }
    if lower.ends_with("ss") || lower.ends_with("us") || lower.ends_with("is") {
        return lower;
    }
    if let Some(stem) = lower.strip_suffix("ies") {
        return format!("{stem}y");
    }
    if let Some(stem) = lower.strip_suffix("sses") {
        return format!("{stem}ss");
    }
    if lower.ends_with("xes") || lower.ends_with("zzes") || lower.ends_with("shes") {
        return lower[..lower.len() - 2].to_string();
    }
    if let Some(stem) = lower.strip_suffix("ches") {
        // "caches" -> "cache", "patches" -> "patch"
        let vowel_before = stem.ends_with(|c: char| "aeiou".contains(c));
        return if vowel_before { format!("{stem}che") } else { format!("{stem}ch") };
    }
    if let Some(stem) = lower.strip_suffix('s') {
        return stem.to_string();
    }
    lower
}

/// Canonical comparison form of a name.
#[must_use]
pub fn normalize(term: &str) -> String {
    let words: Vec<String> = term
        .split_whitespace()
        .map(lemmatize)
        .collect();
    words.join(" ").replace('-', " ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// At least one cased character and no lowercase ones.
fn is_all_upper(s: &str) -> bool {
    s.chars().any(char::is_uppercase) && !s.chars().any(char::is_lowercase)
}

/// Word-wise near-identical spelling after normalization.
///
/// Two all-uppercase terms are never synonyms (distinct acronyms differ by
/// one letter all the time). Otherwise the normalized forms must be equal,
/// equal once spaces are dropped, or pair up word by word with the same
/// first letter, the same digit runs and a small edit distance.
#[must_use]
pub fn is_synonym(a: &str, b: &str) -> bool {
    if a.trim().is_empty() || b.trim().is_empty() {
        return false;
    }
    if is_all_upper(a) && is_all_upper(b) {
        return false;
    }

    let left = normalize(a);
    let right = normalize(b);
    if left == right || left.replace(' ', "") == right.replace(' ', "") {
        return true;
    }

    let left_words: Vec<&str> = left.split(' ').collect();
    let right_words: Vec<&str> = right.split(' ').collect();
    if left_words.len() != right_words.len() {
        return false;
    }

    left_words.iter().zip(&right_words).all(|(w1, w2)| {
        if w1.chars().next() != w2.chars().next() {
            return false;
        }
        if digit_runs(w1) != digit_runs(w2) {
            return false;
        }
        let distance = strsim::osa_distance(w1, w2);
        let longest = w1.chars().count().max(w2.chars().count());
        #[allow(clippy::cast_precision_loss)]
        let normalized = if longest == 0 { 0.0 } else { distance as f64 / longest as f64 };
        distance <= MAX_WORD_DISTANCE && normalized < MAX_NORMALIZED_DISTANCE
    })
}

fn check_prefix(long: &[char], short: &[char]) -> bool {
    short.len() >= 2 && short.len() * 3 < long.len() * 2 && long.starts_with(short)
}

fn check_word_word(long: &[char], chunk: &[char]) -> bool {
    (chunk.len() == 1 && chunk.first() == long.first()) || check_prefix(long, chunk)
}

/// Can `word` be cut into one chunk per word of `phrase`, each chunk an
/// initial or a short prefix of its word?
fn check_phrase_word(phrase: &str, word: &str) -> bool {
    let words: Vec<Vec<char>> = phrase.split_whitespace().map(|w| w.chars().collect()).collect();
    let chars: Vec<char> = word.chars().collect();
    if words.is_empty() || chars.is_empty() || chars.len() < words.len() {
        return false;
    }
    if words.len() == 1 {
        return check_word_word(&words[0], &chars);
    }

    let first = &words[0];
    let last_first_end = chars.len() - (words.len() - 1);
    (1..=last_first_end).any(|end| {
        let chunk = &chars[..end];
        let head_ok = if chunk[0] == first[0] {
            check_word_word(first, chunk)
        } else {
            // a leading vowel may be skipped: "extended" -> "x"
            "aeiou".contains(first[0]) && first.len() > 1 && chunk[0] == first[1] && end == 1
        };
        head_ok && split_rest(&words[1..], &chars[end..])
    })
}

fn split_rest(words: &[Vec<char>], chars: &[char]) -> bool {
    match words {
        [] => chars.is_empty(),
        [only] => !chars.is_empty() && check_word_word(only, chars),
        [head, tail @ ..] => {
            let max_end = chars.len().saturating_sub(tail.len());
            (1..=max_end).any(|end| check_word_word(head, &chars[..end]) && split_rest(tail, &chars[end..]))
        }
    }
}

/// `short` is a plausible abbreviation of `long`.
///
/// Single-word abbreviations are matched against the whole phrase
/// (`kvm` for "kernel virtual machine", `mm` for "memory management").
/// Multi-word abbreviations first drop the words shared at both ends and
/// then compare what is left.
#[must_use]
pub fn is_abbreviation(long: &str, short: &str) -> bool {
    let long_name = normalize(long);
    let short_name = normalize(short);
    if long_name.is_empty() || short_name.is_empty() {
        return false;
    }

    let mut short_words: Vec<&str> = short_name.split(' ').collect();
    if short_words.len() == 1 {
        return check_phrase_word(&long_name, &short_name);
    }

    let mut long_words: Vec<&str> = long_name.split(' ').collect();
    if long_words.len() < short_words.len() {
        return false;
    }
    while !short_words.is_empty() && short_words.first() == long_words.first() {
        short_words.remove(0);
        long_words.remove(0);
    }
    while !short_words.is_empty() && short_words.last() == long_words.last() {
        short_words.pop();
        long_words.pop();
    }

    if short_words.len() == 1 {
        check_phrase_word(&long_words.join(" "), short_words[0])
    } else if short_words.len() == long_words.len() {
        long_words.iter().zip(&short_words).all(|(l, s)| {
            let l: Vec<char> = l.chars().collect();
            let s: Vec<char> = s.chars().collect();
            check_word_word(&l, &s)
        })
    } else {
        false
    }
}

fn is_plural_of(singular: &str, plural: &str) -> bool {
    if singular.is_empty() || singular == plural {
        return false;
    }
    let Some(stem) = plural.strip_suffix('s') else {
        return irregular_plural_of(singular, plural);
    };
    if stem == singular {
        return true;
    }
    if let Some(es_stem) = plural.strip_suffix("es") {
        if es_stem == singular
            && ["s", "x", "z", "ch", "sh", "o"].iter().any(|suffix| singular.ends_with(suffix))
        {
            return true;
        }
    }
    if let (Some(y_stem), Some(ies_stem)) = (singular.strip_suffix('y'), plural.strip_suffix("ies")) {
        let consonant_before = y_stem.ends_with(|c: char| c.is_ascii_alphabetic() && !"aeiou".contains(c));
        if consonant_before && y_stem == ies_stem {
            return true;
        }
    }
    irregular_plural_of(singular, plural)
}

fn irregular_plural_of(singular: &str, plural: &str) -> bool {
    IRREGULAR_PLURALS.iter().any(|(s, p)| {
        match (singular.strip_suffix(s), plural.strip_suffix(p)) {
            (Some(a), Some(b)) => a == b && (a.is_empty() || a.ends_with([' ', '_', '-'])),
            _ => false,
        }
    })
}

/// Singular/plural pair in either direction, case-insensitive.
#[must_use]
pub fn is_singular_plural(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    is_plural_of(&a, &b) || is_plural_of(&b, &a)
}

fn is_gerund_of(base: &str, gerund: &str) -> bool {
    let Some(stem) = gerund.strip_suffix("ing") else {
        return false;
    };
    if base.chars().count() < 2 || stem.is_empty() {
        return false;
    }
    if stem == base {
        return true;
    }
    // "cache" -> "caching", but not "free" -> "freing"
    if let Some(elided) = base.strip_suffix('e') {
        if !elided.ends_with(['e', 'y', 'o']) && stem == elided {
            return true;
        }
    }
    let chars: Vec<char> = base.chars().collect();
    if let [.., c1, v, c2] = chars.as_slice() {
        let short_vowel = "aeiou".contains(*v) && !"aeiou".contains(*c1);
        if short_vowel && DOUBLING_CONSONANTS.contains(c2) {
            let doubled = format!("{base}{c2}");
            if stem == doubled {
                return true;
            }
        }
    }
    false
}

/// Verb base and its `-ing` form in either direction, case-insensitive.
#[must_use]
pub fn is_gerund(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    is_gerund_of(&a, &b) || is_gerund_of(&b, &a)
}

/// Splits an identifier into words on `_`, `-`, whitespace and case changes.
///
/// Acronym runs stay together: `HTTPServer` gives `["HTTP", "Server"]`.
#[must_use]
pub fn split_identifier(identifier: &str) -> Vec<String> {
    #[derive(PartialEq, Clone, Copy)]
    enum Class {
        Upper,
        Lower,
        Digit,
        Other,
    }
    fn class(c: char) -> Class {
        if c.is_uppercase() {
            Class::Upper
        } else if c.is_lowercase() {
            Class::Lower
        } else if c.is_ascii_digit() {
            Class::Digit
        } else {
            Class::Other
        }
    }

    let chars: Vec<char> = identifier.chars().collect();
    let mut words = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        match class(chars[i]) {
            Class::Other => i += 1,
            Class::Digit => {
                let start = i;
                while i < chars.len() && class(chars[i]) == Class::Digit {
                    i += 1;
                }
                words.push(chars[start..i].iter().collect());
            }
            Class::Lower => {
                let start = i;
                while i < chars.len() && class(chars[i]) == Class::Lower {
                    i += 1;
                }
                words.push(chars[start..i].iter().collect());
            }
            Class::Upper => {
                let start = i;
                while i < chars.len() && class(chars[i]) == Class::Upper {
                    i += 1;
                }
                let followed_by_lower = i < chars.len() && class(chars[i]) == Class::Lower;
                if followed_by_lower {
                    // last capital of the run opens the next word
                    let word_start = i - 1;
                    if word_start > start {
                        words.push(chars[start..word_start].iter().collect());
                    }
                    while i < chars.len() && class(chars[i]) == Class::Lower {
                        i += 1;
                    }
                    words.push(chars[word_start..i].iter().collect());
                } else {
                    words.push(chars[start..i].iter().collect());
                }
            }
        }
    }
    words
}

/// Same lower-cased word list under camelCase, snake_case, kebab-case or spaces.
#[must_use]
pub fn is_naming_convention_variant(a: &str, b: &str) -> bool {
    let left: Vec<String> = split_identifier(a).iter().map(|w| w.to_lowercase()).collect();
    let right: Vec<String> = split_identifier(b).iter().map(|w| w.to_lowercase()).collect();
    !left.is_empty() && left == right
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lemmatize_rules() {
        assert_eq!(lemmatize("Processes"), "process");
        assert_eq!(lemmatize("caches"), "cache");
        assert_eq!(lemmatize("patches"), "patch");
        assert_eq!(lemmatize("policies"), "policy");
        assert_eq!(lemmatize("mutexes"), "mutex");
        assert_eq!(lemmatize("indices"), "index");
        assert_eq!(lemmatize("status"), "status");
        assert_eq!(lemmatize("ops"), "ops");
        assert_eq!(lemmatize("kvm_vcpus"), "kvm_vcpus");
    }

    #[test]
    fn test_normalize_hyphen_and_spaces() {
        assert_eq!(normalize("Copy-on-Write   pages"), "copy on write page");
    }

    #[test]
    fn test_synonym_basic() {
        assert!(is_synonym("memory_allocation", "memory_allocator"));
        assert!(is_synonym("page cache", "page-cache"));
        assert!(is_synonym("pagecache", "page cache"));
        assert!(is_synonym("schedulers", "scheduler"));
        assert!(!is_synonym("scheduler", "allocator"));
    }

    #[test]
    fn test_synonym_rejects_versions_and_acronyms() {
        assert!(!is_synonym("v1", "v2"));
        assert!(!is_synonym("cgroup v1", "cgroup v2"));
        assert!(!is_synonym("KVM", "KVMS"));
        assert!(!is_synonym("", ""));
    }

    #[test]
    fn test_synonym_word_count_must_match() {
        assert!(!is_synonym("memory management", "memory management unit"));
    }

    #[test]
    fn test_abbreviation() {
        assert!(is_abbreviation("kernel virtual machine", "KVM"));
        assert!(is_abbreviation("memory management", "mm"));
        assert!(is_abbreviation("memory management unit", "MMU"));
        assert!(is_abbreviation("transparent huge pages", "THP"));
        assert!(is_abbreviation("virtual memory area", "vma"));
        assert!(is_abbreviation("memory", "mem"));
        assert!(!is_abbreviation("scheduler", "mm"));
    }

    #[test]
    fn test_abbreviation_is_directional() {
        assert!(is_abbreviation("kernel virtual machine", "kvm"));
        assert!(!is_abbreviation("kvm", "kernel virtual machine"));
        assert!(!is_abbreviation("", "kvm"));
    }

    #[test]
    fn test_abbreviation_multi_word() {
        assert!(is_abbreviation("completely fair scheduler", "cf scheduler"));
        assert!(is_abbreviation("page table entry", "page tab entry"));
        assert!(!is_abbreviation("page table entry", "page walk entry"));
    }

    #[test]
    fn test_prefix_must_be_short_enough() {
        // a prefix covering two thirds or more of the word is not an abbreviation
        assert!(!is_abbreviation("memory", "memor"));
    }

    #[test]
    fn test_singular_plural() {
        assert!(is_singular_plural("process", "processes"));
        assert!(is_singular_plural("architectures", "architecture"));
        assert!(is_singular_plural("policy", "policies"));
        assert!(is_singular_plural("Mutex", "mutexes"));
        assert!(is_singular_plural("child", "children"));
        assert!(is_singular_plural("page table index", "page table indices"));
        assert!(!is_singular_plural("process", "process"));
        assert!(!is_singular_plural("day", "daies"));
        assert!(!is_singular_plural("", "s"));
    }

    #[test]
    fn test_singular_plural_symmetric() {
        for (a, b) in [("process", "processes"), ("policy", "policies"), ("cpu", "cpus"), ("foo", "bar")] {
            assert_eq!(is_singular_plural(a, b), is_singular_plural(b, a));
        }
    }

    #[test]
    fn test_gerund() {
        assert!(is_gerund("schedule", "scheduling"));
        assert!(is_gerund("map", "mapping"));
        assert!(is_gerund("commit", "committing"));
        assert!(is_gerund("Page Cache", "page caching"));
        assert!(is_gerund("swapping", "swap"));
        assert!(is_gerund("block", "blocking"));
        assert!(!is_gerund("free", "freing"));
        assert!(!is_gerund("ring", "r"));
        assert!(!is_gerund("", "ing"));
    }

    #[test]
    fn test_gerund_symmetric() {
        for (a, b) in [("schedule", "scheduling"), ("map", "mapping"), ("page", "paging"), ("x", "y")] {
            assert_eq!(is_gerund(a, b), is_gerund(b, a));
        }
    }

    #[test]
    fn test_split_identifier() {
        assert_eq!(split_identifier("MemoryManager"), vec!["Memory", "Manager"]);
        assert_eq!(split_identifier("memory_manager"), vec!["memory", "manager"]);
        assert_eq!(split_identifier("my_VariableName"), vec!["my", "Variable", "Name"]);
        assert_eq!(split_identifier("HTTPServer"), vec!["HTTP", "Server"]);
        assert_eq!(split_identifier("ext4-fs"), vec!["ext", "4", "fs"]);
        assert_eq!(split_identifier("KVM"), vec!["KVM"]);
        assert!(split_identifier("__").is_empty());
    }

    #[test]
    fn test_naming_convention_variant() {
        assert!(is_naming_convention_variant("memory_manager", "MemoryManager"));
        assert!(is_naming_convention_variant("memoryManager", "memory-manager"));
        assert!(is_naming_convention_variant("page cache", "PageCache"));
        assert!(!is_naming_convention_variant("memory_allocation", "memory_allocator"));
        assert!(!is_naming_convention_variant("", ""));
    }

    #[test]
    fn test_is_same_name_combines_rules() {
        let m = NameMatcher::new();
        assert!(m.is_same_name("memory management", "mm"));
        assert!(m.is_same_name("mm", "memory management"));
        assert!(m.is_same_name("scheduling", "schedule"));
        assert!(m.is_same_name("processes", "process"));
        assert!(!m.is_same_name("scheduler", "page cache"));
        assert!(!m.is_same_name("", "x"));
    }
}
