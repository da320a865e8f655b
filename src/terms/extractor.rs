use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;
use tracing::trace;

use crate::store::EmbeddedItem;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9]+").expect("static regex"));
static COMPOUND_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:[-_][a-z0-9]+)+$").expect("static regex"));

const MAX_FIELD_CHARS: usize = 5000;
const MAX_FIELD_TOKENS: usize = 80;

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "before", "but", "by", "can", "copy", "could", "did", "do", "does", "each", "final", "for",
    "from", "had", "has", "have", "he", "her", "his", "how", "if", "in", "into", "is", "it",
    "its", "may", "more", "most", "my", "new", "no", "not", "of", "old", "on", "one", "or",
    "other", "our", "out", "over", "she", "so", "some", "such", "than", "that", "the", "their",
    "them", "then", "there", "these", "they", "this", "those", "to", "two", "under", "untitled",
    "up", "use", "used", "using", "very", "was", "we", "were", "what", "when", "which", "who",
    "will", "with", "would", "you", "your",
];

/// File-type and category words that say nothing about content.
const TYPE_VOCABULARY: &[&str] = &[
    "archive", "audio", "csv", "doc", "docs", "document", "documents", "docx", "file", "files",
    "general", "gif", "heic", "htm", "html", "image", "images", "jpeg", "jpg", "json",
    "md", "misc", "miscellaneous", "mov", "mp3", "mp4", "odt", "pdf", "photo", "photos", "png",
    "ppt", "pptx", "presentation", "rtf", "scan", "scanned", "screenshot", "spreadsheet", "svg",
    "tif", "tiff", "txt", "uncategorized", "unknown", "video", "webp", "xls", "xlsx", "xml",
    "zip",
];

static FILTERED: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| STOP_WORDS.iter().chain(TYPE_VOCABULARY).copied().collect());

/// Weighted metadata fields, in extraction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Tags,
    Subject,
    Summary,
    Name,
    Category,
}

impl Field {
    fn weight(self) -> usize {
        match self {
            Field::Tags => 3,
            Field::Subject => 2,
            Field::Summary | Field::Name | Field::Category => 1,
        }
    }

    fn min_len(self) -> usize {
        match self {
            Field::Tags | Field::Category => 2,
            Field::Subject | Field::Summary | Field::Name => 3,
        }
    }
}

/// Tokens found in one item's metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermSignals {
    pub token_set: BTreeSet<String>,
    /// Weighted occurrence count per token.
    pub token_counts: HashMap<String, usize>,
}

impl TermSignals {
    fn add(&mut self, token: String, weight: usize) {
        *self.token_counts.entry(token.clone()).or_default() += weight;
        self.token_set.insert(token);
    }

    pub fn is_empty(&self) -> bool {
        self.token_set.is_empty()
    }
}

/// Per-item signals plus document frequencies over the whole item set.
#[derive(Debug, Clone, Default)]
pub struct TermCorpus {
    pub signals: HashMap<String, TermSignals>,
    pub df: HashMap<String, usize>,
    pub total_docs: usize,
}

fn keep(token: &str, min_len: usize) -> bool {
    token.len() >= min_len
        && !token.bytes().all(|b| b.is_ascii_digit())
        && !FILTERED.contains(token)
}

/// First `max` chars of `s`.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn tokenize(text: &str, min_len: usize) -> impl Iterator<Item = String> + '_ {
    TOKEN_RE
        .find_iter(truncate_chars(text, MAX_FIELD_CHARS))
        .take(MAX_FIELD_TOKENS)
        .map(|m| m.as_str())
        .filter(move |t| keep(t, min_len))
        .map(str::to_string)
}

fn clean_tag(raw: &str) -> Option<String> {
    let tag = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '#')
        .trim()
        .to_lowercase();
    (!tag.is_empty()).then_some(tag)
}

/// Normalize tags given as an array, a JSON-like list string, or a
/// delimited string (`,` `;` `|`). Lowercased, deduplicated, in order.
pub fn normalize_tags(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::Array(values) => values
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Value::String(s) => {
            let trimmed = s.trim();
            match serde_json::from_str::<Vec<String>>(trimmed) {
                Ok(list) if trimmed.starts_with('[') => list,
                _ => trimmed
                    .trim_start_matches('[')
                    .trim_end_matches(']')
                    .split([',', ';', '|'])
                    .map(str::to_string)
                    .collect(),
            }
        }
        _ => Vec::new(),
    };

    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(|t| clean_tag(t))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Normalized tags of an item, empty when it has none.
pub fn item_tags(item: &EmbeddedItem) -> Vec<String> {
    item.tags_value().map(normalize_tags).unwrap_or_default()
}

/// Tokenize and weight one item's metadata fields.
pub fn extract_signals(item: &EmbeddedItem) -> TermSignals {
    let mut signals = TermSignals::default();

    let tag_weight = Field::Tags.weight();
    let tag_min = Field::Tags.min_len();
    let tags = item_tags(item);
    let joined = tags.join(" ");
    for token in tokenize(&joined, tag_min) {
        signals.add(token, tag_weight);
    }
    // Hyphenated tags such as "acme-q3" are also kept whole.
    for tag in &tags {
        if tag.len() <= 64 && COMPOUND_TAG_RE.is_match(tag) && keep_compound(tag) {
            signals.add(tag.clone(), tag_weight);
        }
    }

    let text_fields = [
        (Field::Subject, item.subject()),
        (Field::Summary, item.summary()),
        (Field::Name, item.name()),
        (Field::Category, item.category()),
    ];
    for (field, text) in text_fields {
        let Some(text) = text else { continue };
        let lowered = truncate_chars(text, MAX_FIELD_CHARS).to_lowercase();
        for token in tokenize(&lowered, field.min_len()) {
            signals.add(token, field.weight());
        }
    }

    trace!("{} distinct tokens for {}", signals.token_set.len(), item.id);
    signals
}

fn keep_compound(tag: &str) -> bool {
    !tag.bytes().all(|b| b.is_ascii_digit() || b == b'-' || b == b'_')
}

/// Extract signals for every item and count document frequency once per
/// distinct id.
#[tracing::instrument(name = "Extracting term signals", level = "debug", skip(items), fields(n = items.len()))]
pub fn build_corpus(items: &[Arc<EmbeddedItem>]) -> TermCorpus {
    let mut corpus = TermCorpus::default();
    for item in items {
        if corpus.signals.contains_key(&item.id) {
            continue;
        }
        let signals = extract_signals(item);
        for token in &signals.token_set {
            *corpus.df.entry(token.clone()).or_default() += 1;
        }
        corpus.signals.insert(item.id.clone(), signals);
    }
    corpus.total_docs = corpus.signals.len();
    corpus
}
