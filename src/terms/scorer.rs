use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::extractor::TermCorpus;
use crate::store::EmbeddedItem;

/// Hard ceiling on ranked terms per cluster, whatever the caller asks for.
pub const MAX_TERMS_CEILING: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredTerm {
    pub term: String,
    pub score: f64,
}

/// Rank a cluster's terms by `tf * ln((N + 1) / (df + 1))`.
///
/// `tf` sums the weighted counts of each distinct member. Ties go to the
/// alphabetically smaller term.
pub fn rank_terms(
    members: &[Arc<EmbeddedItem>],
    corpus: &TermCorpus,
    max_terms: usize,
) -> Vec<ScoredTerm> {
    let mut seen = HashSet::new();
    let mut tf: HashMap<&str, usize> = HashMap::new();
    for member in members {
        if !seen.insert(member.id.as_str()) {
            continue;
        }
        let Some(signals) = corpus.signals.get(&member.id) else {
            continue;
        };
        for (token, count) in &signals.token_counts {
            *tf.entry(token.as_str()).or_default() += count;
        }
    }

    let total_docs = corpus.total_docs as f64;
    let mut scored: Vec<ScoredTerm> = tf
        .into_iter()
        .filter_map(|(term, tf)| {
            let df = corpus.df.get(term).copied().unwrap_or(0) as f64;
            let score = tf as f64 * ((total_docs + 1.0) / (df + 1.0)).ln();
            (score.is_finite() && score > 0.0).then(|| ScoredTerm {
                term: term.to_string(),
                score,
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.term.cmp(&b.term)));
    scored.truncate(max_terms.min(MAX_TERMS_CEILING));
    scored
}

/// Ranked term strings only.
pub fn top_terms(
    members: &[Arc<EmbeddedItem>],
    corpus: &TermCorpus,
    max_terms: usize,
) -> Vec<String> {
    rank_terms(members, corpus, max_terms)
        .into_iter()
        .map(|s| s.term)
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::test_support::item;
    use crate::terms::build_corpus;

    fn tagged(id: &str, tags: serde_json::Value) -> Arc<EmbeddedItem> {
        Arc::new(item(id, vec![1.0], json!({ "tags": tags })))
    }

    #[test]
    fn rare_cluster_term_beats_corpus_wide_tag() {
        let mut corpus_items = vec![
            tagged("c1", json!(["invoice", "acme-q3"])),
            tagged("c2", json!(["invoice", "acme-q3"])),
            tagged("c3", json!("invoice, acme-q3")),
        ];
        // invoice lands in 7 of 10 documents, so it keeps a small positive idf
        for i in 0..4 {
            corpus_items.push(tagged(&format!("o{i}"), json!(["invoice", "receipt"])));
        }
        for i in 4..7 {
            corpus_items.push(tagged(&format!("o{i}"), json!(["receipt"])));
        }
        let corpus = build_corpus(&corpus_items);
        assert_eq!(corpus.total_docs, 10);
        assert_eq!(corpus.df.get("invoice").copied(), Some(7));

        let terms = top_terms(&corpus_items[..3], &corpus, 10);
        let pos = |t: &str| terms.iter().position(|x| x == t);
        let rare = pos("acme-q3").expect("acme-q3 ranked");
        let common = pos("invoice").expect("invoice ranked");
        assert!(rare < common, "{terms:?}");
    }

    #[test]
    fn ties_break_alphabetically_and_output_is_deterministic() {
        let items = vec![
            tagged("a", json!(["zeta", "alpha"])),
            tagged("b", json!(["zeta", "alpha"])),
            tagged("c", json!(["other-thing"])),
        ];
        let corpus = build_corpus(&items);
        let first = top_terms(&items[..2], &corpus, 10);
        assert_eq!(first, vec!["alpha", "zeta"]);
        for _ in 0..5 {
            assert_eq!(top_terms(&items[..2], &corpus, 10), first);
        }
    }

    #[test]
    fn terms_in_every_document_are_dropped() {
        // df == N gives ln(1) == 0
        let items = vec![
            tagged("a", json!(["budget", "travel"])),
            tagged("b", json!(["budget"])),
        ];
        let corpus = build_corpus(&items);
        let ranked = rank_terms(&items, &corpus, 10);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].term, "travel");
        assert!(ranked[0].score > 0.0);
    }

    #[test]
    fn repeated_members_count_once_and_output_is_capped() {
        let items = vec![
            tagged("a", json!(["one1", "two2", "three3"])),
            tagged("b", json!(["four4"])),
        ];
        let corpus = build_corpus(&items);
        let doubled = vec![items[0].clone(), items[0].clone()];
        let once = rank_terms(&items[..1], &corpus, 10);
        let twice = rank_terms(&doubled, &corpus, 10);
        assert_eq!(once, twice);
        assert_eq!(rank_terms(&items[..1], &corpus, 2).len(), 2);
        assert!(rank_terms(&items, &corpus, 500).len() <= MAX_TERMS_CEILING);
    }
}
