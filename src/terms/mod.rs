//! Descriptive terms and metadata summaries for clusters.

pub mod descriptors;
pub mod extractor;
pub mod scorer;

pub use descriptors::{FileCategory, TimeRange};
pub use extractor::{TermCorpus, TermSignals, build_corpus, extract_signals, normalize_tags};
pub use scorer::{ScoredTerm, rank_terms, top_terms};
