use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::serde_helpers::duration as duration_serde;

/// How many clusters to ask the engine for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KSelection {
    /// `clamp(ceil(sqrt(n / 2)), 2, max_clusters_auto)`
    #[default]
    Auto,
    /// `clamp(k, 2, min(n, max_k))`
    Fixed(usize),
}

impl std::str::FromStr for KSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(KSelection::Auto);
        }
        s.parse::<usize>()
            .map(KSelection::Fixed)
            .map_err(|_| format!("expected `auto` or a positive integer, got `{s}`"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KmeansConfig {
    pub max_clusters_auto: usize,
    pub max_k: usize,
    pub max_iterations: usize,
    pub min_cluster_size: usize,
    /// Fixed seed for reproducible runs; a fresh seed is drawn per pass otherwise.
    pub seed: Option<u64>,
}

impl Default for KmeansConfig {
    fn default() -> Self {
        Self {
            max_clusters_auto: 15,
            max_k: 100,
            max_iterations: 50,
            min_cluster_size: 2,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    pub concurrency: usize,
    pub skip_llm: bool,
    pub model: String,
    pub max_tokens: u32,
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            skip_llm: false,
            model: "openai/gpt-oss-20b".to_string(),
            max_tokens: 40,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateConfig {
    pub max_items: usize,
    pub max_pairs: usize,
    pub min_threshold: f64,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            max_items: 1000,
            max_pairs: 10_000,
            min_threshold: 0.7,
        }
    }
}

/// Limits for picking bridge files on cross-cluster edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeOptions {
    /// Members per cluster considered, most central first.
    pub candidate_cap: usize,
    pub max_bridge_files_per_cluster: usize,
    /// Defaults to `max(0.5, threshold - 0.1)`.
    pub min_bridge_similarity: Option<f64>,
    /// Drop bridge files whose path no longer exists on disk.
    pub check_files: bool,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            candidate_cap: 50,
            max_bridge_files_per_cluster: 3,
            min_bridge_similarity: None,
            check_files: true,
        }
    }
}

impl BridgeOptions {
    pub fn min_similarity_for(&self, threshold: f64) -> f64 {
        self.min_bridge_similarity
            .filter(|v| v.is_finite())
            .unwrap_or_else(|| (threshold - 0.1).max(0.5))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Upper bound on embeddings pulled from the vector store per pass.
    pub fetch_limit: usize,
    pub kmeans: KmeansConfig,
    pub max_top_terms: usize,
    /// Age after which a published snapshot reports itself stale.
    #[serde(with = "duration_serde")]
    pub ttl: Duration,
    pub labels: LabelConfig,
    pub duplicates: DuplicateConfig,
    pub bridges: BridgeOptions,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            fetch_limit: 10_000,
            kmeans: KmeansConfig::default(),
            max_top_terms: 10,
            ttl: Duration::from_secs(30 * 60),
            labels: LabelConfig::default(),
            duplicates: DuplicateConfig::default(),
            bridges: BridgeOptions::default(),
        }
    }
}
