use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::prelude::*;
use serde::Serialize;
use time::OffsetDateTime;

use crate::label::{LabelConfidence, LabelSource};
use crate::serde_helpers::offset_datetime;
use crate::store::EmbeddedItem;
use crate::terms::{FileCategory, TimeRange};

/// One published cluster. `id` is the row of its centroid in the snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: usize,
    pub members: Vec<Arc<EmbeddedItem>>,
    pub label: String,
    pub label_confidence: LabelConfidence,
    pub label_reason: LabelSource,
    pub dominant_category: Option<String>,
    pub common_tags: Vec<String>,
    pub top_terms: Vec<String>,
    pub dominant_file_category: Option<FileCategory>,
    pub dominant_folder_name: Option<String>,
    pub time_range: Option<TimeRange>,
}

impl Cluster {
    pub fn member_ids(&self) -> Vec<String> {
        self.members.iter().map(|m| m.id.clone()).collect()
    }
}

/// Cluster summary handed to graph consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphCluster {
    pub id: usize,
    pub label: String,
    pub member_count: usize,
    pub member_ids: Vec<String>,
    pub confidence: LabelConfidence,
    pub top_terms: Vec<String>,
    pub dominant_category: Option<String>,
    pub common_tags: Vec<String>,
    pub dominant_file_category: Option<FileCategory>,
    pub dominant_folder_name: Option<String>,
    pub time_range: Option<TimeRange>,
}

impl From<&Cluster> for GraphCluster {
    fn from(c: &Cluster) -> Self {
        Self {
            id: c.id,
            label: c.label.clone(),
            member_count: c.members.len(),
            member_ids: c.member_ids(),
            confidence: c.label_confidence,
            top_terms: c.top_terms.clone(),
            dominant_category: c.dominant_category.clone(),
            common_tags: c.common_tags.clone(),
            dominant_file_category: c.dominant_file_category,
            dominant_folder_name: c.dominant_folder_name.clone(),
            time_range: c.time_range,
        }
    }
}

/// Everything one successful compute pass produced. Published whole and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSnapshot {
    pub version: u64,
    /// Clusters that met the minimum size, ordered by id.
    pub clusters: Vec<Cluster>,
    /// centroids = (k, n_features), including rows of dropped clusters.
    #[serde(skip)]
    pub centroids: Array2<f64>,
    #[serde(with = "offset_datetime")]
    pub computed_at: OffsetDateTime,
    #[serde(skip)]
    pub computed_instant: Option<Instant>,
    /// Every item that took part in the pass, clustered or not.
    #[serde(skip)]
    pub items: Vec<Arc<EmbeddedItem>>,
    pub unclustered: Vec<String>,
    pub k: usize,
    pub iterations: usize,
    pub converged: bool,
    pub inertia: f64,
    pub seed: u64,
    pub skipped: usize,
    pub truncated: bool,
    pub warnings: Vec<String>,
}

impl ClusterSnapshot {
    pub fn cluster(&self, id: usize) -> Option<&Cluster> {
        self.clusters
            .binary_search_by_key(&id, |c| c.id)
            .ok()
            .map(|idx| &self.clusters[idx])
    }

    pub fn graph_clusters(&self) -> Vec<GraphCluster> {
        self.clusters.iter().map(GraphCluster::from).collect()
    }

    /// Cluster holding `item_id`, if it survived the size filter.
    pub fn cluster_of(&self, item_id: &str) -> Option<&Cluster> {
        self.clusters
            .iter()
            .find(|c| c.members.iter().any(|m| m.id == item_id))
    }

    pub fn age(&self) -> Option<Duration> {
        self.computed_instant.map(|t| t.elapsed())
    }

    pub fn is_older_than(&self, ttl: Duration) -> bool {
        self.age().is_none_or(|age| age >= ttl)
    }
}
