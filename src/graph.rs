//! Cross-cluster similarity edges and the bridge files that explain them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ndarray::prelude::*;
use serde::Serialize;
use tracing::{debug, trace};

use crate::classify::linalg::{cosine_similarity_f64, cosine_to_centroid};
use crate::config::BridgeOptions;
use crate::engine::snapshot::Cluster;
use crate::store::{EmbeddedItem, VectorStore};

pub const DEFAULT_EDGE_THRESHOLD: f64 = 0.6;
const MAX_SHARED_TERMS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeFile {
    pub id: String,
    pub name: String,
    pub path: Option<String>,
    /// Similarity to the other cluster's centroid.
    pub similarity: f64,
    pub cluster_id: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossClusterEdge {
    pub source: usize,
    pub target: usize,
    pub similarity: f64,
    pub shared_terms: Vec<String>,
    pub bridge_files: Vec<BridgeFile>,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeReport {
    pub success: bool,
    pub edges: Vec<CrossClusterEdge>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EdgeReport {
    pub fn failed<S: Into<String>>(error: S) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Case-insensitive overlap of the two clusters' terms and tags, in the
/// order they appear on `a`.
pub fn shared_terms(a: &Cluster, b: &Cluster) -> Vec<String> {
    let other: HashSet<String> = b
        .top_terms
        .iter()
        .chain(&b.common_tags)
        .map(|t| t.to_lowercase())
        .collect();
    let mut seen = HashSet::new();
    a.top_terms
        .iter()
        .chain(&a.common_tags)
        .map(|t| t.to_lowercase())
        .filter(|t| other.contains(t) && seen.insert(t.clone()))
        .take(MAX_SHARED_TERMS)
        .collect()
}

/// Best-effort "is this file still on disk" with one lookup per path.
struct FileChecker<'a> {
    store: Option<&'a dyn VectorStore>,
    enabled: bool,
    by_path: HashMap<String, bool>,
}

impl<'a> FileChecker<'a> {
    fn new(store: Option<&'a dyn VectorStore>, enabled: bool) -> Self {
        Self {
            store,
            enabled,
            by_path: HashMap::new(),
        }
    }

    async fn path_of(&self, item: &EmbeddedItem) -> Option<String> {
        if let Some(path) = item.path() {
            return Some(path.to_string());
        }
        let store = self.store?;
        match store.get_file(&item.id).await {
            Ok(record) => record.and_then(|r| r.file_path),
            Err(e) => {
                debug!("get_file({}) failed: {e}", item.id);
                None
            }
        }
    }

    /// Unknown paths and failed checks count as reachable.
    async fn reachable(&mut self, path: Option<&str>) -> bool {
        let Some(path) = path.filter(|_| self.enabled) else {
            return true;
        };
        if let Some(&known) = self.by_path.get(path) {
            return known;
        }
        let exists = tokio::fs::try_exists(path).await.unwrap_or(true);
        trace!("{path} reachable: {exists}");
        self.by_path.insert(path.to_string(), exists);
        exists
    }
}

/// Members closest to their own centroid, at most `cap` of them.
fn central_candidates(
    cluster: &Cluster,
    centroid: ArrayView1<f64>,
    cap: usize,
) -> Vec<Arc<EmbeddedItem>> {
    if cluster.members.len() <= cap {
        return cluster.members.clone();
    }
    let mut scored: Vec<(f64, &Arc<EmbeddedItem>)> = cluster
        .members
        .iter()
        .map(|m| (cosine_to_centroid(&m.vector, centroid), m))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
    scored.into_iter().take(cap).map(|(_, m)| m.clone()).collect()
}

/// Builds edges for one snapshot. Candidate lists and file checks are
/// reused across every pair.
pub struct RelationshipGraphBuilder<'a> {
    clusters: &'a [Cluster],
    centroids: &'a Array2<f64>,
    options: BridgeOptions,
    files: FileChecker<'a>,
    candidates: HashMap<usize, Vec<Arc<EmbeddedItem>>>,
}

impl<'a> RelationshipGraphBuilder<'a> {
    pub fn new(
        clusters: &'a [Cluster],
        centroids: &'a Array2<f64>,
        options: BridgeOptions,
        store: Option<&'a dyn VectorStore>,
    ) -> Self {
        let check = options.check_files;
        Self {
            clusters,
            centroids,
            options,
            files: FileChecker::new(store, check),
            candidates: HashMap::new(),
        }
    }

    fn centroid(&self, cluster: &Cluster) -> Option<ArrayView1<'a, f64>> {
        let centroids: &'a Array2<f64> = self.centroids;
        (cluster.id < centroids.nrows()).then(|| centroids.row(cluster.id))
    }

    /// Edges between every pair of published clusters whose centroids are
    /// at least `threshold` similar, strongest first.
    #[tracing::instrument(name = "Building cross-cluster edges", level = "info", skip(self), fields(clusters = self.clusters.len()))]
    pub async fn build(&mut self, threshold: f64) -> Vec<CrossClusterEdge> {
        let threshold = if threshold.is_finite() {
            threshold.clamp(-1.0, 1.0)
        } else {
            DEFAULT_EDGE_THRESHOLD
        };
        let clusters = self.clusters;
        let mut edges = Vec::new();
        for (i, a) in clusters.iter().enumerate() {
            for b in &clusters[i + 1..] {
                let (Some(ca), Some(cb)) = (self.centroid(a), self.centroid(b)) else {
                    continue;
                };
                let similarity = cosine_similarity_f64(ca, cb);
                if similarity < threshold {
                    continue;
                }
                let min_bridge = self.options.min_similarity_for(threshold);
                let mut bridge_files = self.bridges(a, ca, b, cb, min_bridge).await;
                bridge_files.extend(self.bridges(b, cb, a, ca, min_bridge).await);
                debug!(
                    "Edge {} - {} at {similarity:.3} with {} bridge files",
                    a.id,
                    b.id,
                    bridge_files.len()
                );
                edges.push(CrossClusterEdge {
                    source: a.id,
                    target: b.id,
                    similarity,
                    shared_terms: shared_terms(a, b),
                    count: bridge_files.len(),
                    bridge_files,
                });
            }
        }
        edges.sort_by(|x, y| {
            y.similarity
                .total_cmp(&x.similarity)
                .then_with(|| (x.source, x.target).cmp(&(y.source, y.target)))
        });
        edges
    }

    /// Members of `from` strictly above `min_similarity` to `to`'s centroid.
    async fn bridges(
        &mut self,
        from: &Cluster,
        from_centroid: ArrayView1<'_, f64>,
        to: &Cluster,
        to_centroid: ArrayView1<'_, f64>,
        min_similarity: f64,
    ) -> Vec<BridgeFile> {
        let cap = self.options.candidate_cap;
        let candidates = self
            .candidates
            .entry(from.id)
            .or_insert_with(|| central_candidates(from, from_centroid, cap))
            .clone();

        let mut scored: Vec<(f64, Arc<EmbeddedItem>)> = candidates
            .into_iter()
            .map(|m| (cosine_to_centroid(&m.vector, to_centroid), m))
            .filter(|(sim, _)| *sim > min_similarity)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));

        let mut picked = Vec::new();
        for (similarity, item) in scored {
            if picked.len() >= self.options.max_bridge_files_per_cluster {
                break;
            }
            let path = self.files.path_of(&item).await;
            if !self.files.reachable(path.as_deref()).await {
                trace!("Skipping unreachable bridge file {}", item.id);
                continue;
            }
            picked.push(BridgeFile {
                id: item.id.clone(),
                name: item.display_name().to_string(),
                path,
                similarity,
                cluster_id: from.id,
            });
        }
        trace!("{} bridge files from {} towards {}", picked.len(), from.id, to.id);
        picked
    }
}
