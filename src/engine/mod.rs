//! Cached, single-flight access to the clustering pipeline.

mod pipeline;
pub mod snapshot;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

pub use snapshot::{Cluster, ClusterSnapshot, GraphCluster};

use crate::AppError;
use crate::config::{BridgeOptions, ClusterConfig, KSelection};
use crate::duplicates::{DuplicateOptions, DuplicateReport, find_near_duplicates};
use crate::graph::{EdgeReport, RelationshipGraphBuilder};
use crate::label::{LabelGenerator, TextGenerator};
use crate::serde_helpers::offset_datetime;
use crate::store::{EmbeddedItem, EmbeddingAccessor, VectorStore};

/// Result of a `compute_clusters` call. Every caller sharing one in-flight
/// pass receives a clone of the same value.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeOutcome {
    pub success: bool,
    /// The new snapshot on success, the previous one (if any) on failure.
    pub snapshot: Option<Arc<ClusterSnapshot>>,
    /// The snapshot did not come from this pass.
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

impl ComputeOutcome {
    fn succeeded(snapshot: Arc<ClusterSnapshot>) -> Self {
        Self {
            success: true,
            warnings: snapshot.warnings.clone(),
            snapshot: Some(snapshot),
            stale: false,
            error: None,
        }
    }

    fn failed(previous: Option<Arc<ClusterSnapshot>>, error: &AppError) -> Self {
        Self {
            success: false,
            stale: previous.is_some(),
            snapshot: previous,
            error: Some(error.to_string()),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStats {
    pub computed: bool,
    pub stale: bool,
    pub in_flight: bool,
    pub version: Option<u64>,
    #[serde(with = "offset_datetime::option")]
    pub computed_at: Option<OffsetDateTime>,
    pub age_seconds: Option<u64>,
    pub cluster_count: usize,
    pub item_count: usize,
    pub clustered_count: usize,
    pub unclustered_count: usize,
    /// Member count per cluster id.
    pub cluster_sizes: BTreeMap<usize, usize>,
    pub k: Option<usize>,
    pub iterations: Option<usize>,
    pub converged: Option<bool>,
    pub inertia: Option<f64>,
    pub skipped: usize,
    pub truncated: bool,
    pub pipeline_runs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub warnings: Vec<String>,
}

type InFlight = Shared<BoxFuture<'static, ComputeOutcome>>;

#[derive(Default)]
struct CacheState {
    snapshot: Option<Arc<ClusterSnapshot>>,
    invalidated: bool,
    in_flight: Option<InFlight>,
    /// Bumped by `clear`; results from an older generation are dropped.
    generation: u64,
    last_version: u64,
    last_error: Option<String>,
}

struct Inner {
    store: Arc<dyn VectorStore>,
    accessor: EmbeddingAccessor,
    labeler: LabelGenerator,
    config: ClusterConfig,
    state: Mutex<CacheState>,
    pipeline_runs: AtomicUsize,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_and_publish(self: Arc<Self>, selection: KSelection, generation: u64) -> ComputeOutcome {
        self.pipeline_runs.fetch_add(1, Ordering::SeqCst);
        let result =
            pipeline::run(&self.accessor, &self.labeler, &self.config, selection).await;

        let mut state = self.state();
        let current = state.generation == generation;
        if current {
            state.in_flight = None;
        } else {
            debug!("Cache cleared during compute; result not published");
        }

        match result {
            Ok(mut snapshot) => {
                if current {
                    state.last_version += 1;
                    snapshot.version = state.last_version;
                }
                let snapshot = Arc::new(snapshot);
                if current {
                    state.snapshot = Some(snapshot.clone());
                    state.invalidated = false;
                    state.last_error = None;
                }
                ComputeOutcome::succeeded(snapshot)
            }
            Err(e) => {
                warn!("Cluster computation failed: {e}");
                if current {
                    state.last_error = Some(e.to_string());
                }
                ComputeOutcome::failed(state.snapshot.clone(), &e)
            }
        }
    }
}

/// Owns the published snapshot and coalesces concurrent recomputes.
#[derive(Clone)]
pub struct ClusterService {
    inner: Arc<Inner>,
}

impl ClusterService {
    pub fn new(
        store: Arc<dyn VectorStore>,
        generator: Option<Arc<dyn TextGenerator>>,
        config: ClusterConfig,
    ) -> Self {
        let accessor = EmbeddingAccessor::new(store.clone(), config.fetch_limit);
        let labeler = LabelGenerator::new(generator, config.labels.clone());
        Self {
            inner: Arc::new(Inner {
                store,
                accessor,
                labeler,
                config,
                state: Mutex::new(CacheState::default()),
                pipeline_runs: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.inner.config
    }

    /// Recompute clusters, or join the pass already running.
    ///
    /// A joining caller gets the running pass's result even if it asked for
    /// a different `k`. The pass runs as its own task, so dropping the
    /// returned future does not cancel it.
    pub async fn compute_clusters(&self, selection: KSelection) -> ComputeOutcome {
        let in_flight = {
            let mut state = self.inner.state();
            match &state.in_flight {
                Some(running) => {
                    debug!("Joining in-flight cluster computation");
                    running.clone()
                }
                None => {
                    let inner = self.inner.clone();
                    let generation = state.generation;
                    let handle =
                        tokio::spawn(inner.clone().run_and_publish(selection, generation));
                    let fut: BoxFuture<'static, ComputeOutcome> = async move {
                        match handle.await {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                let e = AppError::from(e);
                                warn!("Cluster computation task aborted: {e}");
                                let mut state = inner.state();
                                if state.generation == generation {
                                    state.in_flight = None;
                                    state.last_error = Some(e.to_string());
                                }
                                ComputeOutcome::failed(state.snapshot.clone(), &e)
                            }
                        }
                    }
                    .boxed();
                    let shared = fut.shared();
                    state.in_flight = Some(shared.clone());
                    shared
                }
            }
        };
        in_flight.await
    }

    /// Latest published snapshot, stale or not.
    pub fn snapshot(&self) -> Option<Arc<ClusterSnapshot>> {
        self.inner.state().snapshot.clone()
    }

    pub fn get_clusters_for_graph(&self) -> Vec<GraphCluster> {
        self.snapshot()
            .map(|s| s.graph_clusters())
            .unwrap_or_default()
    }

    pub fn get_cluster_members(&self, cluster_id: usize) -> Option<Vec<Arc<EmbeddedItem>>> {
        let snapshot = self.snapshot()?;
        snapshot.cluster(cluster_id).map(|c| c.members.clone())
    }

    pub fn find_cluster_for_item(&self, item_id: &str) -> Option<GraphCluster> {
        let snapshot = self.snapshot()?;
        snapshot.cluster_of(item_id).map(GraphCluster::from)
    }

    /// Near-duplicate groups over the cached items, or a fresh fetch when
    /// nothing has been computed yet.
    pub async fn find_near_duplicates(&self, options: &DuplicateOptions) -> DuplicateReport {
        let items = match self.snapshot() {
            Some(snapshot) => snapshot.items.clone(),
            None => match self.inner.accessor.fetch().await {
                Ok(batch) => batch.items,
                Err(e) => {
                    warn!("Duplicate search could not load embeddings: {e}");
                    return DuplicateReport::failed(e.to_string());
                }
            },
        };
        find_near_duplicates(&items, options, &self.inner.config.duplicates)
    }

    /// Edges between published clusters. `options` defaults to the
    /// configured bridge limits.
    pub async fn find_cross_cluster_edges(
        &self,
        threshold: f64,
        options: Option<BridgeOptions>,
    ) -> EdgeReport {
        let Some(snapshot) = self.snapshot() else {
            return EdgeReport::failed("Clusters have not been computed yet");
        };
        let options = options.unwrap_or_else(|| self.inner.config.bridges.clone());
        let mut builder = RelationshipGraphBuilder::new(
            &snapshot.clusters,
            &snapshot.centroids,
            options,
            Some(self.inner.store.as_ref()),
        );
        EdgeReport {
            success: true,
            edges: builder.build(threshold).await,
            error: None,
        }
    }

    pub fn cluster_stats(&self) -> ClusterStats {
        let stale = self.is_stale();
        let state = self.inner.state();
        let snapshot = state.snapshot.as_deref();
        let clustered_count = snapshot.map_or(0, |s| s.clusters.iter().map(|c| c.members.len()).sum());
        ClusterStats {
            computed: snapshot.is_some(),
            stale,
            in_flight: state.in_flight.is_some(),
            version: snapshot.map(|s| s.version),
            computed_at: snapshot.map(|s| s.computed_at),
            age_seconds: snapshot.and_then(|s| s.age()).map(|a| a.as_secs()),
            cluster_count: snapshot.map_or(0, |s| s.clusters.len()),
            item_count: snapshot.map_or(0, |s| s.items.len()),
            clustered_count,
            unclustered_count: snapshot.map_or(0, |s| s.unclustered.len()),
            cluster_sizes: snapshot
                .map(|s| pipeline::member_counts(s).into_iter().collect())
                .unwrap_or_default(),
            k: snapshot.map(|s| s.k),
            iterations: snapshot.map(|s| s.iterations),
            converged: snapshot.map(|s| s.converged),
            inertia: snapshot.map(|s| s.inertia),
            skipped: snapshot.map_or(0, |s| s.skipped),
            truncated: snapshot.is_some_and(|s| s.truncated),
            pipeline_runs: self.inner.pipeline_runs.load(Ordering::SeqCst),
            last_error: state.last_error.clone(),
            warnings: snapshot.map(|s| s.warnings.clone()).unwrap_or_default(),
        }
    }

    /// Mark the data stale; readers keep seeing it until the next success.
    pub fn invalidate(&self) {
        debug!("Cluster snapshot invalidated");
        self.inner.state().invalidated = true;
    }

    /// Never computed, invalidated, or older than the TTL.
    pub fn is_stale(&self) -> bool {
        let state = self.inner.state();
        match &state.snapshot {
            None => true,
            Some(snapshot) => state.invalidated || snapshot.is_older_than(self.inner.config.ttl),
        }
    }

    /// Drop the snapshot and forget any in-flight pass.
    pub fn clear(&self) {
        let mut state = self.inner.state();
        state.snapshot = None;
        state.in_flight = None;
        state.invalidated = false;
        state.last_error = None;
        state.generation += 1;
        debug!("Cluster cache cleared (generation {})", state.generation);
    }

    pub fn shutdown(&self) {
        self.clear();
        info!("Cluster service shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use futures::future::BoxFuture;
    use serde_json::json;

    use super::*;
    use crate::AppResult;
    use crate::store::{FileRecord, PeekResult, SnapshotStore, StoreStats};

    /// Wraps a snapshot store, counting and optionally delaying peeks.
    struct CountingStore {
        inner: SnapshotStore,
        delay: Duration,
        peeks: AtomicUsize,
        fail: AtomicBool,
        panic_next: AtomicBool,
    }

    impl CountingStore {
        fn new(export: serde_json::Value, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                inner: SnapshotStore::from_peek(serde_json::from_value(export).unwrap()),
                delay,
                peeks: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                panic_next: AtomicBool::new(false),
            })
        }
    }

    impl VectorStore for CountingStore {
        fn peek_files(&self, limit: usize) -> BoxFuture<'_, AppResult<PeekResult>> {
            async move {
                self.peeks.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                if self.panic_next.swap(false, Ordering::SeqCst) {
                    panic!("store connection dropped mid-read");
                }
                if self.fail.load(Ordering::SeqCst) {
                    return Err(AppError::Other("store offline".into()));
                }
                self.inner.peek_files(limit).await
            }
            .boxed()
        }

        fn get_file<'a>(&'a self, id: &'a str) -> BoxFuture<'a, AppResult<Option<FileRecord>>> {
            self.inner.get_file(id)
        }

        fn get_stats(&self) -> BoxFuture<'_, AppResult<StoreStats>> {
            self.inner.get_stats()
        }
    }

    fn two_groups() -> serde_json::Value {
        json!({
            "ids": ["a1", "a2", "a3", "b1", "b2", "b3"],
            "embeddings": [
                [1.0, 0.0, 0.0], [0.99, 0.01, 0.0], [0.98, 0.0, 0.02],
                [0.0, 1.0, 0.0], [0.01, 0.99, 0.0], [0.0, 0.98, 0.02]
            ],
            "metadatas": [
                {"fileName": "invoice_acme.pdf", "tags": ["invoice", "acme-q3"], "category": "Finance"},
                {"fileName": "invoice_acme_2.pdf", "tags": ["invoice", "acme-q3"], "category": "Finance"},
                {"fileName": "acme_receipt.pdf", "tags": ["acme-q3"], "category": "Finance"},
                {"fileName": "beach.jpg", "tags": ["vacation"], "category": "Photos"},
                {"fileName": "hotel.jpg", "tags": ["vacation"], "category": "Photos"},
                {"fileName": "flight.pdf", "tags": ["vacation", "travel"], "category": "Travel"}
            ]
        })
    }

    fn config() -> ClusterConfig {
        let mut cfg = ClusterConfig::default();
        cfg.kmeans.seed = Some(7);
        cfg.labels.skip_llm = true;
        cfg.bridges.check_files = false;
        cfg
    }

    fn service(store: Arc<CountingStore>, cfg: ClusterConfig) -> ClusterService {
        ClusterService::new(store, None, cfg)
    }

    #[tokio::test]
    async fn concurrent_computes_share_one_pass() {
        let store = CountingStore::new(two_groups(), Duration::from_millis(50));
        let svc = service(store.clone(), config());

        let (first, second) = tokio::join!(
            svc.compute_clusters(KSelection::Auto),
            svc.compute_clusters(KSelection::Auto)
        );

        assert!(first.success && second.success);
        let (a, b) = (first.snapshot.unwrap(), second.snapshot.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.peeks.load(Ordering::SeqCst), 1);
        assert_eq!(svc.cluster_stats().pipeline_runs, 1);
        assert_eq!(a.version, 1);
    }

    #[tokio::test]
    async fn publishes_labeled_clusters() {
        let store = CountingStore::new(two_groups(), Duration::ZERO);
        let svc = service(store, config());

        let outcome = svc.compute_clusters(KSelection::Auto).await;
        assert!(outcome.success, "{:?}", outcome.error);

        let clusters = svc.get_clusters_for_graph();
        assert_eq!(clusters.len(), 2);
        let finance = clusters
            .iter()
            .find(|c| c.member_ids.contains(&"a1".to_string()))
            .unwrap();
        assert_eq!(finance.member_count, 3);
        assert_eq!(finance.dominant_category.as_deref(), Some("Finance"));
        assert_eq!(finance.label, "Finance: Acme-q3, Invoice");
        assert!(finance.top_terms.contains(&"acme-q3".to_string()));

        let found = svc.find_cluster_for_item("b2").unwrap();
        assert_ne!(found.id, finance.id);
        assert_eq!(svc.get_cluster_members(found.id).unwrap().len(), 3);
        assert!(svc.find_cluster_for_item("nope").is_none());
    }

    #[tokio::test]
    async fn staleness_follows_ttl_and_invalidation() {
        let store = CountingStore::new(two_groups(), Duration::ZERO);
        let svc = service(store.clone(), config());
        assert!(svc.is_stale());

        svc.compute_clusters(KSelection::Auto).await;
        assert!(!svc.is_stale());

        svc.invalidate();
        assert!(svc.is_stale());
        assert_eq!(svc.get_clusters_for_graph().len(), 2);

        svc.compute_clusters(KSelection::Auto).await;
        assert!(!svc.is_stale());
        assert_eq!(svc.snapshot().unwrap().version, 2);

        let mut cfg = config();
        cfg.ttl = Duration::ZERO;
        let expired = service(store, cfg);
        expired.compute_clusters(KSelection::Auto).await;
        assert!(expired.is_stale());
    }

    #[tokio::test]
    async fn too_few_items_is_a_structured_failure() {
        let store = CountingStore::new(
            json!({"ids": ["a", "b"], "embeddings": [[1.0, 0.0], [0.0, 1.0]]}),
            Duration::ZERO,
        );
        let svc = service(store, config());

        let outcome = svc.compute_clusters(KSelection::Auto).await;

        assert!(!outcome.success);
        assert!(outcome.snapshot.is_none());
        assert!(outcome.error.unwrap().contains("need at least 3"));
        assert!(svc.is_stale());
        assert!(svc.cluster_stats().last_error.is_some());
    }

    #[tokio::test]
    async fn failed_recompute_keeps_previous_snapshot() {
        let store = CountingStore::new(two_groups(), Duration::ZERO);
        let svc = service(store.clone(), config());
        let first = svc.compute_clusters(KSelection::Auto).await;
        let previous = first.snapshot.unwrap();

        store.fail.store(true, Ordering::SeqCst);
        let outcome = svc.compute_clusters(KSelection::Auto).await;

        assert!(!outcome.success);
        assert!(outcome.stale);
        assert!(Arc::ptr_eq(&outcome.snapshot.unwrap(), &previous));
        assert!(Arc::ptr_eq(&svc.snapshot().unwrap(), &previous));
    }

    #[tokio::test]
    async fn panicked_pass_releases_the_in_flight_slot() {
        let store = CountingStore::new(two_groups(), Duration::ZERO);
        let svc = service(store.clone(), config());

        store.panic_next.store(true, Ordering::SeqCst);
        let outcome = svc.compute_clusters(KSelection::Auto).await;
        assert!(!outcome.success);
        assert!(outcome.snapshot.is_none());
        let stats = svc.cluster_stats();
        assert!(!stats.in_flight);
        assert!(stats.last_error.is_some());

        let retry = svc.compute_clusters(KSelection::Auto).await;
        assert!(retry.success, "{:?}", retry.error);
        assert_eq!(store.peeks.load(Ordering::SeqCst), 2);
        assert!(svc.cluster_stats().last_error.is_none());
    }

    #[tokio::test]
    async fn clear_drops_state_and_late_results() {
        let store = CountingStore::new(two_groups(), Duration::from_millis(100));
        let svc = service(store, config());

        let background = svc.clone();
        let handle =
            tokio::spawn(async move { background.compute_clusters(KSelection::Auto).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        svc.clear();

        let outcome = handle.await.unwrap();
        assert!(outcome.success);
        assert!(svc.snapshot().is_none());
        assert!(svc.is_stale());

        svc.compute_clusters(KSelection::Auto).await;
        assert!(svc.snapshot().is_some());
        svc.shutdown();
        assert!(svc.snapshot().is_none());
    }

    #[tokio::test]
    async fn edges_only_join_surviving_clusters() {
        let store = CountingStore::new(
            json!({
                "ids": ["a1", "a2", "a3", "b1", "b2", "b3", "lonely"],
                "embeddings": [
                    [1.0, 0.0, 0.0], [0.99, 0.01, 0.0], [0.98, 0.02, 0.0],
                    [0.0, 1.0, 0.0], [0.01, 0.99, 0.0], [0.02, 0.98, 0.0],
                    [0.0, 0.0, 1.0]
                ]
            }),
            Duration::ZERO,
        );
        let svc = service(store, config());
        let outcome = svc.compute_clusters(KSelection::Fixed(3)).await;
        let snapshot = outcome.snapshot.unwrap();
        assert_eq!(snapshot.clusters.len(), 2);
        assert_eq!(snapshot.unclustered, vec!["lonely"]);

        let report = svc.find_cross_cluster_edges(-1.0, None).await;
        assert!(report.success);
        assert_eq!(report.edges.len(), 1);
        let surviving: Vec<usize> = snapshot.clusters.iter().map(|c| c.id).collect();
        for edge in &report.edges {
            assert!(surviving.contains(&edge.source) && surviving.contains(&edge.target));
        }
    }

    #[tokio::test]
    async fn edges_need_a_snapshot() {
        let store = CountingStore::new(two_groups(), Duration::ZERO);
        let svc = service(store, config());
        let report = svc.find_cross_cluster_edges(0.6, None).await;
        assert!(!report.success);
        assert!(report.error.is_some());
    }

    #[tokio::test]
    async fn duplicates_work_before_and_after_compute() {
        let store = CountingStore::new(
            json!({
                "ids": ["x", "x-copy", "y"],
                "embeddings": [[1.0, 0.0], [1.0, 0.0001], [0.0, 1.0]]
            }),
            Duration::ZERO,
        );
        let svc = service(store, config());

        let before = svc.find_near_duplicates(&DuplicateOptions::default()).await;
        assert!(before.success);
        assert_eq!(before.groups.len(), 1);
        assert_eq!(before.groups[0].members.len(), 2);

        svc.compute_clusters(KSelection::Auto).await;
        let after = svc.find_near_duplicates(&DuplicateOptions::default()).await;
        assert_eq!(after.total_duplicates, 2);
    }
}
