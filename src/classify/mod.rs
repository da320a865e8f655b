//! Batch K-Means over validated embeddings.

pub(crate) mod kmeans;
pub(crate) mod linalg;
pub(crate) mod lloyd;

use std::collections::HashSet;

use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::config::{KSelection, KmeansConfig};
use crate::{AppError, AppResult};

/// Fewest items the engine will cluster.
pub const MIN_ITEMS: usize = 3;

/// Heuristic cluster count: `clamp(ceil(sqrt(n / 2)), 2, max_auto)`.
pub fn estimate_k(n_items: usize, max_auto: usize) -> usize {
    let k = (n_items as f64 / 2.0).sqrt().ceil() as usize;
    k.clamp(2, max_auto.max(2))
}

/// Assignments and centroids from one clustering pass.
#[derive(Debug, Clone)]
pub struct KmeansFit {
    /// Centroid index per input row.
    pub assignments: Vec<usize>,
    /// centroids = (k, n_features); row `i` is cluster `i`.
    pub centroids: Array2<f64>,
    pub k: usize,
    pub iterations: usize,
    pub converged: bool,
    pub inertia: f64,
    /// Rows chosen by K-means++ as initial centers.
    pub seed_rows: Vec<usize>,
    /// RNG seed used for this pass.
    pub seed: u64,
    pub warnings: Vec<String>,
}

impl KmeansFit {
    /// Row indices per centroid index. Empty clusters keep their slot.
    pub fn members(&self) -> Vec<Vec<usize>> {
        let mut members = vec![Vec::new(); self.k];
        for (row, &cluster) in self.assignments.iter().enumerate() {
            members[cluster].push(row);
        }
        members
    }
}

#[derive(Debug, Clone)]
pub struct Kmeans {
    pub max_clusters_auto: usize,
    pub max_k: usize,
    pub max_iterations: usize,
    pub seed: Option<u64>,
}

impl Default for Kmeans {
    fn default() -> Self {
        Self::from(&KmeansConfig::default())
    }
}

impl From<&KmeansConfig> for Kmeans {
    fn from(cfg: &KmeansConfig) -> Self {
        Self {
            max_clusters_auto: cfg.max_clusters_auto,
            max_k: cfg.max_k,
            max_iterations: cfg.max_iterations,
            seed: cfg.seed,
        }
    }
}

impl Kmeans {
    pub fn set_seed(&mut self, seed: u64) -> &mut Self {
        self.seed = Some(seed);
        self
    }

    /// Number of clusters to fit for `n_items` rows.
    pub fn resolve_k(&self, n_items: usize, selection: KSelection) -> usize {
        match selection {
            KSelection::Auto => estimate_k(n_items, self.max_clusters_auto),
            KSelection::Fixed(k) => k.clamp(2, n_items.min(self.max_k).max(2)),
        }
    }

    #[tracing::instrument(name = "Clustering embeddings", level = "info", skip(self, x), fields(n = x.nrows()))]
    pub fn fit(&self, x: &Array2<f64>, selection: KSelection) -> AppResult<KmeansFit> {
        let n_samples = x.nrows();
        if n_samples < MIN_ITEMS {
            return Err(AppError::InsufficientData {
                found: n_samples,
                required: MIN_ITEMS,
            });
        }

        let k = self.resolve_k(n_samples, selection);
        let seed = self.seed.unwrap_or_else(|| rand::rng().random());
        let mut rng = StdRng::seed_from_u64(seed);
        debug!("Fitting k={k} over {n_samples} rows (seed {seed})");

        let (centers_init, seed_rows) = kmeans::kmeans_plus_plus(x, k, &mut rng);
        let out = lloyd::kmeans_single_lloyd(x, &centers_init, self.max_iterations);
        let mut warnings = out.warnings;

        if !out.converged {
            let msg = format!(
                "K-means stopped after {} iterations without a stable assignment",
                out.iterations
            );
            warn!("{msg}");
            warnings.push(msg);
        }

        let distinct_clusters = out.labels.iter().collect::<HashSet<_>>().len();
        if distinct_clusters < k {
            let msg = format!(
                "Number of distinct clusters ({distinct_clusters}) found smaller than n_clusters ({k}). Possibly due to duplicate points."
            );
            warn!("{msg}");
            warnings.push(msg);
        }

        debug!(
            "K-means finished in {} iterations, inertia {:.4}, {} reseeds",
            out.iterations, out.inertia, out.reseeded
        );

        Ok(KmeansFit {
            assignments: out.labels,
            centroids: out.centers,
            k,
            iterations: out.iterations,
            converged: out.converged,
            inertia: out.inertia,
            seed_rows,
            seed,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::linalg::squared_distance;
    use crate::classify::lloyd::assign_labels;

    fn two_groups() -> Array2<f64> {
        array![
            [1.0, 0.0, 0.0, 0.0],
            [1.0, 0.001, 0.0, 0.0],
            [1.0, 0.0, 0.001, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.001, 1.0, 0.0, 0.0],
        ]
    }

    fn three_blobs() -> Array2<f64> {
        let mut rows = Vec::new();
        for (cx, cy) in [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)] {
            for i in 0..6 {
                let jitter = i as f64 * 0.1;
                rows.extend([cx + jitter, cy - jitter]);
            }
        }
        Array2::from_shape_vec((18, 2), rows).unwrap()
    }

    #[test]
    fn estimates_k_from_item_count() {
        assert_eq!(estimate_k(5, 15), 2);
        assert_eq!(estimate_k(3, 15), 2);
        assert_eq!(estimate_k(50, 15), 5);
        assert_eq!(estimate_k(10_000, 15), 15);
        assert_eq!(estimate_k(100, 1), 2);
    }

    #[test]
    fn fixed_k_is_clamped_to_item_count_and_cap() {
        let km = Kmeans::default();
        assert_eq!(km.resolve_k(10, KSelection::Fixed(1)), 2);
        assert_eq!(km.resolve_k(10, KSelection::Fixed(40)), 10);
        assert_eq!(km.resolve_k(500, KSelection::Fixed(400)), 100);
        assert_eq!(km.resolve_k(500, KSelection::Fixed(7)), 7);
    }

    #[test]
    fn auto_k_separates_two_tight_groups() {
        let x = two_groups();
        for seed in 0..10 {
            let mut km = Kmeans::default();
            km.set_seed(seed);
            let fit = km.fit(&x, KSelection::Auto).unwrap();
            assert_eq!(fit.k, 2);
            let a = &fit.assignments;
            assert!(a[0] == a[1] && a[1] == a[2], "seed {seed}: {a:?}");
            assert_eq!(a[3], a[4], "seed {seed}: {a:?}");
            assert_ne!(a[0], a[3], "seed {seed}: {a:?}");
        }
    }

    #[test]
    fn converged_assignments_are_stable_and_nearest() {
        let x = three_blobs();
        for seed in 0..10 {
            let mut km = Kmeans::default();
            km.set_seed(seed);
            let fit = km.fit(&x, KSelection::Fixed(3)).unwrap();
            assert!(fit.converged, "seed {seed} did not converge");
            assert!(fit.iterations <= 50);
            assert_eq!(assign_labels(&x, &fit.centroids), fit.assignments);
            for (row, &assigned) in x.axis_iter(Axis(0)).zip(&fit.assignments) {
                let own = squared_distance(row, fit.centroids.row(assigned));
                for other in fit.centroids.axis_iter(Axis(0)) {
                    assert!(squared_distance(row, other) >= own);
                }
            }
        }
    }

    #[test]
    fn same_seed_reproduces_the_fit() {
        let x = three_blobs();
        let mut km = Kmeans::default();
        km.set_seed(99);
        let a = km.fit(&x, KSelection::Auto).unwrap();
        let b = km.fit(&x, KSelection::Auto).unwrap();
        assert_eq!(a.assignments, b.assignments);
        assert_eq!(a.seed_rows, b.seed_rows);
        assert_eq!(a.centroids, b.centroids);
    }

    #[test]
    fn too_few_items_is_insufficient_data() {
        let x = array![[1.0, 0.0], [0.0, 1.0]];
        let err = Kmeans::default().fit(&x, KSelection::Auto).unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientData {
                found: 2,
                required: 3
            }
        ));
    }

    #[test]
    fn members_keep_empty_slots() {
        let fit = KmeansFit {
            assignments: vec![0, 2, 0],
            centroids: Array2::zeros((3, 1)),
            k: 3,
            iterations: 1,
            converged: true,
            inertia: 0.0,
            seed_rows: vec![0, 1, 2],
            seed: 0,
            warnings: Vec::new(),
        };
        assert_eq!(fit.members(), vec![vec![0, 2], vec![], vec![1]]);
    }
}
