use ndarray::prelude::*;
use tracing::{debug, warn};

use crate::classify::linalg::{nearest_centroid, squared_distance};

/// Result of one Lloyd run from a fixed set of initial centers.
#[derive(Debug, Clone)]
pub struct LloydOutcome {
    pub labels: Vec<usize>,
    pub centers: Array2<f64>,
    pub iterations: usize,
    /// The final pass reproduced the previous assignment exactly.
    pub converged: bool,
    pub inertia: f64,
    pub reseeded: usize,
    pub warnings: Vec<String>,
}

/// Compute the inertia (sum of squared distances) for the current labels.
fn inertia_dense(
    x: &Array2<f64>,       // x = (n_samples, n_features)
    centers: &Array2<f64>, // centers = (n_clusters, n_features)
    labels: &[usize],      // labels = (n_samples,)
) -> f64 {
    labels
        .iter()
        .enumerate()
        .map(|(i, &label)| squared_distance(x.row(i), centers.row(label)))
        .sum()
}

/// Each row joins the centroid with the smallest squared distance.
pub fn assign_labels(x: &Array2<f64>, centers: &Array2<f64>) -> Vec<usize> {
    x.axis_iter(Axis(0))
        .map(|row| nearest_centroid(row, centers).0)
        .collect()
}

/// Move each center to the mean of its members.
///
/// A center with no members is moved onto the row farthest from its own
/// assigned center, skipping rows already used for that in this call. When
/// no row is left the center stays where it was and a warning is recorded.
pub(crate) fn update_centers(
    x: &Array2<f64>,           // x = (n_samples, n_features)
    labels: &[usize],          // labels = (n_samples,)
    centers_old: &Array2<f64>, // centers_old = (n_clusters, n_features)
    warnings: &mut Vec<String>,
) -> (Array2<f64>, usize) {
    let n_clusters = centers_old.nrows();
    let mut sums = Array2::<f64>::zeros(centers_old.raw_dim());
    let mut counts = vec![0usize; n_clusters];
    for (row, &label) in x.axis_iter(Axis(0)).zip(labels) {
        let mut acc = sums.row_mut(label);
        acc += &row;
        counts[label] += 1;
    }

    let mut centers = centers_old.clone();
    for (cluster, &count) in counts.iter().enumerate() {
        if count > 0 {
            let mean = &sums.row(cluster) / count as f64;
            centers.row_mut(cluster).assign(&mean);
        }
    }

    let mut used_for_reseed = vec![false; x.nrows()];
    let mut reseeded = 0;
    for cluster in (0..n_clusters).filter(|&c| counts[c] == 0) {
        let farthest = labels
            .iter()
            .enumerate()
            .filter(|(i, _)| !used_for_reseed[*i])
            .map(|(i, &label)| (i, squared_distance(x.row(i), centers_old.row(label))))
            .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)));
        match farthest {
            Some((row, dist)) => {
                debug!("Reseeding empty cluster {cluster} at row {row} (d² = {dist})");
                centers.row_mut(cluster).assign(&x.row(row));
                used_for_reseed[row] = true;
                reseeded += 1;
            }
            None => {
                let msg = format!(
                    "Cluster {cluster} is empty and no point is left to reseed it; keeping its previous centroid"
                );
                warn!("{msg}");
                warnings.push(msg);
            }
        }
    }

    (centers, reseeded)
}

/// Run a single K-Means using Lloyd's algorithm.
///
/// Stops when an assignment pass reproduces the previous one exactly, or
/// after `max_iter` passes.
pub fn kmeans_single_lloyd(
    x: &Array2<f64>,            // x = (n_samples, n_features)
    centers_init: &Array2<f64>, // centers_init = (n_clusters, n_features)
    max_iter: usize,
) -> LloydOutcome {
    let mut centers = centers_init.clone();
    let mut labels_old: Option<Vec<usize>> = None;
    let mut labels: Vec<usize> = Vec::new();
    let mut converged = false;
    let mut iterations = 0;
    let mut reseeded = 0;
    let mut warnings = Vec::new();

    for i in 0..max_iter {
        iterations = i + 1;
        let new_labels = assign_labels(x, &centers);

        if labels_old.as_ref() == Some(&new_labels) {
            labels = new_labels;
            converged = true;
            break;
        }

        let (centers_new, n_reseeded) = update_centers(x, &new_labels, &centers, &mut warnings);
        centers = centers_new;
        reseeded += n_reseeded;
        labels_old = Some(new_labels.clone());
        labels = new_labels;
    }

    if !converged {
        // Ensure labels reflect final centers
        labels = assign_labels(x, &centers);
    }

    let inertia = inertia_dense(x, &centers, &labels);

    LloydOutcome {
        labels,
        centers,
        iterations,
        converged,
        inertia,
        reseeded,
        warnings,
    }
}
