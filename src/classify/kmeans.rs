use ndarray::prelude::*;
use rand::Rng;
use tracing::trace;

use crate::classify::linalg::squared_distance;

/// K-means++ seeding.
///
/// Returns the seed centers `(n_clusters, n_features)` and the row indices
/// they were copied from. No row is picked twice.
pub fn kmeans_plus_plus<R: Rng + ?Sized>(
    x: &Array2<f64>, // x = (n_samples, n_features)
    n_clusters: usize,
    rng: &mut R,
) -> (Array2<f64>, Vec<usize>) {
    let n_samples = x.nrows();
    let n_clusters = n_clusters.min(n_samples);
    if n_clusters == 0 {
        return (Array2::zeros((0, x.ncols())), Vec::new());
    }

    let mut chosen = vec![false; n_samples];
    let mut indices = Vec::with_capacity(n_clusters);

    let first = rng.random_range(0..n_samples);
    chosen[first] = true;
    indices.push(first);

    // closest_dist_sq = (n_samples,), D² to the nearest chosen seed
    let mut closest_dist_sq: Array1<f64> = x
        .axis_iter(Axis(0))
        .map(|row| squared_distance(row, x.row(first)))
        .collect();

    for _ in 1..n_clusters {
        let picked = sample_by_weight(&closest_dist_sq, &chosen, rng)
            .unwrap_or_else(|| uniform_unused(&chosen, rng));
        trace!(
            "Seed {} picked at row {picked} (d² = {})",
            indices.len(),
            closest_dist_sq[picked]
        );
        chosen[picked] = true;
        indices.push(picked);

        let seed = x.row(picked);
        for (dist, row) in closest_dist_sq.iter_mut().zip(x.axis_iter(Axis(0))) {
            let d = squared_distance(row, seed);
            if d < *dist {
                *dist = d;
            }
        }
    }

    (x.select(Axis(0), &indices), indices)
}

/// Roulette-wheel draw over the unchosen rows, weighted by D².
///
/// `None` when every weight is zero, or when rounding leaves the target past
/// the final cumulative sum.
fn sample_by_weight<R: Rng + ?Sized>(
    weights: &Array1<f64>,
    chosen: &[bool],
    rng: &mut R,
) -> Option<usize> {
    let total: f64 = weights
        .iter()
        .zip(chosen)
        .filter(|(_, c)| !**c)
        .map(|(w, _)| *w)
        .sum();
    if !(total > 0.0 && total.is_finite()) {
        return None;
    }
    let target = rng.random::<f64>() * total;
    let mut cumulative = 0.0;
    for (i, (&w, &c)) in weights.iter().zip(chosen).enumerate() {
        if c {
            continue;
        }
        cumulative += w;
        if target < cumulative {
            return Some(i);
        }
    }
    None
}

fn uniform_unused<R: Rng + ?Sized>(chosen: &[bool], rng: &mut R) -> usize {
    let unused: Vec<usize> = (0..chosen.len()).filter(|&i| !chosen[i]).collect();
    unused[rng.random_range(0..unused.len())]
}
