use ndarray::prelude::*;

/// Squared Euclidean distance; no square root.
pub fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Index of the closest centroid and its squared distance. Ties go to the lowest index.
pub fn nearest_centroid(point: ArrayView1<f64>, centers: &Array2<f64>) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (c, center) in centers.axis_iter(Axis(0)).enumerate() {
        let d = squared_distance(point, center);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

/// Cosine similarity with f64 accumulation.
///
/// Returns 0.0 for zero vectors or dimension mismatches.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Same as [`cosine_similarity`] over f64 views (centroids).
pub fn cosine_similarity_f64(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (a.dot(&b) / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Cosine similarity between an item vector and a centroid row.
pub fn cosine_to_centroid(item: &[f32], centroid: ArrayView1<f64>) -> f64 {
    if item.len() != centroid.len() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &c) in item.iter().zip(centroid.iter()) {
        let x = x as f64;
        dot += x * c;
        norm_a += x * x;
        norm_b += c * c;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_centroid_breaks_ties_toward_lowest_index() {
        let centers = array![[0.0], [2.0], [2.0]];
        assert_eq!(nearest_centroid(arr1(&[1.0]).view(), &centers), (0, 1.0));
        assert_eq!(nearest_centroid(arr1(&[2.0]).view(), &centers), (1, 0.0));
    }

    #[test]
    fn cosine_handles_degenerate_inputs() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-12);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-12);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn cosine_variants_agree() {
        let a = [0.3_f32, -0.2, 0.9];
        let b = [0.1_f32, 0.4, 0.5];
        let bv = arr1(&[0.1_f32 as f64, 0.4_f32 as f64, 0.5_f32 as f64]);
        let av = arr1(&[0.3_f32 as f64, -0.2_f32 as f64, 0.9_f32 as f64]);
        let plain = cosine_similarity(&a, &b);
        assert!((plain - cosine_to_centroid(&a, bv.view())).abs() < 1e-12);
        assert!((plain - cosine_similarity_f64(av.view(), bv.view())).abs() < 1e-12);
    }
}
