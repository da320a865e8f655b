//! Near-duplicate grouping over a bounded sample of embeddings.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classify::linalg::cosine_similarity;
use crate::config::DuplicateConfig;
use crate::store::EmbeddedItem;

const DEFAULT_THRESHOLD: f64 = 0.9;
const DEFAULT_MAX_RESULTS: usize = 50;

/// Disjoint sets over dense indices, union by size with path compression.
#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Returns `false` when `a` and `b` were already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DuplicateOptions {
    pub threshold: f64,
    pub max_results: usize,
}

impl Default for DuplicateOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub id: usize,
    pub members: Vec<Arc<EmbeddedItem>>,
    /// Mean over the qualifying pairs inside this group only.
    pub average_similarity: f64,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateReport {
    pub success: bool,
    pub groups: Vec<DuplicateGroup>,
    /// Items in any duplicate group, before `max_results` is applied.
    pub total_duplicates: usize,
    /// Threshold actually used.
    pub threshold: f64,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DuplicateReport {
    pub fn failed<S: Into<String>>(error: S) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Requested threshold raised to the floor and capped at 1.
fn effective_threshold(requested: f64, floor: f64, warnings: &mut Vec<String>) -> f64 {
    let requested = if requested.is_finite() {
        requested
    } else {
        DEFAULT_THRESHOLD
    };
    if requested < floor {
        let msg = format!(
            "Threshold {requested} is below the minimum of {floor}; using {floor} instead"
        );
        warn!("{msg}");
        warnings.push(msg);
    }
    requested.max(floor).min(1.0)
}

/// Evenly spaced sample of at most `max` items, keeping input order.
fn stride_sample(items: &[Arc<EmbeddedItem>], max: usize) -> Vec<Arc<EmbeddedItem>> {
    if items.len() <= max {
        return items.to_vec();
    }
    let stride = items.len() as f64 / max as f64;
    (0..max)
        .map(|i| items[((i as f64 * stride) as usize).min(items.len() - 1)].clone())
        .collect()
}

/// Group items connected by chains of pairs at or above the threshold.
#[tracing::instrument(name = "Finding near duplicates", level = "info", skip(items, limits), fields(n = items.len()))]
pub fn find_near_duplicates(
    items: &[Arc<EmbeddedItem>],
    options: &DuplicateOptions,
    limits: &DuplicateConfig,
) -> DuplicateReport {
    let mut warnings = Vec::new();
    let threshold = effective_threshold(options.threshold, limits.min_threshold, &mut warnings);
    let mut truncated = false;

    let sample = stride_sample(items, limits.max_items);
    if sample.len() < items.len() {
        truncated = true;
        let msg = format!(
            "Compared a sample of {} out of {} items",
            sample.len(),
            items.len()
        );
        warn!("{msg}");
        warnings.push(msg);
    }

    let n = sample.len();
    let mut sets = DisjointSet::new(n);
    let mut pairs: Vec<(usize, usize, f64)> = Vec::new();
    'scan: for i in 0..n {
        for j in (i + 1)..n {
            if sample[i].vector.len() != sample[j].vector.len() {
                continue;
            }
            let sim = cosine_similarity(&sample[i].vector, &sample[j].vector);
            if sim >= threshold {
                pairs.push((i, j, sim));
                sets.union(i, j);
                if pairs.len() >= limits.max_pairs {
                    truncated = true;
                    let msg = format!(
                        "Stopped after {} matching pairs; results may be incomplete",
                        pairs.len()
                    );
                    warn!("{msg}");
                    warnings.push(msg);
                    break 'scan;
                }
            }
        }
    }
    debug!("{} qualifying pairs at threshold {threshold}", pairs.len());

    let mut members_by_root: HashMap<usize, Vec<usize>> = HashMap::new();
    for idx in 0..n {
        let root = sets.find(idx);
        members_by_root.entry(root).or_default().push(idx);
    }
    let mut sim_by_root: HashMap<usize, (f64, usize)> = HashMap::new();
    for &(i, _, sim) in &pairs {
        let entry = sim_by_root.entry(sets.find(i)).or_default();
        entry.0 += sim;
        entry.1 += 1;
    }

    let mut groups: Vec<(Vec<usize>, f64)> = members_by_root
        .into_iter()
        .filter(|(_, members)| members.len() >= 2)
        .map(|(root, members)| {
            let avg = sim_by_root
                .get(&root)
                .map_or(0.0, |(sum, count)| sum / *count as f64);
            (members, avg)
        })
        .collect();
    groups.sort_by(|a, b| {
        b.0.len()
            .cmp(&a.0.len())
            .then_with(|| b.1.total_cmp(&a.1))
            .then_with(|| a.0[0].cmp(&b.0[0]))
    });

    let total_duplicates = groups.iter().map(|(m, _)| m.len()).sum();
    groups.truncate(options.max_results);

    DuplicateReport {
        success: true,
        groups: groups
            .into_iter()
            .enumerate()
            .map(|(id, (members, average_similarity))| DuplicateGroup {
                id,
                members: members.into_iter().map(|i| sample[i].clone()).collect(),
                average_similarity,
            })
            .collect(),
        total_duplicates,
        threshold,
        truncated,
        warning: (!warnings.is_empty()).then(|| warnings.join("; ")),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::named;

    fn at_degrees(id: &str, deg: f64) -> Arc<EmbeddedItem> {
        let r = deg.to_radians();
        Arc::new(named(id, vec![r.cos() as f32, r.sin() as f32]))
    }

    fn ids(group: &DuplicateGroup) -> Vec<&str> {
        group.members.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn disjoint_set_joins_transitively() {
        let mut ds = DisjointSet::new(5);
        assert!(ds.union(0, 1));
        assert!(ds.union(1, 2));
        assert!(!ds.union(0, 2));
        assert_eq!(ds.find(0), ds.find(2));
        assert_ne!(ds.find(0), ds.find(3));
    }

    #[test]
    fn chains_land_in_one_group() {
        // A-B and B-C are ~0.94, A-C is ~0.77.
        let items = vec![
            at_degrees("a", 0.0),
            at_degrees("b", 20.0),
            at_degrees("c", 40.0),
            at_degrees("d", 90.0),
        ];
        let report = find_near_duplicates(
            &items,
            &DuplicateOptions::default(),
            &DuplicateConfig::default(),
        );
        assert!(report.success);
        assert_eq!(report.groups.len(), 1);
        assert_eq!(ids(&report.groups[0]), vec!["a", "b", "c"]);
        assert_eq!(report.total_duplicates, 3);
        let expected = 20.0_f64.to_radians().cos();
        assert!((report.groups[0].average_similarity - expected).abs() < 1e-6);
        assert!(!report.truncated);
        assert!(report.warning.is_none());
    }

    #[test]
    fn low_threshold_is_raised_with_a_warning() {
        let items = vec![at_degrees("a", 0.0), at_degrees("b", 60.0)];
        let report = find_near_duplicates(
            &items,
            &DuplicateOptions {
                threshold: 0.1,
                max_results: 50,
            },
            &DuplicateConfig::default(),
        );
        assert_eq!(report.threshold, 0.7);
        assert!(report.warning.as_deref().is_some_and(|w| w.contains("0.7")));
        // cos(60°) = 0.5 would have matched at 0.1
        assert!(report.groups.is_empty());
    }

    #[test]
    fn pair_cap_stops_the_scan() {
        let items: Vec<_> = (0..6).map(|i| at_degrees(&format!("i{i}"), 0.0)).collect();
        let limits = DuplicateConfig {
            max_pairs: 3,
            ..Default::default()
        };
        let report = find_near_duplicates(&items, &DuplicateOptions::default(), &limits);
        assert!(report.truncated);
        assert!(report.warning.is_some());
        // The first three pairs all involve i0.
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].members.len(), 4);
    }

    #[test]
    fn large_inputs_are_sampled() {
        let items: Vec<_> = (0..10).map(|i| at_degrees(&format!("i{i}"), i as f64 * 9.0)).collect();
        let limits = DuplicateConfig {
            max_items: 4,
            ..Default::default()
        };
        let report = find_near_duplicates(&items, &DuplicateOptions::default(), &limits);
        assert!(report.truncated);
        assert!(report.warning.as_deref().is_some_and(|w| w.contains("4 out of 10")));
    }

    #[test]
    fn groups_sorted_by_size_and_limited() {
        let mut items = vec![at_degrees("p0", 0.0), at_degrees("p1", 1.0)];
        items.extend((0..3).map(|i| at_degrees(&format!("q{i}"), 90.0 + i as f64)));
        let report = find_near_duplicates(
            &items,
            &DuplicateOptions {
                threshold: 0.95,
                max_results: 1,
            },
            &DuplicateConfig::default(),
        );
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].members.len(), 3);
        assert_eq!(report.total_duplicates, 5);
    }
}
