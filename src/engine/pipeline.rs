use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use time::OffsetDateTime;
use tracing::{debug, info};

use super::snapshot::{Cluster, ClusterSnapshot};
use crate::classify::{Kmeans, MIN_ITEMS};
use crate::config::{ClusterConfig, KSelection};
use crate::label::{LabelEvidence, LabelGenerator, fallback_label};
use crate::store::{EmbeddedItem, EmbeddingAccessor};
use crate::terms::{build_corpus, descriptors, top_terms};
use crate::{AppError, AppResult};

/// Descriptors for one surviving cluster before it gets a label.
struct Draft {
    id: usize,
    members: Vec<Arc<EmbeddedItem>>,
    evidence: LabelEvidence,
    top_terms: Vec<String>,
}

/// One full batch pass: fetch, cluster, describe, label.
///
/// The result carries `version == 0`; the cache stamps the real version
/// when it publishes.
#[tracing::instrument(name = "Computing clusters", level = "info", skip(accessor, labeler, config))]
pub(crate) async fn run(
    accessor: &EmbeddingAccessor,
    labeler: &LabelGenerator,
    config: &ClusterConfig,
    selection: KSelection,
) -> AppResult<ClusterSnapshot> {
    let batch = accessor.fetch().await?;
    if batch.len() < MIN_ITEMS {
        return Err(AppError::InsufficientData {
            found: batch.len(),
            required: MIN_ITEMS,
        });
    }

    let x = batch.to_matrix();
    let fit = Kmeans::from(&config.kmeans).fit(&x, selection)?;
    let corpus = build_corpus(&batch.items);

    let mut drafts = Vec::new();
    let mut unclustered = Vec::new();
    for (id, rows) in fit.members().into_iter().enumerate() {
        let members: Vec<Arc<EmbeddedItem>> =
            rows.iter().map(|&r| batch.items[r].clone()).collect();
        if members.len() < config.kmeans.min_cluster_size {
            debug!("Dropping cluster {id} with {} members", members.len());
            unclustered.extend(members.iter().map(|m| m.id.clone()));
            continue;
        }
        let evidence = LabelEvidence::from_members(
            id,
            &members,
            descriptors::dominant_category(&members),
            descriptors::common_tags(&members),
        );
        drafts.push(Draft {
            id,
            top_terms: top_terms(&members, &corpus, config.max_top_terms),
            members,
            evidence,
        });
    }

    let evidence: Vec<LabelEvidence> = drafts.iter().map(|d| d.evidence.clone()).collect();
    let mut labels = labeler.label_clusters(&evidence).await;

    let clusters: Vec<Cluster> = drafts
        .into_iter()
        .map(|d| {
            let label = labels
                .remove(&d.id)
                .unwrap_or_else(|| fallback_label(&d.evidence));
            Cluster {
                id: d.id,
                label: label.label,
                label_confidence: label.confidence,
                label_reason: label.reason,
                dominant_category: d.evidence.dominant_category,
                common_tags: d.evidence.common_tags,
                top_terms: d.top_terms,
                dominant_file_category: descriptors::dominant_file_category(&d.members),
                dominant_folder_name: descriptors::dominant_folder_name(&d.members),
                time_range: descriptors::time_range(&d.members),
                members: d.members,
            }
        })
        .collect();

    info!(
        "Published {} clusters over {} items ({} unclustered)",
        clusters.len(),
        batch.len(),
        unclustered.len()
    );

    let mut warnings = batch.warnings;
    warnings.extend(fit.warnings);

    Ok(ClusterSnapshot {
        version: 0,
        clusters,
        centroids: fit.centroids,
        computed_at: OffsetDateTime::now_utc(),
        computed_instant: Some(Instant::now()),
        items: batch.items,
        unclustered,
        k: fit.k,
        iterations: fit.iterations,
        converged: fit.converged,
        inertia: fit.inertia,
        seed: fit.seed,
        skipped: batch.skipped,
        truncated: batch.truncated,
        warnings,
    })
}

/// Count of members per published cluster id.
pub(crate) fn member_counts(snapshot: &ClusterSnapshot) -> HashMap<usize, usize> {
    snapshot
        .clusters
        .iter()
        .map(|c| (c.id, c.members.len()))
        .collect()
}
