use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ndarray::prelude::*;
use tracing::{debug, trace, warn};

use super::{EmbeddedItem, PeekResult, VectorStore};
use crate::{AppError, AppResult};

/// Validated embeddings for one compute pass. All vectors share `dimension`.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingBatch {
    pub items: Vec<Arc<EmbeddedItem>>,
    pub dimension: usize,
    /// Entries dropped for being malformed, repeated or off-dimension.
    pub skipped: usize,
    /// The store holds more files than were fetched.
    pub truncated: bool,
    pub total_in_store: Option<usize>,
    pub warnings: Vec<String>,
}

impl EmbeddingBatch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Dense `(n_items, dimension)` matrix of the vectors.
    pub fn to_matrix(&self) -> Array2<f64> {
        embeddings_to_ndarray(&self.items, self.dimension)
    }
}

/// Fetches raw vectors from the vector store and keeps only consistent ones.
pub struct EmbeddingAccessor {
    store: Arc<dyn VectorStore>,
    fetch_limit: usize,
}

impl EmbeddingAccessor {
    pub fn new(store: Arc<dyn VectorStore>, fetch_limit: usize) -> Self {
        Self { store, fetch_limit }
    }

    #[tracing::instrument(name = "Fetching embeddings", level = "info", skip(self))]
    pub async fn fetch(&self) -> AppResult<EmbeddingBatch> {
        let total = match self.store.get_stats().await {
            Ok(stats) => Some(stats.files),
            Err(e) => {
                warn!("Vector store stats unavailable: {e}");
                None
            }
        };
        let peek = self
            .store
            .peek_files(self.fetch_limit)
            .await
            .map_err(|e| AppError::Collaborator(format!("peek_files failed: {e}")))?;
        let mut batch = validate_peek(peek);
        batch.total_in_store = total;

        let fetched = batch.items.len() + batch.skipped;
        batch.truncated = match total {
            Some(total) => total > fetched,
            None => fetched >= self.fetch_limit,
        };
        if batch.truncated {
            let msg = format!(
                "Fetched {fetched} of {} stored files (limit {})",
                total.map_or_else(|| "an unknown number of".to_string(), |t| t.to_string()),
                self.fetch_limit
            );
            warn!("{msg}");
            batch.warnings.push(msg);
        }
        Ok(batch)
    }
}

fn is_well_formed(vector: &[f32]) -> bool {
    !vector.is_empty() && vector.iter().all(|v| v.is_finite())
}

/// Most common length among well-formed vectors; ties go to the first seen.
fn dominant_dimension(embeddings: &[Vec<f32>]) -> Option<usize> {
    let mut counts: HashMap<usize, (usize, usize)> = HashMap::new();
    for (order, v) in embeddings.iter().enumerate() {
        if is_well_formed(v) {
            counts.entry(v.len()).or_insert((0, order)).0 += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|(_, (ca, fa)), (_, (cb, fb))| ca.cmp(cb).then(fb.cmp(fa)))
        .map(|(dim, _)| dim)
}

/// Turn raw parallel arrays into a batch, skipping anything inconsistent.
pub fn validate_peek(peek: PeekResult) -> EmbeddingBatch {
    let PeekResult {
        ids,
        embeddings,
        metadatas,
    } = peek;
    let mut batch = EmbeddingBatch::default();

    if ids.len() != embeddings.len() {
        let msg = format!(
            "Vector store returned {} ids but {} embeddings; extra entries ignored",
            ids.len(),
            embeddings.len()
        );
        warn!("{msg}");
        batch.warnings.push(msg);
        batch.skipped += ids.len().abs_diff(embeddings.len());
    }

    let Some(dimension) = dominant_dimension(&embeddings) else {
        batch.skipped += ids.len().min(embeddings.len());
        return batch;
    };
    batch.dimension = dimension;

    let mut metadatas = metadatas.into_iter();
    let mut seen = HashSet::new();
    let mut mismatched = 0usize;
    for (id, vector) in ids.into_iter().zip(embeddings) {
        let metadata = metadatas.next().flatten().unwrap_or_default();
        if id.trim().is_empty() || !is_well_formed(&vector) {
            trace!("Skipping malformed entry {id:?}");
            batch.skipped += 1;
            continue;
        }
        if vector.len() != dimension {
            let err = AppError::DimensionMismatch {
                id: id.clone(),
                expected: dimension,
                found: vector.len(),
            };
            debug!("{err}");
            mismatched += 1;
            batch.skipped += 1;
            continue;
        }
        if !seen.insert(id.clone()) {
            trace!("Skipping repeated id {id}");
            batch.skipped += 1;
            continue;
        }
        batch
            .items
            .push(Arc::new(EmbeddedItem::new(id, vector, metadata)));
    }

    if mismatched > 0 {
        let msg = format!("Skipped {mismatched} embeddings not matching dimension {dimension}");
        warn!("{msg}");
        batch.warnings.push(msg);
    }
    batch
}

#[tracing::instrument(name = "Converting embeddings", level = "debug", skip(items))]
pub fn embeddings_to_ndarray(items: &[Arc<EmbeddedItem>], dimension: usize) -> Array2<f64> {
    let mut arr: Array2<f64> = Array2::<f64>::zeros((items.len(), dimension));
    trace!("Initialized ndarray with shape: {:?}", arr.dim());
    for (mut row, item) in arr.axis_iter_mut(Axis(0)).zip(items) {
        for (val, &src) in row.iter_mut().zip(&item.vector) {
            *val = src as f64;
        }
    }
    arr
}
