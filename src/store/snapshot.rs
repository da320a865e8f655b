use std::collections::HashMap;
use std::path::Path;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, error};

use super::{FileRecord, Metadata, PeekResult, StoreStats, VectorStore};
use crate::{AppError, AppResult};

/// Vector store backed by a JSON export of `{ids, embeddings, metadatas}`.
///
/// Used by the CLI and by tests; a live database client implements the same
/// trait.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    export: PeekResult,
    index: HashMap<String, usize>,
}

impl SnapshotStore {
    pub fn from_peek(export: PeekResult) -> Self {
        let mut index = HashMap::with_capacity(export.ids.len());
        for (i, id) in export.ids.iter().enumerate() {
            index.entry(id.clone()).or_insert(i);
        }
        Self { export, index }
    }

    #[tracing::instrument(name = "Loading embedding export", level = "info")]
    pub async fn from_path<P: AsRef<Path> + std::fmt::Debug>(path: P) -> AppResult<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        let jd = &mut serde_json::Deserializer::from_str(&raw);
        match serde_path_to_error::deserialize::<_, PeekResult>(jd) {
            Ok(export) => {
                debug!("Loaded {} stored files", export.ids.len());
                Ok(Self::from_peek(export))
            }
            Err(e) => {
                error!("Failed to parse embedding export at path: {}", e.path());
                Err(e.into_inner().into())
            }
        }
    }

    fn metadata(&self, idx: usize) -> Option<&Metadata> {
        self.export.metadatas.get(idx).and_then(Option::as_ref)
    }

    fn record(&self, idx: usize) -> FileRecord {
        let field = |keys: &[&str]| {
            self.metadata(idx).and_then(|m| {
                keys.iter()
                    .find_map(|k| m.get(*k).and_then(|v| v.as_str()))
                    .map(str::to_string)
            })
        };
        FileRecord {
            file_path: field(&["filePath", "path"]),
            file_name: field(&["fileName", "name"]),
            file_type: field(&["fileType", "mimeType"]),
            embedding: self.export.embeddings.get(idx).cloned().unwrap_or_default(),
            extraction_method: field(&["extractionMethod"]),
        }
    }
}

impl VectorStore for SnapshotStore {
    fn peek_files(&self, limit: usize) -> BoxFuture<'_, AppResult<PeekResult>> {
        async move {
            let n = self.export.ids.len().min(limit);
            Ok(PeekResult {
                ids: self.export.ids.iter().take(n).cloned().collect(),
                embeddings: self.export.embeddings.iter().take(n).cloned().collect(),
                metadatas: self.export.metadatas.iter().take(n).cloned().collect(),
            })
        }
        .boxed()
    }

    fn get_file<'a>(&'a self, id: &'a str) -> BoxFuture<'a, AppResult<Option<FileRecord>>> {
        async move { Ok(self.index.get(id).map(|&idx| self.record(idx))) }.boxed()
    }

    fn get_stats(&self) -> BoxFuture<'_, AppResult<StoreStats>> {
        async move {
            if self.export.embeddings.len() > self.export.ids.len() {
                return Err(AppError::Collaborator(format!(
                    "export holds {} embeddings for {} ids",
                    self.export.embeddings.len(),
                    self.export.ids.len()
                )));
            }
            Ok(StoreStats {
                files: self.export.ids.len(),
                extra: Metadata::new(),
            })
        }
        .boxed()
    }
}
