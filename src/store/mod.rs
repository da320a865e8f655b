//! Vector-store collaborator seam and the items it hands to the pipeline.

pub mod accessor;
pub mod snapshot;

use std::path::Path;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::AppResult;
use crate::serde_helpers::timestamp_from_value;

pub use accessor::{EmbeddingAccessor, EmbeddingBatch};
pub use snapshot::SnapshotStore;

/// Free-form per-file metadata as stored alongside each embedding.
pub type Metadata = serde_json::Map<String, Value>;

const NAME_KEYS: &[&str] = &["fileName", "name", "title"];
const PATH_KEYS: &[&str] = &["filePath", "path"];
const CATEGORY_KEYS: &[&str] = &["category"];
const SUBJECT_KEYS: &[&str] = &["subject"];
const SUMMARY_KEYS: &[&str] = &["summary", "description"];
const FILE_TYPE_KEYS: &[&str] = &["fileType", "mimeType", "extension"];
const TAG_KEYS: &[&str] = &["tags", "keywords"];
const DATE_KEYS: &[&str] = &["date", "documentDate", "createdAt", "modifiedAt", "updatedAt"];

/// Result of `peek_files`: parallel arrays, one entry per stored file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeekResult {
    pub ids: Vec<String>,
    #[serde(default)]
    pub embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    pub metadatas: Vec<Option<Metadata>>,
}

/// Single-file lookup result from the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub file_path: Option<String>,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub extraction_method: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub files: usize,
    #[serde(flatten)]
    pub extra: Metadata,
}

/// Storage of embedded files. Everything here may fail or be slow; callers
/// treat errors as a degraded feature, never as fatal.
pub trait VectorStore: Send + Sync {
    fn peek_files(&self, limit: usize) -> BoxFuture<'_, AppResult<PeekResult>>;

    fn get_file<'a>(&'a self, id: &'a str) -> BoxFuture<'a, AppResult<Option<FileRecord>>>;

    fn get_stats(&self) -> BoxFuture<'_, AppResult<StoreStats>>;
}

/// One embedded file as seen by a single compute pass.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbeddedItem {
    pub id: String,
    #[serde(skip_serializing)]
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

impl EmbeddedItem {
    pub fn new<S: Into<String>>(id: S, vector: Vec<f32>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            vector,
            metadata,
        }
    }

    /// First non-blank string value among `keys`.
    pub fn meta_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|k| self.metadata.get(*k))
            .filter_map(Value::as_str)
            .map(str::trim)
            .find(|s| !s.is_empty())
    }

    pub fn name(&self) -> Option<&str> {
        self.meta_str(NAME_KEYS).or_else(|| {
            self.path()
                .and_then(|p| Path::new(p).file_name())
                .and_then(|n| n.to_str())
        })
    }

    /// Name for humans: metadata name, file name from the path, or the id.
    pub fn display_name(&self) -> &str {
        self.name().unwrap_or(&self.id)
    }

    pub fn path(&self) -> Option<&str> {
        self.meta_str(PATH_KEYS)
    }

    pub fn category(&self) -> Option<&str> {
        self.meta_str(CATEGORY_KEYS)
    }

    pub fn subject(&self) -> Option<&str> {
        self.meta_str(SUBJECT_KEYS)
    }

    pub fn summary(&self) -> Option<&str> {
        self.meta_str(SUMMARY_KEYS)
    }

    pub fn file_type(&self) -> Option<&str> {
        self.meta_str(FILE_TYPE_KEYS)
    }

    pub fn tags_value(&self) -> Option<&Value> {
        TAG_KEYS.iter().find_map(|k| self.metadata.get(*k))
    }

    pub fn timestamp(&self) -> Option<OffsetDateTime> {
        DATE_KEYS
            .iter()
            .filter_map(|k| self.metadata.get(*k))
            .find_map(timestamp_from_value)
    }

    /// Name of the directory holding the file, if the path has one.
    pub fn folder_name(&self) -> Option<&str> {
        self.path()
            .and_then(|p| Path::new(p).parent())
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
    }

    /// Lowercased extension of the file name or path.
    pub fn extension(&self) -> Option<String> {
        self.path()
            .or_else(|| self.meta_str(NAME_KEYS))
            .and_then(|p| Path::new(p).extension())
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use serde_json::json;

    use super::*;

    pub fn item(id: &str, vector: Vec<f32>, metadata: Value) -> EmbeddedItem {
        let metadata = match metadata {
            Value::Object(map) => map,
            _ => Metadata::new(),
        };
        EmbeddedItem::new(id, vector, metadata)
    }

    pub fn named(id: &str, vector: Vec<f32>) -> EmbeddedItem {
        item(id, vector, json!({ "fileName": format!("{id}.pdf") }))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::test_support::item;

    #[test]
    fn metadata_accessors_prefer_first_non_blank_key() {
        let it = item(
            "a",
            vec![1.0],
            json!({
                "fileName": "  ",
                "name": "Quarterly report.pdf",
                "filePath": "/docs/finance/Quarterly report.pdf",
                "summary": "",
                "description": "Numbers for Q3",
                "date": "2024-07-01",
            }),
        );
        assert_eq!(it.name(), Some("Quarterly report.pdf"));
        assert_eq!(it.summary(), Some("Numbers for Q3"));
        assert_eq!(it.folder_name(), Some("finance"));
        assert_eq!(it.extension().as_deref(), Some("pdf"));
        assert!(it.timestamp().is_some());
    }

    #[test]
    fn display_name_falls_back_to_path_then_id() {
        let from_path = item("x", vec![], json!({ "path": "/tmp/scan_001.png" }));
        assert_eq!(from_path.display_name(), "scan_001.png");
        let bare = item("only-id", vec![], json!({}));
        assert_eq!(bare.display_name(), "only-id");
    }
}
