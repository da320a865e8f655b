use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::extractor::item_tags;
use crate::serde_helpers::offset_datetime;
use crate::store::EmbeddedItem;

const MAX_COMMON_TAGS: usize = 5;

/// Coarse file family derived from a file type or extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Documents,
    Images,
    Spreadsheets,
    Presentations,
    Audio,
    Video,
    Archives,
    Code,
    Other,
}

impl FileCategory {
    pub fn from_extension(ext: &str) -> Self {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" | "doc" | "docx" | "txt" | "md" | "rtf" | "odt" | "pages" | "epub" => {
                FileCategory::Documents
            }
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tif" | "tiff" | "webp" | "heic" | "svg" => {
                FileCategory::Images
            }
            "xls" | "xlsx" | "csv" | "tsv" | "ods" | "numbers" => FileCategory::Spreadsheets,
            "ppt" | "pptx" | "odp" | "key" => FileCategory::Presentations,
            "mp3" | "wav" | "m4a" | "flac" | "aac" | "ogg" => FileCategory::Audio,
            "mp4" | "mov" | "avi" | "mkv" | "webm" | "m4v" => FileCategory::Video,
            "zip" | "tar" | "gz" | "tgz" | "rar" | "7z" | "bz2" | "xz" => FileCategory::Archives,
            "rs" | "py" | "js" | "ts" | "tsx" | "jsx" | "go" | "java" | "c" | "h" | "cpp" | "rb"
            | "sh" | "json" | "yaml" | "yml" | "toml" | "html" | "css" | "sql" => {
                FileCategory::Code
            }
            _ => FileCategory::Other,
        }
    }

    /// Accepts a MIME type (`image/png`) or a bare extension (`png`, `.png`).
    pub fn from_file_type(file_type: &str) -> Self {
        let Some((top, sub)) = file_type.split_once('/') else {
            return Self::from_extension(file_type);
        };
        match top.to_ascii_lowercase().as_str() {
            "image" => FileCategory::Images,
            "audio" => FileCategory::Audio,
            "video" => FileCategory::Video,
            "text" if sub.eq_ignore_ascii_case("csv") => FileCategory::Spreadsheets,
            "text" => FileCategory::Documents,
            _ => {
                let sub = sub.to_ascii_lowercase();
                if sub.contains("spreadsheet") || sub.contains("excel") {
                    FileCategory::Spreadsheets
                } else if sub.contains("presentation") || sub.contains("powerpoint") {
                    FileCategory::Presentations
                } else if sub.contains("word") || sub.contains("document") {
                    FileCategory::Documents
                } else {
                    Self::from_extension(sub.rsplit(['.', '-', '+']).next().unwrap_or(&sub))
                }
            }
        }
    }

    pub fn of_item(item: &EmbeddedItem) -> Self {
        item.file_type()
            .map(Self::from_file_type)
            .filter(|c| *c != FileCategory::Other)
            .or_else(|| item.extension().map(|e| Self::from_extension(&e)))
            .unwrap_or(FileCategory::Other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(with = "offset_datetime")]
    pub earliest: OffsetDateTime,
    #[serde(with = "offset_datetime")]
    pub latest: OffsetDateTime,
}

/// Most frequent value; ties go to the smallest value.
fn mode<T: Ord>(values: impl IntoIterator<Item = T>) -> Option<T> {
    let mut counts: BTreeMap<T, usize> = BTreeMap::new();
    for v in values {
        *counts.entry(v).or_default() += 1;
    }
    let mut best: Option<(T, usize)> = None;
    for (value, count) in counts {
        if best.as_ref().is_none_or(|(_, c)| count > *c) {
            best = Some((value, count));
        }
    }
    best.map(|(v, _)| v)
}

pub fn dominant_category(members: &[Arc<EmbeddedItem>]) -> Option<String> {
    mode(members.iter().filter_map(|m| m.category()))
        .map(str::to_string)
}

/// Tags carried by at least two members, most shared first.
pub fn common_tags(members: &[Arc<EmbeddedItem>]) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for member in members {
        for tag in item_tags(member) {
            *counts.entry(tag).or_default() += 1;
        }
    }
    let mut shared: Vec<(String, usize)> = counts.into_iter().filter(|(_, c)| *c >= 2).collect();
    shared.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    shared
        .into_iter()
        .take(MAX_COMMON_TAGS)
        .map(|(tag, _)| tag)
        .collect()
}

pub fn dominant_file_category(members: &[Arc<EmbeddedItem>]) -> Option<FileCategory> {
    mode(members.iter().map(|m| FileCategory::of_item(m)))
}

pub fn dominant_folder_name(members: &[Arc<EmbeddedItem>]) -> Option<String> {
    mode(members.iter().filter_map(|m| m.folder_name())).map(str::to_string)
}

pub fn time_range(members: &[Arc<EmbeddedItem>]) -> Option<TimeRange> {
    let mut stamps = members.iter().filter_map(|m| m.timestamp());
    let first = stamps.next()?;
    let (earliest, latest) = stamps.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t)));
    Some(TimeRange { earliest, latest })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;
    use crate::store::test_support::item;

    fn members() -> Vec<Arc<EmbeddedItem>> {
        vec![
            Arc::new(item(
                "a",
                vec![1.0],
                json!({"category": "Finance", "tags": ["tax", "irs", "2023"], "filePath": "/docs/taxes/a.pdf", "date": "2023-04-01"}),
            )),
            Arc::new(item(
                "b",
                vec![1.0],
                json!({"category": "Finance", "tags": "tax; irs", "filePath": "/docs/taxes/b.png", "date": "2023-01-15 10:00:00"}),
            )),
            Arc::new(item(
                "c",
                vec![1.0],
                json!({"category": "Receipts", "tags": ["tax", "2023"], "filePath": "/scans/c.pdf", "createdAt": 1_700_000_000_000_i64}),
            )),
        ]
    }

    #[test]
    fn picks_dominant_values() {
        let m = members();
        assert_eq!(dominant_category(&m).as_deref(), Some("Finance"));
        assert_eq!(dominant_folder_name(&m).as_deref(), Some("taxes"));
        assert_eq!(dominant_file_category(&m), Some(FileCategory::Documents));
        assert_eq!(dominant_category(&[]), None);
    }

    #[test]
    fn common_tags_need_two_members() {
        let mut m = members();
        m.push(Arc::new(item("d", vec![1.0], json!({"tags": ["solo"]}))));
        assert_eq!(common_tags(&m), vec!["tax", "2023", "irs"]);
    }

    #[test]
    fn time_range_spans_all_dated_members() {
        let range = time_range(&members()).unwrap();
        assert_eq!(range.earliest, datetime!(2023-01-15 10:00:00 UTC));
        assert_eq!(range.latest, datetime!(2023-11-14 22:13:20 UTC));
    }

    #[test]
    fn maps_file_types() {
        assert_eq!(FileCategory::from_file_type("image/jpeg"), FileCategory::Images);
        assert_eq!(FileCategory::from_file_type("application/pdf"), FileCategory::Documents);
        assert_eq!(
            FileCategory::from_file_type(
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            ),
            FileCategory::Spreadsheets
        );
        assert_eq!(FileCategory::from_file_type(".PPTX"), FileCategory::Presentations);
        assert_eq!(FileCategory::from_file_type("weird"), FileCategory::Other);
    }
}
