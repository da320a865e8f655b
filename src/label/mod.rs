//! Human-readable cluster names, from an optional model with a fallback ladder.

pub mod generator;
pub mod prompt;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, info_span, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::style::ProgressStyle;

pub use generator::{
    GenerateTextRequest, GenerateTextResponse, JsonReplySchema, OpenAiTextGenerator,
    ServerAddress, TextGenerator,
};

use crate::AppResult;
use crate::config::LabelConfig;
use crate::store::EmbeddedItem;

const MAX_NAMES: usize = 8;
const MAX_SUBJECTS: usize = 5;
const MAX_DESCRIPTIONS: usize = 3;
const MAX_DESCRIPTION_CHARS: usize = 300;
/// Labels must be strictly shorter than this.
const MAX_LABEL_CHARS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelConfidence {
    High,
    Medium,
    Low,
}

/// Where a label came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LabelSource {
    Generated,
    TagsAndCategory,
    Category,
    Tags,
    Generic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLabel {
    pub label: String,
    pub confidence: LabelConfidence,
    pub reason: LabelSource,
}

/// # cluster_label
/// Short descriptive phrase naming a group of related files.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct LabelReply {
    /// Two to five words, under 60 characters, without the word "cluster".
    pub label: String,
}

/// Bounded summary of a cluster handed to the prompt and the fallback ladder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelEvidence {
    pub cluster_id: usize,
    pub names: Vec<String>,
    pub subjects: Vec<String>,
    pub descriptions: Vec<String>,
    pub dominant_category: Option<String>,
    pub common_tags: Vec<String>,
}

fn first_distinct<'a>(values: impl Iterator<Item = &'a str>, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .filter(|v| seen.insert(v.to_lowercase()))
        .take(limit)
        .map(str::to_string)
        .collect()
}

impl LabelEvidence {
    pub fn from_members(
        cluster_id: usize,
        members: &[Arc<EmbeddedItem>],
        dominant_category: Option<String>,
        common_tags: Vec<String>,
    ) -> Self {
        let names = first_distinct(members.iter().map(|m| m.display_name()), MAX_NAMES);
        let subjects = first_distinct(members.iter().filter_map(|m| m.subject()), MAX_SUBJECTS);
        let descriptions: Vec<String> =
            first_distinct(members.iter().filter_map(|m| m.summary()), MAX_DESCRIPTIONS)
                .into_iter()
                .map(|d| d.chars().take(MAX_DESCRIPTION_CHARS).collect::<String>())
                .collect();
        Self {
            cluster_id,
            names,
            subjects,
            descriptions,
            dominant_category,
            common_tags,
        }
    }
}

/// Strip wrapping quotes and whitespace, then apply the label rules.
pub fn validate_label(raw: &str) -> Option<String> {
    const QUOTES: &[char] = &['"', '\'', '`', '\u{201c}', '\u{201d}', '\u{2018}', '\u{2019}'];
    let label = raw.trim().trim_matches(QUOTES).trim();
    let ok = !label.is_empty()
        && label.chars().count() < MAX_LABEL_CHARS
        && !label.to_lowercase().contains("cluster");
    ok.then(|| label.to_string())
}

/// Read a model reply as `{"label": ...}` JSON, or as a plain phrase.
pub fn parse_label_response(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if let Ok(reply) = serde_json::from_str::<LabelReply>(trimmed) {
        return validate_label(&reply.label);
    }
    // Markdown fences or chatter around a JSON object.
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return serde_json::from_str::<LabelReply>(&trimmed[start..=end])
                .ok()
                .and_then(|reply| validate_label(&reply.label));
        }
    }
    trimmed
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("```"))
        .and_then(validate_label)
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Label built from metadata alone, strongest evidence first.
pub fn fallback_label(evidence: &LabelEvidence) -> ClusterLabel {
    let category = evidence.dominant_category.as_deref().filter(|c| !c.is_empty());
    let tags = &evidence.common_tags;

    let (label, confidence, reason) = match category {
        Some(category) if !tags.is_empty() => {
            let top: Vec<String> = tags.iter().take(2).map(|t| title_case(t)).collect();
            (
                format!("{category}: {}", top.join(", ")),
                LabelConfidence::Medium,
                LabelSource::TagsAndCategory,
            )
        }
        Some(category) => (
            category.to_string(),
            LabelConfidence::Medium,
            LabelSource::Category,
        ),
        None if !tags.is_empty() => {
            let top: Vec<String> = tags.iter().take(3).map(|t| title_case(t)).collect();
            (top.join(", "), LabelConfidence::Low, LabelSource::Tags)
        }
        None => (
            format!("Cluster {}", evidence.cluster_id + 1),
            LabelConfidence::Low,
            LabelSource::Generic,
        ),
    };
    ClusterLabel {
        label,
        confidence,
        reason,
    }
}

/// Names clusters, with at most `concurrency` model calls in flight.
pub struct LabelGenerator {
    generator: Option<Arc<dyn TextGenerator>>,
    config: LabelConfig,
}

impl LabelGenerator {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, config: LabelConfig) -> Self {
        Self { generator, config }
    }

    /// Label every cluster. Never fails: a missing or broken model only
    /// moves clusters down the fallback ladder.
    #[tracing::instrument(name = "Labeling clusters", level = "info", skip_all, fields(n = evidence.len()))]
    pub async fn label_clusters(&self, evidence: &[LabelEvidence]) -> HashMap<usize, ClusterLabel> {
        let mut labels = HashMap::with_capacity(evidence.len());
        let generator = match &self.generator {
            Some(g) if !self.config.skip_llm => g,
            _ => {
                debug!("Text generation disabled; using metadata labels");
                for ev in evidence {
                    labels.insert(ev.cluster_id, fallback_label(ev));
                }
                return labels;
            }
        };

        let header_span = info_span!("Labeling clusters...");
        header_span.pb_set_message("Labeling...");
        header_span.pb_set_finish_message("Labeling complete");
        header_span.pb_set_length(evidence.len() as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            header_span.pb_set_style(&style);
        }

        for batch in evidence.chunks(self.config.concurrency.max(1)) {
            let settled = join_all(batch.iter().map(|ev| {
                self.label_one(&**generator, ev)
                    .instrument(header_span.clone())
            }))
            .await;
            for (ev, label) in batch.iter().zip(settled) {
                labels.insert(ev.cluster_id, label);
            }
            header_span.pb_inc(batch.len() as u64);
        }
        labels
    }

    async fn label_one(&self, generator: &dyn TextGenerator, evidence: &LabelEvidence) -> ClusterLabel {
        match self.request_label(generator, evidence).await {
            Ok(Some(label)) => ClusterLabel {
                label,
                confidence: LabelConfidence::High,
                reason: LabelSource::Generated,
            },
            Ok(None) => {
                debug!("Unusable label for cluster {}; falling back", evidence.cluster_id);
                fallback_label(evidence)
            }
            Err(e) => {
                warn!("Label request for cluster {} failed: {e}", evidence.cluster_id);
                fallback_label(evidence)
            }
        }
    }

    async fn request_label(
        &self,
        generator: &dyn TextGenerator,
        evidence: &LabelEvidence,
    ) -> AppResult<Option<String>> {
        let request = GenerateTextRequest {
            model: self.config.model.clone(),
            prompt: prompt::label_prompt(evidence)?,
            max_tokens: self.config.max_tokens,
            schema: Some(JsonReplySchema {
                name: "cluster_label".to_string(),
                description: "Label for a group of related files".to_string(),
                schema: schema_for!(LabelReply).as_value().to_owned(),
            }),
        };
        let response =
            tokio::time::timeout(self.config.timeout, generator.generate_text(request)).await??;
        Ok(parse_label_response(&response.response))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::FutureExt;
    use futures::future::BoxFuture;

    use super::*;
    use crate::AppError;

    fn evidence(id: usize, category: Option<&str>, tags: &[&str]) -> LabelEvidence {
        LabelEvidence {
            cluster_id: id,
            names: vec![format!("file{id}.pdf")],
            dominant_category: category.map(str::to_string),
            common_tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Answers from a script keyed by the cluster's first file name.
    struct ScriptedGenerator {
        replies: HashMap<String, Result<String, String>>,
        calls: AtomicUsize,
    }

    impl TextGenerator for ScriptedGenerator {
        fn generate_text(
            &self,
            request: GenerateTextRequest,
        ) -> BoxFuture<'_, AppResult<GenerateTextResponse>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self
                .replies
                .iter()
                .find(|(key, _)| request.prompt.contains(key.as_str()))
                .map(|(_, r)| r.clone());
            async move {
                match reply {
                    Some(Ok(response)) => Ok(GenerateTextResponse { response }),
                    Some(Err(e)) => Err(AppError::Collaborator(e)),
                    None => Err(AppError::Collaborator("no script".into())),
                }
            }
            .boxed()
        }
    }

    struct HangingGenerator;

    impl TextGenerator for HangingGenerator {
        fn generate_text(
            &self,
            _request: GenerateTextRequest,
        ) -> BoxFuture<'_, AppResult<GenerateTextResponse>> {
            async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(GenerateTextResponse::default())
            }
            .boxed()
        }
    }

    #[test]
    fn validates_labels() {
        assert_eq!(validate_label("  \"Tax Returns\" "), Some("Tax Returns".into()));
        assert_eq!(validate_label("''"), None);
        assert_eq!(validate_label("Cluster of receipts"), None);
        assert_eq!(validate_label(&"x".repeat(60)), None);
        assert_eq!(validate_label(&"x".repeat(59)), Some("x".repeat(59)));
    }

    #[test]
    fn parses_json_then_plain_text() {
        assert_eq!(
            parse_label_response(r#"{"label": "Travel Plans"}"#),
            Some("Travel Plans".into())
        );
        assert_eq!(
            parse_label_response("```json\n{\"label\": \"Home Insurance\"}\n```"),
            Some("Home Insurance".into())
        );
        assert_eq!(parse_label_response("Kitchen Renovation\n"), Some("Kitchen Renovation".into()));
        assert_eq!(parse_label_response(r#"{"label": ""}"#), None);
        assert_eq!(parse_label_response(""), None);
    }

    #[test]
    fn fallback_ladder_order() {
        let both = fallback_label(&evidence(0, Some("Finance"), &["tax", "irs", "w2"]));
        assert_eq!(both.label, "Finance: Tax, Irs");
        assert_eq!(both.confidence, LabelConfidence::Medium);

        let category = fallback_label(&evidence(0, Some("Finance"), &[]));
        assert_eq!(category.label, "Finance");
        assert_eq!(category.reason, LabelSource::Category);

        let tags = fallback_label(&evidence(0, None, &["tax", "irs", "w2", "extra"]));
        assert_eq!(tags.label, "Tax, Irs, W2");
        assert_eq!(tags.confidence, LabelConfidence::Low);

        let generic = fallback_label(&evidence(4, None, &[]));
        assert_eq!(generic.label, "Cluster 5");
        assert_eq!(generic.reason, LabelSource::Generic);
    }

    #[test]
    fn evidence_is_bounded() {
        use serde_json::json;

        use crate::store::test_support::item;

        let members: Vec<Arc<EmbeddedItem>> = (0..20)
            .map(|i| {
                Arc::new(item(
                    &format!("id{i}"),
                    vec![1.0],
                    json!({"fileName": format!("f{i}.txt"), "subject": format!("s{i}"), "summary": "x".repeat(1000 + i)}),
                ))
            })
            .collect();
        let ev = LabelEvidence::from_members(0, &members, None, Vec::new());
        assert_eq!(ev.names.len(), MAX_NAMES);
        assert_eq!(ev.subjects.len(), MAX_SUBJECTS);
        assert_eq!(ev.descriptions.len(), MAX_DESCRIPTIONS);
        assert!(ev.descriptions.iter().all(|d| d.chars().count() == MAX_DESCRIPTION_CHARS));
    }

    #[tokio::test]
    async fn one_failure_does_not_block_siblings() {
        let generator = Arc::new(ScriptedGenerator {
            replies: HashMap::from([
                ("file0.pdf".to_string(), Ok(r#"{"label": "Tax Returns"}"#.to_string())),
                ("file1.pdf".to_string(), Err("boom".to_string())),
                ("file2.pdf".to_string(), Ok("A cluster of things".to_string())),
                ("file3.pdf".to_string(), Ok("Vacation Photos".to_string())),
            ]),
            calls: AtomicUsize::new(0),
        });
        let labeler = LabelGenerator::new(Some(generator.clone()), LabelConfig::default());
        let ev = vec![
            evidence(0, None, &[]),
            evidence(1, Some("Finance"), &[]),
            evidence(2, None, &["beach"]),
            evidence(3, None, &[]),
        ];

        let labels = labeler.label_clusters(&ev).await;

        assert_eq!(generator.calls.load(Ordering::SeqCst), 4);
        assert_eq!(labels[&0].label, "Tax Returns");
        assert_eq!(labels[&0].confidence, LabelConfidence::High);
        assert_eq!(labels[&1].label, "Finance");
        assert_eq!(labels[&2].label, "Beach");
        assert_eq!(labels[&2].reason, LabelSource::Tags);
        assert_eq!(labels[&3].label, "Vacation Photos");
    }

    #[tokio::test]
    async fn slow_model_times_out_into_fallback() {
        let config = LabelConfig {
            timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let labeler = LabelGenerator::new(Some(Arc::new(HangingGenerator)), config);
        let labels = labeler.label_clusters(&[evidence(0, Some("Receipts"), &[])]).await;
        assert_eq!(labels[&0].label, "Receipts");
    }

    #[tokio::test]
    async fn missing_or_skipped_model_uses_fallback() {
        let none = LabelGenerator::new(None, LabelConfig::default());
        let labels = none.label_clusters(&[evidence(2, None, &[])]).await;
        assert_eq!(labels[&2].label, "Cluster 3");

        let generator = Arc::new(ScriptedGenerator {
            replies: HashMap::new(),
            calls: AtomicUsize::new(0),
        });
        let skipped = LabelGenerator::new(
            Some(generator.clone()),
            LabelConfig {
                skip_llm: true,
                ..Default::default()
            },
        );
        skipped.label_clusters(&[evidence(0, None, &[])]).await;
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }
}
