use std::collections::HashMap;
use std::io::Cursor;

use semantic_clusters_include_zstd::include_zstd;

use super::LabelEvidence;
use crate::{AppError, AppResult};

static LABEL_CLUSTER_PROMPT: &[u8] = include_zstd!("src/label/prompts/label_cluster_prompt.md");

/// A template for AI prompts that supports variable substitution.
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new<S: Into<String>>(template: S) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Decompress a template embedded with `include_zstd!`.
    pub fn from_compressed(bytes: &[u8]) -> AppResult<Self> {
        let raw = zstd::decode_all(Cursor::new(bytes))?;
        let text = String::from_utf8(raw)
            .map_err(|e| AppError::Other(format!("prompt template is not UTF-8: {e}")))?;
        Ok(Self::new(text))
    }

    /// Render the template by replacing `{{key}}` with the corresponding value.
    pub fn render(&self, vars: &HashMap<&str, &str>) -> String {
        let mut output = self.template.clone();
        for (k, v) in vars {
            let placeholder = format!("{{{{{}}}}}", k);
            output = output.replace(&placeholder, v);
        }
        output
    }
}

fn bullet_list(values: &[String]) -> String {
    if values.is_empty() {
        return "(none)".to_string();
    }
    values
        .iter()
        .map(|v| format!("- {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fill the label prompt from a cluster's evidence.
pub fn label_prompt(evidence: &LabelEvidence) -> AppResult<String> {
    let template = PromptTemplate::from_compressed(LABEL_CLUSTER_PROMPT)?;
    let names = bullet_list(&evidence.names);
    let subjects = bullet_list(&evidence.subjects);
    let descriptions = bullet_list(&evidence.descriptions);
    let tags = if evidence.common_tags.is_empty() {
        "(none)".to_string()
    } else {
        evidence.common_tags.join(", ")
    };
    let vars = HashMap::from([
        ("names", names.as_str()),
        ("subjects", subjects.as_str()),
        ("descriptions", descriptions.as_str()),
        (
            "category",
            evidence.dominant_category.as_deref().unwrap_or("(unknown)"),
        ),
        ("tags", tags.as_str()),
    ]);
    Ok(template.render(&vars))
}
