//! Extraction result models.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::budget::Degradation;
use crate::template::definition::{Category, Kind};

/// Overall outcome of processing one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// One template matched and every required field was found.
    Matched,
    /// No template matched.
    Unmatched,
    /// Several templates matched and none could be preferred.
    Ambiguous,
    /// A template matched but at least one required field is missing.
    RequiredFieldMissing,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStatus::Matched => "matched",
            ExtractionStatus::Unmatched => "unmatched",
            ExtractionStatus::Ambiguous => "ambiguous",
            ExtractionStatus::RequiredFieldMissing => "required_field_missing",
        }
    }
}

impl std::fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of the matched template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateInfo {
    /// Issuer tag.
    pub issuer: String,

    /// Human-readable template name.
    pub name: String,

    /// Credit or debit.
    pub kind: Kind,

    /// Business categories (empty for credit notes).
    pub categories: Vec<Category>,

    /// Date formats to interpret date fields with.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub date_formats: Vec<String>,
}

/// A raw captured value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Single capture group, or the whole match when the pattern has none.
    Text(String),
    /// Distinct single-group values of a multi-value field, in text order.
    List(Vec<String>),
    /// One tuple of groups per match.
    Rows(Vec<Vec<String>>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::List(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_rows(&self) -> Option<&[Vec<String>]> {
        match self {
            FieldValue::Rows(rows) => Some(rows),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::List(values) => f.write_str(&values.join("; ")),
            FieldValue::Rows(rows) => {
                let rendered: Vec<String> = rows.iter().map(|row| row.join(" | ")).collect();
                f.write_str(&rendered.join("; "))
            }
        }
    }
}

/// Outcome for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FieldResult {
    /// `pattern` is the index of the candidate pattern that matched.
    Found { value: FieldValue, pattern: usize },
    NotFound,
    /// The winning pattern matched several distinct values for a field that
    /// must have exactly one.
    Conflicting { values: Vec<String> },
}

impl FieldResult {
    pub fn is_found(&self) -> bool {
        matches!(self, FieldResult::Found { .. })
    }

    pub fn value(&self) -> Option<&FieldValue> {
        match self {
            FieldResult::Found { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Complete result for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Overall status.
    pub status: ExtractionStatus,

    /// Id of the matched template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,

    /// Summary of the matched template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateInfo>,

    /// Candidate template ids, in catalog order, when ambiguous.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,

    /// Normalized text, or the raw text when no template matched.
    pub text: String,

    /// Per-field outcome, keyed by field name, in declaration order.
    #[serde(default)]
    pub fields: IndexMap<String, FieldResult>,

    /// Required fields that were not found, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<String>,

    /// Whether a budget was exceeded while processing.
    #[serde(default)]
    pub degraded: bool,

    /// Budget failures, in the order they happened.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degradations: Vec<Degradation>,
}

impl ExtractionResult {
    /// Result for text no template accepted.
    pub fn unmatched(text: &str) -> Self {
        Self {
            status: ExtractionStatus::Unmatched,
            template_id: None,
            template: None,
            candidates: Vec::new(),
            text: text.to_string(),
            fields: IndexMap::new(),
            missing_fields: Vec::new(),
            degraded: false,
            degradations: Vec::new(),
        }
    }

    /// Result for text several templates accepted.
    pub fn ambiguous(text: &str, candidates: Vec<String>) -> Self {
        Self {
            status: ExtractionStatus::Ambiguous,
            candidates,
            ..Self::unmatched(text)
        }
    }

    pub fn template_id(&self) -> Option<&str> {
        self.template_id.as_deref()
    }

    /// A template matched but some required data is missing.
    pub fn is_partial(&self) -> bool {
        self.status == ExtractionStatus::RequiredFieldMissing
    }

    pub fn field(&self, name: &str) -> Option<&FieldResult> {
        self.fields.get(name)
    }

    /// Found single-value text of a field.
    pub fn text_value(&self, name: &str) -> Option<&str> {
        self.field(name)?.value()?.as_text()
    }

    /// Record budget failures and raise the `degraded` flag.
    pub(crate) fn degrade(&mut self, degradations: impl IntoIterator<Item = Degradation>) {
        self.degradations.extend(degradations);
        self.degraded = !self.degradations.is_empty();
    }
}
