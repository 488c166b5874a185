//! Configuration structures for the extraction pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the tplex pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TplexConfig {
    /// Matching engine configuration.
    pub engine: EngineConfig,

    /// Field extraction configuration.
    pub extraction: ExtractionConfig,

    /// Template catalog configuration.
    pub catalog: CatalogConfig,
}

/// Matching engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Time budget for a single rule application or field pattern search,
    /// in milliseconds (0 = unlimited).
    pub match_budget_ms: u64,

    /// Time budget for a whole document (resolve + apply + extract),
    /// in milliseconds (0 = unlimited).
    pub document_timeout_ms: u64,

    /// Compiled program size limit per pattern, in bytes.
    pub regex_size_limit: usize,

    /// Lazy DFA cache size limit per pattern, in bytes.
    pub dfa_size_limit: usize,

    /// Resolve multiple candidates to the one whose inclusive keywords are a
    /// strict superset of every other candidate's keywords.
    pub prefer_specific: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            match_budget_ms: 250,
            document_timeout_ms: 5_000,
            regex_size_limit: 10 * (1 << 20),
            dfa_size_limit: 2 * (1 << 20),
            prefer_specific: false,
        }
    }
}

impl EngineConfig {
    /// Per-application budget, if any.
    pub fn match_budget(&self) -> Option<Duration> {
        (self.match_budget_ms > 0).then(|| Duration::from_millis(self.match_budget_ms))
    }

    /// Per-document budget, if any.
    pub fn document_timeout(&self) -> Option<Duration> {
        (self.document_timeout_ms > 0).then(|| Duration::from_millis(self.document_timeout_ms))
    }
}

/// Field extraction configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Fields whose winning pattern must yield a single distinct value.
    pub unique_fields: Vec<String>,

    /// Fields captured as repeating multi-group rows in every template.
    pub repeating_fields: Vec<String>,

    /// Fields that keep every distinct value of their winning pattern.
    /// Unique and repeating fields take precedence.
    pub multi_value_fields: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            unique_fields: [
                "amount",
                "document_number",
                "archive_number",
                "return_number",
                "agreement_number",
                "supplier",
                "subtotals",
                "identifier",
                "branch",
                "zip",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            repeating_fields: vec!["items".to_string()],
            multi_value_fields: [
                "delivery_number",
                "invoice_number",
                "purchase_order_number",
                "return_number",
                "agreement_number",
                "tax",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Template catalog configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Directory containing template files.
    pub template_dir: PathBuf,

    /// Fail the whole load if any template is rejected.
    pub strict: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from("templates"),
            strict: false,
        }
    }
}

impl TplexConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        std::fs::write(path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: TplexConfig =
            serde_json::from_str(r#"{"engine": {"prefer_specific": true}}"#).unwrap();

        assert!(config.engine.prefer_specific);
        assert_eq!(config.engine.match_budget_ms, 250);
        assert_eq!(config.extraction.repeating_fields, vec!["items".to_string()]);
        assert!(config
            .extraction
            .multi_value_fields
            .contains(&"delivery_number".to_string()));
        assert_eq!(config.catalog.template_dir, PathBuf::from("templates"));
    }

    #[test]
    fn test_zero_budget_disables_limit() {
        let engine = EngineConfig {
            match_budget_ms: 0,
            document_timeout_ms: 0,
            ..EngineConfig::default()
        };
        assert_eq!(engine.match_budget(), None);
        assert_eq!(engine.document_timeout(), None);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = TplexConfig::default();
        config.catalog.strict = true;
        config.save(&path).unwrap();

        assert_eq!(TplexConfig::from_file(&path).unwrap(), config);
    }
}
