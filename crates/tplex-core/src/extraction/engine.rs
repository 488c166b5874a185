//! The extraction pipeline: resolve, normalize, extract.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::fields;
use super::resolver::{ResolutionOutcome, Resolver};
use crate::budget::{Degradation, MatchBudget, Stage};
use crate::error::Result;
use crate::models::config::{EngineConfig, TplexConfig};
use crate::models::result::{ExtractionResult, ExtractionStatus};
use crate::template::catalog::{Catalog, CatalogHandle, LoadReport};
use crate::template::definition::Template;

/// Runs documents through the current catalog.
///
/// Cloning is cheap; clones share the catalog handle, so a
/// [`Engine::reload`] on one is seen by all.
#[derive(Debug, Clone)]
pub struct Engine {
    catalog: CatalogHandle,
    config: EngineConfig,
    resolver: Resolver,
}

impl Engine {
    pub fn new(catalog: impl Into<CatalogHandle>, config: EngineConfig) -> Self {
        let resolver = Resolver::new(config.prefer_specific);
        Self {
            catalog: catalog.into(),
            config,
            resolver,
        }
    }

    /// Load the configured template directory and build an engine on it.
    pub fn from_config(config: &TplexConfig) -> Result<(Self, LoadReport)> {
        let (catalog, report) = Catalog::load_dir(&config.catalog.template_dir, config)?;
        Ok((Self::new(catalog, config.engine.clone()), report))
    }

    /// The catalog documents are currently resolved against.
    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog.snapshot()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Swap in a new catalog. Documents already in flight finish on the
    /// catalog they started with.
    pub fn reload(&self, catalog: Catalog) -> Arc<Catalog> {
        info!("Reloading catalog with {} templates", catalog.len());
        self.catalog.replace(catalog)
    }

    /// Process one document against every template.
    pub fn process(&self, text: &str) -> ExtractionResult {
        self.run(text, None)
    }

    /// Process one document against the templates of `issuer` only.
    pub fn process_for_issuer(&self, text: &str, issuer: &str) -> ExtractionResult {
        self.run(text, Some(issuer))
    }

    /// Skip resolution and apply the template with `template_id`.
    /// `None` if the catalog has no such template.
    pub fn process_with_template(&self, text: &str, template_id: &str) -> Option<ExtractionResult> {
        let catalog = self.catalog.snapshot();
        let template = catalog.get(template_id)?;
        let budget = MatchBudget::from_config(&self.config);
        Some(apply_template(template, text, &budget))
    }

    fn run(&self, text: &str, issuer: Option<&str>) -> ExtractionResult {
        let catalog = self.catalog.snapshot();
        let budget = MatchBudget::from_config(&self.config);

        if budget.is_expired() {
            let mut result = ExtractionResult::unmatched(text);
            result.degrade([Degradation::DeadlineReached {
                stage: Stage::Resolve,
            }]);
            return result;
        }

        let outcome = match issuer {
            Some(issuer) => self.resolver.resolve_for_issuer(&catalog, text, issuer),
            None => self.resolver.resolve(&catalog, text),
        };

        match outcome {
            ResolutionOutcome::Matched(template) => apply_template(template, text, &budget),
            ResolutionOutcome::Unmatched => {
                debug!("No template matched");
                ExtractionResult::unmatched(text)
            }
            ResolutionOutcome::Ambiguous(candidates) => {
                warn!("Ambiguous match between {}", candidates.join(", "));
                ExtractionResult::ambiguous(text, candidates)
            }
        }
    }
}

/// Normalize `text` with the template's rules and extract its fields.
pub fn apply_template(template: &Template, text: &str, budget: &MatchBudget) -> ExtractionResult {
    debug!("Applying template {} ({})", template.id(), template.name());

    let normalized = template.rules().apply_within(text, budget);
    let extracted = fields::extract_within(&normalized.text, template, budget);

    let status = if extracted.is_complete() {
        ExtractionStatus::Matched
    } else {
        info!(
            "Template {}: required field(s) missing: {}",
            template.id(),
            extracted.missing.join(", ")
        );
        ExtractionStatus::RequiredFieldMissing
    };

    let mut result = ExtractionResult {
        status,
        template_id: Some(template.id().to_string()),
        template: Some(template.info()),
        candidates: Vec::new(),
        text: normalized.text,
        fields: extracted.fields,
        missing_fields: extracted.missing,
        degraded: false,
        degradations: Vec::new(),
    };
    result.degrade(normalized.degradations.into_iter().chain(extracted.degradations));
    result
}
