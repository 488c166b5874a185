//! Core library for template-based field extraction from OCR text.
//!
//! This crate provides:
//! - A template catalog loaded from YAML, with keyword indexing
//! - Resolution of a text to at most one template
//! - Ordered, per-template OCR correction rules
//! - Field extraction with ordered candidate patterns
//! - Helpers to read captured amounts and dates

pub mod budget;
pub mod error;
pub mod extraction;
pub mod models;
pub mod template;
pub mod values;

pub use budget::{Degradation, MatchBudget, Stage};
pub use error::{CatalogError, RejectedTemplate, Result, TemplateError, TplexError};
pub use extraction::{Engine, ResolutionOutcome, Resolver, RuleSet};
pub use models::config::TplexConfig;
pub use models::result::{ExtractionResult, ExtractionStatus, FieldResult, FieldValue, TemplateInfo};
pub use template::{Catalog, CatalogHandle, CatalogLoader, LoadReport, Template};
