//! Data models for configuration and extraction results.

pub mod config;
pub mod result;

pub use config::{CatalogConfig, EngineConfig, ExtractionConfig, TplexConfig};
pub use result::{ExtractionResult, ExtractionStatus, FieldResult, FieldValue, TemplateInfo};
