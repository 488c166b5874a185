//! Template definitions and the catalog that holds them.

pub mod catalog;
pub mod definition;
pub mod pattern;

pub use catalog::{Catalog, CatalogHandle, CatalogLoader, LoadReport};
pub use definition::{Category, FieldSpec, Keyword, Kind, Template, TemplateDefinition};
pub use pattern::{CompileLimits, Replacement};
