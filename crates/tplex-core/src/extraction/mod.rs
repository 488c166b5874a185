//! Template resolution, text normalization and field extraction.

pub mod engine;
pub mod fields;
pub mod resolver;
pub mod rules;

pub use engine::{apply_template, Engine};
pub use fields::{extract, extract_within, Extracted};
pub use resolver::{ResolutionOutcome, Resolver};
pub use rules::{apply, Normalized, Rule, RuleSet};
