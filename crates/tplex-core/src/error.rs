//! Error types for the tplex-core library.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the tplex library.
#[derive(Error, Debug)]
pub enum TplexError {
    /// Template catalog loading error.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// A single template definition is invalid.
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors raised while building a catalog from template sources.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// A template source could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Strict loading was requested and some templates were rejected.
    #[error("{} template(s) rejected", .0.len())]
    Rejected(Vec<RejectedTemplate>),
}

/// Configuration errors in a single template definition.
///
/// These are reported once, at catalog load time. The offending template is
/// excluded and every other template still loads.
#[derive(Error, Debug)]
pub enum TemplateError {
    /// The YAML document does not have the expected shape.
    #[error("malformed definition: {0}")]
    Malformed(#[from] serde_yaml::Error),

    /// A mandatory header field is empty.
    #[error("header field '{0}' is missing or empty")]
    MissingHeader(&'static str),

    /// `kind` is neither `credit` nor `debit`.
    #[error("unknown kind '{0}' (expected 'credit' or 'debit')")]
    UnknownKind(String),

    /// A category tag is not one of the known categories.
    #[error("unknown category '{0}'")]
    UnknownCategory(String),

    /// Debit templates must be categorized.
    #[error("debit template has no category")]
    MissingCategory,

    /// No inclusive keyword was declared.
    #[error("template declares no inclusive keywords")]
    NoInclusiveKeywords,

    /// A field declares an empty candidate list.
    #[error("field '{0}' declares no patterns")]
    EmptyField(String),

    /// A regex failed to compile.
    #[error("invalid pattern in {location}: {source}")]
    InvalidPattern {
        location: String,
        #[source]
        source: regex::Error,
    },

    /// A replace rule is not a (pattern, replacement) pair.
    #[error("replace rule #{index} must have exactly 2 items, found {len}")]
    MalformedRule { index: usize, len: usize },

    /// A replacement refers to a group its pattern does not define.
    #[error("replace rule #{index} references unknown group '{reference}'")]
    DanglingGroupReference { index: usize, reference: String },

    /// A replacement template could not be parsed.
    #[error("replace rule #{index}: {reason}")]
    InvalidReplacement { index: usize, reason: String },

    /// `optional_fields` was written inside the `fields` mapping.
    #[error("'optional_fields' is misplaced inside 'fields'")]
    MisplacedOptionalFields,

    /// An optional field is not declared in `fields`.
    #[error("optional field '{0}' is not a declared field")]
    UnknownOptionalField(String),

    /// The template's keywords cannot be compiled into one set.
    #[error("keywords cannot be indexed together: {0}")]
    KeywordIndex(#[source] regex::Error),

    /// Another template already uses this id.
    #[error("template id '{0}' is used by more than one template")]
    DuplicateTemplateId(String),
}

/// A template excluded from the catalog, with the reason.
#[derive(Debug, Clone)]
pub struct RejectedTemplate {
    /// Where the definition came from (file path or bundle label).
    pub source: String,
    /// Template id, when it could be read.
    pub template_id: Option<String>,
    /// Rendered error message.
    pub reason: String,
}

impl std::fmt::Display for RejectedTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.template_id {
            Some(id) => write!(f, "{} [{}]: {}", self.source, id, self.reason),
            None => write!(f, "{}: {}", self.source, self.reason),
        }
    }
}

/// Result type for the tplex library.
pub type Result<T> = std::result::Result<T, TplexError>;
