//! Template definitions: the YAML authoring surface and its compiled form.

use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::pattern::{CompileLimits, Replacement};
use crate::error::TemplateError;
use crate::extraction::rules::{Rule, RuleSet};
use crate::models::config::ExtractionConfig;
use crate::models::result::TemplateInfo;

/// Business direction of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// Credit note issued to us.
    Credit,
    /// Debit note (claim) raised against us.
    Debit,
}

impl Kind {
    /// Parse a kind, ignoring case.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "credit" => Some(Kind::Credit),
            "debit" => Some(Kind::Debit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Credit => "credit",
            Kind::Debit => "debit",
        }
    }
}

/// Business meaning of a debit document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Bonus,
    Delivery,
    Finance,
    Invoice,
    PenaltyGeneral,
    PenaltyDelay,
    PenaltyQuote,
    Price,
    Promo,
    Quality,
    Rebuild,
    Return,
}

impl Category {
    /// Parse a category tag, ignoring case. `penalty` is read as
    /// [`Category::PenaltyGeneral`].
    pub fn from_str(s: &str) -> Option<Self> {
        let category = match s.trim().to_lowercase().as_str() {
            "bonus" => Category::Bonus,
            "delivery" => Category::Delivery,
            "finance" => Category::Finance,
            "invoice" => Category::Invoice,
            "penalty" | "penalty_general" => Category::PenaltyGeneral,
            "penalty_delay" => Category::PenaltyDelay,
            "penalty_quote" => Category::PenaltyQuote,
            "price" => Category::Price,
            "promo" => Category::Promo,
            "quality" => Category::Quality,
            "rebuild" => Category::Rebuild,
            "return" => Category::Return,
            _ => return None,
        };
        Some(category)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Bonus => "bonus",
            Category::Delivery => "delivery",
            Category::Finance => "finance",
            Category::Invoice => "invoice",
            Category::PenaltyGeneral => "penalty_general",
            Category::PenaltyDelay => "penalty_delay",
            Category::PenaltyQuote => "penalty_quote",
            Category::Price => "price",
            Category::Promo => "promo",
            Category::Quality => "quality",
            Category::Rebuild => "rebuild",
            Category::Return => "return",
        }
    }
}

/// A YAML value written either as a scalar or as a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// The `options` section of a template file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateOptions {
    /// Remove every run of two or more whitespace characters.
    pub remove_whitespace: bool,
    /// Lower-case the text before the replace rules run.
    pub lowercase: bool,
    /// Ordered `[pattern, replacement]` pairs.
    pub replace: Vec<Vec<String>>,
    /// Date formats the caller should use for date fields.
    pub date_formats: Vec<String>,
    /// Extra fields captured as repeating rows.
    pub repeating_fields: Vec<String>,
}

/// A template as written by an operator, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateDefinition {
    pub issuer: Option<String>,
    pub name: Option<String>,
    pub template_id: Option<String>,
    pub kind: Option<String>,
    #[serde(default)]
    pub category: Option<OneOrMany>,
    #[serde(default)]
    pub inclusive_keywords: Option<OneOrMany>,
    #[serde(default)]
    pub exclusive_keywords: Option<OneOrMany>,
    /// Field name to pattern(s); declaration order is significant.
    #[serde(default)]
    pub fields: serde_yaml::Mapping,
    #[serde(default)]
    pub optional_fields: Option<OneOrMany>,
    #[serde(default)]
    pub options: TemplateOptions,
}

/// A compiled keyword constraint.
#[derive(Debug, Clone)]
pub struct Keyword {
    pattern: String,
    regex: Regex,
}

impl Keyword {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_present(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// A compiled field with its ordered candidate patterns.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub(crate) name: String,
    pub(crate) patterns: Vec<Regex>,
    pub(crate) optional: bool,
    pub(crate) repeating: bool,
    pub(crate) unique: bool,
    pub(crate) multi_value: bool,
}

impl FieldSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn patterns(&self) -> &[Regex] {
        &self.patterns
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Whether every match of the winning pattern is captured as a row.
    pub fn is_repeating(&self) -> bool {
        self.repeating
    }

    /// Whether the winning pattern must yield a single distinct value.
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Whether every distinct value of the winning pattern is kept.
    pub fn is_multi_value(&self) -> bool {
        self.multi_value
    }
}

/// An immutable, fully validated template.
#[derive(Debug, Clone)]
pub struct Template {
    id: String,
    issuer: String,
    name: String,
    kind: Kind,
    categories: Vec<Category>,
    inclusive: Vec<Keyword>,
    exclusive: Vec<Keyword>,
    fields: Vec<FieldSpec>,
    rules: RuleSet,
    date_formats: Vec<String>,
}

impl Template {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn inclusive_keywords(&self) -> &[Keyword] {
        &self.inclusive
    }

    pub fn exclusive_keywords(&self) -> &[Keyword] {
        &self.exclusive
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn date_formats(&self) -> &[String] {
        &self.date_formats
    }

    /// Check keyword constraints on raw text: every inclusive keyword
    /// present, no exclusive keyword present.
    pub fn matches_keywords(&self, text: &str) -> bool {
        self.inclusive.iter().all(|k| k.is_present(text))
            && !self.exclusive.iter().any(|k| k.is_present(text))
    }

    /// Inclusive keyword patterns as a set, for specificity comparisons.
    pub(crate) fn inclusive_set(&self) -> BTreeSet<&str> {
        self.inclusive.iter().map(|k| k.pattern.as_str()).collect()
    }

    /// Summary carried on extraction results.
    pub fn info(&self) -> TemplateInfo {
        TemplateInfo {
            issuer: self.issuer.clone(),
            name: self.name.clone(),
            kind: self.kind,
            categories: self.categories.clone(),
            date_formats: self.date_formats.clone(),
        }
    }
}

impl TemplateDefinition {
    /// Template id as written, upper-cased, if present.
    pub fn normalized_id(&self) -> Option<String> {
        self.template_id
            .as_deref()
            .map(|id| id.trim().to_uppercase())
            .filter(|id| !id.is_empty())
    }

    /// Validate the definition and compile every pattern.
    ///
    /// `fallback_name` is used when the definition has no `name`, normally
    /// the stem of the file it was read from. Without either, the name is
    /// the template id.
    pub fn compile(
        self,
        fallback_name: &str,
        limits: &CompileLimits,
        extraction: &ExtractionConfig,
    ) -> Result<Template, TemplateError> {
        let id = self
            .normalized_id()
            .ok_or(TemplateError::MissingHeader("template_id"))?;
        let issuer = non_empty(self.issuer.as_deref())
            .ok_or(TemplateError::MissingHeader("issuer"))?
            .to_uppercase();
        let name = non_empty(self.name.as_deref())
            .or_else(|| non_empty(Some(fallback_name)))
            .unwrap_or(id.as_str())
            .to_string();
        let kind_raw = non_empty(self.kind.as_deref()).ok_or(TemplateError::MissingHeader("kind"))?;
        let kind =
            Kind::from_str(kind_raw).ok_or_else(|| TemplateError::UnknownKind(kind_raw.to_string()))?;

        let tags = self.category.map(OneOrMany::into_vec).unwrap_or_default();
        let mut categories = Vec::new();
        if kind == Kind::Credit {
            if !tags.is_empty() {
                debug!("Template {}: categories ignored for credit notes", id);
            }
        } else {
            for tag in tags {
                let category = Category::from_str(&tag)
                    .ok_or_else(|| TemplateError::UnknownCategory(tag.clone()))?;
                if !categories.contains(&category) {
                    categories.push(category);
                }
            }
            if categories.is_empty() {
                return Err(TemplateError::MissingCategory);
            }
        }

        let inclusive = compile_keywords(
            self.inclusive_keywords.map(OneOrMany::into_vec).unwrap_or_default(),
            "inclusive keyword",
            limits,
        )?;
        if inclusive.is_empty() {
            return Err(TemplateError::NoInclusiveKeywords);
        }
        let exclusive = compile_keywords(
            self.exclusive_keywords.map(OneOrMany::into_vec).unwrap_or_default(),
            "exclusive keyword",
            limits,
        )?;

        let mut fields = Vec::with_capacity(self.fields.len());
        for (key, value) in self.fields {
            let name: String = serde_yaml::from_value(key)?;
            if name == "optional_fields" {
                return Err(TemplateError::MisplacedOptionalFields);
            }
            let sources = serde_yaml::from_value::<OneOrMany>(value)?.into_vec();
            if sources.is_empty() {
                return Err(TemplateError::EmptyField(name));
            }
            let patterns = sources
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    limits.compile(p).map_err(|source| TemplateError::InvalidPattern {
                        location: format!("field '{}' pattern #{}", name, i),
                        source,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let repeating = extraction.repeating_fields.contains(&name)
                || self.options.repeating_fields.contains(&name);
            let unique = !repeating && extraction.unique_fields.contains(&name);
            let multi_value =
                !repeating && !unique && extraction.multi_value_fields.contains(&name);

            fields.push(FieldSpec {
                name,
                patterns,
                optional: false,
                repeating,
                unique,
                multi_value,
            });
        }

        for optional in self.optional_fields.map(OneOrMany::into_vec).unwrap_or_default() {
            match fields.iter_mut().find(|f| f.name == optional) {
                Some(field) => field.optional = true,
                None => return Err(TemplateError::UnknownOptionalField(optional)),
            }
        }

        let mut rules = Vec::with_capacity(self.options.replace.len());
        for (index, pair) in self.options.replace.iter().enumerate() {
            let [pattern, replacement] = pair.as_slice() else {
                return Err(TemplateError::MalformedRule {
                    index,
                    len: pair.len(),
                });
            };
            rules.push(compile_rule(index, pattern, replacement, limits)?);
        }

        Ok(Template {
            id,
            issuer,
            name,
            kind,
            categories,
            inclusive,
            exclusive,
            fields,
            rules: RuleSet::new(rules)
                .with_remove_whitespace(self.options.remove_whitespace)
                .with_lowercase(self.options.lowercase),
            date_formats: self.options.date_formats,
        })
    }
}

/// Compile one replace rule, checking its group references.
pub(crate) fn compile_rule(
    index: usize,
    pattern: &str,
    replacement: &str,
    limits: &CompileLimits,
) -> Result<Rule, TemplateError> {
    let regex = limits
        .compile(pattern)
        .map_err(|source| TemplateError::InvalidPattern {
            location: format!("replace rule #{}", index),
            source,
        })?;
    let replacement = Replacement::parse(replacement)
        .map_err(|reason| TemplateError::InvalidReplacement { index, reason })?;
    if let Some(reference) = replacement.dangling_reference(&regex) {
        return Err(TemplateError::DanglingGroupReference {
            index,
            reference: reference.to_string(),
        });
    }
    Ok(Rule::new(regex, replacement))
}

fn compile_keywords(
    patterns: Vec<String>,
    label: &str,
    limits: &CompileLimits,
) -> Result<Vec<Keyword>, TemplateError> {
    patterns
        .into_iter()
        .enumerate()
        .map(|(i, pattern)| {
            let regex = limits
                .compile(&pattern)
                .map_err(|source| TemplateError::InvalidPattern {
                    location: format!("{} #{}", label, i),
                    source,
                })?;
            Ok(Keyword { pattern, regex })
        })
        .collect()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn compile(yaml: &str) -> Result<Template, TemplateError> {
        let definition: TemplateDefinition = serde_yaml::from_str(yaml).unwrap();
        definition.compile("from_file", &CompileLimits::default(), &ExtractionConfig::default())
    }

    const PENALTY: &str = r#"
issuer: obi_de
template_id: 161001de001
kind: Debit
category: [Penalty, penalty_delay]
inclusive_keywords: [OBI, 'Vertrags\s?strafe']
exclusive_keywords: Storno
fields:
  document_number: 'Beleg-Nr\.\s+(\d+)'
  amount: ['Gesamt\s+([\d.,]+)', 'Summe\s+([\d.,]+)']
  items: '(\d+,\d{2})\s+(\d{5,7})'
optional_fields: items
options:
  date_formats: ['%d.%m.%Y']
  replace:
    - ['(\d)\.(\d{3}),', '\1\2,']
"#;

    #[test]
    fn test_compile_normalizes_header() {
        let template = compile(PENALTY).unwrap();

        assert_eq!(template.id(), "161001DE001");
        assert_eq!(template.issuer(), "OBI_DE");
        assert_eq!(template.name(), "from_file");
        assert_eq!(template.kind(), Kind::Debit);
        assert_eq!(
            template.categories(),
            &[Category::PenaltyGeneral, Category::PenaltyDelay]
        );
        assert_eq!(template.date_formats(), &["%d.%m.%Y".to_string()]);
        assert_eq!(template.rules().len(), 1);
    }

    #[test]
    fn test_compile_preserves_field_order_and_flags() {
        let template = compile(PENALTY).unwrap();
        let names: Vec<&str> = template.fields().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["document_number", "amount", "items"]);

        let amount = template.field("amount").unwrap();
        assert_eq!(amount.patterns().len(), 2);
        assert!(amount.is_unique());
        assert!(!amount.is_optional());

        let items = template.field("items").unwrap();
        assert!(items.is_repeating());
        assert!(items.is_optional());
        assert!(!items.is_unique());
    }

    #[test]
    fn test_unique_wins_over_multi_value() {
        let yaml = PENALTY.replace(
            "  items:",
            "  return_number: 'RT (\\d+)'\n  delivery_number: 'LS (\\d+)'\n  items:",
        );
        let template = compile(&yaml).unwrap();

        let returns = template.field("return_number").unwrap();
        assert!(returns.is_unique());
        assert!(!returns.is_multi_value());
        assert!(template.field("delivery_number").unwrap().is_multi_value());
        assert!(!template.field("amount").unwrap().is_multi_value());
    }

    #[test]
    fn test_keyword_matching_on_raw_text() {
        let template = compile(PENALTY).unwrap();
        assert!(template.matches_keywords("OBI GmbH\nVertragsstrafe"));
        assert!(!template.matches_keywords("OBI GmbH\nRechnung"));
        assert!(!template.matches_keywords("OBI GmbH\nVertrags strafe\nStorno"));
    }

    #[test]
    fn test_credit_drops_categories() {
        let yaml = PENALTY.replace("kind: Debit", "kind: credit");
        let template = compile(&yaml).unwrap();
        assert_eq!(template.kind(), Kind::Credit);
        assert!(template.categories().is_empty());
    }

    #[test]
    fn test_credit_skips_category_validation() {
        let yaml = PENALTY
            .replace("kind: Debit", "kind: credit")
            .replace("penalty_delay]", "no_such_tag]");
        let template = compile(&yaml).unwrap();
        assert!(template.categories().is_empty());
    }

    #[test]
    fn test_missing_header_fields() {
        let yaml = PENALTY.replace("issuer: obi_de\n", "");
        assert!(matches!(compile(&yaml), Err(TemplateError::MissingHeader("issuer"))));

        let yaml = PENALTY.replace("template_id: 161001de001\n", "");
        assert!(matches!(compile(&yaml), Err(TemplateError::MissingHeader("template_id"))));
    }

    #[test]
    fn test_debit_requires_category() {
        let yaml = PENALTY.replace("category: [Penalty, penalty_delay]\n", "");
        assert!(matches!(compile(&yaml), Err(TemplateError::MissingCategory)));
    }

    #[test]
    fn test_unknown_kind_and_category() {
        let yaml = PENALTY.replace("kind: Debit", "kind: refund");
        assert!(matches!(compile(&yaml), Err(TemplateError::UnknownKind(k)) if k == "refund"));

        let yaml = PENALTY.replace("penalty_delay]", "penalty_fast]");
        assert!(matches!(compile(&yaml), Err(TemplateError::UnknownCategory(c)) if c == "penalty_fast"));
    }

    #[test]
    fn test_unknown_optional_field() {
        let yaml = PENALTY.replace("optional_fields: items", "optional_fields: [items, zip]");
        assert!(matches!(compile(&yaml), Err(TemplateError::UnknownOptionalField(f)) if f == "zip"));
    }

    #[test]
    fn test_misplaced_optional_fields() {
        let yaml = PENALTY.replace(
            "fields:\n",
            "fields:\n  optional_fields: 'x'\n",
        );
        assert!(matches!(compile(&yaml), Err(TemplateError::MisplacedOptionalFields)));
    }

    #[test]
    fn test_invalid_patterns_are_located() {
        let yaml = PENALTY.replace(r"'Beleg-Nr\.\s+(\d+)'", r"'Beleg-Nr\.\s+(\d+'");
        match compile(&yaml) {
            Err(TemplateError::InvalidPattern { location, .. }) => {
                assert_eq!(location, "field 'document_number' pattern #0");
            }
            other => panic!("unexpected: {:?}", other),
        }

        let yaml = PENALTY.replace("exclusive_keywords: Storno", "exclusive_keywords: '(?<=x)'");
        assert!(matches!(compile(&yaml), Err(TemplateError::InvalidPattern { .. })));
    }

    #[test]
    fn test_malformed_and_dangling_rules() {
        let yaml = PENALTY.replace(r"['(\d)\.(\d{3}),', '\1\2,']", r"['(\d)\.(\d{3}),']");
        assert!(matches!(
            compile(&yaml),
            Err(TemplateError::MalformedRule { index: 0, len: 1 })
        ));

        let yaml = PENALTY.replace(r"'\1\2,'", r"'\1\3,'");
        match compile(&yaml) {
            Err(TemplateError::DanglingGroupReference { index, reference }) => {
                assert_eq!(index, 0);
                assert_eq!(reference, "3");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_no_inclusive_keywords() {
        let yaml = PENALTY.replace("inclusive_keywords: [OBI, 'Vertrags\\s?strafe']\n", "");
        assert!(matches!(compile(&yaml), Err(TemplateError::NoInclusiveKeywords)));
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!(Category::from_str("PENALTY"), Some(Category::PenaltyGeneral));
        assert_eq!(Category::from_str(" return "), Some(Category::Return));
        assert_eq!(Category::from_str("refund"), None);
        assert_eq!(Kind::from_str("DEBIT"), Some(Kind::Debit));
        assert_eq!(Category::PenaltyQuote.as_str(), "penalty_quote");
    }
}
