//! Field extraction over normalized text.
//!
//! Every field carries an ordered list of candidate patterns. The first
//! pattern that matches anywhere in the text wins; later patterns are only
//! tried when earlier ones find nothing.

use std::time::Instant;

use indexmap::IndexMap;
use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::budget::{elapsed_ms, Degradation, MatchBudget, Stage};
use crate::models::result::{FieldResult, FieldValue};
use crate::template::definition::{FieldSpec, Template};

/// Field outcomes for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    /// Outcome per field name, in declaration order.
    pub fields: IndexMap<String, FieldResult>,
    /// Required fields without a found value, in declaration order.
    pub missing: Vec<String>,
    /// Budget failures met while extracting.
    pub degradations: Vec<Degradation>,
}

impl Extracted {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Extract every field of `template` from `text` without time limits.
pub fn extract(text: &str, template: &Template) -> IndexMap<String, FieldResult> {
    extract_within(text, template, &MatchBudget::unlimited()).fields
}

/// Extract every field of `template` from `text`.
///
/// A pattern whose search runs over the per-match budget counts as not
/// matching. Once the document deadline has passed, the remaining fields are
/// reported as [`FieldResult::NotFound`].
pub fn extract_within(text: &str, template: &Template, budget: &MatchBudget) -> Extracted {
    let mut extracted = Extracted::default();
    let mut deadline_hit = false;

    for field in template.fields() {
        let result = if deadline_hit || budget.is_expired() {
            if !deadline_hit {
                warn!("Document deadline reached, skipping field '{}' and the rest", field.name);
                extracted.degradations.push(Degradation::DeadlineReached {
                    stage: Stage::Extract,
                });
                deadline_hit = true;
            }
            FieldResult::NotFound
        } else {
            extract_field(text, field, budget, &mut extracted.degradations)
        };

        if !field.optional && !result.is_found() {
            extracted.missing.push(field.name.clone());
        }
        extracted.fields.insert(field.name.clone(), result);
    }

    extracted
}

fn extract_field(
    text: &str,
    field: &FieldSpec,
    budget: &MatchBudget,
    degradations: &mut Vec<Degradation>,
) -> FieldResult {
    for (index, pattern) in field.patterns.iter().enumerate() {
        let started = Instant::now();
        let outcome = if field.repeating {
            match_rows(text, pattern)
        } else if field.unique {
            match_distinct(text, pattern)
        } else if field.multi_value {
            match_multi(text, pattern)
        } else {
            match_first(text, pattern)
        };

        if budget.overran(started) {
            let elapsed_ms = elapsed_ms(started);
            warn!(
                "Field '{}' pattern #{} exceeded its match budget ({}ms), ignored",
                field.name, index, elapsed_ms
            );
            degradations.push(Degradation::FieldBudgetExceeded {
                field: field.name.clone(),
                pattern: index,
                elapsed_ms,
            });
            continue;
        }

        if let Some(result) = outcome {
            debug!("Field '{}' matched by pattern #{}", field.name, index);
            return match result {
                Matched::One(value) => FieldResult::Found {
                    value,
                    pattern: index,
                },
                Matched::Conflicting(values) => {
                    debug!("Field '{}' has {} distinct values", field.name, values.len());
                    FieldResult::Conflicting { values }
                }
            };
        }
    }

    FieldResult::NotFound
}

enum Matched {
    One(FieldValue),
    Conflicting(Vec<String>),
}

fn match_first(text: &str, pattern: &Regex) -> Option<Matched> {
    pattern
        .captures(text)
        .map(|caps| Matched::One(single_value(pattern, &caps)))
}

/// Every match must agree on one value.
fn match_distinct(text: &str, pattern: &Regex) -> Option<Matched> {
    let mut values: Vec<FieldValue> = Vec::new();
    for caps in pattern.captures_iter(text) {
        let value = single_value(pattern, &caps);
        if !values.contains(&value) {
            values.push(value);
        }
    }

    match values.len() {
        0 => None,
        1 => values.pop().map(Matched::One),
        _ => Some(Matched::Conflicting(
            values.iter().map(ToString::to_string).collect(),
        )),
    }
}

/// Every distinct value in text order. Several single-group values become a
/// list, several tuples become rows.
fn match_multi(text: &str, pattern: &Regex) -> Option<Matched> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    for caps in pattern.captures_iter(text) {
        let row = groups(pattern, &caps);
        if !rows.contains(&row) {
            rows.push(row);
        }
    }

    let value = match rows.len() {
        0 => return None,
        1 => {
            let mut row = rows.remove(0);
            if row.len() == 1 {
                FieldValue::Text(row.remove(0))
            } else {
                FieldValue::Rows(vec![row])
            }
        }
        _ if rows.iter().all(|row| row.len() == 1) => {
            FieldValue::List(rows.into_iter().flatten().collect())
        }
        _ => FieldValue::Rows(rows),
    };
    Some(Matched::One(value))
}

/// All non-overlapping matches as rows, duplicates kept.
fn match_rows(text: &str, pattern: &Regex) -> Option<Matched> {
    let rows: Vec<Vec<String>> = pattern
        .captures_iter(text)
        .map(|caps| groups(pattern, &caps))
        .collect();
    (!rows.is_empty()).then(|| Matched::One(FieldValue::Rows(rows)))
}

fn single_value(pattern: &Regex, caps: &Captures<'_>) -> FieldValue {
    let mut values = groups(pattern, caps);
    if values.len() == 1 {
        FieldValue::Text(values.remove(0))
    } else {
        FieldValue::Rows(vec![values])
    }
}

/// Capture groups of one match; the whole match when the pattern has none.
fn groups(pattern: &Regex, caps: &Captures<'_>) -> Vec<String> {
    if pattern.captures_len() == 1 {
        return vec![caps.get(0).map_or("", |m| m.as_str()).to_string()];
    }
    (1..pattern.captures_len())
        .map(|i| caps.get(i).map_or("", |m| m.as_str()).to_string())
        .collect()
}
