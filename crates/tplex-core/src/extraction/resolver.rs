//! Picks at most one template for a text.

use tracing::debug;

use crate::template::catalog::Catalog;
use crate::template::definition::Template;

/// Result of resolving a text against a catalog.
#[derive(Debug, Clone)]
pub enum ResolutionOutcome<'c> {
    Matched(&'c Template),
    Unmatched,
    /// Candidate template ids, in catalog order.
    Ambiguous(Vec<String>),
}

impl ResolutionOutcome<'_> {
    pub fn template(&self) -> Option<&Template> {
        match self {
            ResolutionOutcome::Matched(template) => Some(template),
            _ => None,
        }
    }
}

/// Template resolver.
///
/// Without tie-breaking several candidates are always ambiguous. With
/// `prefer_specific`, a candidate wins only when its inclusive keywords are
/// a strict superset of every other candidate's.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resolver {
    prefer_specific: bool,
}

impl Resolver {
    pub fn new(prefer_specific: bool) -> Self {
        Self { prefer_specific }
    }

    pub fn resolve<'c>(&self, catalog: &'c Catalog, text: &str) -> ResolutionOutcome<'c> {
        self.decide(catalog.candidates_for(text))
    }

    /// Resolve among the templates of one issuer only.
    pub fn resolve_for_issuer<'c>(
        &self,
        catalog: &'c Catalog,
        text: &str,
        issuer: &str,
    ) -> ResolutionOutcome<'c> {
        self.decide(catalog.candidates_for_issuer(text, issuer))
    }

    fn decide<'c>(&self, candidates: Vec<&'c Template>) -> ResolutionOutcome<'c> {
        match candidates.as_slice() {
            [] => ResolutionOutcome::Unmatched,
            [only] => ResolutionOutcome::Matched(*only),
            _ => {
                if self.prefer_specific {
                    if let Some(winner) = most_specific(&candidates) {
                        debug!(
                            "Template {} preferred over {} other candidate(s)",
                            winner.id(),
                            candidates.len() - 1
                        );
                        return ResolutionOutcome::Matched(winner);
                    }
                }
                ResolutionOutcome::Ambiguous(
                    candidates.iter().map(|t| t.id().to_string()).collect(),
                )
            }
        }
    }
}

fn most_specific<'c>(candidates: &[&'c Template]) -> Option<&'c Template> {
    let sets: Vec<_> = candidates.iter().map(|t| t.inclusive_set()).collect();
    (0..candidates.len())
        .find(|&i| {
            sets.iter()
                .enumerate()
                .all(|(j, other)| i == j || (sets[i].is_superset(other) && sets[i] != *other))
        })
        .map(|i| candidates[i])
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
issuer: OBI_DE
template_id: GENERIC
kind: credit
inclusive_keywords: [OBI]
fields: {a: 'x'}
---
issuer: OBI_DE
template_id: SPECIFIC
kind: credit
inclusive_keywords: [OBI, Gutschrift]
fields: {a: 'x'}
---
issuer: REWE
template_id: OTHER
kind: credit
inclusive_keywords: [Gutschrift, Markt]
fields: {a: 'x'}
"#;

    fn catalog() -> Catalog {
        Catalog::from_yaml(CATALOG).unwrap().0
    }

    fn id<'c>(outcome: &ResolutionOutcome<'c>) -> Option<&'c str> {
        match outcome {
            ResolutionOutcome::Matched(t) => Some(t.id()),
            _ => None,
        }
    }

    #[test]
    fn test_single_candidate_matches() {
        let catalog = catalog();
        let outcome = Resolver::default().resolve(&catalog, "OBI Rechnung");
        assert_eq!(id(&outcome), Some("GENERIC"));
    }

    #[test]
    fn test_no_candidate_is_unmatched() {
        let catalog = catalog();
        let outcome = Resolver::default().resolve(&catalog, "Lidl");
        assert!(matches!(outcome, ResolutionOutcome::Unmatched));
    }

    #[test]
    fn test_multiple_candidates_stay_ambiguous() {
        let catalog = catalog();
        match Resolver::default().resolve(&catalog, "OBI Gutschrift") {
            ResolutionOutcome::Ambiguous(ids) => assert_eq!(ids, vec!["GENERIC", "SPECIFIC"]),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_prefer_specific_picks_strict_superset() {
        let catalog = catalog();
        let outcome = Resolver::new(true).resolve(&catalog, "OBI Gutschrift");
        assert_eq!(id(&outcome), Some("SPECIFIC"));
    }

    #[test]
    fn test_prefer_specific_never_hides_disjoint_ambiguity() {
        let catalog = catalog();
        match Resolver::new(true).resolve(&catalog, "OBI Gutschrift Markt") {
            ResolutionOutcome::Ambiguous(ids) => {
                assert_eq!(ids, vec!["GENERIC", "SPECIFIC", "OTHER"]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_issuer_scoping() {
        let catalog = catalog();
        let resolver = Resolver::default();
        let text = "OBI Gutschrift Markt";

        assert_eq!(
            id(&resolver.resolve_for_issuer(&catalog, text, "rewe")),
            Some("OTHER")
        );
        assert!(matches!(
            resolver.resolve_for_issuer(&catalog, text, "OBI_DE"),
            ResolutionOutcome::Ambiguous(_)
        ));
    }
}
