//! Template catalog: loading, validation and keyword indexing.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use regex::RegexSet;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::definition::{Keyword, Template, TemplateDefinition};
use super::pattern::CompileLimits;
use crate::error::{CatalogError, RejectedTemplate, TemplateError};
use crate::models::config::{ExtractionConfig, TplexConfig};

/// Keywords of a group of templates compiled into one set, so a single pass
/// over the text decides every keyword predicate of its members.
#[derive(Debug, Clone)]
struct KeywordGroup {
    set: RegexSet,
    /// Catalog positions of the member templates.
    members: Vec<usize>,
    /// Per member: indices into `set` of its inclusive keywords.
    inclusive: Vec<Vec<usize>>,
    /// Per member: indices into `set` of its exclusive keywords.
    exclusive: Vec<Vec<usize>>,
}

impl KeywordGroup {
    fn build(
        templates: &[Template],
        members: &[usize],
        limits: &CompileLimits,
    ) -> Result<Self, regex::Error> {
        let mut patterns: Vec<&str> = Vec::new();
        let mut slots: HashMap<&str, usize> = HashMap::new();

        let mut inclusive = Vec::with_capacity(members.len());
        let mut exclusive = Vec::with_capacity(members.len());
        for &position in members {
            let template = &templates[position];
            inclusive.push(intern(template.inclusive_keywords(), &mut patterns, &mut slots));
            exclusive.push(intern(template.exclusive_keywords(), &mut patterns, &mut slots));
        }

        let set = limits.compile_set(&patterns)?;
        Ok(Self {
            set,
            members: members.to_vec(),
            inclusive,
            exclusive,
        })
    }

    /// Push the positions of members whose keyword constraints hold for `text`.
    fn accepting(&self, text: &str, accepted: &mut Vec<usize>) {
        let hits = self.set.matches(text);
        for (slot, &position) in self.members.iter().enumerate() {
            if self.inclusive[slot].iter().all(|&k| hits.matched(k))
                && !self.exclusive[slot].iter().any(|&k| hits.matched(k))
            {
                accepted.push(position);
            }
        }
    }
}

/// Keyword index of a catalog.
///
/// Normally one group holds every distinct keyword. When that set exceeds the
/// compile limits the index is split per issuer, and an issuer whose set is
/// still too large is split per template.
#[derive(Debug, Clone, Default)]
struct KeywordIndex {
    groups: Vec<KeywordGroup>,
}

impl KeywordIndex {
    /// Index `templates`. Positions whose own keywords cannot be compiled
    /// into one set are left out and returned with the error.
    fn build(templates: &[Template], limits: &CompileLimits) -> (Self, Vec<(usize, regex::Error)>) {
        let mut index = Self::default();
        let mut unindexable = Vec::new();

        let all: Vec<usize> = (0..templates.len()).collect();
        match KeywordGroup::build(templates, &all, limits) {
            Ok(group) => index.groups.push(group),
            Err(e) => {
                warn!("Keyword index exceeds compile limits, splitting by issuer: {}", e);
                let mut by_issuer: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
                for (position, template) in templates.iter().enumerate() {
                    by_issuer.entry(template.issuer()).or_default().push(position);
                }

                for (issuer, members) in by_issuer {
                    match KeywordGroup::build(templates, &members, limits) {
                        Ok(group) => index.groups.push(group),
                        Err(e) => {
                            debug!("Keyword index for {} split per template: {}", issuer, e);
                            for position in members {
                                match KeywordGroup::build(templates, &[position], limits) {
                                    Ok(group) => index.groups.push(group),
                                    Err(e) => unindexable.push((position, e)),
                                }
                            }
                        }
                    }
                }
            }
        }
        debug!("Keyword index built with {} group(s)", index.groups.len());

        (index, unindexable)
    }

    /// Positions of templates whose keyword constraints hold for `text`, in
    /// catalog order.
    fn accepting(&self, text: &str) -> Vec<usize> {
        let mut accepted = Vec::new();
        for group in &self.groups {
            group.accepting(text, &mut accepted);
        }
        if self.groups.len() > 1 {
            accepted.sort_unstable();
        }
        accepted
    }
}

/// Slot of each keyword in the shared pattern list, adding unseen patterns.
fn intern<'a>(
    keywords: &'a [Keyword],
    patterns: &mut Vec<&'a str>,
    slots: &mut HashMap<&'a str, usize>,
) -> Vec<usize> {
    keywords
        .iter()
        .map(|k| {
            *slots.entry(k.pattern()).or_insert_with(|| {
                patterns.push(k.pattern());
                patterns.len() - 1
            })
        })
        .collect()
}

/// An immutable, indexed collection of validated templates.
#[derive(Debug, Clone)]
pub struct Catalog {
    templates: Vec<Template>,
    by_id: HashMap<String, usize>,
    by_issuer: BTreeMap<String, Vec<usize>>,
    keywords: KeywordIndex,
}

impl Catalog {
    fn new(templates: Vec<Template>, keywords: KeywordIndex) -> Self {
        let mut by_id = HashMap::with_capacity(templates.len());
        let mut by_issuer: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, template) in templates.iter().enumerate() {
            by_id.insert(template.id().to_string(), i);
            by_issuer
                .entry(template.issuer().to_string())
                .or_default()
                .push(i);
        }

        Self {
            templates,
            by_id,
            by_issuer,
            keywords,
        }
    }

    /// Catalog without templates.
    pub fn empty() -> Self {
        Self {
            templates: Vec::new(),
            by_id: HashMap::new(),
            by_issuer: BTreeMap::new(),
            keywords: KeywordIndex::default(),
        }
    }

    /// Load every template under `dir` with the given configuration.
    pub fn load_dir(dir: &Path, config: &TplexConfig) -> Result<(Self, LoadReport), CatalogError> {
        let mut loader = CatalogLoader::new(config);
        loader.add_dir(dir)?;
        loader.build()
    }

    /// Load templates from an in-memory YAML bundle with default settings.
    pub fn from_yaml(yaml: &str) -> Result<(Self, LoadReport), CatalogError> {
        let mut loader = CatalogLoader::new(&TplexConfig::default());
        loader.add_yaml("<memory>", "", yaml);
        loader.build()
    }

    /// Templates whose inclusive keywords are all present in the raw text
    /// and whose exclusive keywords are all absent, in catalog order.
    pub fn candidates_for(&self, text: &str) -> Vec<&Template> {
        self.keywords
            .accepting(text)
            .into_iter()
            .map(|i| &self.templates[i])
            .collect()
    }

    /// Like [`Catalog::candidates_for`], restricted to one issuer.
    pub fn candidates_for_issuer(&self, text: &str, issuer: &str) -> Vec<&Template> {
        let Some(owned) = self.by_issuer.get(&issuer.trim().to_uppercase()) else {
            return Vec::new();
        };
        self.keywords
            .accepting(text)
            .into_iter()
            .filter(|i| owned.contains(i))
            .map(|i| &self.templates[i])
            .collect()
    }

    pub fn get(&self, template_id: &str) -> Option<&Template> {
        self.by_id
            .get(&template_id.trim().to_uppercase())
            .map(|&i| &self.templates[i])
    }

    /// Templates in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Issuer tags, sorted.
    pub fn issuers(&self) -> impl Iterator<Item = &str> {
        self.by_issuer.keys().map(String::as_str)
    }

    /// Templates of one issuer, in catalog order.
    pub fn templates_for_issuer(&self, issuer: &str) -> Vec<&Template> {
        self.by_issuer
            .get(&issuer.trim().to_uppercase())
            .map(|ids| ids.iter().map(|&i| &self.templates[i]).collect())
            .unwrap_or_default()
    }
}

/// Outcome of a catalog load.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Number of templates in the catalog.
    pub loaded: usize,
    /// Templates excluded, with reasons.
    pub rejected: Vec<RejectedTemplate>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Collects template sources and builds a [`Catalog`].
///
/// Invalid templates are excluded and listed in the [`LoadReport`]; the rest
/// still load. With `catalog.strict` set any rejection fails the build.
pub struct CatalogLoader {
    limits: CompileLimits,
    extraction: ExtractionConfig,
    strict: bool,
    compiled: Vec<(String, Template)>,
    rejected: Vec<RejectedTemplate>,
}

impl CatalogLoader {
    pub fn new(config: &TplexConfig) -> Self {
        Self {
            limits: CompileLimits::from(&config.engine),
            extraction: config.extraction.clone(),
            strict: config.catalog.strict,
            compiled: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// Add every `*.yml`/`*.yaml` file below `dir`, in path order.
    pub fn add_dir(&mut self, dir: &Path) -> Result<&mut Self, CatalogError> {
        let mut files = Vec::new();
        collect_yaml_files(dir, &mut files)?;
        files.sort();
        info!("Found {} template files in {}", files.len(), dir.display());

        for path in files {
            self.add_file(&path)?;
        }
        Ok(self)
    }

    /// Add one template file; its stem is the default template name.
    pub fn add_file(&mut self, path: &Path) -> Result<&mut Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(self.add_yaml(&path.display().to_string(), &stem, &content))
    }

    /// Add every `---`-separated definition in `yaml`.
    pub fn add_yaml(&mut self, label: &str, fallback_name: &str, yaml: &str) -> &mut Self {
        for document in serde_yaml::Deserializer::from_str(yaml) {
            let value = match serde_yaml::Value::deserialize(document) {
                Ok(serde_yaml::Value::Null) => continue,
                Ok(value) => value,
                Err(e) => {
                    // The rest of the stream cannot be trusted after a syntax error.
                    self.reject(label, None, TemplateError::Malformed(e));
                    break;
                }
            };

            let definition: TemplateDefinition = match serde_yaml::from_value(value) {
                Ok(definition) => definition,
                Err(e) => {
                    self.reject(label, None, TemplateError::Malformed(e));
                    continue;
                }
            };

            let id = definition.normalized_id();
            match definition.compile(fallback_name, &self.limits, &self.extraction) {
                Ok(template) => {
                    debug!("Compiled template {} from {}", template.id(), label);
                    self.compiled.push((label.to_string(), template));
                }
                Err(e) => self.reject(label, id, e),
            }
        }
        self
    }

    fn reject(&mut self, source: &str, template_id: Option<String>, error: TemplateError) {
        let rejected = RejectedTemplate {
            source: source.to_string(),
            template_id,
            reason: error.to_string(),
        };
        warn!("Rejected template {}", rejected);
        self.rejected.push(rejected);
    }

    /// Reject duplicated ids, index the rest and build the catalog.
    pub fn build(mut self) -> Result<(Catalog, LoadReport), CatalogError> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for (_, template) in &self.compiled {
            *counts.entry(template.id().to_string()).or_default() += 1;
        }

        let mut sources = Vec::with_capacity(self.compiled.len());
        let mut templates = Vec::with_capacity(self.compiled.len());
        for (source, template) in std::mem::take(&mut self.compiled) {
            if counts[template.id()] > 1 {
                let id = template.id().to_string();
                self.reject(&source, Some(id.clone()), TemplateError::DuplicateTemplateId(id));
            } else {
                sources.push(source);
                templates.push(template);
            }
        }

        // Only templates whose own keywords overflow the limits are dropped;
        // the index is rebuilt over the rest.
        let keywords = loop {
            let (keywords, unindexable) = KeywordIndex::build(&templates, &self.limits);
            if unindexable.is_empty() {
                break keywords;
            }

            let mut dropped = vec![false; templates.len()];
            for (position, error) in unindexable {
                dropped[position] = true;
                let id = templates[position].id().to_string();
                let source = sources[position].clone();
                self.reject(&source, Some(id), TemplateError::KeywordIndex(error));
            }
            (sources, templates) = sources
                .into_iter()
                .zip(templates)
                .zip(dropped)
                .filter(|(_, dropped)| !dropped)
                .map(|(kept, _)| kept)
                .unzip();
        };

        if self.strict && !self.rejected.is_empty() {
            return Err(CatalogError::Rejected(self.rejected));
        }

        let catalog = Catalog::new(templates, keywords);
        info!(
            "Loaded {} templates ({} rejected)",
            catalog.len(),
            self.rejected.len()
        );

        let report = LoadReport {
            loaded: catalog.len(),
            rejected: self.rejected,
        };
        Ok((catalog, report))
    }
}

fn collect_yaml_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), CatalogError> {
    let read_error = |source| CatalogError::Read {
        path: dir.to_path_buf(),
        source,
    };
    for entry in std::fs::read_dir(dir).map_err(read_error)? {
        let path = entry.map_err(read_error)?.path();
        if path.is_dir() {
            collect_yaml_files(&path, out)?;
        } else if path
            .extension()
            .map(|ext| ext == "yml" || ext == "yaml")
            .unwrap_or(false)
        {
            out.push(path);
        }
    }
    Ok(())
}

/// Shared access to the current catalog.
///
/// Readers take a snapshot and keep using it for as long as they hold it;
/// [`CatalogHandle::replace`] swaps in a new catalog for later snapshots.
#[derive(Debug, Clone)]
pub struct CatalogHandle {
    current: Arc<RwLock<Arc<Catalog>>>,
}

impl CatalogHandle {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(catalog))),
        }
    }

    /// The catalog in effect right now.
    pub fn snapshot(&self) -> Arc<Catalog> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Install `catalog` for every later snapshot; returns the previous one.
    pub fn replace(&self, catalog: Catalog) -> Arc<Catalog> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, Arc::new(catalog))
    }
}

impl From<Catalog> for CatalogHandle {
    fn from(catalog: Catalog) -> Self {
        Self::new(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BUNDLE: &str = r#"
issuer: obi_de
template_id: OBI-1
kind: debit
category: penalty_delay
inclusive_keywords: [OBI, Vertragsstrafe]
exclusive_keywords: Storno
fields:
  amount: 'Gesamt\s+([\d,]+)'
---
issuer: obi_de
template_id: OBI-2
kind: credit
inclusive_keywords: [OBI, Gutschrift]
fields:
  amount: 'Summe\s+([\d,]+)'
---
issuer: rewe
template_id: REWE-1
kind: credit
inclusive_keywords: [REWE, Gutschrift]
fields:
  amount: 'Summe\s+([\d,]+)'
"#;

    fn ids(templates: Vec<&Template>) -> Vec<&str> {
        templates.into_iter().map(Template::id).collect()
    }

    #[test]
    fn test_load_bundle() {
        let (catalog, report) = Catalog::from_yaml(BUNDLE).unwrap();
        assert_eq!(catalog.len(), 3);
        assert!(report.is_clean());
        assert_eq!(catalog.issuers().collect::<Vec<_>>(), vec!["OBI_DE", "REWE"]);
        assert_eq!(catalog.get("obi-2").map(Template::id), Some("OBI-2"));
    }

    #[test]
    fn test_candidates_follow_keywords() {
        let (catalog, _) = Catalog::from_yaml(BUNDLE).unwrap();

        assert_eq!(ids(catalog.candidates_for("OBI Vertragsstrafe")), vec!["OBI-1"]);
        assert_eq!(
            ids(catalog.candidates_for("OBI REWE Gutschrift")),
            vec!["OBI-2", "REWE-1"]
        );
        assert!(catalog.candidates_for("Lidl Gutschrift").is_empty());
    }

    #[test]
    fn test_exclusive_keyword_disqualifies() {
        let (catalog, _) = Catalog::from_yaml(BUNDLE).unwrap();
        assert!(catalog.candidates_for("OBI Vertragsstrafe\nStorno der Rechnung").is_empty());
    }

    #[test]
    fn test_candidates_for_issuer() {
        let (catalog, _) = Catalog::from_yaml(BUNDLE).unwrap();
        let text = "OBI REWE Gutschrift";

        assert_eq!(ids(catalog.candidates_for_issuer(text, "rewe")), vec!["REWE-1"]);
        assert!(catalog.candidates_for_issuer(text, "LIDL").is_empty());
        assert_eq!(catalog.templates_for_issuer("obi_de").len(), 2);
    }

    #[test]
    fn test_duplicate_ids_reject_every_copy() {
        let yaml = format!(
            "{}\n---\nissuer: lidl\ntemplate_id: obi-1\nkind: credit\ninclusive_keywords: LIDL\nfields:\n  a: 'x'\n",
            BUNDLE
        );
        let (catalog, report) = Catalog::from_yaml(&yaml).unwrap();

        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("OBI-1").is_none());
        assert_eq!(report.rejected.len(), 2);
        assert!(report
            .rejected
            .iter()
            .all(|r| r.template_id.as_deref() == Some("OBI-1")));
    }

    #[test]
    fn test_invalid_template_does_not_block_others() {
        let yaml = format!(
            "{}\n---\nissuer: lidl\ntemplate_id: L-1\nkind: credit\ninclusive_keywords: LIDL\noptional_fields: zip\nfields:\n  a: 'x'\n",
            BUNDLE
        );
        let (catalog, report) = Catalog::from_yaml(&yaml).unwrap();

        assert_eq!(catalog.len(), 3);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].template_id.as_deref(), Some("L-1"));
        assert!(report.rejected[0].reason.contains("zip"));
    }

    #[test]
    fn test_heavy_keywords_split_the_index_instead_of_failing() {
        // Each keyword compiles alone; forty of them overflow one shared set.
        let mut yaml = String::from(BUNDLE);
        for i in 0..40 {
            yaml.push_str(&format!(
                "---\nissuer: heavy\ntemplate_id: H-{i}\nkind: credit\ninclusive_keywords: '\\w{{60}}k{i}'\nfields:\n  a: 'x'\n"
            ));
        }
        let (catalog, report) = Catalog::from_yaml(&yaml).unwrap();

        assert!(report.is_clean());
        assert_eq!(catalog.len(), 43);
        assert_eq!(ids(catalog.candidates_for(&format!("{}k7 ", "a".repeat(60)))), vec!["H-7"]);
        assert_eq!(
            ids(catalog.candidates_for("OBI REWE Gutschrift")),
            vec!["OBI-2", "REWE-1"]
        );
        assert_eq!(ids(catalog.candidates_for("OBI Vertragsstrafe")), vec!["OBI-1"]);
    }

    #[test]
    fn test_strict_mode_fails_on_rejection() {
        let mut config = TplexConfig::default();
        config.catalog.strict = true;
        let mut loader = CatalogLoader::new(&config);
        loader.add_yaml("bad.yml", "bad", "issuer: x\ntemplate_id: B\nkind: debit\ninclusive_keywords: X\n");

        match loader.build() {
            Err(CatalogError::Rejected(rejected)) => assert_eq!(rejected.len(), 1),
            other => panic!("unexpected: {:?}", other.map(|(c, _)| c.len())),
        }
    }

    #[test]
    fn test_load_dir_recurses_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        let obi = dir.path().join("obi_de");
        std::fs::create_dir(&obi).unwrap();
        std::fs::write(
            obi.join("penalty_delivery.yml"),
            "issuer: OBI_DE\ntemplate_id: B-2\nkind: credit\ninclusive_keywords: OBI\nfields:\n  a: 'x'\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a_first.yaml"),
            "issuer: REWE\ntemplate_id: A-1\nname: Rewe note\nkind: credit\ninclusive_keywords: OBI\nfields:\n  a: 'x'\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a template").unwrap();

        let (catalog, report) = Catalog::load_dir(dir.path(), &TplexConfig::default()).unwrap();

        assert!(report.is_clean());
        assert_eq!(ids(catalog.candidates_for("OBI")), vec!["A-1", "B-2"]);
        assert_eq!(catalog.get("B-2").map(Template::name), Some("penalty_delivery"));
        assert_eq!(catalog.get("A-1").map(Template::name), Some("Rewe note"));
    }

    #[test]
    fn test_missing_dir_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(
            Catalog::load_dir(&missing, &TplexConfig::default()),
            Err(CatalogError::Read { .. })
        ));
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let (catalog, report) = Catalog::from_yaml("issuer: [unclosed").unwrap();
        assert!(catalog.is_empty());
        assert_eq!(report.rejected.len(), 1);
    }

    #[test]
    fn test_catalog_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Catalog>();
        assert_send_sync::<CatalogHandle>();
    }

    #[test]
    fn test_snapshot_survives_replace() {
        let (first, _) = Catalog::from_yaml(BUNDLE).unwrap();
        let handle = CatalogHandle::new(first);

        let held = handle.snapshot();
        let previous = handle.replace(Catalog::empty());

        assert_eq!(held.len(), 3);
        assert_eq!(previous.len(), 3);
        assert!(handle.snapshot().is_empty());
    }
}
