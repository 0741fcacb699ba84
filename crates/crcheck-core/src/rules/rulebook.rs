//! Loading and indexing of the rule hierarchy.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::model::{
    Category, Checklist, CitationLibrary, RedFlag, RuleRef, SpecialTopics, Subcategory,
    ID_SEPARATOR,
};
use super::schema::validate_checklist_schema;

/// Errors raised while loading rule sources. All of them are fatal at startup.
#[derive(Error, Debug)]
pub enum RulebookError {
    #[error("Failed to read rule source {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Checklist failed schema validation: {}", .0.join("; "))]
    Schema(Vec<String>),

    #[error("Rule hierarchy validation failed: {0}")]
    Validation(String),
}

/// Where the rule sources live on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleSources {
    /// Criteria checklist (JSON or YAML)
    #[serde(default = "default_checklist_path")]
    pub checklist: PathBuf,

    /// Citation library (JSON or YAML)
    #[serde(default = "default_library_path")]
    pub library: PathBuf,

    /// Special-topic rule sets; none are applied when unset
    #[serde(default)]
    pub special_topics: Option<PathBuf>,
}

fn default_checklist_path() -> PathBuf {
    PathBuf::from("data/criteria_checklist.json")
}

fn default_library_path() -> PathBuf {
    PathBuf::from("data/ethics_library.json")
}

impl Default for RuleSources {
    fn default() -> Self {
        Self {
            checklist: default_checklist_path(),
            library: default_library_path(),
            special_topics: Some(PathBuf::from("data/special_topics.json")),
        }
    }
}

/// Result of expanding classified ids to subcategory granularity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    /// Subcategory ids
    pub ids: BTreeSet<String>,

    /// True when nothing resolved and the default ids were substituted
    pub fell_back: bool,
}

/// Output of the local keyword scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreScreen {
    /// Subcategories with at least one keyword hit
    pub triggered_subcategory_ids: BTreeSet<String>,

    /// Every keyword hit, in hierarchy order
    pub triggered_keywords: Vec<RedFlag>,
}

/// The immutable, process-wide rule hierarchy, citation library and
/// special-topic rule sets.
///
/// Built once at startup and shared by reference (`Arc<Rulebook>`);
/// nothing here is mutated after construction.
#[derive(Debug, Clone)]
pub struct Rulebook {
    pub(super) checklist: Checklist,
    pub(super) library: CitationLibrary,
    pub(super) topics: SpecialTopics,
    category_index: HashMap<String, usize>,
    subcategory_index: HashMap<String, (usize, usize)>,
    category_depth: usize,
    default_issue_ids: Vec<String>,
}

impl Rulebook {
    /// Load every source listed in `sources`.
    pub fn load(sources: &RuleSources) -> Result<Self, RulebookError> {
        let checklist_value: serde_json::Value = read_source(&sources.checklist)?;
        validate_checklist_schema(&checklist_value).map_err(RulebookError::Schema)?;
        let checklist: Checklist = serde_json::from_value(checklist_value)?;

        let library: CitationLibrary = read_source(&sources.library)?;

        let topics: SpecialTopics = match &sources.special_topics {
            Some(path) => read_source(path)?,
            None => SpecialTopics::default(),
        };

        let rulebook = Self::from_parts(checklist, library, topics)?;
        tracing::info!(
            categories = rulebook.category_count(),
            subcategories = rulebook.subcategory_count(),
            citations = rulebook.library.codes.len(),
            special_topics = rulebook.topics.topics.len(),
            "Rulebook loaded"
        );
        Ok(rulebook)
    }

    /// Build a rulebook from already-parsed parts, enforcing id invariants.
    pub fn from_parts(
        checklist: Checklist,
        library: CitationLibrary,
        topics: SpecialTopics,
    ) -> Result<Self, RulebookError> {
        if checklist.categories.is_empty() {
            return Err(RulebookError::Validation(
                "checklist has no categories".to_string(),
            ));
        }

        let mut category_index = HashMap::new();
        let mut subcategory_index = HashMap::new();
        let mut question_ids = HashSet::new();

        for (ci, category) in checklist.categories.iter().enumerate() {
            if category_index.insert(category.id.clone(), ci).is_some() {
                return Err(RulebookError::Validation(format!(
                    "Duplicate category ID: {}",
                    category.id
                )));
            }

            let prefix = format!("{}{}", category.id, ID_SEPARATOR);
            for (si, sub) in category.subcategories.iter().enumerate() {
                if !sub.id.starts_with(&prefix) {
                    return Err(RulebookError::Validation(format!(
                        "Subcategory {} is not prefixed by its category {}",
                        sub.id, category.id
                    )));
                }
                if subcategory_index.insert(sub.id.clone(), (ci, si)).is_some() {
                    return Err(RulebookError::Validation(format!(
                        "Duplicate subcategory ID: {}",
                        sub.id
                    )));
                }
                for q in &sub.diagnostic_questions {
                    if !question_ids.insert(q.id.clone()) {
                        return Err(RulebookError::Validation(format!(
                            "Duplicate question ID: {}",
                            q.id
                        )));
                    }
                }
            }
        }

        // Category and subcategory ids share one namespace.
        if let Some(id) = category_index.keys().find(|id| subcategory_index.contains_key(*id)) {
            return Err(RulebookError::Validation(format!(
                "ID {} is used as both category and subcategory",
                id
            )));
        }

        let category_depth = checklist
            .categories
            .iter()
            .map(|c| id_depth(&c.id))
            .max()
            .unwrap_or(0);

        // First subcategory of the first two non-empty categories.
        let default_issue_ids = checklist
            .categories
            .iter()
            .filter_map(|c| c.subcategories.first())
            .take(2)
            .map(|s| s.id.clone())
            .collect();

        let rulebook = Self {
            checklist,
            library,
            topics,
            category_index,
            subcategory_index,
            category_depth,
            default_issue_ids,
        };
        rulebook.warn_dangling_citations();
        Ok(rulebook)
    }

    /// Replace the ids used when expansion resolves nothing.
    pub fn with_default_issue_ids(mut self, ids: Vec<String>) -> Result<Self, RulebookError> {
        if ids.is_empty() {
            return Err(RulebookError::Validation(
                "default issue ids must not be empty".to_string(),
            ));
        }
        if let Some(unknown) = ids.iter().find(|id| !self.contains_subcategory(id)) {
            return Err(RulebookError::Validation(format!(
                "default issue id {} is not a known subcategory",
                unknown
            )));
        }
        self.default_issue_ids = ids;
        Ok(self)
    }

    fn warn_dangling_citations(&self) {
        let dangling: BTreeSet<&str> = self
            .subcategories()
            .flat_map(|s| s.citation_refs.iter())
            .chain(self.topics.topics.values().flat_map(|t| t.citation_refs.iter()))
            .filter(|id| !self.library.codes.contains_key(*id))
            .map(String::as_str)
            .collect();

        if !dangling.is_empty() {
            tracing::warn!(
                missing = ?dangling,
                "Rules reference citations absent from the library; they will be omitted"
            );
        }
    }

    /// Categories in source order.
    pub fn categories(&self) -> &[Category] {
        &self.checklist.categories
    }

    /// All subcategories in source order.
    pub fn subcategories(&self) -> impl Iterator<Item = &Subcategory> {
        self.checklist
            .categories
            .iter()
            .flat_map(|c| c.subcategories.iter())
    }

    pub fn category(&self, id: &str) -> Option<&Category> {
        self.category_index
            .get(id)
            .map(|&ci| &self.checklist.categories[ci])
    }

    pub fn subcategory(&self, id: &str) -> Option<&Subcategory> {
        self.subcategory_index
            .get(id)
            .map(|&(ci, si)| &self.checklist.categories[ci].subcategories[si])
    }

    pub fn contains_subcategory(&self, id: &str) -> bool {
        self.subcategory_index.contains_key(id)
    }

    pub fn category_count(&self) -> usize {
        self.checklist.categories.len()
    }

    pub fn subcategory_count(&self) -> usize {
        self.subcategory_index.len()
    }

    /// Ids substituted when expansion resolves nothing.
    pub fn default_issue_ids(&self) -> &[String] {
        &self.default_issue_ids
    }

    /// Classify a raw id or category label as returned by the model.
    ///
    /// Accepts exact ids (`"1"`, `"1-2"`), labelled ids (`"1. Accuracy"`)
    /// and bare category names. Unknown ids deeper than the category level
    /// are kept verbatim as subcategory references.
    pub fn classify(&self, raw: &str) -> Option<RuleRef> {
        let text = raw.trim();
        if text.is_empty() {
            return None;
        }

        if let Some(rule) = self.lookup_id(text) {
            return Some(rule);
        }

        let head = leading_id(text);
        if !head.is_empty() && head != text {
            if let Some(rule) = self.lookup_id(head) {
                return Some(rule);
            }
        }

        if let Some(category) = self
            .checklist
            .categories
            .iter()
            .find(|c| text.contains(c.name.as_str()))
        {
            return Some(RuleRef::Category(category.id.clone()));
        }

        if head == text && id_depth(text) > self.category_depth {
            return Some(RuleRef::Subcategory(text.to_string()));
        }

        None
    }

    fn lookup_id(&self, id: &str) -> Option<RuleRef> {
        if self.subcategory_index.contains_key(id) {
            Some(RuleRef::Subcategory(id.to_string()))
        } else if self.category_index.contains_key(id) {
            Some(RuleRef::Category(id.to_string()))
        } else {
            None
        }
    }

    /// Expand category and subcategory ids to subcategory granularity.
    ///
    /// Falls back to [`Rulebook::default_issue_ids`] when nothing resolves;
    /// the returned [`Expansion::fell_back`] flag records that it happened.
    pub fn expand_issue_ids<I, S>(&self, ids: I) -> Expansion
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut expanded = BTreeSet::new();

        for raw in ids {
            match self.classify(raw.as_ref()) {
                Some(RuleRef::Subcategory(id)) => {
                    expanded.insert(id);
                }
                Some(RuleRef::Category(id)) => {
                    if let Some(category) = self.category(&id) {
                        expanded.extend(category.subcategories.iter().map(|s| s.id.clone()));
                    }
                }
                None => {
                    tracing::debug!(id = raw.as_ref(), "Ignoring unrecognised rule id");
                }
            }
        }

        if expanded.is_empty() {
            tracing::debug!(defaults = ?self.default_issue_ids, "Issue expansion fell back to defaults");
            return Expansion {
                ids: self.default_issue_ids.iter().cloned().collect(),
                fell_back: true,
            };
        }

        Expansion {
            ids: expanded,
            fell_back: false,
        }
    }

    /// Every red-flag keyword with its subcategory and severity.
    pub fn red_flags(&self) -> Vec<RedFlag> {
        self.subcategories()
            .flat_map(|sub| {
                sub.red_flags.iter().map(move |keyword| RedFlag {
                    keyword: keyword.clone(),
                    subcategory_id: sub.id.clone(),
                    severity: sub.severity,
                })
            })
            .collect()
    }

    /// Local keyword scan. Makes no remote calls and never fails.
    pub fn pre_screen(&self, text: &str) -> PreScreen {
        let triggered_keywords: Vec<RedFlag> = self
            .red_flags()
            .into_iter()
            .filter(|flag| text.contains(flag.keyword.as_str()))
            .collect();

        let triggered_subcategory_ids = triggered_keywords
            .iter()
            .map(|flag| flag.subcategory_id.clone())
            .collect();

        PreScreen {
            triggered_subcategory_ids,
            triggered_keywords,
        }
    }

    /// Numbered category/subcategory list for the classification prompt.
    pub fn list_categories(&self) -> String {
        let mut lines = Vec::new();
        for category in &self.checklist.categories {
            lines.push(format!("{}. {}", category.id, category.name));
            for sub in &category.subcategories {
                lines.push(format!("  - {}. {}", sub.id, sub.name));
            }
        }
        lines.join("\n")
    }

    /// Full diagnostic checklist with abbreviated definitions.
    pub fn diagnostic_checklist(&self) -> String {
        const DEFINITION_PREVIEW: usize = 200;

        let mut lines = Vec::new();
        for category in &self.checklist.categories {
            lines.push(format!("## {}. {}", category.id, category.name));

            for sub in &category.subcategories {
                lines.push(format!("\n### {}. {}", sub.id, sub.name));

                if !sub.definition.is_empty() {
                    let mut definition: String =
                        sub.definition.chars().take(DEFINITION_PREVIEW).collect();
                    if sub.definition.chars().count() > DEFINITION_PREVIEW {
                        definition.push_str("...");
                    }
                    lines.push(format!("Definition: {}", definition));
                }

                lines.push("Diagnostic questions:".to_string());
                for q in &sub.diagnostic_questions {
                    lines.push(format!("  - [{}] {}", q.id, q.question));
                }
            }
        }
        lines.join("\n")
    }
}

/// Number of separators in an id (`"1"` → 0, `"1-2"` → 1).
fn id_depth(id: &str) -> usize {
    id.matches(ID_SEPARATOR).count()
}

/// The id-shaped prefix of a label (`"1-2. Name"` → `"1-2"`).
fn leading_id(text: &str) -> &str {
    let end = text
        .find(|c: char| !(c.is_ascii_digit() || c == ID_SEPARATOR))
        .unwrap_or(text.len());
    text[..end].trim_end_matches(ID_SEPARATOR)
}

/// Read a JSON or YAML source, choosing the format by extension.
fn read_source<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, RulebookError> {
    let contents = fs::read_to_string(path).map_err(|source| RulebookError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let is_yaml = path
        .extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false);

    if is_yaml {
        Ok(serde_yaml::from_str(&contents)?)
    } else {
        Ok(serde_json::from_str(&contents)?)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::rulebook;
    use super::*;
    use crate::rules::model::{Category, Severity, Subcategory};
    use proptest::prelude::*;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_expand_category_to_subcategories() {
        let rb = rulebook();
        let expansion = rb.expand_issue_ids(["1"]);
        assert_eq!(expansion.ids, set(&["1-1", "1-2"]));
        assert!(!expansion.fell_back);
    }

    #[test]
    fn test_expand_subcategory_is_verbatim() {
        let rb = rulebook();
        assert_eq!(rb.expand_issue_ids(["2-1"]).ids, set(&["2-1"]));
    }

    #[test]
    fn test_expand_unknown_deep_id_kept_verbatim() {
        let rb = rulebook();
        assert_eq!(rb.expand_issue_ids(["7-4"]).ids, set(&["7-4"]));
    }

    #[test]
    fn test_expand_category_labels_and_names() {
        let rb = rulebook();
        let expansion = rb.expand_issue_ids(["2. Fairness and balance", "Human dignity"]);
        assert_eq!(expansion.ids, set(&["2-1", "3-1"]));
    }

    #[test]
    fn test_expand_falls_back_when_nothing_resolves() {
        let rb = rulebook();
        let expansion = rb.expand_issue_ids(["no such category", "42"]);
        assert!(expansion.fell_back);
        assert_eq!(expansion.ids, set(&["1-1", "2-1"]));

        let empty: [&str; 0] = [];
        assert!(rb.expand_issue_ids(empty).fell_back);
    }

    #[test]
    fn test_configured_default_issue_ids() {
        let rb = rulebook()
            .with_default_issue_ids(vec!["3-1".to_string()])
            .unwrap();
        assert_eq!(rb.expand_issue_ids(["nothing"]).ids, set(&["3-1"]));

        assert!(rulebook().with_default_issue_ids(vec!["9-9".to_string()]).is_err());
        assert!(rulebook().with_default_issue_ids(vec![]).is_err());
    }

    #[test]
    fn test_pre_screen_hits_and_misses() {
        let rb = rulebook();
        let result = rb.pre_screen("The minister reportedly resigned; his aide could not be reached.");
        assert_eq!(result.triggered_subcategory_ids, set(&["1-1", "2-1"]));
        assert_eq!(result.triggered_keywords.len(), 2);
        assert_eq!(result.triggered_keywords[0].severity, Severity::Critical);

        assert!(rb.pre_screen("A calm, well-sourced report.").triggered_subcategory_ids.is_empty());
    }

    #[test]
    fn test_list_categories_is_stable() {
        let rb = rulebook();
        let listed = rb.list_categories();
        assert!(listed.starts_with("1. Truthfulness and accuracy\n  - 1-1. Insufficient fact checking"));
        assert_eq!(listed, rb.list_categories());
    }

    #[test]
    fn test_diagnostic_checklist_truncates_definitions() {
        let mut checklist: Checklist = serde_json::from_str(fixtures::CHECKLIST).unwrap();
        checklist.categories[0].subcategories[0].definition = "x".repeat(250);
        let rb = Rulebook::from_parts(checklist, CitationLibrary::default(), SpecialTopics::default())
            .unwrap();

        let text = rb.diagnostic_checklist();
        assert!(text.contains(&format!("Definition: {}...", "x".repeat(200))));
        assert!(text.contains("  - [1-1-1] Are key claims verified?"));
    }

    #[test]
    fn test_rejects_unprefixed_subcategory() {
        let checklist = Checklist {
            version: None,
            categories: vec![Category {
                id: "1".to_string(),
                name: "Accuracy".to_string(),
                subcategories: vec![sub("2-1")],
            }],
        };
        let result = Rulebook::from_parts(checklist, CitationLibrary::default(), SpecialTopics::default());
        assert!(matches!(result, Err(RulebookError::Validation(_))));
    }

    #[test]
    fn test_rejects_duplicate_subcategory() {
        let checklist = Checklist {
            version: None,
            categories: vec![Category {
                id: "1".to_string(),
                name: "Accuracy".to_string(),
                subcategories: vec![sub("1-1"), sub("1-1")],
            }],
        };
        let result = Rulebook::from_parts(checklist, CitationLibrary::default(), SpecialTopics::default());
        assert!(matches!(result, Err(RulebookError::Validation(msg)) if msg.contains("1-1")));
    }

    #[test]
    fn test_load_missing_source_is_fatal() {
        let sources = RuleSources {
            checklist: PathBuf::from("/nonexistent/criteria_checklist.json"),
            library: PathBuf::from("/nonexistent/ethics_library.json"),
            special_topics: None,
        };
        assert!(matches!(Rulebook::load(&sources), Err(RulebookError::Io { .. })));
    }

    #[test]
    fn test_load_from_files() {
        let dir = std::env::temp_dir().join(format!("crcheck-rules-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let checklist = dir.join("criteria_checklist.json");
        let library = dir.join("ethics_library.yaml");
        fs::write(&checklist, fixtures::CHECKLIST).unwrap();
        fs::write(
            &library,
            "codes:\n  JEC-1:\n    source: Code\n    article: Article 1\n    title: Truth\n    full_text: Verify.\n",
        )
        .unwrap();

        let rb = Rulebook::load(&RuleSources {
            checklist,
            library,
            special_topics: None,
        })
        .unwrap();
        assert_eq!(rb.category_count(), 3);
        assert_eq!(rb.subcategory_count(), 4);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_bundled_rule_data_loads() {
        let data = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../data");
        let rb = Rulebook::load(&RuleSources {
            checklist: data.join("criteria_checklist.json"),
            library: data.join("ethics_library.json"),
            special_topics: Some(data.join("special_topics.json")),
        })
        .unwrap();

        assert_eq!(rb.category_count(), 6);
        assert_eq!(rb.subcategory_count(), 11);
        assert_eq!(rb.default_issue_ids(), ["1-1", "2-1"]);
        assert!(rb
            .detect_special_topics("The death toll rose after the earthquake.")
            .contains("disaster"));
    }

    fn sub(id: &str) -> Subcategory {
        Subcategory {
            id: id.to_string(),
            name: format!("Sub {}", id),
            definition: String::new(),
            severity: Severity::Normal,
            diagnostic_questions: vec![],
            red_flags: vec![],
            citation_refs: vec![],
        }
    }

    /// Hierarchies with 1..5 categories, each with 1..5 subcategories
    /// carrying a unique keyword.
    fn arb_checklist() -> impl Strategy<Value = Checklist> {
        prop::collection::vec(1usize..5, 1..5).prop_map(|sizes| Checklist {
            version: None,
            categories: sizes
                .iter()
                .enumerate()
                .map(|(ci, &n)| Category {
                    id: (ci + 1).to_string(),
                    name: format!("Category {}", ci + 1),
                    subcategories: (1..=n)
                        .map(|si| {
                            let mut s = sub(&format!("{}-{}", ci + 1, si));
                            s.red_flags = vec![format!("flag-{}-{}", ci + 1, si)];
                            s
                        })
                        .collect(),
                })
                .collect(),
        })
    }

    proptest! {
        #[test]
        fn prop_category_expands_to_exactly_its_subcategories(checklist in arb_checklist()) {
            let rb = Rulebook::from_parts(checklist.clone(), CitationLibrary::default(), SpecialTopics::default()).unwrap();
            for category in &checklist.categories {
                let expected: BTreeSet<String> = category.subcategories.iter().map(|s| s.id.clone()).collect();
                let expansion = rb.expand_issue_ids([category.id.as_str()]);
                prop_assert_eq!(expansion.ids, expected);
                prop_assert!(!expansion.fell_back);

                for s in &category.subcategories {
                    prop_assert_eq!(rb.expand_issue_ids([s.id.as_str()]).ids, set(&[s.id.as_str()]));
                }
            }
        }

        #[test]
        fn prop_pre_screen_finds_embedded_keywords(
            checklist in arb_checklist(),
            prefix in "[a-z ]{0,20}",
            suffix in "[a-z ]{0,20}",
        ) {
            let rb = Rulebook::from_parts(checklist.clone(), CitationLibrary::default(), SpecialTopics::default()).unwrap();
            for s in checklist.categories.iter().flat_map(|c| c.subcategories.iter()) {
                let text = format!("{}{}{}", prefix, s.red_flags[0], suffix);
                prop_assert!(rb.pre_screen(&text).triggered_subcategory_ids.contains(&s.id));
            }
            // Generated filler never contains digits or '-', so no keyword matches.
            let filler = format!("{}{}", prefix, suffix);
            prop_assert!(rb.pre_screen(&filler).triggered_subcategory_ids.is_empty());
        }
    }
}
