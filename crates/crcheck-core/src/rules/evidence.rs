//! Evidence resolution: the criteria, citations and supplementary rules
//! that accompany a generation request.

use serde::Serialize;
use std::collections::BTreeSet;

use super::rulebook::Rulebook;

/// Marker emitted when no citation resolves.
pub const NO_RELATED_CITATION: &str = "No related citation.";

/// Everything the generation stage needs to know about the rules in play.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceBundle {
    /// Subcategory ids the evidence was resolved for
    pub issue_ids: BTreeSet<String>,

    /// Whether the ids came from the default fallback
    pub fell_back: bool,

    /// Special topics detected in the article
    pub special_topics: BTreeSet<String>,

    /// Rendered evidence text
    pub text: String,
}

impl Rulebook {
    /// Definitions and diagnostic questions for each known id, in
    /// hierarchy order.
    pub fn criteria_text(&self, issue_ids: &BTreeSet<String>) -> String {
        let mut blocks = Vec::new();

        for sub in self.subcategories().filter(|s| issue_ids.contains(&s.id)) {
            let mut block = format!("### {}. {}", sub.id, sub.name);
            if !sub.definition.is_empty() {
                block.push_str(&format!("\nDefinition: {}", sub.definition));
            }
            if !sub.diagnostic_questions.is_empty() {
                block.push_str("\nDiagnostic questions:");
                for q in &sub.diagnostic_questions {
                    block.push_str(&format!("\n  - {}", q.question));
                }
            }
            blocks.push(block);
        }

        blocks.join("\n\n")
    }

    /// Rendered citation blocks for the union of the citation refs of
    /// `issue_ids`, sorted by citation id.
    pub fn citation_text(&self, issue_ids: &BTreeSet<String>) -> String {
        let refs: BTreeSet<&str> = issue_ids
            .iter()
            .filter_map(|id| self.subcategory(id))
            .flat_map(|sub| sub.citation_refs.iter().map(String::as_str))
            .collect();

        self.render_citations(refs)
    }

    fn render_citations<'a>(&self, refs: impl IntoIterator<Item = &'a str>) -> String {
        let blocks: Vec<String> = refs
            .into_iter()
            .filter_map(|id| match self.library.codes.get(id) {
                Some(citation) => Some(citation.render()),
                None => {
                    tracing::debug!(citation_id = id, "Citation not found in library");
                    None
                }
            })
            .collect();

        if blocks.is_empty() {
            NO_RELATED_CITATION.to_string()
        } else {
            blocks.join("\n\n")
        }
    }

    /// Criteria and citations for `issue_ids`. Deterministic.
    pub fn resolve_evidence(&self, issue_ids: &BTreeSet<String>) -> String {
        format!(
            "## Evaluation criteria\n{}\n\n## Related citations\n{}",
            self.criteria_text(issue_ids),
            self.citation_text(issue_ids)
        )
    }

    /// Topic keys whose keywords occur in `text`.
    pub fn detect_special_topics(&self, text: &str) -> BTreeSet<String> {
        self.topics
            .topics
            .iter()
            .filter(|(_, topic)| topic.keywords.iter().any(|k| text.contains(k.as_str())))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Supplementary guideline text for the given topic keys. Unknown keys
    /// are skipped.
    pub fn special_topic_text(&self, topic_keys: &BTreeSet<String>) -> String {
        let mut blocks = Vec::new();

        for key in topic_keys {
            let Some(topic) = self.topics.topics.get(key) else {
                tracing::debug!(topic = %key, "Unknown special topic");
                continue;
            };

            let mut block = format!(
                "[auto-detected supplementary rule: {}]\n{}",
                key, topic.guideline
            );
            if !topic.citation_refs.is_empty() {
                let refs: BTreeSet<&str> = topic.citation_refs.iter().map(String::as_str).collect();
                block.push_str("\n\n");
                block.push_str(&self.render_citations(refs));
            }
            blocks.push(block);
        }

        blocks.join("\n\n")
    }

    /// Expand classified categories and assemble the full evidence text,
    /// including any special topics detected in `article_text`.
    pub fn evidence_bundle<I, S>(&self, categories: I, article_text: &str) -> EvidenceBundle
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let expansion = self.expand_issue_ids(categories);
        let special_topics = self.detect_special_topics(article_text);

        let mut text = self.resolve_evidence(&expansion.ids);
        if !special_topics.is_empty() {
            text.push_str("\n\n## Supplementary rules\n");
            text.push_str(&self.special_topic_text(&special_topics));
        }

        EvidenceBundle {
            issue_ids: expansion.ids,
            fell_back: expansion.fell_back,
            special_topics,
            text,
        }
    }
}
