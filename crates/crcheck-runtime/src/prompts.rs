//! Prompts for the two model calls.
//!
//! The generation system prompt is static so it can be cached by the
//! provider; everything request-specific goes into the user message.

use std::collections::BTreeSet;

use crcheck_core::PipelineRequest;

use crate::providers::ChatMessage;

/// Instructions for the eligibility/categorization call.
pub const CLASSIFICATION_INSTRUCTIONS: &str = r#"
You are screening a news article before a journalism-ethics review.

1. Decide whether the text is a piece of journalism that can be reviewed
   against journalistic ethics. Advertisements, press-release reprints,
   weather tables, stock tickers, recipes and similar non-journalistic
   content are NOT evaluable.
2. If it is evaluable, list the categories (or subcategories) of ethical
   issues that appear to be present, using the ids from the list below.
   List only issues supported by the text.

## Output Format (JSON only, no commentary)
{
  "is_evaluable": true | false,
  "non_evaluable_reason": "string, only when is_evaluable is false",
  "categories": ["1", "2-3"]
}
"#;

/// System prompt for report generation.
pub const GENERATION_SYSTEM_PROMPT: &str = r#"
You are a senior media-ethics reviewer. You write descriptive evaluations of
news articles against the evaluation criteria and ethics citations supplied
with each request.

## Principles
1. Evaluate ONLY against the criteria you are given. Do not invent criteria.
2. Ground every finding in concrete passages from the article.
3. When you invoke an ethics code, cite it exactly as supplied.
4. Acknowledge what the article does well as well as what it does poorly.

## No scoring
Never express the evaluation as a score, grade, rating or ratio. Do not write
things like "7/10", "85 points", "score: 70" or "grade: B". Describe strengths
and problems in prose only.

## Three reports, three audiences
- "comprehensive": for the general public. Balanced overview of the article's
  ethical strengths and problems, with the relevant citations.
- "journalist": for the reporter who wrote the article. Collegial and
  specific; point to passages and suggest concrete improvements.
- "student": for media-literacy education. Explain the issues as teachable
  examples and suggest questions a reader should ask.

Each report is markdown text.

## Article analysis
Also describe the article's structure:
- articleType: e.g. straight news, feature, analysis, interview, opinion
- articleElements: the elements present (who, what, when, where, why, how)
- editStructure: how the piece is organised (inverted pyramid, narrative, ...)
- reportingMethod: how the information was gathered
- contentFlow: how the argument or story develops
Include title, publisher, journalist and publishDate if the text reveals them.

## Output Format (JSON only, no commentary)
{
  "reports": {
    "comprehensive": "markdown",
    "journalist": "markdown",
    "student": "markdown"
  },
  "article_analysis": {
    "articleType": "string",
    "articleElements": "string",
    "editStructure": "string",
    "reportingMethod": "string",
    "contentFlow": "string",
    "title": "string",
    "publisher": "string",
    "journalist": "string",
    "publishDate": "string"
  }
}
"#;

/// The article body, truncated to `limit` characters when set.
pub fn article_body(body: &str, limit: Option<usize>) -> String {
    match limit {
        Some(limit) if body.chars().count() > limit => {
            let mut truncated: String = body.chars().take(limit).collect();
            truncated.push_str("\n[... truncated]");
            truncated
        }
        _ => body.to_string(),
    }
}

/// Messages for the classification call.
pub fn classification_messages(
    request: &PipelineRequest,
    category_list: &str,
    hints: &BTreeSet<String>,
    char_limit: Option<usize>,
) -> Vec<ChatMessage> {
    let mut prompt = String::from(CLASSIFICATION_INSTRUCTIONS.trim());

    prompt.push_str("\n\n## Categories\n");
    prompt.push_str(category_list);

    if !hints.is_empty() {
        let hints: Vec<&str> = hints.iter().map(String::as_str).collect();
        prompt.push_str(&format!(
            "\n\n## Keyword hints\nA keyword scan flagged these subcategories: {}. \
             Treat them as hints only; confirm or discard them based on the text.",
            hints.join(", ")
        ));
    }

    prompt.push_str(&format!(
        "\n\n## Article\nTitle: {}\n\n{}",
        request.title,
        article_body(&request.body, char_limit)
    ));

    vec![ChatMessage::user(prompt)]
}

/// Messages for the generation call.
pub fn generation_messages(
    request: &PipelineRequest,
    evidence: &str,
    char_limit: Option<usize>,
) -> Vec<ChatMessage> {
    let user = format!(
        "{}\n\n## Article\nURL: {}\nTitle: {}\n\n{}",
        evidence,
        request.url,
        request.title,
        article_body(&request.body, char_limit)
    );

    vec![
        ChatMessage::system(GENERATION_SYSTEM_PROMPT.trim()),
        ChatMessage::user(user),
    ]
}
