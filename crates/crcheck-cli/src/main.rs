//! crcheck CLI
//!
//! Command-line interface for journalism-ethics evaluation of news articles.
//!
//! ## Usage
//!
//! ```bash
//! # Evaluate one article (JSON with title, content, url, ...)
//! crcheck evaluate --article article.json
//!
//! # Pipe from stdin, JSON output
//! cat article.json | crcheck evaluate --format json
//!
//! # Several articles concurrently
//! crcheck batch a.json b.json c.json
//!
//! # Offline helpers
//! crcheck categories
//! crcheck checklist
//! crcheck prescreen --article article.json
//! crcheck rules validate --config crcheck.yaml
//! crcheck rules evidence 1 3-2 --article article.json
//! ```
//!
//! ## Exit Codes
//!
//! - 0: Evaluation completed
//! - 1: Article is not evaluable
//! - 2: Report generation failed
//! - 3: Error

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crcheck_core::{PipelineRequest, ReportAudience, Rulebook};
use crcheck_runtime::{
    build_orchestrator, load_rulebook, EvaluationError, EvaluationOutcome, EvaluationReport,
    RuntimeConfig,
};

/// crcheck: descriptive journalism-ethics reviews for news articles
#[derive(Parser)]
#[command(name = "crcheck")]
#[command(version)]
#[command(about = "Evaluate news articles against journalism ethics criteria", long_about = None)]
struct Cli {
    /// Runtime configuration (YAML). Defaults are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one article
    Evaluate {
        /// Path to the article JSON (reads from stdin if not provided)
        #[arg(short, long)]
        article: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,

        /// Show classification, evidence scope and usage
        #[arg(long)]
        explain: bool,
    },

    /// Evaluate several articles concurrently
    Batch {
        /// Article JSON files (each holds one article or an array of articles)
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "json")]
        format: OutputFormat,
    },

    /// Print the category list used for classification
    Categories,

    /// Print the diagnostic checklist
    Checklist,

    /// Run the local keyword scan on an article
    Prescreen {
        /// Path to the article JSON (reads from stdin if not provided)
        #[arg(short, long)]
        article: Option<PathBuf>,
    },

    /// Rule data commands
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
}

#[derive(Subcommand)]
enum RulesAction {
    /// Load and validate the configured rule files
    Validate,

    /// Show the evidence the generator would receive for some categories
    Evidence {
        /// Category or subcategory ids (or names)
        #[arg(required = true)]
        categories: Vec<String>,

        /// Article used for special-topic detection
        #[arg(short, long)]
        article: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// One article or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum ArticleInput {
    One(PipelineRequest),
    Many(Vec<PipelineRequest>),
}

impl ArticleInput {
    fn into_vec(self) -> Vec<PipelineRequest> {
        match self {
            ArticleInput::One(request) => vec![request],
            ArticleInput::Many(requests) => requests,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(io::stderr)
        .init();

    match run(cli) {
        Ok(exit_code) => exit_code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(3)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Evaluate {
            article,
            format,
            explain,
        } => evaluate_command(config, article, format, explain),
        Commands::Batch { paths, format } => batch_command(config, paths, format),
        Commands::Categories => {
            println!("{}", rulebook(&config)?.list_categories());
            Ok(ExitCode::from(0))
        }
        Commands::Checklist => {
            println!("{}", rulebook(&config)?.diagnostic_checklist());
            Ok(ExitCode::from(0))
        }
        Commands::Prescreen { article } => prescreen_command(config, article),
        Commands::Rules { action } => match action {
            RulesAction::Validate => validate_rules(config),
            RulesAction::Evidence {
                categories,
                article,
            } => evidence_command(config, categories, article),
        },
    }
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path)),
        None => Ok(RuntimeConfig::default()),
    }
}

fn rulebook(config: &RuntimeConfig) -> Result<Rulebook> {
    load_rulebook(config).with_context(|| {
        format!(
            "Failed to load rules from {:?} and {:?}",
            config.sources.checklist, config.sources.library
        )
    })
}

fn read_articles(path: Option<&Path>) -> Result<Vec<PipelineRequest>> {
    let content = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read article from {:?}", path))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read from stdin")?;
            buffer
        }
    };

    let input: ArticleInput =
        serde_json::from_str(&content).context("Article is not valid article JSON")?;
    Ok(input.into_vec())
}

fn read_article(path: Option<&Path>) -> Result<PipelineRequest> {
    read_articles(path)?
        .into_iter()
        .next()
        .context("No article in input")
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

fn evaluate_command(
    config: RuntimeConfig,
    article: Option<PathBuf>,
    format: OutputFormat,
    explain: bool,
) -> Result<ExitCode> {
    let request = read_article(article.as_deref())?;
    let orchestrator = build_orchestrator(config).context("Failed to set up evaluation")?;

    let result = runtime()?.block_on(orchestrator.evaluate(&request));

    match format {
        OutputFormat::Json => print_json_result(&result)?,
        OutputFormat::Text => print_text_result(&result, explain),
    }

    Ok(exit_code(&result))
}

fn batch_command(config: RuntimeConfig, paths: Vec<PathBuf>, format: OutputFormat) -> Result<ExitCode> {
    let mut requests = Vec::new();
    for path in &paths {
        requests.extend(read_articles(Some(path))?);
    }
    let orchestrator = build_orchestrator(config).context("Failed to set up evaluation")?;

    let results = runtime()?.block_on(orchestrator.evaluate_batch(&requests));

    let mut code = 0;
    for (request, result) in requests.iter().zip(&results) {
        match format {
            OutputFormat::Json => print_json_result(result)?,
            OutputFormat::Text => {
                println!("##### {} ({})", request.title, request.url);
                println!();
                print_text_result(result, false);
                println!();
            }
        }
        code = code.max(exit_code_value(result));
    }

    Ok(ExitCode::from(code))
}

fn exit_code_value(result: &Result<EvaluationOutcome, EvaluationError>) -> u8 {
    match result {
        Ok(EvaluationOutcome::Completed(_)) => 0,
        Ok(EvaluationOutcome::Ineligible { .. }) => 1,
        Err(EvaluationError::GenerationFailed { .. }) => 2,
        Err(_) => 3,
    }
}

fn exit_code(result: &Result<EvaluationOutcome, EvaluationError>) -> ExitCode {
    ExitCode::from(exit_code_value(result))
}

fn print_json_result(result: &Result<EvaluationOutcome, EvaluationError>) -> Result<()> {
    let json = match result {
        Ok(outcome) => serde_json::to_string_pretty(outcome)?,
        Err(e) => serde_json::to_string_pretty(&serde_json::json!({
            "status": "failed",
            "error": e.to_string(),
        }))?,
    };
    println!("{}", json);
    Ok(())
}

fn print_text_result(result: &Result<EvaluationOutcome, EvaluationError>, explain: bool) {
    match result {
        Ok(EvaluationOutcome::Completed(report)) => print_report(report, explain),
        Ok(EvaluationOutcome::Ineligible { reason, .. }) => {
            println!("NOT EVALUABLE");
            println!();
            println!("Reason: {}", reason);
        }
        Err(e) => {
            println!("FAILED");
            println!();
            println!("{}", e);
        }
    }
}

fn print_report(report: &EvaluationReport, explain: bool) {
    let info = &report.result.article_info;
    println!("{}", info.title);
    println!("{}", info.url);
    for (label, value) in [
        ("Publisher", &info.publisher),
        ("Journalist", &info.journalist),
        ("Published", &info.publish_date),
        ("Type", &info.article_type),
    ] {
        if let Some(value) = value {
            println!("{}: {}", label, value);
        }
    }
    println!();

    for audience in ReportAudience::ALL {
        if let Some(text) = report.result.report(audience) {
            println!("=== {} ===", audience);
            println!();
            println!("{}", text.trim());
            println!();
        }
    }

    if explain {
        println!("--- Evaluation Details ---");
        println!();
        println!("Categories: {}", report.categories.join(", "));
        if report.classification_fell_back {
            println!("  (classification failed, defaults used)");
        }
        let issue_ids: Vec<&str> = report.issue_ids.iter().map(String::as_str).collect();
        println!("Issues: {}", issue_ids.join(", "));
        if report.issue_ids_fell_back {
            println!("  (no category resolved, default issues used)");
        }
        if !report.special_topics.is_empty() {
            let topics: Vec<&str> = report.special_topics.iter().map(String::as_str).collect();
            println!("Special topics: {}", topics.join(", "));
        }
        for flag in &report.pre_screen.triggered_keywords {
            println!("  - keyword '{}' -> {} ({})", flag.keyword, flag.subcategory_id, flag.severity);
        }
        println!("Attempts: {}", report.attempts);
        println!(
            "Usage: {} calls, {} tokens, ~${:.4}",
            report.usage.llm_calls, report.usage.total_tokens(), report.usage.estimated_cost
        );
        println!("Evaluated at: {}", report.result.evaluated_at.to_rfc3339());
    }
}

fn prescreen_command(config: RuntimeConfig, article: Option<PathBuf>) -> Result<ExitCode> {
    let rulebook = rulebook(&config)?;
    let request = read_article(article.as_deref())?;
    let scan_text = request.scan_text();

    let pre_screen = rulebook.pre_screen(&scan_text);
    if pre_screen.triggered_keywords.is_empty() {
        println!("No red-flag keywords found.");
    } else {
        println!("Red-flag keywords:");
        for flag in &pre_screen.triggered_keywords {
            println!("  - '{}' -> {} ({})", flag.keyword, flag.subcategory_id, flag.severity);
        }
    }

    let topics = rulebook.detect_special_topics(&scan_text);
    if !topics.is_empty() {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        println!("Special topics: {}", topics.join(", "));
    }

    Ok(ExitCode::from(0))
}

fn validate_rules(config: RuntimeConfig) -> Result<ExitCode> {
    if let Err(e) = config.validate() {
        eprintln!("Config validation failed: {}", e);
        return Ok(ExitCode::from(1));
    }

    match load_rulebook(&config) {
        Ok(rulebook) => {
            println!("Rules are valid");
            println!();
            println!("Checklist: {:?}", config.sources.checklist);
            println!("Categories: {}", rulebook.category_count());
            println!("Subcategories: {}", rulebook.subcategory_count());
            println!("Red flags: {}", rulebook.red_flags().len());
            println!("Default issues: {}", rulebook.default_issue_ids().join(", "));
            Ok(ExitCode::from(0))
        }
        Err(e) => {
            eprintln!("Rule validation failed: {}", e);
            Ok(ExitCode::from(1))
        }
    }
}

fn evidence_command(
    config: RuntimeConfig,
    categories: Vec<String>,
    article: Option<PathBuf>,
) -> Result<ExitCode> {
    let rulebook = rulebook(&config)?;
    let scan_text = match article {
        Some(path) => read_article(Some(&path))?.scan_text(),
        None => String::new(),
    };

    let bundle = rulebook.evidence_bundle(&categories, &scan_text);
    if bundle.fell_back {
        eprintln!("No category matched; showing default issues.");
    }
    println!("{}", bundle.text);

    Ok(ExitCode::from(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crcheck_runtime::{AttemptError, ProviderError};

    #[test]
    fn test_article_input_accepts_one_or_many() {
        let one: ArticleInput =
            serde_json::from_str(r#"{"title": "T", "content": "Body", "url": "u"}"#).unwrap();
        assert_eq!(one.into_vec().len(), 1);

        let many: ArticleInput = serde_json::from_str(
            r#"[{"title": "A", "body": "a"}, {"title": "B", "body": "b"}]"#,
        )
        .unwrap();
        assert_eq!(many.into_vec()[1].title, "B");
    }

    #[test]
    fn test_exit_codes() {
        let ineligible = Ok(EvaluationOutcome::Ineligible {
            reason: "Advertisement".to_string(),
            usage: Default::default(),
        });
        assert_eq!(exit_code_value(&ineligible), 1);

        let failed = Err(EvaluationError::GenerationFailed {
            attempts: 3,
            last_cause: AttemptError::Remote(ProviderError::RateLimited { retry_after: None }),
            categories: vec![],
            issue_ids: Default::default(),
        });
        assert_eq!(exit_code_value(&failed), 2);

        let rejected = Err(EvaluationError::Provider(ProviderError::Unauthorized));
        assert_eq!(exit_code_value(&rejected), 3);
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["crcheck", "-vv", "evaluate", "--article", "a.json", "--format", "json"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Evaluate { format: OutputFormat::Json, .. }
        ));
    }
}
