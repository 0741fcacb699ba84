//! Token and cost accounting for a single evaluation.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::providers::TokenUsage;

/// List prices in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Pricing {
    input: f64,
    output: f64,
    cache_write: f64,
    cache_read: f64,
}

impl Pricing {
    /// Prices by model family; unknown models are priced as Sonnet.
    fn for_model(model: &str) -> Self {
        let (input, output) = if model.contains("haiku") {
            (1.0, 5.0)
        } else if model.contains("opus") {
            (15.0, 75.0)
        } else {
            (3.0, 15.0)
        };
        Self {
            input,
            output,
            cache_write: input * 1.25,
            cache_read: input * 0.1,
        }
    }

    fn cost(&self, tokens: &TokenUsage) -> f64 {
        let part = |count: u32, rate: f64| f64::from(count) * rate / 1_000_000.0;
        part(tokens.input_tokens, self.input)
            + part(tokens.output_tokens, self.output)
            + part(tokens.cache_write_tokens, self.cache_write)
            + part(tokens.cache_read_tokens, self.cache_read)
    }
}

/// Everything the model calls of one evaluation consumed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmUsage {
    /// Calls that returned text
    pub llm_calls: u32,
    /// Calls that failed before returning text
    pub failed_calls: u32,
    /// Calls served partly from the prompt cache
    pub cache_hits: u32,
    #[serde(flatten)]
    pub tokens: TokenUsage,
    pub estimated_cost: f64,
}

impl LlmUsage {
    pub fn add(&mut self, tokens: TokenUsage, model: &str) {
        self.llm_calls += 1;
        if tokens.cache_read_tokens > 0 {
            self.cache_hits += 1;
        }
        self.estimated_cost += Pricing::for_model(model).cost(&tokens);
        self.tokens += tokens;
    }

    pub fn total_tokens(&self) -> u32 {
        self.tokens.total()
    }
}

/// Request-local usage sink, dropped with its evaluation.
#[derive(Debug, Default)]
pub struct UsageRecorder {
    usage: Mutex<LlmUsage>,
}

impl UsageRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, tokens: TokenUsage, model: &str) {
        self.usage.lock().add(tokens, model);
    }

    pub fn record_failure(&self) {
        self.usage.lock().failed_calls += 1;
    }

    pub fn into_usage(self) -> LlmUsage {
        self.usage.into_inner()
    }
}
