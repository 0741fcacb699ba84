//! Resilience patterns for crcheck-runtime.
//!
//! This module provides:
//! - Bounded retry with exponential backoff
//! - Per-request usage accounting

mod retry;
mod usage;

pub use retry::RetryPolicy;
pub use usage::{LlmUsage, UsageRecorder};
