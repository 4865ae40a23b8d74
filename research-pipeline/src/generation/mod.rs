//! Text-generation backends and the fallback chain that orders them.
//!
//! Every backend sits behind [`GenerationClient`]: one prompt in, one outbound call, raw text or a
//! [`GenerationError`] out. Adapters translate provider-specific failures into the closed error
//! enum so nothing above them needs to look at provider payloads.

pub mod chain;
pub mod heuristic;
pub mod huggingface;
pub mod openrouter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::StageTag;

pub use chain::{AggregateError, BackendFailure, FallbackChain, Generation, StageChains};
pub use heuristic::HeuristicClient;
pub use huggingface::HuggingFaceClient;
pub use openrouter::OpenRouterClient;

/// Bounded generation parameters. Fixed per stage; callers cannot override them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f64,
}

impl GenerationParams {
    pub fn for_stage(stage: StageTag) -> Self {
        match stage {
            StageTag::Plan => Self {
                max_tokens: 300,
                temperature: 0.7,
            },
            StageTag::Summary | StageTag::Critique => Self {
                max_tokens: 500,
                temperature: 0.7,
            },
        }
    }
}

/// A rendered prompt ready to send to any backend.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSpec {
    pub stage: StageTag,
    pub preamble: &'static str,
    pub text: String,
    pub params: GenerationParams,
}

impl PromptSpec {
    pub fn new(stage: StageTag, text: impl Into<String>) -> Self {
        Self {
            stage,
            preamble: preamble(stage),
            text: text.into(),
            params: GenerationParams::for_stage(stage),
        }
    }
}

fn preamble(stage: StageTag) -> &'static str {
    match stage {
        StageTag::Plan => "You are an expert research planner.",
        StageTag::Summary => {
            "You are an expert assistant that summarizes academic papers. Report key findings, methodology and significance."
        }
        StageTag::Critique => "You are a rigorous academic reviewer.",
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("backend rejected the credentials")]
    Unauthorized,

    #[error("backend rate limit reached")]
    RateLimited,

    #[error("backend quota exhausted")]
    QuotaExhausted,

    #[error("backend call timed out")]
    Timeout,

    #[error("backend unreachable")]
    Unreachable,

    #[error("backend rejected the request: {0}")]
    BackendRejected(String),
}

impl GenerationError {
    /// Stable name for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Unauthorized => "unauthorized",
            GenerationError::RateLimited => "rate_limited",
            GenerationError::QuotaExhausted => "quota_exhausted",
            GenerationError::Timeout => "timeout",
            GenerationError::Unreachable => "unreachable",
            GenerationError::BackendRejected(_) => "backend_rejected",
        }
    }

    /// Shorten a provider message before it is stored in `BackendRejected`.
    pub(crate) fn rejected(reason: &str) -> Self {
        const MAX_REASON: usize = 160;
        let reason = reason.trim();
        let reason = match reason.char_indices().nth(MAX_REASON) {
            Some((cut, _)) => format!("{}…", &reason[..cut]),
            None => reason.to_string(),
        };
        GenerationError::BackendRejected(reason)
    }
}

/// Uniform interface to one text-generation backend.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Name used in logs and aggregate failures
    fn name(&self) -> &str;

    /// Issue exactly one call for `prompt`. No retries, no caching.
    async fn generate(&self, prompt: &PromptSpec) -> Result<String, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_are_fixed_per_stage() {
        let plan = PromptSpec::new(StageTag::Plan, "topic");
        assert_eq!(plan.params.max_tokens, 300);
        let critique = PromptSpec::new(StageTag::Critique, "paper");
        assert_eq!(critique.params.max_tokens, 500);
        assert_eq!(critique.params.temperature, 0.7);
    }

    #[test]
    fn rejected_reason_is_truncated() {
        let long = "x".repeat(400);
        let GenerationError::BackendRejected(reason) = GenerationError::rejected(&long) else {
            panic!("expected BackendRejected");
        };
        assert!(reason.chars().count() <= 161);
        assert_eq!(GenerationError::Timeout.kind(), "timeout");
    }
}
