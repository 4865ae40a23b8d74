use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use super::{GenerationClient, GenerationError, PromptSpec};
use crate::models::StageTag;

/// Successful output of a chain invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    /// Name of the backend that answered
    pub backend: String,
    /// Number of backends tried, including the one that answered
    pub attempts: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendFailure {
    pub backend: String,
    pub error: GenerationError,
}

/// Every backend in the chain failed. Failures are kept in the order they were tried.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("all {} backends failed for the {stage} stage", .failures.len())]
pub struct AggregateError {
    pub stage: StageTag,
    pub failures: Vec<BackendFailure>,
}

/// Ordered list of backends tried one after another until one answers.
///
/// Every [`GenerationError`] kind triggers the next backend. Backends are called sequentially;
/// the first success short-circuits the rest.
#[derive(Clone)]
pub struct FallbackChain {
    clients: Vec<Arc<dyn GenerationClient>>,
}

impl FallbackChain {
    pub fn new(clients: Vec<Arc<dyn GenerationClient>>) -> Self {
        Self { clients }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.clients
            .iter()
            .map(|client| client.name().to_string())
            .collect()
    }

    pub async fn invoke(&self, prompt: &PromptSpec) -> Result<Generation, AggregateError> {
        let mut failures = Vec::new();

        for (i, client) in self.clients.iter().enumerate() {
            match client.generate(prompt).await {
                Ok(text) => {
                    debug!(
                        stage = %prompt.stage,
                        backend = client.name(),
                        attempts = i + 1,
                        "generation succeeded"
                    );
                    return Ok(Generation {
                        text,
                        backend: client.name().to_string(),
                        attempts: i + 1,
                    });
                }
                Err(error) => {
                    warn!(
                        stage = %prompt.stage,
                        backend = client.name(),
                        backend_index = i,
                        error_kind = error.kind(),
                        "backend failed, trying next"
                    );
                    failures.push(BackendFailure {
                        backend: client.name().to_string(),
                        error,
                    });
                }
            }
        }

        Err(AggregateError {
            stage: prompt.stage,
            failures,
        })
    }
}

/// One fallback chain per generation stage.
#[derive(Clone)]
pub struct StageChains {
    plan: Arc<FallbackChain>,
    summary: Arc<FallbackChain>,
    critique: Arc<FallbackChain>,
}

impl StageChains {
    pub fn new(plan: FallbackChain, summary: FallbackChain, critique: FallbackChain) -> Self {
        Self {
            plan: Arc::new(plan),
            summary: Arc::new(summary),
            critique: Arc::new(critique),
        }
    }

    /// The same chain for every stage
    pub fn uniform(chain: FallbackChain) -> Self {
        let chain = Arc::new(chain);
        Self {
            plan: chain.clone(),
            summary: chain.clone(),
            critique: chain,
        }
    }

    pub fn for_stage(&self, stage: StageTag) -> Arc<FallbackChain> {
        match stage {
            StageTag::Plan => self.plan.clone(),
            StageTag::Summary => self.summary.clone(),
            StageTag::Critique => self.critique.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::HeuristicClient;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingClient {
        name: String,
        error: GenerationError,
        calls: AtomicUsize,
    }

    impl FailingClient {
        fn new(name: &str, error: GenerationError) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                error,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl GenerationClient for FailingClient {
        fn name(&self) -> &str {
            &self.name
        }

        async fn generate(&self, _prompt: &PromptSpec) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(self.error.clone())
        }
    }

    struct FixedClient(&'static str);

    #[async_trait]
    impl GenerationClient for FixedClient {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, _prompt: &PromptSpec) -> Result<String, GenerationError> {
            Ok(self.0.to_string())
        }
    }

    fn prompt() -> PromptSpec {
        PromptSpec::new(StageTag::Critique, "Title: anything")
    }

    #[tokio::test]
    async fn falls_through_to_the_last_client() {
        let clients: Vec<Arc<dyn GenerationClient>> = vec![
            FailingClient::new("primary", GenerationError::Unauthorized),
            FailingClient::new("community", GenerationError::RateLimited),
            FailingClient::new("backup", GenerationError::Timeout),
            Arc::new(FixedClient("Score: 8")),
        ];
        let chain = FallbackChain::new(clients);

        let generation = chain.invoke(&prompt()).await.unwrap();
        assert_eq!(generation.text, "Score: 8");
        assert_eq!(generation.backend, "fixed");
        assert_eq!(generation.attempts, 4);
    }

    #[tokio::test]
    async fn first_success_short_circuits() {
        let never = FailingClient::new("never", GenerationError::Unreachable);
        let clients: Vec<Arc<dyn GenerationClient>> =
            vec![Arc::new(FixedClient("ok")), never.clone()];

        let generation = FallbackChain::new(clients).invoke(&prompt()).await.unwrap();
        assert_eq!(generation.attempts, 1);
        assert_eq!(never.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn all_failures_are_reported_in_order() {
        let clients: Vec<Arc<dyn GenerationClient>> = vec![
            FailingClient::new("a", GenerationError::QuotaExhausted),
            FailingClient::new("b", GenerationError::Unreachable),
            FailingClient::new("c", GenerationError::BackendRejected("bad input".into())),
        ];

        let err = FallbackChain::new(clients).invoke(&prompt()).await.unwrap_err();
        assert_eq!(err.stage, StageTag::Critique);
        let names: Vec<&str> = err.failures.iter().map(|f| f.backend.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(err.failures[0].error, GenerationError::QuotaExhausted);
        assert_eq!(err.to_string(), "all 3 backends failed for the critique stage");
    }

    #[tokio::test]
    async fn empty_chain_is_an_aggregate_failure() {
        let err = FallbackChain::new(vec![]).invoke(&prompt()).await.unwrap_err();
        assert!(err.failures.is_empty());
    }

    #[tokio::test]
    async fn heuristic_terminal_always_answers() {
        let clients: Vec<Arc<dyn GenerationClient>> = vec![
            FailingClient::new("primary", GenerationError::Timeout),
            Arc::new(HeuristicClient::new(2024)),
        ];
        let generation = FallbackChain::new(clients).invoke(&prompt()).await.unwrap();
        assert_eq!(generation.backend, "heuristic");
        assert!(generation.text.contains("Score:"));
    }
}
