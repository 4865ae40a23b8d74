use std::time::Duration;

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openrouter;
use tracing::debug;

use super::{GenerationClient, GenerationError, PromptSpec};

/// Commercial chat-completion backend reached through OpenRouter.
pub struct OpenRouterClient {
    name: String,
    client: openrouter::Client,
    model: String,
    timeout: Duration,
}

impl OpenRouterClient {
    pub fn new(api_key: &str, model: impl Into<String>, timeout: Duration) -> Self {
        let model = model.into();
        Self {
            name: format!("openrouter:{model}"),
            client: openrouter::Client::new(api_key),
            model,
            timeout,
        }
    }
}

#[async_trait]
impl GenerationClient for OpenRouterClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &PromptSpec) -> Result<String, GenerationError> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(prompt.preamble)
            .temperature(prompt.params.temperature)
            .max_tokens(u64::from(prompt.params.max_tokens))
            .build();

        debug!(backend = %self.name, stage = %prompt.stage, "sending completion request");

        let call = async { agent.prompt(prompt.text.as_str()).await };
        match tokio::time::timeout(self.timeout, call).await {
            Err(_) => Err(GenerationError::Timeout),
            Ok(Err(e)) => Err(classify_provider_error(&e.to_string())),
            Ok(Ok(text)) if text.trim().is_empty() => {
                Err(GenerationError::rejected("empty completion"))
            }
            Ok(Ok(text)) => Ok(text),
        }
    }
}

/// rig surfaces provider failures as formatted messages; map them onto the closed error set.
fn classify_provider_error(message: &str) -> GenerationError {
    let lower = message.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|needle| lower.contains(needle));

    if has(&["401", "403", "unauthorized", "invalid api key", "no auth credentials"]) {
        GenerationError::Unauthorized
    } else if has(&["402", "quota", "insufficient credits", "insufficient_quota"]) {
        GenerationError::QuotaExhausted
    } else if has(&["429", "rate limit", "rate-limit", "too many requests"]) {
        GenerationError::RateLimited
    } else if has(&["timed out", "timeout"]) {
        GenerationError::Timeout
    } else if has(&["error sending request", "connection", "dns", "503", "502"]) {
        GenerationError::Unreachable
    } else {
        GenerationError::rejected(message)
    }
}
