use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tracing::debug;

use super::{GenerationClient, GenerationError, PromptSpec};
use crate::error::ConfigError;

pub const DEFAULT_HUGGINGFACE_URL: &str = "https://api-inference.huggingface.co";

/// Community inference backend (Hugging Face Inference API).
pub struct HuggingFaceClient {
    name: String,
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HuggingFaceClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            name: format!("huggingface:{model}"),
            http,
            endpoint: format!("{}/models/{}", base_url.trim_end_matches('/'), model),
            api_key: api_key.into(),
        })
    }
}

impl std::fmt::Debug for HuggingFaceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HuggingFaceClient")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl GenerationClient for HuggingFaceClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &PromptSpec) -> Result<String, GenerationError> {
        let body = json!({
            "inputs": format!("{}\n\n{}", prompt.preamble, prompt.text),
            "parameters": {
                "max_new_tokens": prompt.params.max_tokens,
                "temperature": prompt.params.temperature,
                "return_full_text": false,
            }
        });

        debug!(backend = %self.name, stage = %prompt.stage, "sending inference request");

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;

        let status = response.status();
        let payload = response
            .text()
            .await
            .map_err(|e| map_transport_error(&e))?;

        if !status.is_success() {
            return Err(map_status(status, &payload));
        }

        let value: Value = serde_json::from_str(&payload)
            .map_err(|_| GenerationError::rejected("response is not JSON"))?;

        match extract_generated_text(&value) {
            Some(text) if !text.trim().is_empty() => Ok(text),
            Some(_) => Err(GenerationError::rejected("empty completion")),
            None => Err(GenerationError::rejected("unexpected response shape")),
        }
    }
}

fn map_transport_error(error: &reqwest::Error) -> GenerationError {
    if error.is_timeout() {
        GenerationError::Timeout
    } else {
        GenerationError::Unreachable
    }
}

/// Map an HTTP status code to the matching GenerationError.
fn map_status(status: StatusCode, body: &str) -> GenerationError {
    match status.as_u16() {
        401 | 403 => GenerationError::Unauthorized,
        402 => GenerationError::QuotaExhausted,
        429 => GenerationError::RateLimited,
        408 | 504 => GenerationError::Timeout,
        502 | 503 => GenerationError::Unreachable,
        code => {
            let reason = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| v.get("error")?.as_str().map(str::to_string))
                .unwrap_or_else(|| format!("HTTP {code}"));
            GenerationError::rejected(&reason)
        }
    }
}

/// Text generation returns `[{"generated_text": ..}]`, summarization models `[{"summary_text": ..}]`;
/// some deployments drop the array.
fn extract_generated_text(value: &Value) -> Option<String> {
    let item = match value {
        Value::Array(items) => items.first()?,
        other => other,
    };
    item.get("generated_text")
        .or_else(|| item.get("summary_text"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_error_kinds() {
        assert_eq!(map_status(StatusCode::UNAUTHORIZED, ""), GenerationError::Unauthorized);
        assert_eq!(map_status(StatusCode::PAYMENT_REQUIRED, ""), GenerationError::QuotaExhausted);
        assert_eq!(map_status(StatusCode::TOO_MANY_REQUESTS, ""), GenerationError::RateLimited);
        assert_eq!(map_status(StatusCode::SERVICE_UNAVAILABLE, ""), GenerationError::Unreachable);
        assert_eq!(
            map_status(StatusCode::BAD_REQUEST, r#"{"error":"Input too long"}"#),
            GenerationError::BackendRejected("Input too long".into())
        );
    }

    #[test]
    fn both_payload_shapes_are_accepted() {
        let generated = json!([{ "generated_text": "Strengths: [a]" }]);
        let summarized = json!({ "summary_text": "short" });
        assert_eq!(extract_generated_text(&generated).as_deref(), Some("Strengths: [a]"));
        assert_eq!(extract_generated_text(&summarized).as_deref(), Some("short"));
        assert_eq!(extract_generated_text(&json!({ "error": "loading" })), None);
    }

    #[test]
    fn debug_output_hides_the_api_key() {
        let client = HuggingFaceClient::new(
            "hf_secret_token",
            DEFAULT_HUGGINGFACE_URL,
            "gpt2",
            Duration::from_secs(10),
        )
        .unwrap();
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("hf_secret_token"));
        assert!(rendered.contains("<redacted>"));
    }
}
