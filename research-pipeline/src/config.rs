//! Pipeline configuration: backend chains, search settings and how secrets are resolved.
//!
//! API keys never appear in the config itself. Backends name the environment variable holding
//! their key and the key is resolved once, when the client is constructed.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::generation::huggingface::DEFAULT_HUGGINGFACE_URL;
use crate::generation::{
    FallbackChain, GenerationClient, HeuristicClient, HuggingFaceClient, OpenRouterClient,
    StageChains,
};
use crate::models::StageTag;
use crate::search::{ArxivSearch, DEFAULT_ARXIV_URL, DEFAULT_MAX_RESULTS};

const DEFAULT_OPENROUTER_MODEL: &str = "openai/gpt-4o-mini";
const DEFAULT_HUGGINGFACE_MODEL: &str = "mistralai/Mistral-7B-Instruct-v0.2";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Default fallback order, used for every stage without an override
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub stage_backends: HashMap<StageTag, Vec<BackendConfig>>,
    #[serde(default)]
    pub search: SearchConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backends: default_backends(),
            stage_backends: HashMap::new(),
            search: SearchConfig::default(),
        }
    }
}

fn default_backends() -> Vec<BackendConfig> {
    vec![
        BackendConfig::OpenRouter {
            model: DEFAULT_OPENROUTER_MODEL.to_string(),
            api_key_env: default_openrouter_key_env(),
            timeout_secs: default_openrouter_timeout(),
        },
        BackendConfig::HuggingFace {
            model: DEFAULT_HUGGINGFACE_MODEL.to_string(),
            api_key_env: default_huggingface_key_env(),
            base_url: default_huggingface_url(),
            timeout_secs: default_huggingface_timeout(),
        },
        BackendConfig::Heuristic {
            reference_year: None,
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    OpenRouter {
        model: String,
        #[serde(default = "default_openrouter_key_env")]
        api_key_env: String,
        #[serde(default = "default_openrouter_timeout")]
        timeout_secs: u64,
    },
    HuggingFace {
        model: String,
        #[serde(default = "default_huggingface_key_env")]
        api_key_env: String,
        #[serde(default = "default_huggingface_url")]
        base_url: String,
        #[serde(default = "default_huggingface_timeout")]
        timeout_secs: u64,
    },
    /// Offline generator; the reference year defaults to the current year
    Heuristic {
        #[serde(default)]
        reference_year: Option<i32>,
    },
}

fn default_openrouter_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_openrouter_timeout() -> u64 {
    30
}

fn default_huggingface_key_env() -> String {
    "HUGGINGFACE_API_KEY".to_string()
}

fn default_huggingface_url() -> String {
    DEFAULT_HUGGINGFACE_URL.to_string()
}

fn default_huggingface_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub base_url: String,
    pub max_results: usize,
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ARXIV_URL.to_string(),
            max_results: DEFAULT_MAX_RESULTS,
            timeout_secs: 30,
        }
    }
}

impl SearchConfig {
    pub fn build(&self) -> Result<ArxivSearch, ConfigError> {
        ArxivSearch::new(
            self.base_url.clone(),
            self.max_results,
            Duration::from_secs(self.timeout_secs),
        )
    }
}

/// Where API keys come from.
pub trait SecretSource {
    fn secret(&self, name: &str) -> Option<String>;
}

/// Reads secrets from process environment variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn secret(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl<F> SecretSource for F
where
    F: Fn(&str) -> Option<String>,
{
    fn secret(&self, name: &str) -> Option<String> {
        self(name)
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Heuristic generator only. Makes no outbound generation calls.
    pub fn offline() -> Self {
        Self {
            backends: vec![BackendConfig::Heuristic {
                reference_year: None,
            }],
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let all = std::iter::once(&self.backends).chain(self.stage_backends.values());
        for backends in all {
            for backend in backends {
                backend.validate()?;
            }
        }
        if self.search.max_results == 0 {
            return Err(ConfigError::InvalidBackend(
                "search.max_results must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn backends_for(&self, stage: StageTag) -> &[BackendConfig] {
        self.stage_backends
            .get(&stage)
            .map(Vec::as_slice)
            .unwrap_or(&self.backends)
    }

    /// Construct one fallback chain per stage. Backends whose API key is not available are left
    /// out of the chain.
    pub fn build_chains(&self, secrets: &impl SecretSource) -> Result<StageChains, ConfigError> {
        let plan = self.build_chain(StageTag::Plan, secrets)?;
        let summary = self.build_chain(StageTag::Summary, secrets)?;
        let critique = self.build_chain(StageTag::Critique, secrets)?;
        Ok(StageChains::new(plan, summary, critique))
    }

    fn build_chain(
        &self,
        stage: StageTag,
        secrets: &impl SecretSource,
    ) -> Result<FallbackChain, ConfigError> {
        let backends = self.backends_for(stage);
        let mut clients: Vec<Arc<dyn GenerationClient>> = Vec::with_capacity(backends.len());
        for backend in backends {
            if let Some(client) = backend.build(secrets)? {
                clients.push(client);
            }
        }

        let chain = FallbackChain::new(clients);
        if !backends
            .iter()
            .any(|b| matches!(b, BackendConfig::Heuristic { .. }))
        {
            warn!(%stage, "fallback chain has no offline terminal, stage can fail outright");
        }
        info!(%stage, backends = ?chain.backend_names(), "fallback chain ready");
        Ok(chain)
    }
}

impl BackendConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            BackendConfig::OpenRouter {
                model,
                timeout_secs,
                ..
            }
            | BackendConfig::HuggingFace {
                model,
                timeout_secs,
                ..
            } => {
                if model.trim().is_empty() {
                    return Err(ConfigError::InvalidBackend("model must not be empty".into()));
                }
                if *timeout_secs == 0 {
                    return Err(ConfigError::InvalidBackend(format!(
                        "timeout for {model} must be at least one second"
                    )));
                }
                Ok(())
            }
            BackendConfig::Heuristic { .. } => Ok(()),
        }
    }

    /// `Ok(None)` when the backend's key is missing.
    fn build(
        &self,
        secrets: &impl SecretSource,
    ) -> Result<Option<Arc<dyn GenerationClient>>, ConfigError> {
        let client: Arc<dyn GenerationClient> = match self {
            BackendConfig::OpenRouter {
                model,
                api_key_env,
                timeout_secs,
            } => {
                let Some(key) = resolve_key(secrets, api_key_env) else {
                    info!(backend = "openrouter", env = %api_key_env, "no API key, backend skipped");
                    return Ok(None);
                };
                Arc::new(OpenRouterClient::new(
                    &key,
                    model.clone(),
                    Duration::from_secs(*timeout_secs),
                ))
            }
            BackendConfig::HuggingFace {
                model,
                api_key_env,
                base_url,
                timeout_secs,
            } => {
                let Some(key) = resolve_key(secrets, api_key_env) else {
                    info!(backend = "huggingface", env = %api_key_env, "no API key, backend skipped");
                    return Ok(None);
                };
                Arc::new(HuggingFaceClient::new(
                    key,
                    base_url,
                    model,
                    Duration::from_secs(*timeout_secs),
                )?)
            }
            BackendConfig::Heuristic { reference_year } => Arc::new(match reference_year {
                Some(year) => HeuristicClient::new(*year),
                None => HeuristicClient::current(),
            }),
        };
        Ok(Some(client))
    }
}

fn resolve_key(secrets: &impl SecretSource, name: &str) -> Option<String> {
    secrets
        .secret(name)
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}
