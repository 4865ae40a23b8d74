use research_flow::GraphError;
use thiserror::Error;

/// Top-level error for driving research sessions.
///
/// Stage failures are not errors at this level: they are recorded on the session as
/// `PipelineState::FailedAt`. These variants cover misuse and engine faults.
#[derive(Error, Debug)]
pub enum ResearchError {
    #[error("topic must not be empty")]
    EmptyTopic,

    #[error("session {0} has no research state")]
    MissingSessionState(String),

    #[error("workflow error: {0}")]
    Workflow(#[from] GraphError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("research store error: {0}")]
    Store(#[from] StoreError),
}

/// Failure of the academic-index search collaborator.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Request(String),

    #[error("search service returned HTTP {0}")]
    Status(u16),

    #[error("search response could not be read: {0}")]
    Malformed(String),
}

/// Failure of the research store collaborator.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("research store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid backend configuration: {0}")]
    InvalidBackend(String),

    #[error("cannot build HTTP client: {0}")]
    HttpClient(String),
}
