pub mod config;
pub mod error;
pub mod generation;
pub mod knowledge_graph;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod prompts;
pub mod search;
pub mod store;
pub mod tasks;
pub mod workflow;

pub use config::{EnvSecrets, PipelineConfig, SecretSource};
pub use error::{ConfigError, ResearchError, SearchError, StoreError};
pub use generation::{FallbackChain, GenerationClient, GenerationError, StageChains};
pub use knowledge_graph::GraphBuilder;
pub use models::*;
pub use orchestrator::{ProgressEvent, ProgressSender, ResearchOrchestrator};
pub use parser::{ResponseParser, StageRecord};
pub use search::{ArxivSearch, PaperSearch};
pub use store::{InMemoryResearchStore, ResearchRecord, ResearchStore};
pub use workflow::{PipelineDeps, build_research_workflow, create_research_session};
