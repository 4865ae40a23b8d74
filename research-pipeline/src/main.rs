use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use research_flow::{CancellationToken, InMemorySessionStorage};
use research_pipeline::{
    EnvSecrets, InMemoryResearchStore, PipelineConfig, PipelineDeps, PipelineState,
    ResearchOrchestrator,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Research a topic: plan, search arXiv, summarize, critique and build a knowledge graph.
#[derive(Parser, Debug)]
#[command(name = "research-pipeline", version)]
struct Cli {
    /// Topic to research
    #[arg(short, long)]
    topic: String,

    /// YAML pipeline configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use the offline generator only
    #[arg(long)]
    offline: bool,

    /// Number of papers to fetch
    #[arg(long)]
    max_results: Option<usize>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "research_pipeline=info,research_flow=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if cli.offline {
        config.backends = PipelineConfig::offline().backends;
        config.stage_backends.clear();
    }
    if let Some(max_results) = cli.max_results {
        config.search.max_results = max_results;
    }
    config.validate()?;

    let chains = config.build_chains(&EnvSecrets)?;
    let search = config.search.build()?;
    let deps = PipelineDeps::new(chains, Arc::new(search));
    let orchestrator = ResearchOrchestrator::new(
        &deps,
        Arc::new(InMemorySessionStorage::new()),
        Arc::new(InMemoryResearchStore::new()),
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current stage");
            on_signal.cancel();
        }
    });

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<research_pipeline::ProgressEvent>();
    let reporter = tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            info!(stage = event.stage_index, detail = ?event.detail, "{}", event.label);
        }
    });

    let research = orchestrator
        .research(&cli.topic, &cancel, Some(&progress_tx))
        .await?;
    drop(progress_tx);
    reporter.await?;

    println!("{}", serde_json::to_string_pretty(&research)?);

    match research.state {
        PipelineState::Complete => Ok(()),
        state => anyhow::bail!("research did not complete: {}", state.label()),
    }
}
