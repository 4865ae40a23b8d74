//! The five pipeline stages, one workflow task each.
//!
//! Every task reads the [`ResearchSession`] from the workflow context, checks that the previous
//! stage's output is present, and writes the session back only once its own output is complete.
//! A task that fails therefore leaves the earlier outputs exactly as they were.

pub mod critique;
pub mod graph_build;
pub mod plan;
pub mod search;
pub mod summarize;

use research_flow::{Context, GraphError, NextAction, Result, TaskResult};
use tracing::info;

use crate::generation::{FallbackChain, PromptSpec};
use crate::models::{PipelineState, ResearchSession, Stage};

pub use critique::CritiqueTask;
pub use graph_build::GraphBuildTask;
pub use plan::PlanTask;
pub use search::SearchTask;
pub use summarize::SummarizeTask;

pub mod session_keys {
    /// The serialized [`crate::models::ResearchSession`]
    pub const RESEARCH: &str = "research";
}

pub(crate) async fn load_research(context: &Context) -> Result<ResearchSession> {
    context
        .get(session_keys::RESEARCH)
        .await
        .ok_or_else(|| GraphError::ContextError("research session not found in context".into()))
}

/// Error for a task whose prerequisite output has not been committed.
pub(crate) fn missing(stage: Stage, what: &str) -> GraphError {
    GraphError::ContextError(format!("{} stage requires {what}", stage.name()))
}

/// Store the stage's output and move the session to the next stage.
pub(crate) async fn commit(
    context: &Context,
    stage: Stage,
    mut research: ResearchSession,
    status: String,
) -> Result<TaskResult> {
    research.state = PipelineState::after(stage);
    let next_action = match research.state {
        PipelineState::Complete => NextAction::End,
        _ => NextAction::Continue,
    };

    info!(
        session_id = %research.session_id,
        stage = %stage,
        next = %research.state.label(),
        "stage committed"
    );
    context.set(session_keys::RESEARCH, &research).await?;

    Ok(TaskResult::new_with_status(next_action, status))
}

/// One chain call. Exhausting the chain fails the task.
pub(crate) async fn generate(chain: &FallbackChain, prompt: &PromptSpec) -> Result<String> {
    chain
        .invoke(prompt)
        .await
        .map(|generation| generation.text)
        .map_err(|e| GraphError::TaskExecutionFailed(e.to_string()))
}
