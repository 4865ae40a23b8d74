//! Drives research sessions through the five stages.
//!
//! The orchestrator owns the session lifecycle around the workflow engine: it turns a step
//! outcome into a [`PipelineState`], hands each committed stage output to the research store,
//! and reports progress. Stage failures are recorded on the session, not returned as errors.

use std::sync::Arc;

use research_flow::{
    CancellationToken, ExecutionStatus, FlowRunner, Session, SessionStorage, StepOutcome,
};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

use crate::error::ResearchError;
use crate::models::{FailureReport, PipelineState, ResearchSession, Stage, StageOutput};
use crate::store::ResearchStore;
use crate::tasks::session_keys;
use crate::workflow::{PipelineDeps, build_research_workflow, create_research_session};

/// Emitted after every state transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub session_id: String,
    /// 1-based stage position; 6 once complete
    pub stage_index: usize,
    pub label: String,
    pub state: PipelineState,
    /// Outcome reported by the stage that just ran, e.g. `Found 5 papers`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProgressEvent {
    fn of(research: &ResearchSession, detail: Option<String>) -> Self {
        Self {
            session_id: research.session_id.clone(),
            stage_index: research.state.stage_index(),
            label: research.state.label(),
            state: research.state,
            detail,
        }
    }
}

pub type ProgressSender = UnboundedSender<ProgressEvent>;

#[derive(Clone)]
pub struct ResearchOrchestrator {
    runner: FlowRunner,
    store: Arc<dyn ResearchStore>,
}

impl ResearchOrchestrator {
    pub fn new(
        deps: &PipelineDeps,
        sessions: Arc<dyn SessionStorage>,
        store: Arc<dyn ResearchStore>,
    ) -> Self {
        let graph = Arc::new(build_research_workflow(deps));
        Self {
            runner: FlowRunner::new(graph, sessions),
            store,
        }
    }

    /// Register a new session for `topic`. Blank topics are rejected.
    pub async fn create_session(&self, topic: &str) -> Result<String, ResearchError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ResearchError::EmptyTopic);
        }

        let session = create_research_session(topic)?;
        let session_id = session.id.clone();
        self.runner.storage().save(session).await?;
        info!(%session_id, topic, "research session created");
        Ok(session_id)
    }

    /// Create a session for `topic` and run it to a terminal state.
    pub async fn research(
        &self,
        topic: &str,
        cancel: &CancellationToken,
        progress: Option<&ProgressSender>,
    ) -> Result<ResearchSession, ResearchError> {
        let session_id = self.create_session(topic).await?;
        self.run(&session_id, cancel, progress).await
    }

    /// Current research state of a session
    pub async fn session(&self, session_id: &str) -> Result<ResearchSession, ResearchError> {
        let session = self.load(session_id).await?;
        research_of(&session)
    }

    /// Run stages until the session completes, fails or is cancelled.
    pub async fn run(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
        progress: Option<&ProgressSender>,
    ) -> Result<ResearchSession, ResearchError> {
        let mut research = self.session(session_id).await?;
        if research.state.is_terminal() {
            return Ok(research);
        }
        emit(progress, &research, None);

        while let PipelineState::Running(stage) = research.state {
            info!(%session_id, %stage, index = stage.index(), "stage starting");

            let mut detail = None;
            research = match self.runner.run_cancellable(session_id, cancel).await {
                Ok(StepOutcome::Cancelled { .. }) => {
                    warn!(%session_id, %stage, "session cancelled before stage");
                    self.mark(session_id, PipelineState::Cancelled(stage), None)
                        .await?
                }
                Ok(StepOutcome::Executed(result)) => {
                    let session = self.load(session_id).await?;
                    let research = research_of(&session)?;
                    match self.persist(&research, stage).await {
                        Ok(()) => {
                            if result.status == ExecutionStatus::Completed
                                && !research.state.is_terminal()
                            {
                                warn!(%session_id, %stage, "workflow ended before the pipeline completed");
                            }
                            detail = session.status_message;
                            research
                        }
                        Err(e) => {
                            error!(%session_id, %stage, error = %e, "research store rejected stage output");
                            self.fail(session_id, stage).await?
                        }
                    }
                }
                Err(e) => {
                    error!(%session_id, %stage, error = %e, "stage failed");
                    self.fail(session_id, stage).await?
                }
            };

            emit(progress, &research, detail);
            if matches!(research.state, PipelineState::Running(next) if next == stage) {
                // the step ran but did not move the session on
                return self.fail(session_id, stage).await;
            }
        }

        info!(%session_id, state = %research.state.label(), "research session finished");
        Ok(research)
    }

    /// Put a failed session back at its failed stage. Earlier outputs are reused.
    pub async fn retry_failed(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
        progress: Option<&ProgressSender>,
    ) -> Result<ResearchSession, ResearchError> {
        let research = self.session(session_id).await?;
        match research.state {
            PipelineState::FailedAt(stage) | PipelineState::Cancelled(stage) => {
                info!(%session_id, %stage, "resuming research session");
                self.rewind(session_id, stage).await?;
                self.run(session_id, cancel, progress).await
            }
            _ => Ok(research),
        }
    }

    async fn persist(&self, research: &ResearchSession, stage: Stage) -> Result<(), ResearchError> {
        let output = StageOutput::from_session(stage, research)
            .ok_or_else(|| ResearchError::MissingSessionState(research.session_id.clone()))?;
        self.store.put_stage(&research.topic, output).await?;
        Ok(())
    }

    async fn fail(&self, session_id: &str, stage: Stage) -> Result<ResearchSession, ResearchError> {
        self.mark(
            session_id,
            PipelineState::FailedAt(stage),
            Some(FailureReport::generic(stage)),
        )
        .await
    }

    async fn mark(
        &self,
        session_id: &str,
        state: PipelineState,
        failure: Option<FailureReport>,
    ) -> Result<ResearchSession, ResearchError> {
        self.runner
            .update_session(session_id, |session| {
                let mut research = research_of(session)?;
                research.state = state;
                research.failure = failure;
                session.context.set_sync(session_keys::RESEARCH, &research)?;
                Ok::<_, ResearchError>(research)
            })
            .await
    }

    /// Point the workflow back at `stage`'s task. A store failure leaves the workflow one task
    /// ahead of the recorded state.
    async fn rewind(&self, session_id: &str, stage: Stage) -> Result<(), ResearchError> {
        self.runner
            .update_session(session_id, |session| {
                let mut research = research_of(session)?;
                research.state = PipelineState::Running(stage);
                research.failure = None;
                session.current_task_id = stage.task_id().to_string();
                session.completed = false;
                session.status_message = None;
                session.context.set_sync(session_keys::RESEARCH, &research)?;
                Ok::<_, ResearchError>(())
            })
            .await
    }

    async fn load(&self, session_id: &str) -> Result<Session, ResearchError> {
        self.runner
            .storage()
            .get(session_id)
            .await?
            .ok_or_else(|| research_flow::GraphError::SessionNotFound(session_id.to_string()).into())
    }
}

fn research_of(session: &Session) -> Result<ResearchSession, ResearchError> {
    session
        .context
        .get_sync(session_keys::RESEARCH)
        .ok_or_else(|| ResearchError::MissingSessionState(session.id.clone()))
}

fn emit(progress: Option<&ProgressSender>, research: &ResearchSession, detail: Option<String>) {
    if let Some(sender) = progress {
        // a dropped receiver only means nobody is listening
        let _ = sender.send(ProgressEvent::of(research, detail));
    }
}
