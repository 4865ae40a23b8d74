//! FlowRunner – loads a session, executes exactly **one** graph step, and persists the updated
//! session back to storage.
//!
//! Steps for the same session id are serialized through a per-session async lock, so two callers
//! driving one session can never interleave their load/execute/save cycles. Out-of-band edits go
//! through [`FlowRunner::update_session`], which takes the same lock. Different sessions never
//! contend with each other, and a lock is dropped from the table once nobody holds it.
//!
//! Cancellation is cooperative: [`FlowRunner::run_cancellable`] checks the token before a step
//! starts and never interrupts a step that is already running.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    error::{GraphError, Result},
    graph::{ExecutionResult, Graph},
    storage::{Session, SessionStorage},
};

/// What happened when a cancellable step was requested
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Executed(ExecutionResult),
    /// The token was set before the step started; `pending_task_id` did not run
    Cancelled { pending_task_id: String },
}

/// High-level helper that orchestrates the common _load → execute → save_ pattern.
#[derive(Clone)]
pub struct FlowRunner {
    graph: Arc<Graph>,
    storage: Arc<dyn SessionStorage>,
    session_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl FlowRunner {
    pub fn new(graph: Arc<Graph>, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            graph,
            storage,
            session_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn storage(&self) -> &Arc<dyn SessionStorage> {
        &self.storage
    }

    /// Execute **exactly one** task for the given `session_id` and persist the updated session.
    pub async fn run(&self, session_id: &str) -> Result<ExecutionResult> {
        match self.step(session_id, None).await? {
            StepOutcome::Executed(result) => Ok(result),
            StepOutcome::Cancelled { pending_task_id } => Err(GraphError::TaskExecutionFailed(
                format!("step {pending_task_id} was cancelled"),
            )),
        }
    }

    /// Like [`FlowRunner::run`], but skips the step when `cancel` is already set.
    pub async fn run_cancellable(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        self.step(session_id, Some(cancel)).await
    }

    /// Load the session, apply `apply` and save it, serialized with any step running on the same
    /// session. Nothing is saved when `apply` fails.
    pub async fn update_session<T, E>(
        &self,
        session_id: &str,
        apply: impl FnOnce(&mut Session) -> std::result::Result<T, E> + Send,
    ) -> std::result::Result<T, E>
    where
        E: From<GraphError>,
    {
        let lock = self.lock_for(session_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.update_locked(session_id, apply).await
        };
        self.release(session_id, lock);
        outcome
    }

    async fn update_locked<T, E>(
        &self,
        session_id: &str,
        apply: impl FnOnce(&mut Session) -> std::result::Result<T, E> + Send,
    ) -> std::result::Result<T, E>
    where
        E: From<GraphError>,
    {
        let mut session = self.load(session_id).await?;
        let value = apply(&mut session)?;
        self.storage.save(session).await?;
        Ok(value)
    }

    async fn step(
        &self,
        session_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<StepOutcome> {
        let lock = self.lock_for(session_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.step_locked(session_id, cancel).await
        };
        self.release(session_id, lock);
        outcome
    }

    async fn step_locked(
        &self,
        session_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<StepOutcome> {
        let mut session = self.load(session_id).await?;

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            info!(session_id, task_id = %session.current_task_id, "step skipped, session cancelled");
            return Ok(StepOutcome::Cancelled {
                pending_task_id: session.current_task_id,
            });
        }

        debug!(session_id, task_id = %session.current_task_id, "executing step");
        let result = self.graph.execute_session(&mut session).await?;

        self.storage.save(session).await?;

        Ok(StepOutcome::Executed(result))
    }

    async fn load(&self, session_id: &str) -> Result<Session> {
        self.storage
            .get(session_id)
            .await?
            .ok_or_else(|| GraphError::SessionNotFound(session_id.to_string()))
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.session_locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop our handle and forget the lock if no other caller holds or waits on it.
    fn release(&self, session_id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.session_locks
            .remove_if(session_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
