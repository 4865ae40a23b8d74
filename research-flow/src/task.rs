use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{context::Context, error::Result};

/// Result of a task execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Next action to take
    pub next_action: NextAction,
    /// Short human-readable outcome, recorded on the session
    pub status_message: Option<String>,
    /// Filled in by the graph with the id of the task that produced this result
    #[serde(default)]
    pub task_id: String,
}

impl TaskResult {
    pub fn new_with_status(next_action: NextAction, status_message: impl Into<String>) -> Self {
        Self {
            next_action,
            status_message: Some(status_message.into()),
            task_id: String::new(),
        }
    }
}

/// Defines what should happen after a task completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NextAction {
    /// Advance the session to the next task along the default edge
    Continue,
    /// End the graph execution
    End,
}

/// Core trait that all tasks must implement
#[async_trait]
pub trait Task: Send + Sync {
    /// Unique identifier for this task
    fn id(&self) -> &str;

    /// Execute the task with the given context
    async fn run(&self, context: Context) -> Result<TaskResult>;
}
