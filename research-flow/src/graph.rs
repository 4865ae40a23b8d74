use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::{
    context::Context,
    error::{GraphError, Result},
    storage::Session,
    task::{NextAction, Task, TaskResult},
};

/// Edge between tasks in the graph
#[derive(Debug, Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

/// A graph of tasks executed one step at a time against a [`Session`].
pub struct Graph {
    pub id: String,
    tasks: HashMap<String, Arc<dyn Task>>,
    order: Vec<String>,
    edges: Vec<Edge>,
    start_task_id: Option<String>,
}

impl Graph {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tasks: HashMap::new(),
            order: Vec::new(),
            edges: Vec::new(),
            start_task_id: None,
        }
    }

    /// Add a task to the graph. The first task added becomes the start task.
    pub fn add_task(&mut self, task: Arc<dyn Task>) -> &mut Self {
        let task_id = task.id().to_string();
        if self.tasks.is_empty() {
            self.start_task_id = Some(task_id.clone());
        }
        if self.tasks.insert(task_id.clone(), task).is_none() {
            self.order.push(task_id);
        }
        self
    }

    fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.push(Edge {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    /// Execute exactly the session's current task and advance the session along
    /// the default edge. Failed tasks leave `current_task_id` untouched.
    pub async fn execute_session(&self, session: &mut Session) -> Result<ExecutionResult> {
        if session.completed {
            return Ok(ExecutionResult {
                task_id: session.current_task_id.clone(),
                status: ExecutionStatus::Completed,
            });
        }

        let result = self
            .execute_single_task(&session.current_task_id, session.context.clone())
            .await?;

        session.status_message = result.status_message;

        let status = match result.next_action {
            NextAction::End => ExecutionStatus::Completed,
            NextAction::Continue => match self.find_next_task(&result.task_id) {
                Some(next_task_id) => {
                    debug!(from = %result.task_id, to = %next_task_id, "advancing session");
                    session.current_task_id = next_task_id;
                    ExecutionStatus::Advanced
                }
                None => ExecutionStatus::Completed,
            },
        };

        if matches!(status, ExecutionStatus::Completed) {
            session.completed = true;
        }

        Ok(ExecutionResult {
            task_id: result.task_id,
            status,
        })
    }

    async fn execute_single_task(&self, task_id: &str, context: Context) -> Result<TaskResult> {
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| GraphError::TaskNotFound(task_id.to_string()))?;

        let mut result = task.run(context).await?;
        result.task_id = task_id.to_string();

        Ok(result)
    }

    /// Find the task reached from `current_task_id` along its first edge
    pub fn find_next_task(&self, current_task_id: &str) -> Option<String> {
        self.edges
            .iter()
            .find(|edge| edge.from == current_task_id)
            .map(|edge| edge.to.clone())
    }

    pub fn start_task_id(&self) -> Option<&str> {
        self.start_task_id.as_deref()
    }

    /// Task ids in insertion order
    pub fn task_ids(&self) -> &[String] {
        &self.order
    }
}

/// Builder for creating graphs
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            graph: Graph::new(id),
        }
    }

    pub fn add_task(mut self, task: Arc<dyn Task>) -> Self {
        self.graph.add_task(task);
        self
    }

    /// Chain every added task in insertion order
    pub fn chain_in_order(mut self) -> Self {
        let order = self.graph.order.clone();
        for pair in order.windows(2) {
            self.graph.add_edge(pair[0].clone(), pair[1].clone());
        }
        self
    }

    pub fn build(self) -> Graph {
        self.graph
    }
}

/// Outcome of one executed step
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub task_id: String,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// The session moved on to another task
    Advanced,
    /// The last task finished
    Completed,
}
