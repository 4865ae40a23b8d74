pub mod context;
pub mod error;
pub mod graph;
pub mod runner;
pub mod storage;
pub mod task;

// Re-export commonly used types
pub use context::Context;
pub use error::{GraphError, Result};
pub use graph::{ExecutionResult, ExecutionStatus, Graph, GraphBuilder};
pub use runner::{FlowRunner, StepOutcome};
pub use storage::{InMemorySessionStorage, Session, SessionStorage};
pub use task::{NextAction, Task, TaskResult};
pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct AppendTask {
        id: String,
        next: NextAction,
    }

    #[async_trait]
    impl Task for AppendTask {
        fn id(&self) -> &str {
            &self.id
        }

        async fn run(&self, context: Context) -> Result<TaskResult> {
            let mut trail: Vec<String> = context.get("trail").await.unwrap_or_default();
            trail.push(self.id.clone());
            context.set("trail", trail).await?;

            Ok(TaskResult::new_with_status(self.next.clone(), format!("{} done", self.id)))
        }
    }

    struct FailingTask;

    #[async_trait]
    impl Task for FailingTask {
        fn id(&self) -> &str {
            "failing"
        }

        async fn run(&self, _context: Context) -> Result<TaskResult> {
            Err(GraphError::TaskExecutionFailed("boom".into()))
        }
    }

    fn task(id: &str, next: NextAction) -> Arc<dyn Task> {
        Arc::new(AppendTask {
            id: id.to_string(),
            next,
        })
    }

    fn three_step_runner() -> (FlowRunner, Arc<InMemorySessionStorage>) {
        let graph = GraphBuilder::new("steps")
            .add_task(task("first", NextAction::Continue))
            .add_task(task("second", NextAction::Continue))
            .add_task(task("third", NextAction::Continue))
            .chain_in_order()
            .build();
        let storage = Arc::new(InMemorySessionStorage::new());
        (FlowRunner::new(Arc::new(graph), storage.clone()), storage)
    }

    #[tokio::test]
    async fn runner_executes_one_step_per_call() {
        let (runner, storage) = three_step_runner();
        storage
            .save(Session::new_from_task("s1".into(), "first"))
            .await
            .unwrap();

        let first = runner.run("s1").await.unwrap();
        assert_eq!(first.task_id, "first");
        assert_eq!(first.status, ExecutionStatus::Advanced);

        runner.run("s1").await.unwrap();
        let last = runner.run("s1").await.unwrap();
        assert_eq!(last.status, ExecutionStatus::Completed);

        let session = storage.get("s1").await.unwrap().unwrap();
        assert!(session.completed);
        assert_eq!(session.status_message.as_deref(), Some("third done"));
        let trail: Vec<String> = session.context.get("trail").await.unwrap();
        assert_eq!(trail, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn cancelled_token_skips_the_pending_step() {
        let (runner, storage) = three_step_runner();
        storage
            .save(Session::new_from_task("s2".into(), "first"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        runner.run_cancellable("s2", &cancel).await.unwrap();
        cancel.cancel();

        let outcome = runner.run_cancellable("s2", &cancel).await.unwrap();
        match outcome {
            StepOutcome::Cancelled { pending_task_id } => assert_eq!(pending_task_id, "second"),
            other => panic!("expected cancellation, got {other:?}"),
        }

        let session = storage.get("s2").await.unwrap().unwrap();
        let trail: Vec<String> = session.context.get("trail").await.unwrap();
        assert_eq!(trail, vec!["first"]);
    }

    #[tokio::test]
    async fn failed_task_keeps_session_in_place() {
        let graph = GraphBuilder::new("failing")
            .add_task(task("ok", NextAction::Continue))
            .add_task(Arc::new(FailingTask))
            .chain_in_order()
            .build();
        let storage = Arc::new(InMemorySessionStorage::new());
        let runner = FlowRunner::new(Arc::new(graph), storage.clone());
        storage
            .save(Session::new_from_task("s3".into(), "ok"))
            .await
            .unwrap();

        runner.run("s3").await.unwrap();
        let err = runner.run("s3").await.unwrap_err();
        assert!(matches!(err, GraphError::TaskExecutionFailed(_)));

        let session = storage.get("s3").await.unwrap().unwrap();
        assert_eq!(session.current_task_id, "failing");
        assert!(!session.completed);
    }

    #[tokio::test]
    async fn unknown_session_is_reported() {
        let (runner, _) = three_step_runner();
        let err = runner.run("missing").await.unwrap_err();
        assert!(matches!(err, GraphError::SessionNotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn end_action_completes_early() {
        let graph = GraphBuilder::new("short")
            .add_task(task("only", NextAction::End))
            .add_task(task("never", NextAction::Continue))
            .chain_in_order()
            .build();
        let mut session = Session::new_from_task("s4".into(), "only");

        let result = graph.execute_session(&mut session).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(session.current_task_id, "only");
        assert_eq!(graph.start_task_id(), Some("only"));
    }
}
