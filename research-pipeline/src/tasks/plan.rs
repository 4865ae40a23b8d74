use std::sync::Arc;

use async_trait::async_trait;
use research_flow::{Context, Result, Task, TaskResult};
use tracing::info;

use super::{commit, generate, load_research};
use crate::generation::FallbackChain;
use crate::models::Stage;
use crate::parser::ResponseParser;
use crate::prompts::plan_prompt;

pub struct PlanTask {
    chain: Arc<FallbackChain>,
    parser: Arc<ResponseParser>,
}

impl PlanTask {
    pub fn new(chain: Arc<FallbackChain>, parser: Arc<ResponseParser>) -> Self {
        Self { chain, parser }
    }
}

#[async_trait]
impl Task for PlanTask {
    fn id(&self) -> &str {
        Stage::Planning.task_id()
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let mut research = load_research(&context).await?;
        info!(session_id = %research.session_id, topic = %research.topic, "planning research");

        let raw = generate(&self.chain, &plan_prompt(&research.topic)).await?;
        let plan = self.parser.parse_plan(&raw);
        info!(
            session_id = %research.session_id,
            keywords = plan.keywords.len(),
            timeframe = %plan.timeframe,
            "research plan ready"
        );

        research.plan = Some(plan);
        commit(
            &context,
            Stage::Planning,
            research,
            "Research plan created".to_string(),
        )
        .await
    }
}
