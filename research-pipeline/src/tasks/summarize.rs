use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use research_flow::{Context, Result, Task, TaskResult};
use tracing::{debug, info};

use super::{commit, generate, load_research, missing};
use crate::generation::FallbackChain;
use crate::models::Stage;
use crate::parser::ResponseParser;
use crate::prompts::summary_prompt;

pub struct SummarizeTask {
    chain: Arc<FallbackChain>,
    parser: Arc<ResponseParser>,
}

impl SummarizeTask {
    pub fn new(chain: Arc<FallbackChain>, parser: Arc<ResponseParser>) -> Self {
        Self { chain, parser }
    }
}

#[async_trait]
impl Task for SummarizeTask {
    fn id(&self) -> &str {
        Stage::Summarizing.task_id()
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let mut research = load_research(&context).await?;
        let papers = research
            .papers
            .clone()
            .ok_or_else(|| missing(Stage::Summarizing, "search results"))?;

        let mut summaries = BTreeMap::new();
        for paper in &papers {
            debug!(session_id = %research.session_id, paper_id = %paper.id, "summarizing paper");
            let raw = generate(&self.chain, &summary_prompt(paper)).await?;
            let summary = self.parser.parse_summary(&raw).into_summary(paper.id.clone());
            summaries.insert(paper.id.clone(), summary);
        }
        info!(session_id = %research.session_id, summaries = summaries.len(), "papers summarized");

        let status = format!("Summarized {} papers", summaries.len());
        research.summaries = Some(summaries);
        commit(&context, Stage::Summarizing, research, status).await
    }
}
