use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use research_flow::{Context, Result, Task, TaskResult};
use tracing::{debug, info};

use super::{commit, generate, load_research, missing};
use crate::generation::FallbackChain;
use crate::models::Stage;
use crate::parser::ResponseParser;
use crate::prompts::critique_prompt;

pub struct CritiqueTask {
    chain: Arc<FallbackChain>,
    parser: Arc<ResponseParser>,
}

impl CritiqueTask {
    pub fn new(chain: Arc<FallbackChain>, parser: Arc<ResponseParser>) -> Self {
        Self { chain, parser }
    }
}

#[async_trait]
impl Task for CritiqueTask {
    fn id(&self) -> &str {
        Stage::Critiquing.task_id()
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let mut research = load_research(&context).await?;
        let papers = research
            .papers
            .clone()
            .ok_or_else(|| missing(Stage::Critiquing, "search results"))?;
        let summaries = research
            .summaries
            .clone()
            .ok_or_else(|| missing(Stage::Critiquing, "summaries"))?;

        let mut critiques = BTreeMap::new();
        for paper in &papers {
            let summary = summaries
                .get(&paper.id)
                .ok_or_else(|| missing(Stage::Critiquing, &format!("a summary of {}", paper.id)))?;

            debug!(session_id = %research.session_id, paper_id = %paper.id, "critiquing paper");
            let raw = generate(&self.chain, &critique_prompt(paper, summary)).await?;
            let critique = self.parser.parse_critique(&raw).into_critique(paper.id.clone());
            critiques.insert(paper.id.clone(), critique);
        }
        info!(session_id = %research.session_id, critiques = critiques.len(), "papers critiqued");

        let status = format!("Critiqued {} papers", critiques.len());
        research.critiques = Some(critiques);
        commit(&context, Stage::Critiquing, research, status).await
    }
}
