use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use research_flow::{Context, GraphError, Result, Task, TaskResult};
use tracing::{info, warn};

use super::{commit, load_research, missing};
use crate::models::Stage;
use crate::search::PaperSearch;

pub struct SearchTask {
    search: Arc<dyn PaperSearch>,
}

impl SearchTask {
    pub fn new(search: Arc<dyn PaperSearch>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl Task for SearchTask {
    fn id(&self) -> &str {
        Stage::Searching.task_id()
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let mut research = load_research(&context).await?;
        if research.plan.is_none() {
            return Err(missing(Stage::Searching, "a research plan"));
        }

        let mut papers = self
            .search
            .search(&research.topic)
            .await
            .map_err(|e| GraphError::TaskExecutionFailed(e.to_string()))?;

        // summaries and critiques are keyed by paper id
        let found = papers.len();
        let mut seen = HashSet::new();
        papers.retain(|paper| seen.insert(paper.id.clone()));
        if papers.len() < found {
            warn!(
                session_id = %research.session_id,
                dropped = found - papers.len(),
                "search returned duplicate paper ids"
            );
        }

        if papers.is_empty() {
            warn!(session_id = %research.session_id, "search returned no papers");
        }
        info!(session_id = %research.session_id, papers = papers.len(), "papers found");

        let status = format!("Found {} papers", papers.len());
        research.papers = Some(papers);
        commit(&context, Stage::Searching, research, status).await
    }
}
