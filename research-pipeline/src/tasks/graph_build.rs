use async_trait::async_trait;
use research_flow::{Context, Result, Task, TaskResult};
use tracing::info;

use super::{commit, load_research, missing};
use crate::knowledge_graph::GraphBuilder;
use crate::models::{NodeType, Stage};

pub struct GraphBuildTask;

#[async_trait]
impl Task for GraphBuildTask {
    fn id(&self) -> &str {
        Stage::GraphBuilding.task_id()
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let mut research = load_research(&context).await?;
        let papers = research
            .papers
            .as_deref()
            .ok_or_else(|| missing(Stage::GraphBuilding, "search results"))?;
        let summaries = research
            .summaries
            .as_ref()
            .ok_or_else(|| missing(Stage::GraphBuilding, "summaries"))?;
        if research.critiques.is_none() {
            return Err(missing(Stage::GraphBuilding, "critiques"));
        }

        let graph = GraphBuilder::build(papers, summaries);
        info!(
            session_id = %research.session_id,
            papers = graph.count(NodeType::Paper),
            authors = graph.count(NodeType::Author),
            topics = graph.count(NodeType::Topic),
            links = graph.links.len(),
            "knowledge graph ready"
        );

        let status = format!(
            "Knowledge graph with {} nodes and {} links",
            graph.nodes.len(),
            graph.links.len()
        );
        research.graph = Some(graph);
        commit(&context, Stage::GraphBuilding, research, status).await
    }
}
