use std::sync::Arc;

use research_flow::{Graph, GraphBuilder as FlowBuilder, Result, Session, Task};

use crate::generation::StageChains;
use crate::models::{ResearchSession, Stage, StageTag};
use crate::parser::ResponseParser;
use crate::search::PaperSearch;
use crate::tasks::*;

pub const WORKFLOW_ID: &str = "research_workflow";

/// Collaborators the stage tasks are built from.
#[derive(Clone)]
pub struct PipelineDeps {
    pub chains: StageChains,
    pub parser: Arc<ResponseParser>,
    pub search: Arc<dyn PaperSearch>,
}

impl PipelineDeps {
    pub fn new(chains: StageChains, search: Arc<dyn PaperSearch>) -> Self {
        Self {
            chains,
            parser: Arc::new(ResponseParser::new()),
            search,
        }
    }
}

/// Plan → Search → Summarize → Critique → GraphBuild, one task per stage.
pub fn build_research_workflow(deps: &PipelineDeps) -> Graph {
    let tasks: Vec<Arc<dyn Task>> = vec![
        Arc::new(PlanTask::new(
            deps.chains.for_stage(StageTag::Plan),
            deps.parser.clone(),
        )),
        Arc::new(SearchTask::new(deps.search.clone())),
        Arc::new(SummarizeTask::new(
            deps.chains.for_stage(StageTag::Summary),
            deps.parser.clone(),
        )),
        Arc::new(CritiqueTask::new(
            deps.chains.for_stage(StageTag::Critique),
            deps.parser.clone(),
        )),
        Arc::new(GraphBuildTask),
    ];

    tasks
        .into_iter()
        .fold(FlowBuilder::new(WORKFLOW_ID), |builder, task| builder.add_task(task))
        .chain_in_order()
        .build()
}

/// New workflow session positioned at the planning task, seeded with an empty research session.
pub fn create_research_session(topic: &str) -> Result<Session> {
    let session = Session::start(WORKFLOW_ID, Stage::Planning.task_id());
    let research = ResearchSession::new(session.id.clone(), topic);
    session
        .context
        .set_sync(session_keys::RESEARCH, &research)?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchError;
    use crate::generation::{FallbackChain, HeuristicClient};
    use crate::models::Paper;
    use async_trait::async_trait;

    struct NoPapers;

    #[async_trait]
    impl PaperSearch for NoPapers {
        async fn search(&self, _topic: &str) -> std::result::Result<Vec<Paper>, SearchError> {
            Ok(vec![])
        }
    }

    #[test]
    fn workflow_runs_the_stages_in_order() {
        let chains = StageChains::uniform(FallbackChain::new(vec![Arc::new(
            HeuristicClient::new(2024),
        )]));
        let graph = build_research_workflow(&PipelineDeps::new(chains, Arc::new(NoPapers)));

        let expected: Vec<&str> = Stage::ALL.iter().map(|s| s.task_id()).collect();
        assert_eq!(graph.task_ids(), expected.as_slice());
        assert_eq!(graph.start_task_id(), Some("plan_research"));
        assert_eq!(
            graph.find_next_task("critique_papers").as_deref(),
            Some("build_graph")
        );
        assert_eq!(graph.find_next_task("build_graph"), None);
    }

    #[test]
    fn new_sessions_start_at_planning() {
        let session = create_research_session("graph databases").unwrap();
        assert_eq!(session.current_task_id, "plan_research");
        let research: ResearchSession = session.context.get_sync(session_keys::RESEARCH).unwrap();
        assert_eq!(research.topic, "graph databases");
        assert_eq!(research.session_id, session.id);
    }
}
