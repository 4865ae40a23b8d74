use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Lowest and highest critique score
pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 10.0;

/// Visual weight used when a node type has no specific size
pub const DEFAULT_NODE_SIZE: u32 = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub strategy: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub timeframe: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paper {
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub published_date: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub categories: BTreeSet<String>,
}

/// Summary fields as parsed from a backend response, before they are tied to a paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryFields {
    pub key_findings: Vec<String>,
    pub methodology: String,
    pub significance: String,
}

impl SummaryFields {
    pub fn into_summary(self, paper_id: impl Into<String>) -> Summary {
        Summary {
            paper_id: paper_id.into(),
            key_findings: self.key_findings,
            methodology: self.methodology,
            significance: self.significance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub paper_id: String,
    pub key_findings: Vec<String>,
    pub methodology: String,
    pub significance: String,
}

/// Critique fields as parsed from a backend response, before they are tied to a paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CritiqueFields {
    pub strengths: Vec<String>,
    pub limitations: Vec<String>,
    pub score: f64,
    pub recommendation: String,
}

impl CritiqueFields {
    pub fn into_critique(self, paper_id: impl Into<String>) -> Critique {
        Critique {
            paper_id: paper_id.into(),
            strengths: self.strengths,
            limitations: self.limitations,
            score: clamp_score(self.score),
            recommendation: self.recommendation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Critique {
    pub paper_id: String,
    pub strengths: Vec<String>,
    #[serde(alias = "weaknesses")]
    pub limitations: Vec<String>,
    #[serde(alias = "relevanceScore")]
    pub score: f64,
    pub recommendation: String,
}

/// Clamp into the critique score range; NaN becomes the lower bound.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return SCORE_MIN;
    }
    score.clamp(SCORE_MIN, SCORE_MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Paper,
    Author,
    Topic,
}

impl NodeType {
    pub fn default_size(self) -> u32 {
        match self {
            NodeType::Paper => 12,
            NodeType::Author => DEFAULT_NODE_SIZE,
            NodeType::Topic => 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default = "default_node_size")]
    pub size: u32,
}

fn default_node_size() -> u32 {
    DEFAULT_NODE_SIZE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphLink {
    pub source: String,
    pub target: String,
    #[serde(default = "default_link_strength")]
    pub strength: f64,
}

fn default_link_strength() -> f64 {
    1.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphLink>,
}

impl KnowledgeGraph {
    pub fn count(&self, node_type: NodeType) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.node_type == node_type)
            .count()
    }
}

/// Generation stages: the stages whose output comes from a text-generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageTag {
    Plan,
    Summary,
    Critique,
}

impl StageTag {
    pub const ALL: [StageTag; 3] = [StageTag::Plan, StageTag::Summary, StageTag::Critique];

    pub fn as_str(self) -> &'static str {
        match self {
            StageTag::Plan => "plan",
            StageTag::Summary => "summary",
            StageTag::Critique => "critique",
        }
    }
}

impl std::fmt::Display for StageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Planning,
    Searching,
    Summarizing,
    Critiquing,
    GraphBuilding,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Planning,
        Stage::Searching,
        Stage::Summarizing,
        Stage::Critiquing,
        Stage::GraphBuilding,
    ];

    /// 1-based position in the pipeline
    pub fn index(self) -> usize {
        match self {
            Stage::Planning => 1,
            Stage::Searching => 2,
            Stage::Summarizing => 3,
            Stage::Critiquing => 4,
            Stage::GraphBuilding => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Planning => "plan",
            Stage::Searching => "search",
            Stage::Summarizing => "summarize",
            Stage::Critiquing => "critique",
            Stage::GraphBuilding => "graph",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Planning => "Planning research strategy",
            Stage::Searching => "Searching for papers",
            Stage::Summarizing => "Summarizing papers",
            Stage::Critiquing => "Critiquing papers",
            Stage::GraphBuilding => "Building knowledge graph",
        }
    }

    /// Id of the task that runs this stage in the workflow graph
    pub fn task_id(self) -> &'static str {
        match self {
            Stage::Planning => "plan_research",
            Stage::Searching => "search_papers",
            Stage::Summarizing => "summarize_papers",
            Stage::Critiquing => "critique_papers",
            Stage::GraphBuilding => "build_graph",
        }
    }

    pub fn from_task_id(task_id: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|stage| stage.task_id() == task_id)
    }

    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Planning => Some(Stage::Searching),
            Stage::Searching => Some(Stage::Summarizing),
            Stage::Summarizing => Some(Stage::Critiquing),
            Stage::Critiquing => Some(Stage::GraphBuilding),
            Stage::GraphBuilding => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum PipelineState {
    Running(Stage),
    Complete,
    FailedAt(Stage),
    Cancelled(Stage),
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PipelineState::Running(_))
    }

    /// After a stage commits its output, the session moves to the next stage or completes.
    pub fn after(stage: Stage) -> PipelineState {
        match stage.next() {
            Some(next) => PipelineState::Running(next),
            None => PipelineState::Complete,
        }
    }

    pub fn stage_index(self) -> usize {
        match self {
            PipelineState::Running(stage)
            | PipelineState::FailedAt(stage)
            | PipelineState::Cancelled(stage) => stage.index(),
            PipelineState::Complete => Stage::ALL.len() + 1,
        }
    }

    pub fn label(self) -> String {
        match self {
            PipelineState::Running(stage) => stage.label().to_string(),
            PipelineState::Complete => "Research complete".to_string(),
            PipelineState::FailedAt(stage) => format!("Failed at {} stage", stage.name()),
            PipelineState::Cancelled(stage) => format!("Cancelled before {} stage", stage.name()),
        }
    }
}

/// What a failed session exposes to callers: the stage and a generic message, never the
/// underlying backend or collaborator error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub stage: Stage,
    pub message: String,
}

impl FailureReport {
    pub fn generic(stage: Stage) -> Self {
        Self {
            stage,
            message: format!(
                "The {} stage could not be completed. Earlier results were kept.",
                stage.name()
            ),
        }
    }
}

/// Everything one research run has produced so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchSession {
    pub session_id: String,
    pub topic: String,
    pub plan: Option<ResearchPlan>,
    pub papers: Option<Vec<Paper>>,
    pub summaries: Option<BTreeMap<String, Summary>>,
    pub critiques: Option<BTreeMap<String, Critique>>,
    pub graph: Option<KnowledgeGraph>,
    pub state: PipelineState,
    pub failure: Option<FailureReport>,
    pub created_at: DateTime<Utc>,
}

impl ResearchSession {
    pub fn new(session_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            topic: topic.into(),
            plan: None,
            papers: None,
            summaries: None,
            critiques: None,
            graph: None,
            state: PipelineState::Running(Stage::Planning),
            failure: None,
            created_at: Utc::now(),
        }
    }

    /// Summaries in paper order
    pub fn ordered_summaries(&self) -> Vec<Summary> {
        ordered_by_papers(self.papers.as_deref(), self.summaries.as_ref())
    }

    /// Critiques in paper order
    pub fn ordered_critiques(&self) -> Vec<Critique> {
        ordered_by_papers(self.papers.as_deref(), self.critiques.as_ref())
    }
}

fn ordered_by_papers<T: Clone>(
    papers: Option<&[Paper]>,
    records: Option<&BTreeMap<String, T>>,
) -> Vec<T> {
    match (papers, records) {
        (Some(papers), Some(records)) => papers
            .iter()
            .filter_map(|paper| records.get(&paper.id).cloned())
            .collect(),
        _ => Vec::new(),
    }
}

/// One stage's output, as handed to the research store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "output", rename_all = "snake_case")]
pub enum StageOutput {
    Plan(ResearchPlan),
    Papers(Vec<Paper>),
    Summaries(Vec<Summary>),
    Critiques(Vec<Critique>),
    Graph(KnowledgeGraph),
}

impl StageOutput {
    /// The output `stage` committed to `session`, if it exists
    pub fn from_session(stage: Stage, session: &ResearchSession) -> Option<StageOutput> {
        match stage {
            Stage::Planning => session.plan.clone().map(StageOutput::Plan),
            Stage::Searching => session.papers.clone().map(StageOutput::Papers),
            Stage::Summarizing => session
                .summaries
                .as_ref()
                .map(|_| StageOutput::Summaries(session.ordered_summaries())),
            Stage::Critiquing => session
                .critiques
                .as_ref()
                .map(|_| StageOutput::Critiques(session.ordered_critiques())),
            Stage::GraphBuilding => session.graph.clone().map(StageOutput::Graph),
        }
    }
}
