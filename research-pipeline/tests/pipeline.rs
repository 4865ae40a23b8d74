use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use research_flow::{CancellationToken, InMemorySessionStorage};
use research_pipeline::generation::PromptSpec;
use research_pipeline::prompts::{TITLE_LABEL, labelled_line};
use research_pipeline::{
    FallbackChain, GenerationClient, GenerationError, InMemoryResearchStore, NodeType, Paper,
    PaperSearch, PipelineDeps, PipelineState, ProgressEvent, ResearchError, ResearchOrchestrator,
    ResearchRecord, ResearchStore, SearchError, Stage, StageChains, StageOutput, StageTag,
    StoreError,
    generation::HeuristicClient,
};

type CallLog = Arc<Mutex<Vec<String>>>;

fn paper(id: &str, title: &str, authors: &[&str]) -> Paper {
    Paper {
        id: id.to_string(),
        title: title.to_string(),
        abstract_text: format!("{title} is studied in depth. Results improve on prior work."),
        authors: authors.iter().map(|a| a.to_string()).collect(),
        published_date: "2023-05-01T00:00:00Z".to_string(),
        source_url: format!("http://arxiv.org/abs/{id}"),
        categories: BTreeSet::from(["cs.DB".to_string()]),
    }
}

fn graph_database_papers() -> Vec<Paper> {
    vec![
        paper("2301.00001", "Scaling Graph Databases", &["Ada Lovelace", "Dr. Smith"]),
        paper("2301.00002", "Graph Query Planning", &["Dr. Smith", "Grace Hopper"]),
    ]
}

struct FakeSearch {
    papers: Result<Vec<Paper>, String>,
    log: CallLog,
    cancel_on_call: Option<CancellationToken>,
}

impl FakeSearch {
    fn returning(papers: Vec<Paper>, log: CallLog) -> Self {
        Self {
            papers: Ok(papers),
            log,
            cancel_on_call: None,
        }
    }
}

#[async_trait]
impl PaperSearch for FakeSearch {
    async fn search(&self, topic: &str) -> Result<Vec<Paper>, SearchError> {
        self.log.lock().unwrap().push(format!("search:{topic}"));
        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }
        self.papers.clone().map_err(SearchError::Request)
    }
}

/// Answers every stage in the labelled format and records each call.
struct ScriptedClient {
    log: CallLog,
    critique: &'static str,
}

#[async_trait]
impl GenerationClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &PromptSpec) -> Result<String, GenerationError> {
        let title = labelled_line(&prompt.text, TITLE_LABEL).unwrap_or("-");
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{title}", prompt.stage));
        Ok(match prompt.stage {
            StageTag::Plan => {
                r#"{"strategy": "Read surveys", "keywords": ["graph", "database"], "timeframe": "2020-2024"}"#
                    .to_string()
            }
            StageTag::Summary => {
                "Key Findings: [Native storage helps, Indexes matter]\nMethodology: Benchmarks\nSignificance: High"
                    .to_string()
            }
            StageTag::Critique => self.critique.to_string(),
        })
    }
}

struct DownClient;

#[async_trait]
impl GenerationClient for DownClient {
    fn name(&self) -> &str {
        "down"
    }

    async fn generate(&self, _prompt: &PromptSpec) -> Result<String, GenerationError> {
        Err(GenerationError::Unreachable)
    }
}

struct Harness {
    orchestrator: ResearchOrchestrator,
    store: Arc<InMemoryResearchStore>,
}

fn harness(client: Arc<dyn GenerationClient>, search: FakeSearch) -> Harness {
    let chains = StageChains::uniform(FallbackChain::new(vec![client]));
    let deps = PipelineDeps::new(chains, Arc::new(search));
    let store = Arc::new(InMemoryResearchStore::new());
    let orchestrator = ResearchOrchestrator::new(
        &deps,
        Arc::new(InMemorySessionStorage::new()),
        store.clone(),
    );
    Harness {
        orchestrator,
        store,
    }
}

fn scripted(log: &CallLog) -> Arc<ScriptedClient> {
    Arc::new(ScriptedClient {
        log: log.clone(),
        critique: "Strengths: [Clear]\nLimitations: [Small]\nScore: 8\nRecommendation: Read",
    })
}

#[tokio::test]
async fn graph_databases_end_to_end() {
    let log = CallLog::default();
    let h = harness(
        Arc::new(HeuristicClient::new(2024)),
        FakeSearch::returning(graph_database_papers(), log.clone()),
    );
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let research = h
        .orchestrator
        .research("  graph databases ", &CancellationToken::new(), Some(&tx))
        .await
        .unwrap();

    assert_eq!(research.state, PipelineState::Complete);
    assert_eq!(research.topic, "graph databases");
    assert_eq!(research.plan.as_ref().unwrap().timeframe, "2020-2024");
    assert_eq!(research.papers.as_ref().unwrap().len(), 2);
    assert_eq!(research.ordered_summaries().len(), 2);
    assert_eq!(research.ordered_critiques().len(), 2);
    for critique in research.ordered_critiques() {
        assert!((7.0..=9.0).contains(&critique.score));
    }

    let graph = research.graph.as_ref().unwrap();
    assert_eq!(graph.count(NodeType::Paper), 2);
    assert_eq!(graph.count(NodeType::Author), 3);
    let summaries = research.ordered_summaries();
    let distinct_findings: BTreeSet<&str> = summaries
        .iter()
        .flat_map(|summary| summary.key_findings.iter().map(|f| f.trim()))
        .collect();
    // both abstracts end with the same sentence
    assert_eq!(distinct_findings.len(), 3);
    assert_eq!(graph.count(NodeType::Topic), distinct_findings.len());
    assert!(research.failure.is_none());

    let record = h.store.get("graph databases").await.unwrap().unwrap();
    assert_eq!(record.papers.len(), 2);
    assert_eq!(record.critiques.len(), 2);
    assert_eq!(record.graph.as_ref(), Some(graph));

    drop(tx);
    let mut events: Vec<ProgressEvent> = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    let indexes: Vec<usize> = events.iter().map(|e| e.stage_index).collect();
    assert_eq!(indexes, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(events.last().unwrap().state, PipelineState::Complete);
    assert_eq!(events[0].detail, None);
    assert_eq!(events[2].detail.as_deref(), Some("Found 2 papers"));
    assert_eq!(events[4].detail.as_deref(), Some("Critiqued 2 papers"));
}

#[tokio::test]
async fn duplicate_paper_ids_from_search_are_collapsed() {
    let log = CallLog::default();
    let mut papers = graph_database_papers();
    papers.push(paper("2301.00001", "Scaling Graph Databases (v2)", &["Ada Lovelace"]));
    let h = harness(scripted(&log), FakeSearch::returning(papers, log.clone()));

    let research = h
        .orchestrator
        .research("graph databases", &CancellationToken::new(), None)
        .await
        .unwrap();

    assert_eq!(research.state, PipelineState::Complete);
    let papers = research.papers.as_ref().unwrap();
    assert_eq!(papers.len(), 2);
    assert_eq!(papers[0].title, "Scaling Graph Databases");
    assert_eq!(research.ordered_summaries().len(), 2);
    assert_eq!(research.ordered_critiques().len(), 2);
    assert_eq!(
        research.graph.as_ref().unwrap().count(NodeType::Paper),
        2
    );
    // one summary and one critique call per distinct paper
    assert_eq!(log.lock().unwrap().len(), 6);
}

#[tokio::test]
async fn stages_call_collaborators_in_order() {
    let log = CallLog::default();
    let h = harness(
        scripted(&log),
        FakeSearch::returning(graph_database_papers(), log.clone()),
    );

    let research = h
        .orchestrator
        .research("graph databases", &CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(research.state, PipelineState::Complete);

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "plan:-",
            "search:graph databases",
            "summary:Scaling Graph Databases",
            "summary:Graph Query Planning",
            "critique:Scaling Graph Databases",
            "critique:Graph Query Planning",
        ]
    );
}

#[tokio::test]
async fn empty_search_still_completes_without_generation_calls() {
    let log = CallLog::default();
    let h = harness(scripted(&log), FakeSearch::returning(vec![], log.clone()));

    let research = h
        .orchestrator
        .research("obscure topic", &CancellationToken::new(), None)
        .await
        .unwrap();

    assert_eq!(research.state, PipelineState::Complete);
    assert_eq!(*log.lock().unwrap(), vec!["plan:-", "search:obscure topic"]);
    assert!(research.ordered_summaries().is_empty());
    assert!(research.graph.unwrap().nodes.is_empty());
}

#[tokio::test]
async fn cancelled_token_stops_before_the_first_stage() {
    let log = CallLog::default();
    let h = harness(
        scripted(&log),
        FakeSearch::returning(graph_database_papers(), log.clone()),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let research = h
        .orchestrator
        .research("graph databases", &cancel, None)
        .await
        .unwrap();

    assert_eq!(research.state, PipelineState::Cancelled(Stage::Planning));
    assert!(research.plan.is_none());
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancellation_between_stages_keeps_outputs_and_can_resume() {
    let log = CallLog::default();
    let cancel = CancellationToken::new();
    let search = FakeSearch {
        cancel_on_call: Some(cancel.clone()),
        ..FakeSearch::returning(graph_database_papers(), log.clone())
    };
    let h = harness(scripted(&log), search);

    let research = h
        .orchestrator
        .research("graph databases", &cancel, None)
        .await
        .unwrap();

    // search finished and committed; summarizing never started
    assert_eq!(research.state, PipelineState::Cancelled(Stage::Summarizing));
    assert_eq!(research.papers.as_ref().unwrap().len(), 2);
    assert!(research.summaries.is_none());
    assert_eq!(log.lock().unwrap().len(), 2);

    let resumed = h
        .orchestrator
        .retry_failed(&research.session_id, &CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(resumed.state, PipelineState::Complete);
    assert_eq!(resumed.plan, research.plan);
    assert_eq!(log.lock().unwrap().len(), 6);
}

#[tokio::test]
async fn search_failure_keeps_the_plan() {
    let log = CallLog::default();
    let search = FakeSearch {
        papers: Err("connection refused by index".to_string()),
        ..FakeSearch::returning(vec![], log.clone())
    };
    let h = harness(scripted(&log), search);

    let research = h
        .orchestrator
        .research("graph databases", &CancellationToken::new(), None)
        .await
        .unwrap();

    assert_eq!(research.state, PipelineState::FailedAt(Stage::Searching));
    assert_eq!(research.plan.as_ref().unwrap().strategy, "Read surveys");
    assert!(research.papers.is_none());

    let failure = research.failure.as_ref().unwrap();
    assert_eq!(failure.stage, Stage::Searching);
    assert!(!failure.message.contains("connection refused"));

    let record = h.store.get("graph databases").await.unwrap().unwrap();
    assert!(record.plan.is_some());
    assert!(record.papers.is_empty());
}

#[tokio::test]
async fn exhausted_chain_fails_the_stage() {
    let log = CallLog::default();
    let h = harness(
        Arc::new(DownClient),
        FakeSearch::returning(graph_database_papers(), log.clone()),
    );

    let research = h
        .orchestrator
        .research("graph databases", &CancellationToken::new(), None)
        .await
        .unwrap();

    assert_eq!(research.state, PipelineState::FailedAt(Stage::Planning));
    assert!(log.lock().unwrap().is_empty());
    assert!(h.store.get("graph databases").await.unwrap().is_none());
}

#[tokio::test]
async fn loose_critiques_are_coerced() {
    let log = CallLog::default();
    let client = Arc::new(ScriptedClient {
        log: log.clone(),
        critique: "**Strengths:** solid evaluation\nScore: 15\nRecommendation: Accept",
    });
    let h = harness(
        client,
        FakeSearch::returning(graph_database_papers(), log.clone()),
    );

    let research = h
        .orchestrator
        .research("graph databases", &CancellationToken::new(), None)
        .await
        .unwrap();

    for critique in research.ordered_critiques() {
        assert_eq!(critique.limitations, vec!["Limitations not explicitly stated."]);
        assert_eq!(critique.strengths, vec!["solid evaluation"]);
        assert_eq!(critique.score, 10.0);
    }
}

#[tokio::test]
async fn blank_topics_are_rejected() {
    let log = CallLog::default();
    let h = harness(scripted(&log), FakeSearch::returning(vec![], log.clone()));

    let err = h
        .orchestrator
        .research("   ", &CancellationToken::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ResearchError::EmptyTopic));
}

/// Rejects the first write, then behaves like the in-memory store.
struct FlakyStore {
    inner: InMemoryResearchStore,
    failed_once: Mutex<bool>,
}

#[async_trait]
impl ResearchStore for FlakyStore {
    async fn put_stage(&self, topic: &str, output: StageOutput) -> Result<(), StoreError> {
        {
            let mut failed = self.failed_once.lock().unwrap();
            if !*failed {
                *failed = true;
                return Err(StoreError::Unavailable("disk full".into()));
            }
        }
        self.inner.put_stage(topic, output).await
    }

    async fn get(&self, topic: &str) -> Result<Option<ResearchRecord>, StoreError> {
        self.inner.get(topic).await
    }
}

#[tokio::test]
async fn store_failure_fails_the_stage_and_retry_reruns_it() {
    let log = CallLog::default();
    let client: Arc<dyn GenerationClient> = scripted(&log);
    let chains = StageChains::uniform(FallbackChain::new(vec![client]));
    let deps = PipelineDeps::new(
        chains,
        Arc::new(FakeSearch::returning(graph_database_papers(), log.clone())),
    );
    let store = Arc::new(FlakyStore {
        inner: InMemoryResearchStore::new(),
        failed_once: Mutex::new(false),
    });
    let orchestrator =
        ResearchOrchestrator::new(&deps, Arc::new(InMemorySessionStorage::new()), store.clone());

    let research = orchestrator
        .research("graph databases", &CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(research.state, PipelineState::FailedAt(Stage::Planning));
    // the plan was produced; only the hand-off failed
    assert!(research.plan.is_some());

    let resumed = orchestrator
        .retry_failed(&research.session_id, &CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(resumed.state, PipelineState::Complete);
    assert!(resumed.failure.is_none());
    assert_eq!(log.lock().unwrap().first().map(String::as_str), Some("plan:-"));
    assert_eq!(log.lock().unwrap().iter().filter(|c| c.starts_with("plan")).count(), 2);

    let record = store.get("graph databases").await.unwrap().unwrap();
    assert!(record.plan.is_some());
    assert!(record.graph.is_some());
}
