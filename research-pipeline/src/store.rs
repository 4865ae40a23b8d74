//! Research store collaborator: keeps the latest output of every stage per topic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::{Critique, KnowledgeGraph, Paper, ResearchPlan, StageOutput, Summary};

/// Everything stored for one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchRecord {
    pub topic: String,
    pub plan: Option<ResearchPlan>,
    #[serde(default)]
    pub papers: Vec<Paper>,
    #[serde(default)]
    pub summaries: Vec<Summary>,
    #[serde(default)]
    pub critiques: Vec<Critique>,
    pub graph: Option<KnowledgeGraph>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResearchRecord {
    pub fn new(topic: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            topic: topic.into(),
            plan: None,
            papers: Vec::new(),
            summaries: Vec::new(),
            critiques: Vec::new(),
            graph: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the part of the record `output` belongs to.
    pub fn apply(&mut self, output: StageOutput) {
        match output {
            StageOutput::Plan(plan) => self.plan = Some(plan),
            StageOutput::Papers(papers) => self.papers = papers,
            StageOutput::Summaries(summaries) => self.summaries = summaries,
            StageOutput::Critiques(critiques) => self.critiques = critiques,
            StageOutput::Graph(graph) => self.graph = Some(graph),
        }
        self.updated_at = Utc::now();
    }
}

#[async_trait]
pub trait ResearchStore: Send + Sync {
    /// Append or replace one stage's output for `topic`
    async fn put_stage(&self, topic: &str, output: StageOutput) -> Result<(), StoreError>;

    /// Latest record for `topic`
    async fn get(&self, topic: &str) -> Result<Option<ResearchRecord>, StoreError>;
}

/// Process-local store. Writes for one topic are serialized by the map's entry lock.
#[derive(Debug, Default)]
pub struct InMemoryResearchStore {
    records: DashMap<String, ResearchRecord>,
}

impl InMemoryResearchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl ResearchStore for InMemoryResearchStore {
    async fn put_stage(&self, topic: &str, output: StageOutput) -> Result<(), StoreError> {
        self.records
            .entry(topic.to_string())
            .or_insert_with(|| ResearchRecord::new(topic))
            .apply(output);
        Ok(())
    }

    async fn get(&self, topic: &str) -> Result<Option<ResearchRecord>, StoreError> {
        Ok(self.records.get(topic).map(|record| record.clone()))
    }
}
