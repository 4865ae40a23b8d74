//! Merges papers, authors and key findings into one deduplicated node/link set.
//!
//! Node identities are natural keys: the paper id, the author string and the finding text.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::models::{GraphLink, GraphNode, KnowledgeGraph, NodeType, Paper, Summary};

pub struct GraphBuilder;

impl GraphBuilder {
    /// Build the graph for `papers`. Summaries contribute topic nodes and are attributed to the
    /// paper named by their `paper_id`.
    pub fn build(papers: &[Paper], summaries: &BTreeMap<String, Summary>) -> KnowledgeGraph {
        let mut graph = GraphAccumulator::default();

        for paper in papers {
            graph.add_node(&paper.id, &paper.title, NodeType::Paper);
            for author in &paper.authors {
                let author = author.trim();
                if author.is_empty() {
                    continue;
                }
                graph.add_node(author, author, NodeType::Author);
                graph.add_link(&paper.id, author);
            }
        }

        // Topics come after every paper and author, still in paper order.
        for paper in papers {
            let Some(summary) = summaries.get(&paper.id) else {
                continue;
            };
            for finding in &summary.key_findings {
                let finding = finding.trim();
                if finding.is_empty() {
                    continue;
                }
                graph.add_node(finding, finding, NodeType::Topic);
                graph.add_link(&summary.paper_id, finding);
            }
        }

        let graph = graph.finish();
        debug!(
            nodes = graph.nodes.len(),
            links = graph.links.len(),
            "knowledge graph built"
        );
        graph
    }
}

#[derive(Default)]
struct GraphAccumulator {
    nodes: Vec<GraphNode>,
    index: HashMap<String, usize>,
    links: Vec<GraphLink>,
    seen_links: HashSet<(String, String)>,
}

impl GraphAccumulator {
    /// First occurrence of an id wins.
    fn add_node(&mut self, id: &str, label: &str, node_type: NodeType) {
        if self.index.contains_key(id) {
            return;
        }
        self.index.insert(id.to_string(), self.nodes.len());
        self.nodes.push(GraphNode {
            id: id.to_string(),
            label: label.to_string(),
            node_type,
            size: node_type.default_size(),
        });
    }

    fn add_link(&mut self, source: &str, target: &str) {
        if source == target {
            return;
        }
        if self
            .seen_links
            .insert((source.to_string(), target.to_string()))
        {
            self.links.push(GraphLink {
                source: source.to_string(),
                target: target.to_string(),
                strength: 1.0,
            });
        }
    }

    fn finish(self) -> KnowledgeGraph {
        KnowledgeGraph {
            nodes: self.nodes,
            links: self.links,
        }
    }
}
