//! Prompt rendering for the generation stages.
//!
//! Inputs are rendered as single `Label: value` lines so the offline generator can read them back
//! with [`labelled_line`].

use crate::generation::PromptSpec;
use crate::models::{Paper, StageTag, Summary};

pub const TOPIC_LABEL: &str = "Topic";
pub const TITLE_LABEL: &str = "Title";
pub const ABSTRACT_LABEL: &str = "Abstract";
pub const SUMMARY_LABEL: &str = "AI Summary";

pub fn plan_prompt(topic: &str) -> PromptSpec {
    let text = format!(
        r#"Create a detailed research strategy for the given topic.
{TOPIC_LABEL}: {topic}

Consider the following:
- What are the key areas to investigate?
- What search terms should be used to find relevant papers?
- What timeframe should be considered?

Respond only with a JSON object with the following keys:
- "strategy" (string): a detailed research strategy.
- "keywords" (array of strings): specific keywords to use for searching papers.
- "timeframe" (string): the timeframe to consider, e.g. "2020-2024"."#,
        topic = single_line(topic),
    );
    PromptSpec::new(StageTag::Plan, text)
}

pub fn summary_prompt(paper: &Paper) -> PromptSpec {
    let text = format!(
        r#"Summarize the following academic paper.
{TITLE_LABEL}: {title}
{ABSTRACT_LABEL}: {abstract_text}

Provide the summary in the following format:
Key Findings: [comma-separated list of the key findings]
Methodology: [the methodology used]
Significance: [why the work matters]"#,
        title = single_line(&paper.title),
        abstract_text = single_line(&paper.abstract_text),
    );
    PromptSpec::new(StageTag::Summary, text)
}

pub fn critique_prompt(paper: &Paper, summary: &Summary) -> PromptSpec {
    let text = format!(
        r#"Given the following research paper and its summary, provide a critical analysis.
{TITLE_LABEL}: {title}
{ABSTRACT_LABEL}: {abstract_text}
{SUMMARY_LABEL}: {significance} {methodology}

Provide the critique in the following format:
Strengths: [list the strengths of the paper]
Limitations: [list the limitations of the paper]
Score: [a quality score out of 10]
Recommendation: [a brief recommendation based on the critique]"#,
        title = single_line(&paper.title),
        abstract_text = single_line(&paper.abstract_text),
        significance = single_line(&summary.significance),
        methodology = single_line(&summary.methodology),
    );
    PromptSpec::new(StageTag::Critique, text)
}

/// Value of the first `label: value` line in `text`.
pub fn labelled_line<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    text.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix(label)?;
        let value = rest.strip_prefix(':')?.trim();
        (!value.is_empty()).then_some(value)
    })
}

fn single_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn inputs_render_on_one_labelled_line() {
        let paper = Paper {
            id: "p1".into(),
            title: "Graph\n  Databases".into(),
            abstract_text: "We study graphs.\nThey scale.".into(),
            authors: vec![],
            published_date: String::new(),
            source_url: String::new(),
            categories: BTreeSet::new(),
        };
        let prompt = summary_prompt(&paper);
        assert_eq!(prompt.stage, StageTag::Summary);
        assert_eq!(labelled_line(&prompt.text, TITLE_LABEL), Some("Graph Databases"));
        assert_eq!(
            labelled_line(&prompt.text, ABSTRACT_LABEL),
            Some("We study graphs. They scale.")
        );
    }

    #[test]
    fn plan_prompt_carries_the_topic() {
        let prompt = plan_prompt("graph databases");
        assert_eq!(labelled_line(&prompt.text, TOPIC_LABEL), Some("graph databases"));
        assert_eq!(labelled_line(&prompt.text, "Missing"), None);
    }
}
