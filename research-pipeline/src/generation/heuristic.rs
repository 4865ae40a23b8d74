use async_trait::async_trait;
use chrono::Datelike;
use serde_json::json;

use super::{GenerationClient, GenerationError, PromptSpec};
use crate::models::StageTag;
use crate::prompts::{ABSTRACT_LABEL, TITLE_LABEL, TOPIC_LABEL, labelled_line};

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is",
    "are", "was", "were", "from", "into", "about", "their", "this", "that", "these", "those",
];

const DEFAULT_KEYWORDS: &[&str] = &["research", "analysis", "study", "findings", "methodology"];

const DEFAULT_FINDINGS: &[&str] = &[
    "Significant advancements identified in the research area",
    "Novel methodological approaches documented",
    "Strong evidence supporting key research hypotheses",
];

const MAX_FINDINGS: usize = 3;
const MAX_FINDING_CHARS: usize = 160;
const TIMEFRAME_YEARS: i32 = 5;

/// Deterministic offline generator used as the last link of every fallback chain.
///
/// Never fails and makes no outbound calls. Output follows the same labelled format the response
/// parser reads, so degraded sessions still produce complete records.
#[derive(Debug, Clone)]
pub struct HeuristicClient {
    reference_year: i32,
}

impl HeuristicClient {
    pub fn new(reference_year: i32) -> Self {
        Self { reference_year }
    }

    /// Reference year taken from the current date
    pub fn current() -> Self {
        Self::new(chrono::Utc::now().year())
    }

    /// Same output as [`GenerationClient::generate`], without the async wrapper.
    pub fn respond(&self, prompt: &PromptSpec) -> String {
        match prompt.stage {
            StageTag::Plan => self.plan(&prompt.text),
            StageTag::Summary => summary(&prompt.text),
            StageTag::Critique => critique(&prompt.text),
        }
    }

    fn plan(&self, prompt: &str) -> String {
        let topic = labelled_line(prompt, TOPIC_LABEL).unwrap_or(prompt).trim();
        json!({
            "strategy": format!(
                "Comprehensive research strategy for: {topic}. Focus on recent developments, key methodologies, and significant findings in the field."
            ),
            "keywords": extract_keywords(topic),
            "timeframe": format!("{}-{}", self.reference_year - (TIMEFRAME_YEARS - 1), self.reference_year),
        })
        .to_string()
    }
}

impl Default for HeuristicClient {
    fn default() -> Self {
        Self::current()
    }
}

#[async_trait]
impl GenerationClient for HeuristicClient {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn generate(&self, prompt: &PromptSpec) -> Result<String, GenerationError> {
        Ok(self.respond(prompt))
    }
}

fn summary(prompt: &str) -> String {
    let title = labelled_line(prompt, TITLE_LABEL).unwrap_or("the paper");
    let findings = labelled_line(prompt, ABSTRACT_LABEL)
        .map(leading_sentences)
        .filter(|sentences| !sentences.is_empty())
        .unwrap_or_else(|| DEFAULT_FINDINGS.iter().map(|s| s.to_string()).collect());

    let mut out = String::from("Key Findings:\n");
    for finding in &findings {
        out.push_str("- ");
        out.push_str(finding);
        out.push('\n');
    }
    out.push_str(&format!(
        "Methodology: Comprehensive literature review and systematic analysis of \"{title}\".\n"
    ));
    out.push_str("Significance: Important contributions to advancing current understanding.\n");
    out
}

fn critique(prompt: &str) -> String {
    format!(
        "Strengths:\n\
         - Robust research methodology\n\
         - Comprehensive data collection and analysis\n\
         - Clear and well-structured presentation\n\
         Limitations:\n\
         - Some limitations in sample size\n\
         - Potential for selection bias\n\
         - Limited generalizability in certain contexts\n\
         Score: {}\n\
         Recommendation: This research makes valuable contributions and should be considered in future studies.\n",
        stable_score(prompt)
    )
}

/// 7, 8 or 9, fixed for a given prompt.
fn stable_score(prompt: &str) -> u32 {
    let checksum = prompt
        .bytes()
        .fold(0u32, |acc, byte| acc.wrapping_mul(31).wrapping_add(u32::from(byte)));
    7 + checksum % 3
}

fn leading_sentences(text: &str) -> Vec<String> {
    text.split_terminator(['.', '!', '?'])
        .map(str::trim)
        .filter(|sentence| sentence.split_whitespace().count() >= 3)
        .take(MAX_FINDINGS)
        .map(|sentence| match sentence.char_indices().nth(MAX_FINDING_CHARS) {
            Some((cut, _)) => sentence[..cut].trim_end().to_string(),
            None => sentence.to_string(),
        })
        .collect()
}

/// First five meaningful words of `text`, lowercased.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let words: Vec<String> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() > 3 && !STOPWORDS.contains(word))
        .take(5)
        .map(str::to_string)
        .collect();

    if words.is_empty() {
        DEFAULT_KEYWORDS.iter().map(|s| s.to_string()).collect()
    } else {
        words
    }
}
