//! Turns raw backend text into typed stage records.
//!
//! Parsing never fails. The plan stage first tries a strict JSON decode; everything else goes
//! through label extraction driven by the tables in [`rules`]. Missing or empty fields
//! take their rule's placeholder. Same input, same record.

pub mod rules;

use std::cmp::Reverse;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::{CritiqueFields, ResearchPlan, StageTag, SummaryFields, clamp_score};
use rules::{CRITIQUE_RULES, Field, FieldKind, FieldRule, PLAN_RULES, Placeholder, SUMMARY_RULES};

static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-?\d+(?:\.\d+)?").expect("number pattern is valid")
});

const LINE_MARKERS: &[char] = &['-', '*', '#', '>', '•', '+', '_'];

/// Typed, validated output of parsing one backend response.
#[derive(Debug, Clone, PartialEq)]
pub enum StageRecord {
    Plan(ResearchPlan),
    Summary(SummaryFields),
    Critique(CritiqueFields),
}

/// A resolved field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
    Number(f64),
}

/// Result of running a rule table over a response.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    values: Vec<(Field, FieldValue)>,
    missed: Vec<Field>,
}

impl Extraction {
    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, value)| value)
    }

    pub fn text(&self, field: Field) -> String {
        match self.get(field) {
            Some(FieldValue::Text(text)) => text.clone(),
            Some(FieldValue::List(items)) => items.join(", "),
            Some(FieldValue::Number(n)) => n.to_string(),
            None => String::new(),
        }
    }

    pub fn list(&self, field: Field) -> Vec<String> {
        match self.get(field) {
            Some(FieldValue::List(items)) => items.clone(),
            Some(FieldValue::Text(text)) if !text.is_empty() => vec![text.clone()],
            _ => Vec::new(),
        }
    }

    pub fn number(&self, field: Field) -> Option<f64> {
        match self.get(field) {
            Some(FieldValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// Fields that fell back to their placeholder
    pub fn missed(&self) -> &[Field] {
        &self.missed
    }

    pub fn found_any(&self) -> bool {
        self.missed.len() < self.values.len()
    }
}

/// Stage-aware response parser. Holds one rule table per generation stage.
#[derive(Debug, Clone, Copy)]
pub struct ResponseParser {
    plan_rules: &'static [FieldRule],
    summary_rules: &'static [FieldRule],
    critique_rules: &'static [FieldRule],
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            plan_rules: PLAN_RULES,
            summary_rules: SUMMARY_RULES,
            critique_rules: CRITIQUE_RULES,
        }
    }

    /// Replace the rule table used for `stage`
    pub fn with_rules(mut self, stage: StageTag, rules: &'static [FieldRule]) -> Self {
        match stage {
            StageTag::Plan => self.plan_rules = rules,
            StageTag::Summary => self.summary_rules = rules,
            StageTag::Critique => self.critique_rules = rules,
        }
        self
    }

    pub fn parse(&self, stage: StageTag, raw: &str) -> StageRecord {
        match stage {
            StageTag::Plan => StageRecord::Plan(self.parse_plan(raw)),
            StageTag::Summary => StageRecord::Summary(self.parse_summary(raw)),
            StageTag::Critique => StageRecord::Critique(self.parse_critique(raw)),
        }
    }

    pub fn parse_plan(&self, raw: &str) -> ResearchPlan {
        if let Some(plan) = decode_plan_json(raw, self.plan_rules) {
            return plan;
        }
        debug!(stage = "plan", "strict decode failed, using label extraction");

        let extraction = extract_logged(StageTag::Plan, raw, self.plan_rules);
        ResearchPlan {
            strategy: extraction.text(Field::Strategy),
            keywords: extraction.list(Field::Keywords),
            timeframe: extraction.text(Field::Timeframe),
        }
    }

    pub fn parse_summary(&self, raw: &str) -> SummaryFields {
        let extraction = extract_logged(StageTag::Summary, raw, self.summary_rules);
        SummaryFields {
            key_findings: extraction.list(Field::KeyFindings),
            methodology: extraction.text(Field::Methodology),
            significance: extraction.text(Field::Significance),
        }
    }

    pub fn parse_critique(&self, raw: &str) -> CritiqueFields {
        let extraction = extract_logged(StageTag::Critique, raw, self.critique_rules);
        let score = extraction
            .number(Field::Score)
            .or_else(|| placeholder_number(self.critique_rules, Field::Score))
            .unwrap_or(5.0);
        CritiqueFields {
            strengths: extraction.list(Field::Strengths),
            limitations: extraction.list(Field::Limitations),
            score: clamp_score(score),
            recommendation: extraction.text(Field::Recommendation),
        }
    }
}

fn extract_logged(stage: StageTag, raw: &str, rules: &[FieldRule]) -> Extraction {
    let extraction = extract(raw, rules);
    if !extraction.found_any() {
        warn!(%stage, "no labelled fields found, using default record");
    } else {
        for field in extraction.missed() {
            debug!(%stage, ?field, "label missing, using placeholder");
        }
    }
    extraction
}

/// Run a rule table over `raw`. Every rule yields a value: the extracted one or its placeholder.
///
/// When a field is labelled more than once, a label on a plain line beats one on a bulleted line.
pub fn extract(raw: &str, rules: &[FieldRule]) -> Extraction {
    let segments = segments(raw, rules);
    let mut values = Vec::with_capacity(rules.len());
    let mut missed = Vec::new();

    for (index, rule) in rules.iter().enumerate() {
        let labelled = |bulleted: bool| {
            segments
                .iter()
                .filter(move |segment| segment.rule == index && segment.bulleted == bulleted)
        };
        let resolved = labelled(false)
            .chain(labelled(true))
            .find_map(|segment| resolve(rule.kind, segment));

        match resolved {
            Some(value) => values.push((rule.field, value)),
            None => {
                missed.push(rule.field);
                values.push((rule.field, placeholder_value(rule.placeholder)));
            }
        }
    }

    Extraction { values, missed }
}

/// Text following one label, up to the next label.
#[derive(Debug)]
struct Segment<'a> {
    rule: usize,
    /// label sat on a bulleted or numbered line
    bulleted: bool,
    inline: &'a str,
    continuation: Vec<&'a str>,
}

#[derive(Debug)]
struct LabelMatch<'a> {
    rule: usize,
    canonical: bool,
    rest: &'a str,
}

fn segments<'a>(raw: &'a str, rules: &[FieldRule]) -> Vec<Segment<'a>> {
    let mut out = Vec::new();
    let mut current: Option<Segment<'a>> = None;

    for piece in raw.lines().flat_map(|line| split_inline_labels(line, rules)) {
        let bulleted = is_bulleted(piece);
        let label = match_label(piece, rules)
            .filter(|label| opens_field(current.as_ref(), rules, bulleted, label));

        if let Some(label) = label {
            out.extend(current.take());
            current = Some(Segment {
                rule: label.rule,
                bulleted,
                inline: label.rest,
                continuation: Vec::new(),
            });
        } else if let Some(segment) = current.as_mut() {
            segment.continuation.push(piece);
        }
    }
    out.extend(current);
    out
}

/// Inside an open list a bulleted line is an item unless it carries another field's canonical
/// label, so `- Approach: ...` under `Key Findings:` stays a finding.
fn opens_field(
    current: Option<&Segment<'_>>,
    rules: &[FieldRule],
    bulleted: bool,
    label: &LabelMatch<'_>,
) -> bool {
    match current {
        Some(segment) if bulleted && matches!(rules[segment.rule].kind, FieldKind::List) => {
            label.canonical && label.rule != segment.rule
        }
        _ => true,
    }
}

/// Split a line where a label starts mid-line, e.g. `Strengths: [a] Limitations: [b] Score: 7`
/// or `Overall Score: 8/10`.
///
/// A canonical label may start after any word break. An alias only starts after a closing
/// bracket or the end of a clause, so prose such as `compare 5 methods: ...` stays whole. A short
/// run of words before the first label (`Overall`, `Final`) is dropped.
fn split_inline_labels<'a>(line: &'a str, rules: &[FieldRule]) -> Vec<&'a str> {
    let body = strip_line_markers(line);
    let offset = line.len() - body.len();
    let scan_from = offset + label_at(body, rules).map_or(0, |(_, _, len)| len);
    let lower = line.to_ascii_lowercase();
    let mut found: Vec<(usize, usize)> = Vec::new();

    for rule in rules {
        for (position, label) in rule.labels.iter().enumerate() {
            let mut from = scan_from;
            while let Some(pos) = lower[from..].find(label) {
                let start = from + pos;
                let end = start + label.len();
                from = end;
                if start == 0 || after_label(&line[end..]).is_none() {
                    continue;
                }
                if label_boundary(&line[..start], position == 0) {
                    found.push((start, end));
                }
            }
        }
    }

    if found.is_empty() {
        return vec![line];
    }
    // longest label first where two start together; overlapped ones are dropped
    found.sort_unstable_by_key(|&(start, end)| (start, Reverse(end)));
    let mut cuts: Vec<usize> = Vec::with_capacity(found.len());
    let mut covered = 0;
    for (start, end) in found {
        if start >= covered {
            cuts.push(start);
            covered = end;
        }
    }

    let mut pieces = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for cut in cuts {
        let piece = &line[start..cut];
        if !(start == 0 && is_qualifier(piece)) {
            pieces.push(piece);
        }
        start = cut;
    }
    pieces.push(&line[start..]);
    pieces
}

fn label_boundary(before: &str, canonical: bool) -> bool {
    let Some(last) = before.chars().last() else {
        return false;
    };
    if last.is_alphanumeric() || last == '_' {
        return false;
    }
    canonical
        || before
            .trim_end_matches([' ', '\t', '*'])
            .chars()
            .last()
            .is_some_and(|c| matches!(c, ']' | '.' | ';' | '|' | ')'))
}

/// At most three plain words, e.g. `Overall` in `Overall Score: 8`.
fn is_qualifier(prefix: &str) -> bool {
    let words = strip_line_markers(prefix)
        .trim_matches(|c: char| c == '*' || c == '_' || c.is_whitespace());
    words.split_whitespace().count() <= 3
        && words
            .chars()
            .all(|c| c.is_alphabetic() || c.is_whitespace() || c == '-')
}

/// If `piece` starts with one of the table's labels, the matching rule and the text after the
/// colon.
fn match_label<'a>(piece: &'a str, rules: &[FieldRule]) -> Option<LabelMatch<'a>> {
    let body = strip_line_markers(piece);
    let (rule, position, len) = label_at(body, rules)?;
    Some(LabelMatch {
        rule,
        canonical: position == 0,
        rest: after_label(&body[len..])?,
    })
}

/// Rule index, label position and label length of the longest label `body` starts with.
fn label_at(body: &str, rules: &[FieldRule]) -> Option<(usize, usize, usize)> {
    let lower = body.to_ascii_lowercase();
    let mut best: Option<(usize, usize, usize)> = None;

    for (index, rule) in rules.iter().enumerate() {
        for (position, label) in rule.labels.iter().enumerate() {
            if !lower.starts_with(label) || after_label(&body[label.len()..]).is_none() {
                continue;
            }
            if best.is_none_or(|(_, _, len)| label.len() > len) {
                best = Some((index, position, label.len()));
            }
        }
    }
    best
}

/// Accepts `: value`, `**: value` and `:** value` after a label.
fn after_label(rest: &str) -> Option<&str> {
    let rest = rest.trim_start_matches(['*', '_', ' ', '\t']);
    let rest = rest.strip_prefix(':')?;
    Some(rest.trim_start_matches(|c: char| c == '*' || c == '_' || c.is_whitespace()))
}

fn strip_line_markers(line: &str) -> &str {
    let line = line.trim_start_matches(|c: char| c.is_whitespace() || LINE_MARKERS.contains(&c));
    strip_enumeration(line).unwrap_or(line)
}

/// `1. text` or `2) text`
fn strip_enumeration(line: &str) -> Option<&str> {
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    let rest = line[digits..].strip_prefix(['.', ')'])?;
    Some(rest.trim_start())
}

/// `- item`, `* item` or `1. item`; bold markers such as `**Label:**` do not count.
fn is_bulleted(line: &str) -> bool {
    let trimmed = line.trim_start();
    match trimmed.strip_prefix(['-', '*', '•', '+']) {
        Some(rest) => rest.starts_with(char::is_whitespace),
        None => strip_enumeration(trimmed).is_some(),
    }
}

fn bullet_item(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    let rest = trimmed
        .strip_prefix(['-', '*', '•', '+'])
        .or_else(|| strip_enumeration(trimmed))?;
    Some(rest.trim())
}

fn resolve(kind: FieldKind, segment: &Segment<'_>) -> Option<FieldValue> {
    match kind {
        FieldKind::List => {
            let items = resolve_list(segment);
            (!items.is_empty()).then_some(FieldValue::List(items))
        }
        FieldKind::Text => {
            let text = resolve_text(segment);
            (!text.is_empty()).then_some(FieldValue::Text(text))
        }
        FieldKind::Number { min, max } => {
            let joined = std::iter::once(segment.inline)
                .chain(segment.continuation.iter().copied())
                .collect::<Vec<_>>()
                .join(" ");
            let number: f64 = NUMBER.find(&joined)?.as_str().parse().ok()?;
            Some(FieldValue::Number(number.clamp(min, max)))
        }
    }
}

fn resolve_list(segment: &Segment<'_>) -> Vec<String> {
    let inline = segment.inline.trim();
    let mut items: Vec<String> = Vec::new();

    if let Some(body) = inline.strip_prefix('[') {
        let mut joined = body.to_string();
        if !joined.contains(']') {
            for line in &segment.continuation {
                joined.push(' ');
                joined.push_str(line.trim());
                if line.contains(']') {
                    break;
                }
            }
        }
        let body = match joined.find(']') {
            Some(end) => &joined[..end],
            None => joined.as_str(),
        };
        push_items(&mut items, body.split(','));
        return items;
    }

    if !inline.is_empty() {
        push_items(&mut items, inline.split(','));
    }
    for line in &segment.continuation {
        if let Some(item) = bullet_item(line) {
            push_items(&mut items, std::iter::once(item));
        } else if inline.is_empty() && !line.trim().is_empty() {
            push_items(&mut items, line.split(','));
        }
    }
    items
}

fn push_items<'a>(items: &mut Vec<String>, candidates: impl Iterator<Item = &'a str>) {
    for candidate in candidates {
        let item = candidate
            .trim()
            .trim_matches(['"', '\'', '`', '*'])
            .trim_end_matches([',', ';'])
            .trim();
        if !item.is_empty() && !items.iter().any(|existing| existing == item) {
            items.push(item.to_string());
        }
    }
}

fn resolve_text(segment: &Segment<'_>) -> String {
    let joined = std::iter::once(segment.inline)
        .chain(segment.continuation.iter().copied())
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let text = joined.trim();
    let text = text
        .strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(text);
    text.trim_matches(['"', '*']).trim().to_string()
}

fn placeholder_value(placeholder: Placeholder) -> FieldValue {
    match placeholder {
        Placeholder::Text(text) => FieldValue::Text(text.to_string()),
        Placeholder::List(items) => FieldValue::List(items.iter().map(|s| s.to_string()).collect()),
        Placeholder::Number(n) => FieldValue::Number(n),
    }
}

fn placeholder_number(rules: &[FieldRule], field: Field) -> Option<f64> {
    rules
        .iter()
        .find(|rule| rule.field == field)
        .and_then(|rule| match rule.placeholder {
            Placeholder::Number(n) => Some(n),
            _ => None,
        })
}

fn placeholder_text(rules: &[FieldRule], field: Field) -> String {
    match rules.iter().find(|rule| rule.field == field).map(|rule| rule.placeholder) {
        Some(Placeholder::Text(text)) => text.to_string(),
        _ => String::new(),
    }
}

/// Strict decode of a JSON plan, tolerating code fences and prose around the object.
fn decode_plan_json(raw: &str, rules: &[FieldRule]) -> Option<ResearchPlan> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    let value: Value = serde_json::from_str(&raw[start..=end]).ok()?;
    let object = value.as_object()?;
    if !["strategy", "keywords", "timeframe"]
        .iter()
        .any(|key| object.contains_key(*key))
    {
        return None;
    }

    let strategy = object
        .get("strategy")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| placeholder_text(rules, Field::Strategy));

    let mut keywords = Vec::new();
    match object.get("keywords") {
        Some(Value::Array(items)) => {
            push_items(&mut keywords, items.iter().filter_map(Value::as_str));
        }
        Some(Value::String(list)) => push_items(&mut keywords, list.split(',')),
        _ => {}
    }

    let timeframe = match object.get("timeframe") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => placeholder_text(rules, Field::Timeframe),
    };

    Some(ResearchPlan {
        strategy,
        keywords,
        timeframe,
    })
}
