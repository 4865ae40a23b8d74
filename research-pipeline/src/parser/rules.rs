//! Label rule tables for each generation stage.
//!
//! Tables are plain data: adding a stage or a backend that labels fields differently means adding
//! or extending a table, not touching the extraction engine.

/// Record fields the parser can fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Strategy,
    Keywords,
    Timeframe,
    KeyFindings,
    Methodology,
    Significance,
    Strengths,
    Limitations,
    Score,
    Recommendation,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    /// Bracketed, comma-delimited or bulleted list
    List,
    /// Free text up to the next label
    Text,
    /// First decimal number after the label, clamped into `[min, max]`
    Number { min: f64, max: f64 },
}

/// Value used when a field's label is missing or its value is empty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placeholder {
    Text(&'static str),
    List(&'static [&'static str]),
    Number(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldRule {
    pub field: Field,
    /// Lowercase labels, matched before a colon. The first is canonical: it is also found
    /// mid-line and on bulleted lines inside an open list. The others only count at the start
    /// of a line or after a closing bracket or clause.
    pub labels: &'static [&'static str],
    pub kind: FieldKind,
    pub placeholder: Placeholder,
}

pub const PLAN_RULES: &[FieldRule] = &[
    FieldRule {
        field: Field::Strategy,
        labels: &["strategy", "research strategy"],
        kind: FieldKind::Text,
        placeholder: Placeholder::Text("Research strategy not explicitly stated."),
    },
    FieldRule {
        field: Field::Keywords,
        labels: &["keywords", "search terms", "key terms"],
        kind: FieldKind::List,
        placeholder: Placeholder::List(&[]),
    },
    FieldRule {
        field: Field::Timeframe,
        labels: &["timeframe", "time frame", "time period"],
        kind: FieldKind::Text,
        placeholder: Placeholder::Text("unspecified"),
    },
];

pub const SUMMARY_RULES: &[FieldRule] = &[
    FieldRule {
        field: Field::KeyFindings,
        labels: &["key findings", "findings", "key results"],
        kind: FieldKind::List,
        placeholder: Placeholder::List(&["Key findings not explicitly stated."]),
    },
    FieldRule {
        field: Field::Methodology,
        labels: &["methodology", "methods", "approach"],
        kind: FieldKind::Text,
        placeholder: Placeholder::Text("Methodology not explicitly stated."),
    },
    FieldRule {
        field: Field::Significance,
        labels: &["significance", "impact"],
        kind: FieldKind::Text,
        placeholder: Placeholder::Text("Significance not explicitly stated."),
    },
];

pub const CRITIQUE_RULES: &[FieldRule] = &[
    FieldRule {
        field: Field::Strengths,
        labels: &["strengths"],
        kind: FieldKind::List,
        placeholder: Placeholder::List(&["Strengths not explicitly stated."]),
    },
    FieldRule {
        field: Field::Limitations,
        labels: &["limitations", "weaknesses"],
        kind: FieldKind::List,
        placeholder: Placeholder::List(&["Limitations not explicitly stated."]),
    },
    FieldRule {
        field: Field::Score,
        labels: &["score", "relevance score", "quality score", "rating"],
        kind: FieldKind::Number {
            min: 0.0,
            max: 10.0,
        },
        placeholder: Placeholder::Number(5.0),
    },
    FieldRule {
        field: Field::Recommendation,
        labels: &["recommendation"],
        kind: FieldKind::Text,
        placeholder: Placeholder::Text("No recommendation provided."),
    },
];
