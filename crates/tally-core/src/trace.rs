use crate::classify::LineRecord;
use crate::matching::MatchResult;
use crate::model::{ExtractedItem, IdentifierSource};
use crate::optimize::OptimizationReport;
use crate::parsing::rows::SkippedRow;
use crate::quality::QualityReport;
use serde::{Deserialize, Serialize};

pub const TRACE_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceSeverity {
    Critical,
    Important,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStepType {
    ExtractIdentifiers,
    MatchAttempt,
    PriceFallback,
    GuardrailRejection,
    Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub step_type: TraceStepType,
    pub message: String,
}

/// How one line item went through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub entry_id: String,
    pub source_row_index: usize,
    pub input_key: String,
    pub steps: Vec<TraceStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceWarning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_row_index: Option<usize>,
    pub message: String,
    pub severity: TraceSeverity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceBundle {
    pub trace_schema_version: String,
    pub entries: Vec<TraceEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<TraceWarning>,
}

impl Default for TraceBundle {
    fn default() -> Self {
        Self {
            trace_schema_version: TRACE_SCHEMA_VERSION.to_string(),
            entries: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl TraceBundle {
    pub fn merge(&mut self, other: TraceBundle) {
        self.entries.extend(other.entries);
        self.warnings.extend(other.warnings);
    }

    /// Entries ordered by source row.
    pub fn sort(&mut self) {
        self.entries.sort_by_key(|e| e.source_row_index);
        self.warnings.sort_by_key(|w| w.source_row_index);
    }
}

fn step(step_type: TraceStepType, message: String) -> TraceStep {
    TraceStep { step_type, message }
}

pub fn build_item_trace(
    item: &ExtractedItem,
    matched: &MatchResult,
    optimization: Option<&OptimizationReport>,
    record: &LineRecord,
) -> TraceEntry {
    let mut steps = Vec::new();

    let ids: Vec<String> = item
        .identifiers
        .iter()
        .map(|i| match i.source {
            IdentifierSource::Designated { priority } => {
                format!("{} (column {}, priority {})", i.value, i.column, priority)
            }
            IdentifierSource::Scanned => format!("{} (column {}, scanned)", i.value, i.column),
        })
        .collect();
    steps.push(step(
        TraceStepType::ExtractIdentifiers,
        if ids.is_empty() {
            "No identifiers; matching on description".to_string()
        } else {
            format!("Identifiers: {}", ids.join(", "))
        },
    ));

    for attempt in &matched.attempts {
        let mut message = match &attempt.entry_id {
            Some(id) => format!(
                "{} '{}' -> {} ({:.3})",
                attempt.tier, attempt.query, id, attempt.score
            ),
            None => format!("{} '{}' -> no candidate", attempt.tier, attempt.query),
        };
        if let Some(note) = &attempt.note {
            message.push_str(&format!(" [{note}]"));
        }
        steps.push(step(TraceStepType::MatchAttempt, message));
    }

    if record.price.source.is_estimated() || !record.price.is_priced() {
        steps.push(step(
            TraceStepType::PriceFallback,
            format!("No line price; price source {}", record.price.source),
        ));
    }

    if let Some(report) = optimization {
        for rejected in &report.rejected {
            steps.push(step(
                TraceStepType::GuardrailRejection,
                format!("{:?} {} rejected: {}", rejected.kind, rejected.entry_id, rejected.rejection),
            ));
        }
    }

    steps.push(step(
        TraceStepType::Outcome,
        match &record.opportunity {
            Some(o) => format!(
                "{} via {:?} {} saving {}",
                record.outcome, o.kind, o.entry_id, o.savings
            ),
            None => record.outcome.to_string(),
        },
    ));

    TraceEntry {
        entry_id: format!("item_{}", item.source_row_index),
        source_row_index: item.source_row_index,
        input_key: record.input_key.clone(),
        steps,
    }
}

/// Warnings for attempts that recorded a degraded external call.
pub fn degraded_tier_warnings(item: &ExtractedItem, matched: &MatchResult) -> Vec<TraceWarning> {
    matched
        .attempts
        .iter()
        .filter_map(|a| {
            a.note.as_ref().map(|note| TraceWarning {
                source_row_index: Some(item.source_row_index),
                message: format!("{} tier degraded: {}", a.tier, note),
                severity: TraceSeverity::Important,
            })
        })
        .collect()
}

pub fn skipped_row_warnings(skipped: &[SkippedRow]) -> Vec<TraceWarning> {
    skipped
        .iter()
        .map(|s| TraceWarning {
            source_row_index: Some(s.row_index),
            message: format!("row skipped: {:?}", s.reason),
            severity: TraceSeverity::Info,
        })
        .collect()
}

pub fn quality_warnings(quality: &QualityReport) -> Vec<TraceWarning> {
    quality
        .flags
        .iter()
        .map(|f| TraceWarning {
            source_row_index: None,
            message: f.to_string(),
            severity: if quality.is_low_quality() {
                TraceSeverity::Critical
            } else {
                TraceSeverity::Info
            },
        })
        .collect()
}
