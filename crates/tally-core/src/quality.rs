//! Extraction and matching quality metrics, and the flags that mark a run
//! as low quality.

use crate::config::QualityConfig;
use crate::matching::{MatchResult, TierName};
use crate::parsing::ParsedTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Running match statistics, folded in as chunks complete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchStats {
    pub attempted: usize,
    pub matched: usize,
    pub score_sum: f64,
    pub methods: BTreeMap<TierName, usize>,
}

impl MatchStats {
    pub fn add(&mut self, result: &MatchResult) {
        self.attempted += 1;
        if result.is_resolved() {
            self.matched += 1;
            self.score_sum += result.score;
            *self.methods.entry(result.method).or_default() += 1;
        } else {
            *self.methods.entry(TierName::None).or_default() += 1;
        }
    }

    pub fn merge(&mut self, other: &MatchStats) {
        self.attempted += other.attempted;
        self.matched += other.matched;
        self.score_sum += other.score_sum;
        for (tier, n) in &other.methods {
            *self.methods.entry(*tier).or_default() += n;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub rows_considered: usize,
    pub items_extracted: usize,
    pub rows_skipped: usize,
    pub skip_rate: f64,
    pub mean_extraction_confidence: f64,
    /// Share of items with at least one identifier.
    pub identifier_coverage: f64,
    /// Share of items with a price on the line itself.
    pub line_price_coverage: f64,
    pub low_confidence_items: usize,
    pub synthetic_headers: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_match_score: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub method_histogram: BTreeMap<TierName, usize>,
}

fn share(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

impl QualityMetrics {
    /// Metrics available right after extraction.
    pub fn from_parsed(parsed: &ParsedTable, config: &QualityConfig) -> Self {
        let items = &parsed.items;
        let n = items.len();
        let confidence_sum: f64 = items.iter().map(|i| i.extraction_confidence).sum();

        QualityMetrics {
            rows_considered: parsed.rows_considered,
            items_extracted: n,
            rows_skipped: parsed.skipped.len(),
            skip_rate: share(parsed.skipped.len(), parsed.rows_considered),
            mean_extraction_confidence: if n == 0 { 0.0 } else { confidence_sum / n as f64 },
            identifier_coverage: share(items.iter().filter(|i| !i.identifiers.is_empty()).count(), n),
            line_price_coverage: share(items.iter().filter(|i| i.has_price()).count(), n),
            low_confidence_items: items
                .iter()
                .filter(|i| i.extraction_confidence < config.low_confidence_item)
                .count(),
            synthetic_headers: parsed.structure.synthetic_headers,
            ..QualityMetrics::default()
        }
    }

    pub fn with_matching(mut self, stats: &MatchStats) -> Self {
        if stats.attempted > 0 {
            self.match_rate = Some(share(stats.matched, stats.attempted));
            self.mean_match_score = Some(if stats.matched == 0 {
                0.0
            } else {
                stats.score_sum / stats.matched as f64
            });
        }
        self.method_histogram = stats.methods.clone();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    /// Columns were inferred by position; informational only.
    SyntheticHeaders,
    HighSkipRate,
    LowExtractionConfidence,
    LowPriceCoverage,
    LowMatchRate,
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualityFlag::SyntheticHeaders => "no header row; columns inferred by position",
            QualityFlag::HighSkipRate => "many rows skipped",
            QualityFlag::LowExtractionConfidence => "low extraction confidence",
            QualityFlag::LowPriceCoverage => "few rows carry a price",
            QualityFlag::LowMatchRate => "few items matched the catalog",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub metrics: QualityMetrics,
    pub flags: Vec<QualityFlag>,
}

impl QualityReport {
    pub fn evaluate(metrics: QualityMetrics, config: &QualityConfig) -> Self {
        let mut flags = Vec::new();
        if metrics.synthetic_headers {
            flags.push(QualityFlag::SyntheticHeaders);
        }
        if metrics.skip_rate > config.max_skip_rate {
            flags.push(QualityFlag::HighSkipRate);
        }
        if metrics.items_extracted > 0 {
            if metrics.mean_extraction_confidence < config.min_mean_extraction_confidence {
                flags.push(QualityFlag::LowExtractionConfidence);
            }
            if metrics.line_price_coverage < config.min_price_coverage {
                flags.push(QualityFlag::LowPriceCoverage);
            }
        }
        if metrics.match_rate.is_some_and(|r| r < config.min_match_rate) {
            flags.push(QualityFlag::LowMatchRate);
        }
        QualityReport { metrics, flags }
    }

    pub fn is_low_quality(&self) -> bool {
        self.flags.iter().any(|f| *f != QualityFlag::SyntheticHeaders)
    }
}
