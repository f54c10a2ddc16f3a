pub mod batch;
pub mod catalog;
pub mod classify;
pub mod config;
pub mod error;
pub mod extraction;
pub mod matching;
pub mod model;
pub mod optimize;
pub mod parsing;
pub mod pricing;
pub mod quality;
pub mod trace;

use batch::{CancelFlag, Checkpoint, Engine, JobState, Progress};
use classify::{LineRecord, SavingsSummary};
use config::QualityConfig;
use error::TallyError;
use extraction::TableReader;
use parsing::structure::TableStructure;
use parsing::ParsedTable;
use quality::{QualityMetrics, QualityReport};
use serde::{Deserialize, Serialize};
use std::path::Path;
use trace::TraceBundle;
use tracing::{info, warn};

/// Read a document and parse its line-item table.
pub fn parse_document(bytes: &[u8], reader: &dyn TableReader) -> Result<ParsedTable, TallyError> {
    let table = reader.read_table(bytes)?;
    info!(backend = reader.backend_name(), rows = table.len(), "document read");
    parsing::parse_table(&table)
}

/// Like [`parse_document`], picking the reader from the file extension.
pub fn parse_file(path: &Path) -> Result<ParsedTable, TallyError> {
    let reader = extraction::reader_for_path(path)?;
    let bytes = std::fs::read(path)?;
    parse_document(&bytes, reader.as_ref())
}

/// The full result of a job, finished or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub state: JobState,
    pub progress: Progress,
    pub structure: TableStructure,
    pub summary: SavingsSummary,
    pub records: Vec<LineRecord>,
    pub quality: QualityReport,
    pub trace: TraceBundle,
}

/// Combine the parse result and a checkpoint into a report.
pub fn build_report(
    parsed: &ParsedTable,
    checkpoint: &Checkpoint,
    config: &QualityConfig,
) -> AnalysisReport {
    let metrics = QualityMetrics::from_parsed(parsed, config).with_matching(&checkpoint.stats);
    let quality = QualityReport::evaluate(metrics, config);
    if quality.is_low_quality() {
        warn!(flags = ?quality.flags, "low-quality input");
    }

    let mut trace = checkpoint.trace.clone();
    trace.warnings.extend(trace::skipped_row_warnings(&parsed.skipped));
    trace.warnings.extend(trace::quality_warnings(&quality));
    trace.sort();

    let mut records = checkpoint.records.clone();
    records.sort_by_key(|r| r.source_row_index);

    AnalysisReport {
        state: checkpoint.state,
        progress: checkpoint.progress(),
        structure: parsed.structure.clone(),
        summary: checkpoint.aggregator.summary(),
        records,
        quality,
        trace,
    }
}

/// Parse a document and run every item through `engine` in one go.
pub fn analyze(
    bytes: &[u8],
    reader: &dyn TableReader,
    engine: &Engine,
) -> Result<AnalysisReport, TallyError> {
    let parsed = parse_document(bytes, reader)?;
    if !parsed.skipped.is_empty() {
        warn!(skipped = parsed.skipped.len(), "rows skipped during extraction");
    }

    let mut checkpoint = Checkpoint::new(&parsed.items);
    engine.run(&parsed.items, &mut checkpoint, &CancelFlag::new())?;
    let report = build_report(&parsed, &checkpoint, &engine.config().quality);
    info!(
        items = report.summary.items,
        savings = %report.summary.savings,
        "analysis complete"
    );
    Ok(report)
}
