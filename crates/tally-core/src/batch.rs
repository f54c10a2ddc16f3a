//! Chunked processing with a resumable checkpoint.
//!
//! A job walks its items in fixed-size chunks. After every chunk the
//! [`Checkpoint`] holds everything needed to continue: the cursor, the
//! running aggregates and the records so far. Items inside a chunk are
//! resolved in parallel and folded back in index order, so the result does
//! not depend on thread scheduling.

use crate::catalog::embedding::SemanticSearch;
use crate::catalog::CatalogLookup;
use crate::classify::{categorize, Aggregator, LineRecord};
use crate::config::EngineConfig;
use crate::error::TallyError;
use crate::matching::arbiter::MatchArbiter;
use crate::matching::{MatchContext, Resolver};
use crate::model::ExtractedItem;
use crate::optimize::find_opportunity;
use crate::pricing::normalize_price;
use crate::quality::MatchStats;
use crate::trace::{build_item_trace, degraded_tier_warnings, TraceBundle, TraceEntry, TraceWarning};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub total: usize,
    /// [`batch_fingerprint`] of the items the job was started on.
    pub fingerprint: String,
    /// Index of the next unprocessed item.
    pub cursor: usize,
    pub state: JobState,
    pub aggregator: Aggregator,
    pub records: Vec<LineRecord>,
    pub stats: MatchStats,
    #[serde(default)]
    pub trace: TraceBundle,
}

impl Checkpoint {
    pub fn new(items: &[ExtractedItem]) -> Self {
        let total = items.len();
        Checkpoint {
            total,
            fingerprint: batch_fingerprint(items),
            cursor: 0,
            state: if total == 0 {
                JobState::Completed
            } else {
                JobState::Pending
            },
            aggregator: Aggregator::new(),
            records: Vec::new(),
            stats: MatchStats::default(),
            trace: TraceBundle::default(),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, JobState::Completed | JobState::Cancelled)
    }

    pub fn progress(&self) -> Progress {
        Progress {
            processed: self.cursor,
            total: self.total,
        }
    }

    pub fn load(path: &Path) -> Result<Checkpoint, TallyError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the checkpoint next to `path` and move it into place, so a
    /// crash never leaves a half-written file.
    pub fn save(&self, path: &Path) -> Result<(), TallyError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| TallyError::Io(e.error))?;
        Ok(())
    }

    fn check_batch(&self, items: &[ExtractedItem]) -> Result<(), TallyError> {
        if self.total != items.len() || self.cursor > self.total {
            return Err(TallyError::CheckpointMismatch {
                checkpoint: self.total,
                batch: items.len(),
            });
        }
        if self.fingerprint != batch_fingerprint(items) {
            return Err(TallyError::CheckpointForeign);
        }
        Ok(())
    }
}

/// SHA-256 over every item's row index and input key, in order.
pub fn batch_fingerprint(items: &[ExtractedItem]) -> String {
    let mut hasher = Sha256::new();
    for item in items {
        hasher.update(item.source_row_index.to_le_bytes());
        hasher.update(item.input_key().as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
}

/// Cooperative cancellation shared between a job and whoever stops it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything one item produced.
struct ItemResult {
    record: LineRecord,
    trace: TraceEntry,
    warnings: Vec<TraceWarning>,
    stats: MatchStats,
}

/// The per-item pipeline: resolve, price, optimize, categorize.
pub struct Engine {
    catalog: Arc<dyn CatalogLookup>,
    semantic: Option<Arc<dyn SemanticSearch>>,
    arbiter: Option<Arc<dyn MatchArbiter>>,
    resolver: Resolver,
    config: EngineConfig,
}

impl Engine {
    pub fn new(catalog: Arc<dyn CatalogLookup>, config: EngineConfig) -> Self {
        Engine {
            catalog,
            semantic: None,
            arbiter: None,
            resolver: Resolver::standard(),
            config,
        }
    }

    pub fn with_semantic(mut self, semantic: Arc<dyn SemanticSearch>) -> Self {
        self.semantic = Some(semantic);
        self
    }

    pub fn with_arbiter(mut self, arbiter: Arc<dyn MatchArbiter>) -> Self {
        self.arbiter = Some(arbiter);
        self
    }

    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn process_item(&self, item: &ExtractedItem) -> Result<ItemResult, TallyError> {
        let mut ctx = MatchContext::new(self.catalog.as_ref(), &self.config.matching);
        ctx.semantic = self.semantic.as_deref();
        ctx.arbiter = self.arbiter.as_deref();

        let matched = self.resolver.resolve(item, &ctx)?;
        let entry = matched.entry.as_deref();
        let price = normalize_price(item, entry, &self.config.pricing);

        let optimization = match entry {
            Some(e) if price.is_priced() => Some(find_opportunity(
                e,
                &price,
                self.catalog.as_ref(),
                &self.config.optimization,
            )?),
            _ => None,
        };

        let record = categorize(item, &matched, price, optimization.as_ref());
        let trace = build_item_trace(item, &matched, optimization.as_ref(), &record);
        let warnings = degraded_tier_warnings(item, &matched);
        for w in &warnings {
            warn!(row = item.source_row_index, "{}", w.message);
        }
        let mut stats = MatchStats::default();
        stats.add(&matched);

        Ok(ItemResult {
            record,
            trace,
            warnings,
            stats,
        })
    }

    /// Process the next chunk and advance the cursor.
    ///
    /// The checkpoint is only touched once the whole chunk succeeded; a
    /// catalog failure leaves it where it was.
    pub fn run_chunk(
        &self,
        items: &[ExtractedItem],
        checkpoint: &mut Checkpoint,
    ) -> Result<Progress, TallyError> {
        checkpoint.check_batch(items)?;
        if checkpoint.is_finished() {
            return Ok(checkpoint.progress());
        }

        let start = checkpoint.cursor;
        let end = (start + self.config.batch.chunk_size.max(1)).min(items.len());
        debug!(start, end, total = items.len(), "processing chunk");

        let results = items[start..end]
            .par_iter()
            .map(|item| self.process_item(item))
            .collect::<Result<Vec<_>, _>>()?;

        for result in results {
            checkpoint.aggregator.add(&result.record);
            checkpoint.stats.merge(&result.stats);
            checkpoint.records.push(result.record);
            checkpoint.trace.entries.push(result.trace);
            checkpoint.trace.warnings.extend(result.warnings);
        }
        checkpoint.cursor = end;
        checkpoint.state = if end >= checkpoint.total {
            checkpoint.records.sort_by_key(|r| r.source_row_index);
            checkpoint.trace.sort();
            JobState::Completed
        } else {
            JobState::InProgress
        };

        Ok(checkpoint.progress())
    }

    /// Run chunks until the job completes or `cancel` is set. A cancelled
    /// job finishes the chunk in flight and schedules no more.
    pub fn run(
        &self,
        items: &[ExtractedItem],
        checkpoint: &mut Checkpoint,
        cancel: &CancelFlag,
    ) -> Result<Progress, TallyError> {
        checkpoint.check_batch(items)?;
        while !checkpoint.is_finished() {
            if cancel.is_cancelled() {
                checkpoint.state = JobState::Cancelled;
                info!(processed = checkpoint.cursor, total = checkpoint.total, "job cancelled");
                break;
            }
            let progress = self.run_chunk(items, checkpoint)?;
            debug!(processed = progress.processed, total = progress.total, "chunk done");
        }
        Ok(checkpoint.progress())
    }
}
