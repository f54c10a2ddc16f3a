use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tally_core::batch::{CancelFlag, Checkpoint, Engine};
use tally_core::catalog::embedding::{HashingEmbedder, VectorIndex};
use tally_core::catalog::{load_catalog, InMemoryCatalog};
use tally_core::config::{load_config, validate_config, EngineConfig};
use tally_core::error::TallyError;
use tally_core::matching::arbiter::HttpArbiter;
use tracing::{info, warn};

use crate::output;

#[derive(Args)]
pub struct AnalyzeArgs {
    /// Path to the document (CSV, TSV, XLSX or PDF)
    input_file: PathBuf,

    /// JSON product catalog
    #[arg(short, long, value_name = "FILE")]
    catalog: PathBuf,

    /// JSON engine config (missing fields keep their defaults)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Items per chunk
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Checkpoint file: resumed if present, written after the run
    #[arg(long, value_name = "FILE")]
    checkpoint: Option<PathBuf>,

    /// Stop after this many chunks (use with --checkpoint to resume later)
    #[arg(long)]
    max_chunks: Option<usize>,

    /// Enable the local semantic search tier
    #[arg(long)]
    semantic: bool,

    /// Enable the AI arbiter tier (TALLY_LLM_BASE_URL, TALLY_LLM_MODEL, TALLY_LLM_API_KEY)
    #[arg(long)]
    ai: bool,

    /// Output format: table (default) or json
    #[arg(short, long, default_value = "table")]
    output: String,
}

fn effective_config(args: &AnalyzeArgs) -> Result<EngineConfig, TallyError> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };
    if let Some(n) = args.chunk_size {
        config.batch.chunk_size = n;
    }
    if args.ai {
        config.matching.ai_enabled = true;
    }
    validate_config(&config)?;
    Ok(config)
}

fn http_arbiter() -> Result<HttpArbiter, TallyError> {
    let base_url = std::env::var("TALLY_LLM_BASE_URL").map_err(|_| {
        TallyError::ConfigInvalid("--ai needs TALLY_LLM_BASE_URL to be set".into())
    })?;
    let model = std::env::var("TALLY_LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    let api_key = std::env::var("TALLY_LLM_API_KEY").ok();
    Ok(HttpArbiter::new(base_url, model, api_key))
}

pub fn run(args: AnalyzeArgs, verbose: bool) -> Result<(), TallyError> {
    let config = effective_config(&args)?;
    let catalog = Arc::new(InMemoryCatalog::new(load_catalog(&args.catalog)?));
    info!(
        catalog = catalog.name(),
        version = catalog.version(),
        entries = catalog.entries().len(),
        "catalog loaded"
    );

    let mut engine = Engine::new(catalog.clone(), config);
    if args.semantic {
        match VectorIndex::build(catalog.entries(), Box::new(HashingEmbedder::default())) {
            Ok(index) => engine = engine.with_semantic(Arc::new(index)),
            Err(e) => warn!(error = %e, "semantic index unavailable, continuing without it"),
        }
    }
    if args.ai {
        engine = engine.with_arbiter(Arc::new(http_arbiter()?));
    }

    let parsed = tally_core::parse_file(&args.input_file)?;
    if !parsed.skipped.is_empty() {
        warn!(skipped = parsed.skipped.len(), "rows skipped during extraction");
    }

    let mut checkpoint = match &args.checkpoint {
        Some(path) if path.exists() => {
            let cp = Checkpoint::load(path)?;
            info!(cursor = cp.cursor, total = cp.total, "resuming from checkpoint");
            cp
        }
        _ => Checkpoint::new(&parsed.items),
    };

    match args.max_chunks {
        Some(n) => {
            for _ in 0..n {
                if checkpoint.is_finished() {
                    break;
                }
                engine.run_chunk(&parsed.items, &mut checkpoint)?;
            }
        }
        None => {
            engine.run(&parsed.items, &mut checkpoint, &CancelFlag::new())?;
        }
    }

    if let Some(path) = &args.checkpoint {
        checkpoint.save(path)?;
        eprintln!(
            "Checkpoint: {}/{} item(s), written to {}",
            checkpoint.cursor,
            checkpoint.total,
            path.display()
        );
    }

    let report = tally_core::build_report(&parsed, &checkpoint, &engine.config().quality);
    match args.output.as_str() {
        "json" => output::json::print(&report)?,
        _ => output::table::print_report(&report, verbose),
    }

    Ok(())
}
