use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TallyError {
    #[error("document extraction failed: {0}")]
    Extraction(String),

    #[error("pdftotext not found. Install poppler: brew install poppler (macOS) or apt install poppler-utils (Linux)")]
    PdftotextNotFound,

    #[error("pdftotext failed with exit code {code}: {stderr}")]
    PdftotextFailed { code: i32, stderr: String },

    #[error("unsupported document type: {0}")]
    UnsupportedDocument(String),

    #[error("could not resolve table structure: {0}")]
    StructureUnresolved(String),

    #[error("catalog lookup failed: {0}")]
    CatalogLookup(String),

    #[error("failed to load catalog from {path}: {reason}")]
    CatalogLoad { path: PathBuf, reason: String },

    #[error("invalid catalog: {0}")]
    CatalogInvalid(String),

    #[error("failed to load config from {path}: {reason}")]
    ConfigLoad { path: PathBuf, reason: String },

    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    #[error("checkpoint covers {checkpoint} items but the batch has {batch}")]
    CheckpointMismatch { checkpoint: usize, batch: usize },

    #[error("checkpoint was written for a different document")]
    CheckpointForeign,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Failure of an optional, network-bound matching tier.
///
/// Never fails a job: the resolver records it on the attempt and falls
/// through to the best candidate found so far.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TierError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
