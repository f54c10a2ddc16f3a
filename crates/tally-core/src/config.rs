//! Engine configuration. Every business tunable lives here; nothing in the
//! pipeline hard-codes a threshold.

use crate::error::TallyError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub matching: MatchingConfig,
    pub pricing: PricingConfig,
    pub optimization: OptimizationConfig,
    pub quality: QualityConfig,
    pub batch: BatchConfig,
}

/// Per-tier acceptance thresholds: once the best score reaches a tier's
/// threshold, no later tier runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub exact: f64,
    pub fuzzy: f64,
    pub combined: f64,
    pub substring: f64,
    pub full_text: f64,
    pub semantic: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        TierThresholds {
            exact: 1.0,
            fuzzy: 0.85,
            combined: 0.90,
            substring: 0.88,
            full_text: 0.85,
            semantic: 0.75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 200,
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub thresholds: TierThresholds,
    /// Below this the best candidate is not accepted and the item is unresolved.
    pub min_match_score: f64,
    pub ai_enabled: bool,
    /// The AI tier only runs when the best score so far is below this.
    pub ai_floor: f64,
    pub ai_shortlist_size: usize,
    pub semantic_min_similarity: f64,
    pub fulltext_min_relevance: f64,
    pub combined_min_relevance: f64,
    /// Shortest name query the substring tier will try.
    pub substring_min_len: usize,
    pub external_timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        MatchingConfig {
            thresholds: TierThresholds::default(),
            min_match_score: 0.70,
            ai_enabled: false,
            ai_floor: 0.65,
            ai_shortlist_size: 5,
            semantic_min_similarity: 0.60,
            fulltext_min_relevance: 0.40,
            combined_min_relevance: 0.50,
            substring_min_len: 4,
            external_timeout_ms: 5000,
            retry: RetryConfig::default(),
        }
    }
}

impl MatchingConfig {
    pub fn external_timeout(&self) -> Duration {
        Duration::from_millis(self.external_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Applied to catalog per-each prices and costs when the line item has no price.
    pub markup_factor: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        PricingConfig {
            markup_factor: Decimal::new(135, 2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Alternatives yielding more than this multiple of the current page
    /// yield are rejected.
    pub max_yield_ratio: f64,
    /// Relative CPP improvements above this are treated as data errors.
    pub max_cpp_improvement: f64,
    pub min_cpp_improvement: f64,
    pub min_annual_savings: Decimal,
    /// Months covered by the input document; savings are annualised.
    pub period_months: u32,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        OptimizationConfig {
            max_yield_ratio: 8.0,
            max_cpp_improvement: 0.90,
            min_cpp_improvement: 0.05,
            min_annual_savings: Decimal::TEN,
            period_months: 12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub min_mean_extraction_confidence: f64,
    pub min_match_rate: f64,
    pub max_skip_rate: f64,
    pub min_price_coverage: f64,
    /// Items with extraction confidence below this count as low-confidence.
    pub low_confidence_item: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        QualityConfig {
            min_mean_extraction_confidence: 0.50,
            min_match_rate: 0.50,
            max_skip_rate: 0.30,
            min_price_coverage: 0.50,
            low_confidence_item: 0.50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub chunk_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig { chunk_size: 100 }
    }
}

/// Load a config from a JSON file.
pub fn load_config(path: &Path) -> Result<EngineConfig, TallyError> {
    let content = std::fs::read_to_string(path).map_err(|e| TallyError::ConfigLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let config: EngineConfig =
        serde_json::from_str(&content).map_err(|e| TallyError::ConfigLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    validate_config(&config)?;
    Ok(config)
}

/// Parse a config from a JSON string. Missing fields take their defaults.
pub fn parse_config_str(json: &str) -> Result<EngineConfig, TallyError> {
    let config: EngineConfig = serde_json::from_str(json)?;
    validate_config(&config)?;
    Ok(config)
}

fn check_unit(name: &str, value: f64) -> Result<(), TallyError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(TallyError::ConfigInvalid(format!(
            "{name} must be between 0 and 1 (got {value})"
        )))
    }
}

/// Validate that a config is usable.
pub fn validate_config(config: &EngineConfig) -> Result<(), TallyError> {
    let m = &config.matching;
    let t = &m.thresholds;
    for (name, value) in [
        ("matching.thresholds.exact", t.exact),
        ("matching.thresholds.fuzzy", t.fuzzy),
        ("matching.thresholds.combined", t.combined),
        ("matching.thresholds.substring", t.substring),
        ("matching.thresholds.full_text", t.full_text),
        ("matching.thresholds.semantic", t.semantic),
        ("matching.min_match_score", m.min_match_score),
        ("matching.ai_floor", m.ai_floor),
        ("matching.semantic_min_similarity", m.semantic_min_similarity),
        ("matching.fulltext_min_relevance", m.fulltext_min_relevance),
        ("matching.combined_min_relevance", m.combined_min_relevance),
        ("optimization.max_cpp_improvement", config.optimization.max_cpp_improvement),
        ("optimization.min_cpp_improvement", config.optimization.min_cpp_improvement),
        ("quality.min_mean_extraction_confidence", config.quality.min_mean_extraction_confidence),
        ("quality.min_match_rate", config.quality.min_match_rate),
        ("quality.max_skip_rate", config.quality.max_skip_rate),
        ("quality.min_price_coverage", config.quality.min_price_coverage),
        ("quality.low_confidence_item", config.quality.low_confidence_item),
    ] {
        check_unit(name, value)?;
    }

    if m.semantic_min_similarity >= 1.0 || m.combined_min_relevance >= 1.0 {
        return Err(TallyError::ConfigInvalid(
            "similarity and relevance floors must be below 1".into(),
        ));
    }
    if m.ai_shortlist_size == 0 {
        return Err(TallyError::ConfigInvalid(
            "matching.ai_shortlist_size must be at least 1".into(),
        ));
    }
    if m.retry.max_attempts == 0 {
        return Err(TallyError::ConfigInvalid(
            "matching.retry.max_attempts must be at least 1".into(),
        ));
    }
    if m.retry.backoff_multiplier < 1.0 {
        return Err(TallyError::ConfigInvalid(
            "matching.retry.backoff_multiplier must be at least 1".into(),
        ));
    }
    if config.pricing.markup_factor < Decimal::ONE {
        return Err(TallyError::ConfigInvalid(format!(
            "pricing.markup_factor must be at least 1 (got {})",
            config.pricing.markup_factor
        )));
    }
    if config.optimization.max_yield_ratio <= 1.0 {
        return Err(TallyError::ConfigInvalid(
            "optimization.max_yield_ratio must be greater than 1".into(),
        ));
    }
    if config.optimization.min_cpp_improvement > config.optimization.max_cpp_improvement {
        return Err(TallyError::ConfigInvalid(
            "optimization.min_cpp_improvement exceeds max_cpp_improvement".into(),
        ));
    }
    if config.optimization.min_annual_savings < Decimal::ZERO {
        return Err(TallyError::ConfigInvalid(
            "optimization.min_annual_savings must not be negative".into(),
        ));
    }
    if config.optimization.period_months == 0 {
        return Err(TallyError::ConfigInvalid(
            "optimization.period_months must be at least 1".into(),
        ));
    }
    if config.batch.chunk_size == 0 {
        return Err(TallyError::ConfigInvalid(
            "batch.chunk_size must be at least 1".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        validate_config(&config).unwrap();
        assert_eq!(config.pricing.markup_factor, dec!(1.35));
        assert_eq!(config.matching.thresholds.fuzzy, 0.85);
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config = parse_config_str(r#"{ "batch": { "chunk_size": 25 } }"#).unwrap();
        assert_eq!(config.batch.chunk_size, 25);
        assert_eq!(config.optimization.max_yield_ratio, 8.0);
    }

    #[test]
    fn test_decimal_fields_parse_from_strings() {
        let config = parse_config_str(
            r#"{ "pricing": { "markup_factor": "1.50" }, "optimization": { "min_annual_savings": "25" } }"#,
        )
        .unwrap();
        assert_eq!(config.pricing.markup_factor, dec!(1.50));
        assert_eq!(config.optimization.min_annual_savings, dec!(25));
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let err = parse_config_str(r#"{ "matching": { "min_match_score": 1.5 } }"#).unwrap_err();
        assert!(matches!(err, TallyError::ConfigInvalid(_)));
    }

    #[test]
    fn test_zero_chunk_rejected() {
        assert!(parse_config_str(r#"{ "batch": { "chunk_size": 0 } }"#).is_err());
    }

    #[test]
    fn test_markup_below_one_rejected() {
        assert!(parse_config_str(r#"{ "pricing": { "markup_factor": "0.9" } }"#).is_err());
    }
}
