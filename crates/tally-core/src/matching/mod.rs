//! Catalog resolution: an ordered cascade of matching tiers.

pub mod arbiter;
pub mod retry;
pub mod tiers;

use crate::catalog::embedding::SemanticSearch;
use crate::catalog::schema::CatalogEntry;
use crate::catalog::CatalogLookup;
use crate::config::MatchingConfig;
use crate::error::TallyError;
use crate::model::ExtractedItem;
use arbiter::MatchArbiter;
use retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tiers::MatchTier;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierName {
    Exact,
    Fuzzy,
    Combined,
    Substring,
    FullText,
    Semantic,
    Ai,
    /// No tier produced a candidate.
    None,
}

impl fmt::Display for TierName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TierName::Exact => "exact",
            TierName::Fuzzy => "fuzzy",
            TierName::Combined => "combined",
            TierName::Substring => "substring",
            TierName::FullText => "full_text",
            TierName::Semantic => "semantic",
            TierName::Ai => "ai",
            TierName::None => "none",
        };
        write!(f, "{s}")
    }
}

/// How the accepted match was anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierBasis {
    /// Identifier hit in the catalog's primary namespace.
    Primary,
    /// Identifier hit in an alternate namespace (OEM, wholesaler, ...).
    Secondary,
    /// Matched on text, or not matched at all.
    NonIdentifier,
}

/// One tier's attempt at one query. Attempts without an entry record a
/// miss or a degraded external call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchAttempt {
    pub tier: TierName,
    pub query: String,
    pub entry_id: Option<String>,
    pub score: f64,
    /// Namespace of the identifier hit, for identifier tiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip)]
    pub entry: Option<Arc<CatalogEntry>>,
}

impl MatchAttempt {
    pub fn hit(tier: TierName, query: &str, entry: Arc<CatalogEntry>, score: f64) -> Self {
        MatchAttempt {
            tier,
            query: query.to_string(),
            entry_id: Some(entry.id.clone()),
            score,
            namespace: None,
            note: None,
            entry: Some(entry),
        }
    }

    pub fn miss(tier: TierName, query: &str) -> Self {
        MatchAttempt {
            tier,
            query: query.to_string(),
            entry_id: None,
            score: 0.0,
            namespace: None,
            note: None,
            entry: None,
        }
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    /// Accepted entry; None when unresolved.
    pub entry_id: Option<String>,
    /// Score of the best attempt, accepted or not.
    pub score: f64,
    /// Tier of the best attempt, or `none`.
    pub method: TierName,
    pub basis: IdentifierBasis,
    pub attempts: Vec<MatchAttempt>,
    #[serde(skip)]
    pub entry: Option<Arc<CatalogEntry>>,
}

impl MatchResult {
    pub fn is_resolved(&self) -> bool {
        self.entry.is_some()
    }
}

/// Everything a tier may consult.
pub struct MatchContext<'a> {
    pub catalog: &'a dyn CatalogLookup,
    pub semantic: Option<&'a dyn SemanticSearch>,
    pub arbiter: Option<&'a dyn MatchArbiter>,
    pub config: &'a MatchingConfig,
    pub retry: RetryPolicy,
}

impl<'a> MatchContext<'a> {
    pub fn new(catalog: &'a dyn CatalogLookup, config: &'a MatchingConfig) -> Self {
        MatchContext {
            catalog,
            semantic: None,
            arbiter: None,
            config,
            retry: RetryPolicy::from_config(&config.retry),
        }
    }
}

/// Runs the tier cascade for one item.
pub struct Resolver {
    tiers: Vec<Box<dyn MatchTier>>,
}

impl Resolver {
    /// The seven tiers in order: exact, fuzzy, combined, substring,
    /// full-text, semantic, AI.
    pub fn standard() -> Self {
        Resolver {
            tiers: vec![
                Box::new(tiers::ExactTier),
                Box::new(tiers::FuzzyTier),
                Box::new(tiers::CombinedTier),
                Box::new(tiers::SubstringTier),
                Box::new(tiers::FullTextTier),
                Box::new(tiers::SemanticTier),
                Box::new(tiers::AiTier),
            ],
        }
    }

    pub fn with_tiers(tiers: Vec<Box<dyn MatchTier>>) -> Self {
        Resolver { tiers }
    }

    pub fn tier_names(&self) -> Vec<TierName> {
        self.tiers.iter().map(|t| t.tier()).collect()
    }

    /// Resolve an item against the catalog.
    ///
    /// Only catalog lookup failures are errors. External tier failures are
    /// recorded on their attempt and resolution falls through.
    pub fn resolve(
        &self,
        item: &ExtractedItem,
        ctx: &MatchContext<'_>,
    ) -> Result<MatchResult, TallyError> {
        let mut attempts: Vec<MatchAttempt> = Vec::new();
        let mut best: Option<usize> = None;

        for tier in &self.tiers {
            let new_attempts = tier.attempt(item, ctx, &attempts)?;
            for attempt in new_attempts {
                debug!(
                    row = item.source_row_index,
                    tier = %attempt.tier,
                    query = %attempt.query,
                    entry = ?attempt.entry_id,
                    score = attempt.score,
                    "match attempt"
                );
                let beats = attempt.entry.is_some()
                    && best.map_or(true, |b| attempt.score > attempts[b].score);
                attempts.push(attempt);
                if beats {
                    best = Some(attempts.len() - 1);
                }
            }

            let best_score = best.map(|b| attempts[b].score).unwrap_or(0.0);
            if best.is_some() && best_score >= tier.accept_threshold(ctx.config) {
                break;
            }
        }

        let Some(b) = best else {
            return Ok(MatchResult {
                entry_id: None,
                score: 0.0,
                method: TierName::None,
                basis: IdentifierBasis::NonIdentifier,
                attempts,
                entry: None,
            });
        };

        let winner = &attempts[b];
        let accepted = winner.score >= ctx.config.min_match_score;
        let basis = match (&winner.namespace, accepted) {
            (Some(ns), true) if ns == ctx.catalog.primary_namespace() => IdentifierBasis::Primary,
            (Some(_), true) => IdentifierBasis::Secondary,
            _ => IdentifierBasis::NonIdentifier,
        };

        Ok(MatchResult {
            entry_id: if accepted { winner.entry_id.clone() } else { None },
            score: winner.score,
            method: winner.tier,
            basis,
            entry: if accepted { winner.entry.clone() } else { None },
            attempts,
        })
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{parse_catalog_str, InMemoryCatalog, ScoredEntry};
    use crate::error::TierError;
    use crate::model::{Identifier, IdentifierSource};
    use arbiter::ArbiterVerdict;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const CATALOG: &str = r#"{
        "name": "Test",
        "version": "1",
        "primary_namespace": "stock",
        "entries": [
            { "id": "e1", "sku": "100234",
              "alternate_skus": { "oem": "CF410A", "wholesaler": "HEWCF410A" },
              "name": "HP 410A Black Toner Cartridge", "brand": "HP" },
            { "id": "e2", "sku": "8280B001", "name": "CANON CL-246 C/M/Y COLOR INK" },
            { "id": "e3", "sku": "200111", "name": "Copy Paper Letter White",
              "description": "20 lb 92 bright" }
        ]
    }"#;

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::new(parse_catalog_str(CATALOG).unwrap())
    }

    fn item(description: &str, ids: &[&str]) -> ExtractedItem {
        ExtractedItem {
            source_row_index: 1,
            description: description.into(),
            identifiers: ids
                .iter()
                .map(|v| Identifier {
                    column: 0,
                    value: v.to_string(),
                    source: IdentifierSource::Designated { priority: 0 },
                })
                .collect(),
            quantity: 1,
            unit_price: Decimal::ZERO,
            unit_of_measure: None,
            pack_quantity: None,
            price_from_total: false,
            extraction_confidence: 0.6,
        }
    }

    fn fast_ctx<'a>(catalog: &'a InMemoryCatalog, config: &'a MatchingConfig) -> MatchContext<'a> {
        let mut ctx = MatchContext::new(catalog, config);
        ctx.retry = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
        };
        ctx
    }

    struct FixedArbiter {
        verdict: Result<ArbiterVerdict, TierError>,
        calls: AtomicUsize,
    }

    impl MatchArbiter for FixedArbiter {
        fn choose(
            &self,
            _item: &ExtractedItem,
            _shortlist: &[Arc<CatalogEntry>],
            _timeout: Duration,
        ) -> Result<ArbiterVerdict, TierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.verdict.clone()
        }

        fn backend_name(&self) -> &str {
            "fixed"
        }
    }

    struct DownSemantic;

    impl SemanticSearch for DownSemantic {
        fn search(&self, _: &str, _: usize, t: Duration) -> Result<Vec<ScoredEntry>, TierError> {
            Err(TierError::Timeout(t))
        }
    }

    #[test]
    fn test_exact_primary_identifier_scores_one() {
        let (c, config) = (catalog(), MatchingConfig::default());
        let result = Resolver::standard()
            .resolve(&item("", &["100234"]), &fast_ctx(&c, &config))
            .unwrap();
        assert_eq!(result.score, 1.0);
        assert_eq!(result.method, TierName::Exact);
        assert_eq!(result.basis, IdentifierBasis::Primary);
        assert_eq!(result.entry_id.as_deref(), Some("e1"));
        assert_eq!(result.attempts.len(), 1);
    }

    #[test]
    fn test_exact_alternate_namespace_is_secondary() {
        let (c, config) = (catalog(), MatchingConfig::default());
        let result = Resolver::standard()
            .resolve(&item("toner", &["cf410a"]), &fast_ctx(&c, &config))
            .unwrap();
        assert_eq!(result.score, 1.0);
        assert_eq!(result.basis, IdentifierBasis::Secondary);
    }

    #[test]
    fn test_fuzzy_separators_and_vendor_prefix() {
        let (c, config) = (catalog(), MatchingConfig::default());
        let ctx = fast_ctx(&c, &config);

        let spaced = Resolver::standard().resolve(&item("", &["CF 410A"]), &ctx).unwrap();
        assert_eq!(spaced.method, TierName::Fuzzy);
        assert!((spaced.score - 0.95).abs() < 1e-9);

        let prefixed = Resolver::standard().resolve(&item("", &["XERCF410A"]), &ctx).unwrap();
        assert_eq!(prefixed.method, TierName::Fuzzy);
        assert!((prefixed.score - 0.90).abs() < 1e-9);
        assert_eq!(prefixed.entry_id.as_deref(), Some("e1"));
    }

    #[test]
    fn test_slashed_name_resolves_by_substring() {
        let (c, config) = (catalog(), MatchingConfig::default());
        let result = Resolver::standard()
            .resolve(&item("CANON CL-246 C/M/Y COLOR INK", &[]), &fast_ctx(&c, &config))
            .unwrap();
        assert_eq!(result.method, TierName::Substring);
        assert_eq!(result.entry_id.as_deref(), Some("e2"));
        assert!((result.score - 0.99).abs() < 1e-9);
        assert_eq!(result.basis, IdentifierBasis::NonIdentifier);
    }

    #[test]
    fn test_no_candidates_is_unresolved() {
        let (c, config) = (catalog(), MatchingConfig::default());
        let result = Resolver::standard()
            .resolve(&item("Desk lamp", &["ZZ9999"]), &fast_ctx(&c, &config))
            .unwrap();
        assert!(!result.is_resolved());
        assert_eq!(result.method, TierName::None);
        assert!(!result.attempts.is_empty());
    }

    #[test]
    fn test_below_min_score_keeps_method_but_no_entry() {
        let c = catalog();
        let config = MatchingConfig {
            min_match_score: 0.9,
            ..MatchingConfig::default()
        };
        let result = Resolver::standard()
            .resolve(&item("black toner stapler refill", &[]), &fast_ctx(&c, &config))
            .unwrap();
        assert!(!result.is_resolved());
        assert_eq!(result.method, TierName::FullText);
        assert!((result.score - 0.825).abs() < 1e-9);
    }

    #[test]
    fn test_semantic_failure_degrades() {
        let (c, config) = (catalog(), MatchingConfig::default());
        let mut ctx = fast_ctx(&c, &config);
        let down = DownSemantic;
        ctx.semantic = Some(&down);
        let result = Resolver::standard()
            .resolve(&item("ergonomic keyboard", &[]), &ctx)
            .unwrap();
        let semantic = result
            .attempts
            .iter()
            .find(|a| a.tier == TierName::Semantic)
            .unwrap();
        assert!(semantic.note.as_deref().unwrap().contains("timed out"));
        assert!(!result.is_resolved());
    }

    #[test]
    fn test_ai_picks_from_shortlist() {
        let c = catalog();
        let config = MatchingConfig {
            ai_enabled: true,
            ..MatchingConfig::default()
        };
        let arbiter = FixedArbiter {
            verdict: Ok(ArbiterVerdict {
                entry_id: Some("e3".into()),
                confidence: 0.99,
            }),
            calls: AtomicUsize::new(0),
        };
        let mut ctx = fast_ctx(&c, &config);
        ctx.arbiter = Some(&arbiter);
        let result = Resolver::standard()
            .resolve(&item("ream of bond sheets white", &[]), &ctx)
            .unwrap();
        assert_eq!(result.method, TierName::Ai);
        assert_eq!(result.entry_id.as_deref(), Some("e3"));
        assert!((result.score - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_ai_pick_outside_shortlist_ignored() {
        let c = catalog();
        let config = MatchingConfig {
            ai_enabled: true,
            ..MatchingConfig::default()
        };
        let arbiter = FixedArbiter {
            verdict: Ok(ArbiterVerdict {
                entry_id: Some("e1".into()),
                confidence: 0.9,
            }),
            calls: AtomicUsize::new(0),
        };
        let mut ctx = fast_ctx(&c, &config);
        ctx.arbiter = Some(&arbiter);
        let result = Resolver::standard()
            .resolve(&item("ream of bond sheets white", &[]), &ctx)
            .unwrap();
        assert!(!result.is_resolved());
        let ai = result.attempts.iter().find(|a| a.tier == TierName::Ai).unwrap();
        assert!(ai.note.as_deref().unwrap().contains("outside the shortlist"));
    }

    #[test]
    fn test_ai_failure_retried_then_degraded() {
        let c = catalog();
        let config = MatchingConfig {
            ai_enabled: true,
            ..MatchingConfig::default()
        };
        let arbiter = FixedArbiter {
            verdict: Err(TierError::Unavailable("503".into())),
            calls: AtomicUsize::new(0),
        };
        let mut ctx = fast_ctx(&c, &config);
        ctx.arbiter = Some(&arbiter);
        let result = Resolver::standard()
            .resolve(&item("ream of bond sheets white", &[]), &ctx)
            .unwrap();
        assert_eq!(arbiter.calls.load(Ordering::SeqCst), 3);
        assert!(!result.is_resolved());
    }

    #[test]
    fn test_ai_disabled_never_called() {
        let (c, config) = (catalog(), MatchingConfig::default());
        let arbiter = FixedArbiter {
            verdict: Err(TierError::Unavailable("unused".into())),
            calls: AtomicUsize::new(0),
        };
        let mut ctx = fast_ctx(&c, &config);
        ctx.arbiter = Some(&arbiter);
        Resolver::standard()
            .resolve(&item("ream of bond sheets white", &[]), &ctx)
            .unwrap();
        assert_eq!(arbiter.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let (c, config) = (catalog(), MatchingConfig::default());
        let ctx = fast_ctx(&c, &config);
        let it = item("HP black toner", &["HEW-CF410A"]);
        let a = Resolver::standard().resolve(&it, &ctx).unwrap();
        let b = Resolver::standard().resolve(&it, &ctx).unwrap();
        assert_eq!(a.entry_id, b.entry_id);
        assert_eq!(a.score, b.score);
        assert_eq!(a.method, b.method);
    }
}
