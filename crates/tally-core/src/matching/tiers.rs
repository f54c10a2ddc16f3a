//! The matching tiers. Each is a strategy over the same inputs; the
//! resolver runs them in order.

use crate::catalog::schema::CatalogEntry;
use crate::config::MatchingConfig;
use crate::error::TallyError;
use crate::matching::{MatchAttempt, MatchContext, TierName};
use crate::model::ExtractedItem;
use crate::parsing::normalize::{normalize_identifier, strip_vendor_prefix};
use std::sync::Arc;
use tracing::warn;

/// Identifiers the combined tier pairs with the description.
const COMBINED_MAX_IDENTIFIERS: usize = 3;
const FUZZY_BASE_SCORE: f64 = 0.95;
const FUZZY_PREFIX_PENALTY: f64 = 0.05;
const FUZZY_FLOOR: f64 = 0.85;
const SUBSTRING_MAX_SCORE: f64 = 0.99;
const AI_MAX_SCORE: f64 = 0.95;

pub trait MatchTier: Send + Sync {
    fn tier(&self) -> TierName;

    /// Best score at which resolution stops after this tier.
    fn accept_threshold(&self, config: &MatchingConfig) -> f64;

    /// `prior` holds every attempt made by earlier tiers for this item.
    fn attempt(
        &self,
        item: &ExtractedItem,
        ctx: &MatchContext<'_>,
        prior: &[MatchAttempt],
    ) -> Result<Vec<MatchAttempt>, TallyError>;
}

/// Text query for the text-based tiers: the description, or the
/// identifiers when the row had no description.
fn text_query(item: &ExtractedItem) -> String {
    if !item.description.is_empty() {
        item.description.clone()
    } else {
        item.identifiers
            .iter()
            .map(|i| i.value.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn rescale(value: f64, min: f64, base: f64, span: f64) -> f64 {
    let t = if min >= 1.0 { 1.0 } else { (value - min) / (1.0 - min) };
    base + span * t.clamp(0.0, 1.0)
}

/// Tier 1: identifier equal (ignoring case) to any catalog identifier in
/// any namespace. Score 1.0.
pub struct ExactTier;

impl MatchTier for ExactTier {
    fn tier(&self) -> TierName {
        TierName::Exact
    }

    fn accept_threshold(&self, config: &MatchingConfig) -> f64 {
        config.thresholds.exact
    }

    fn attempt(
        &self,
        item: &ExtractedItem,
        ctx: &MatchContext<'_>,
        _prior: &[MatchAttempt],
    ) -> Result<Vec<MatchAttempt>, TallyError> {
        let mut out = Vec::new();
        for id in &item.identifiers {
            let hits = ctx.catalog.exact_identifier(&id.value)?;
            match hits.into_iter().next() {
                Some(hit) => {
                    out.push(
                        MatchAttempt::hit(TierName::Exact, &id.value, hit.entry, 1.0)
                            .with_namespace(&hit.namespace),
                    );
                    break;
                }
                None => out.push(MatchAttempt::miss(TierName::Exact, &id.value)),
            }
        }
        Ok(out)
    }
}

/// Tier 2: normalized identifiers (separators and case ignored), with
/// vendor prefixes stripped from either side at a small penalty each.
pub struct FuzzyTier;

impl MatchTier for FuzzyTier {
    fn tier(&self) -> TierName {
        TierName::Fuzzy
    }

    fn accept_threshold(&self, config: &MatchingConfig) -> f64 {
        config.thresholds.fuzzy
    }

    fn attempt(
        &self,
        item: &ExtractedItem,
        ctx: &MatchContext<'_>,
        _prior: &[MatchAttempt],
    ) -> Result<Vec<MatchAttempt>, TallyError> {
        let mut out = Vec::new();
        for id in &item.identifiers {
            let normalized = normalize_identifier(&id.value);
            if normalized.len() < 3 {
                continue;
            }
            let mut keys = vec![(normalized.clone(), false)];
            if let Some(stripped) = strip_vendor_prefix(&normalized) {
                keys.push((stripped, true));
            }

            let mut best: Option<MatchAttempt> = None;
            for (key, query_stripped) in keys {
                let Some(hit) = ctx.catalog.normalized_identifier(&key)?.into_iter().next() else {
                    continue;
                };
                let penalties = u8::from(query_stripped) + u8::from(hit.catalog_prefix_stripped);
                let score = (FUZZY_BASE_SCORE - FUZZY_PREFIX_PENALTY * f64::from(penalties))
                    .max(FUZZY_FLOOR);
                if best.as_ref().map_or(true, |b| score > b.score) {
                    best = Some(
                        MatchAttempt::hit(TierName::Fuzzy, &id.value, hit.entry, score)
                            .with_namespace(&hit.namespace),
                    );
                }
            }
            out.push(best.unwrap_or_else(|| MatchAttempt::miss(TierName::Fuzzy, &id.value)));
        }
        Ok(out)
    }
}

/// Tier 3: full-text search on "identifier description" pairs.
pub struct CombinedTier;

impl MatchTier for CombinedTier {
    fn tier(&self) -> TierName {
        TierName::Combined
    }

    fn accept_threshold(&self, config: &MatchingConfig) -> f64 {
        config.thresholds.combined
    }

    fn attempt(
        &self,
        item: &ExtractedItem,
        ctx: &MatchContext<'_>,
        _prior: &[MatchAttempt],
    ) -> Result<Vec<MatchAttempt>, TallyError> {
        if item.description.is_empty() {
            return Ok(Vec::new());
        }
        let min = ctx.config.combined_min_relevance;
        let mut out = Vec::new();
        for id in item.identifiers.iter().take(COMBINED_MAX_IDENTIFIERS) {
            let query = format!("{} {}", id.value, item.description);
            let attempt = match ctx.catalog.full_text(&query, min, 1)?.into_iter().next() {
                Some(hit) => {
                    let score = rescale(hit.score, min, 0.80, 0.15);
                    MatchAttempt::hit(TierName::Combined, &query, hit.entry, score)
                }
                None => MatchAttempt::miss(TierName::Combined, &query),
            };
            out.push(attempt);
        }
        Ok(out)
    }
}

/// Tier 4: the description contains, or is contained in, a catalog name.
/// Runs on raw text so names with slashes ("C/M/Y") survive intact.
pub struct SubstringTier;

impl MatchTier for SubstringTier {
    fn tier(&self) -> TierName {
        TierName::Substring
    }

    fn accept_threshold(&self, config: &MatchingConfig) -> f64 {
        config.thresholds.substring
    }

    fn attempt(
        &self,
        item: &ExtractedItem,
        ctx: &MatchContext<'_>,
        _prior: &[MatchAttempt],
    ) -> Result<Vec<MatchAttempt>, TallyError> {
        let query = item.description.trim();
        if query.chars().count() < ctx.config.substring_min_len {
            return Ok(Vec::new());
        }
        let attempt = match ctx.catalog.substring_name(query)?.into_iter().next() {
            Some(hit) => {
                let score = (0.88 + 0.12 * hit.score).min(SUBSTRING_MAX_SCORE);
                MatchAttempt::hit(TierName::Substring, query, hit.entry, score)
            }
            None => MatchAttempt::miss(TierName::Substring, query),
        };
        Ok(vec![attempt])
    }
}

/// Tier 5: tokenized full-text ranking over names and descriptions.
pub struct FullTextTier;

impl MatchTier for FullTextTier {
    fn tier(&self) -> TierName {
        TierName::FullText
    }

    fn accept_threshold(&self, config: &MatchingConfig) -> f64 {
        config.thresholds.full_text
    }

    fn attempt(
        &self,
        item: &ExtractedItem,
        ctx: &MatchContext<'_>,
        _prior: &[MatchAttempt],
    ) -> Result<Vec<MatchAttempt>, TallyError> {
        let query = text_query(item);
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let min = ctx.config.fulltext_min_relevance;
        let attempt = match ctx.catalog.full_text(&query, min, 1)?.into_iter().next() {
            Some(hit) => {
                let score = 0.70 + 0.25 * hit.score;
                MatchAttempt::hit(TierName::FullText, &query, hit.entry, score)
            }
            None => MatchAttempt::miss(TierName::FullText, &query),
        };
        Ok(vec![attempt])
    }
}

/// Tier 6: vector similarity, when a semantic index is configured.
pub struct SemanticTier;

impl MatchTier for SemanticTier {
    fn tier(&self) -> TierName {
        TierName::Semantic
    }

    fn accept_threshold(&self, config: &MatchingConfig) -> f64 {
        config.thresholds.semantic
    }

    fn attempt(
        &self,
        item: &ExtractedItem,
        ctx: &MatchContext<'_>,
        _prior: &[MatchAttempt],
    ) -> Result<Vec<MatchAttempt>, TallyError> {
        let Some(semantic) = ctx.semantic else {
            return Ok(Vec::new());
        };
        let query = text_query(item);
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let min = ctx.config.semantic_min_similarity;
        let timeout = ctx.config.external_timeout();
        let attempt = match ctx.retry.run(timeout, |t| semantic.search(&query, 1, t)) {
            Ok(hits) => match hits.into_iter().find(|h| h.score >= min) {
                Some(hit) => {
                    let score = rescale(hit.score, min, 0.70, 0.15);
                    MatchAttempt::hit(TierName::Semantic, &query, hit.entry, score)
                }
                None => MatchAttempt::miss(TierName::Semantic, &query),
            },
            Err(e) => {
                warn!(row = item.source_row_index, error = %e, "semantic tier degraded");
                MatchAttempt::miss(TierName::Semantic, &query).with_note(e.to_string())
            }
        };
        Ok(vec![attempt])
    }
}

/// Tier 7: ask the arbiter to pick from a shortlist, only when every
/// other tier came up weak.
pub struct AiTier;

impl AiTier {
    fn shortlist(
        item: &ExtractedItem,
        ctx: &MatchContext<'_>,
        prior: &[MatchAttempt],
    ) -> Result<Vec<Arc<CatalogEntry>>, TallyError> {
        let size = ctx.config.ai_shortlist_size;
        let mut seen: Vec<&MatchAttempt> = prior.iter().filter(|a| a.entry.is_some()).collect();
        seen.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut shortlist: Vec<Arc<CatalogEntry>> = Vec::new();
        let push = |list: &mut Vec<Arc<CatalogEntry>>, entry: &Arc<CatalogEntry>| {
            if list.len() < size && !list.iter().any(|e| e.id == entry.id) {
                list.push(Arc::clone(entry));
            }
        };
        for attempt in seen {
            if let Some(entry) = &attempt.entry {
                push(&mut shortlist, entry);
            }
        }
        let query = text_query(item);
        if !query.trim().is_empty() {
            for hit in ctx.catalog.full_text(&query, 0.0, size)? {
                push(&mut shortlist, &hit.entry);
            }
        }
        Ok(shortlist)
    }
}

impl MatchTier for AiTier {
    fn tier(&self) -> TierName {
        TierName::Ai
    }

    fn accept_threshold(&self, _config: &MatchingConfig) -> f64 {
        0.0
    }

    fn attempt(
        &self,
        item: &ExtractedItem,
        ctx: &MatchContext<'_>,
        prior: &[MatchAttempt],
    ) -> Result<Vec<MatchAttempt>, TallyError> {
        let Some(arbiter) = ctx.arbiter else {
            return Ok(Vec::new());
        };
        if !ctx.config.ai_enabled {
            return Ok(Vec::new());
        }
        let best = prior
            .iter()
            .filter(|a| a.entry.is_some())
            .map(|a| a.score)
            .fold(0.0, f64::max);
        if best >= ctx.config.ai_floor {
            return Ok(Vec::new());
        }

        let shortlist = Self::shortlist(item, ctx, prior)?;
        if shortlist.is_empty() {
            return Ok(Vec::new());
        }
        let query = item.display_name().to_string();
        let timeout = ctx.config.external_timeout();

        let attempt = match ctx.retry.run(timeout, |t| arbiter.choose(item, &shortlist, t)) {
            Ok(verdict) => {
                let picked = verdict
                    .entry_id
                    .as_deref()
                    .and_then(|id| shortlist.iter().find(|e| e.id == id));
                match (picked, verdict.entry_id.as_deref()) {
                    (Some(entry), _) => MatchAttempt::hit(
                        TierName::Ai,
                        &query,
                        Arc::clone(entry),
                        verdict.confidence.min(AI_MAX_SCORE),
                    ),
                    (None, Some(id)) => MatchAttempt::miss(TierName::Ai, &query)
                        .with_note(format!("arbiter picked '{id}' outside the shortlist")),
                    (None, None) => MatchAttempt::miss(TierName::Ai, &query),
                }
            }
            Err(e) => {
                warn!(row = item.source_row_index, error = %e, "AI tier degraded");
                MatchAttempt::miss(TierName::Ai, &query).with_note(e.to_string())
            }
        };
        Ok(vec![attempt])
    }
}
