use crate::matching::{IdentifierBasis, MatchResult, TierName};
use crate::model::ExtractedItem;
use crate::optimize::{OptimizationReport, Opportunity};
use crate::pricing::NormalizedPrice;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Savings category of one line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// A valid alternative with positive savings exists.
    Optimizable,
    /// Matched, but already at the best price or not priced at all.
    NoOpportunity,
    /// No catalog match.
    Unresolved,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Optimizable => "optimizable",
            Outcome::NoOpportunity => "no_opportunity",
            Outcome::Unresolved => "unresolved",
        };
        write!(f, "{s}")
    }
}

/// Per-item breakdown row of the savings summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineRecord {
    pub source_row_index: usize,
    /// Unique-item key built from the input identifiers.
    pub input_key: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifiers: Vec<String>,
    pub quantity: u64,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_entry_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_name: Option<String>,
    pub match_method: TierName,
    pub match_score: f64,
    pub basis: IdentifierBasis,
    pub price: NormalizedPrice,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opportunity: Option<Opportunity>,
}

/// Place one item in exactly one outcome.
pub fn categorize(
    item: &ExtractedItem,
    matched: &MatchResult,
    price: NormalizedPrice,
    optimization: Option<&OptimizationReport>,
) -> LineRecord {
    let opportunity = optimization
        .and_then(|r| r.opportunity.clone())
        .filter(|o| o.savings > rust_decimal::Decimal::ZERO);

    let outcome = match (&matched.entry, &opportunity) {
        (None, _) => Outcome::Unresolved,
        (Some(_), Some(_)) if price.is_priced() => Outcome::Optimizable,
        (Some(_), _) => Outcome::NoOpportunity,
    };

    LineRecord {
        source_row_index: item.source_row_index,
        input_key: item.input_key(),
        description: item.description.clone(),
        identifiers: item.identifiers.iter().map(|i| i.value.clone()).collect(),
        quantity: item.quantity,
        outcome,
        matched_entry_id: matched.entry_id.clone(),
        matched_name: matched.entry.as_ref().map(|e| e.name.clone()),
        match_method: matched.method,
        match_score: matched.score,
        basis: matched.basis,
        price,
        opportunity: if outcome == Outcome::Optimizable {
            opportunity
        } else {
            None
        },
    }
}
