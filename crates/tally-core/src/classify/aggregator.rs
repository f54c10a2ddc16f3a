//! Running totals over categorized line records. Mergeable, so chunks can
//! be folded in any grouping and checkpointed between runs.

use super::outcome::{LineRecord, Outcome};
use crate::matching::IdentifierBasis;
use crate::pricing::PriceSource;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const OUTCOMES: [Outcome; 3] = [
    Outcome::Optimizable,
    Outcome::NoOpportunity,
    Outcome::Unresolved,
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregator {
    pub counts: BTreeMap<Outcome, usize>,
    /// Distinct input keys per outcome.
    pub unique_inputs: BTreeMap<Outcome, BTreeSet<String>>,
    /// Each outcome split by the identifier namespace the match used.
    pub by_basis: BTreeMap<Outcome, BTreeMap<IdentifierBasis, BasisTotals>>,
    pub price_sources: BTreeMap<PriceSource, usize>,
    /// Current and optimized cost of optimizable items only.
    pub optimizable_current_cost: Decimal,
    pub optimizable_optimized_cost: Decimal,
    pub annual_savings: Decimal,
    /// Every priced item, whatever its outcome. Informational.
    pub total_current_spend: Decimal,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: &LineRecord) {
        *self.counts.entry(record.outcome).or_default() += 1;
        self.unique_inputs
            .entry(record.outcome)
            .or_default()
            .insert(record.input_key.clone());
        let basis = self
            .by_basis
            .entry(record.outcome)
            .or_default()
            .entry(record.basis)
            .or_default();
        basis.items += 1;
        *self.price_sources.entry(record.price.source).or_default() += 1;

        if let Some(total) = record.price.current_total {
            self.total_current_spend += total.round_dp(2);
        }
        if record.outcome == Outcome::Optimizable {
            if let Some(o) = &record.opportunity {
                basis.current_cost += o.current_cost;
                basis.optimized_cost += o.optimized_cost;
                basis.savings += o.savings;
                self.optimizable_current_cost += o.current_cost;
                self.optimizable_optimized_cost += o.optimized_cost;
                self.annual_savings += o.annual_savings;
            }
        }
    }

    /// Fold another aggregator in. Order does not matter.
    pub fn merge(&mut self, other: Aggregator) {
        for (outcome, n) in other.counts {
            *self.counts.entry(outcome).or_default() += n;
        }
        for (outcome, keys) in other.unique_inputs {
            self.unique_inputs.entry(outcome).or_default().extend(keys);
        }
        for (outcome, split) in other.by_basis {
            let mine = self.by_basis.entry(outcome).or_default();
            for (basis, totals) in split {
                mine.entry(basis).or_default().absorb(&totals);
            }
        }
        for (source, n) in other.price_sources {
            *self.price_sources.entry(source).or_default() += n;
        }
        self.optimizable_current_cost += other.optimizable_current_cost;
        self.optimizable_optimized_cost += other.optimizable_optimized_cost;
        self.annual_savings += other.annual_savings;
        self.total_current_spend += other.total_current_spend;
    }

    pub fn item_count(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn savings(&self) -> Decimal {
        self.optimizable_current_cost - self.optimizable_optimized_cost
    }

    pub fn summary(&self) -> SavingsSummary {
        let outcomes = OUTCOMES
            .iter()
            .map(|o| {
                (
                    *o,
                    OutcomeTotals {
                        items: self.counts.get(o).copied().unwrap_or(0),
                        unique_items: self.unique_inputs.get(o).map_or(0, |s| s.len()),
                        by_basis: self.by_basis.get(o).cloned().unwrap_or_default(),
                    },
                )
            })
            .collect();
        let mut basis_counts: BTreeMap<IdentifierBasis, usize> = BTreeMap::new();
        for (basis, totals) in self.by_basis.values().flatten() {
            *basis_counts.entry(*basis).or_default() += totals.items;
        }
        let savings = self.savings();
        let savings_rate = if self.optimizable_current_cost > Decimal::ZERO {
            (savings / self.optimizable_current_cost).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };

        SavingsSummary {
            items: self.item_count(),
            outcomes,
            basis_counts,
            price_sources: self.price_sources.clone(),
            current_cost: self.optimizable_current_cost,
            optimized_cost: self.optimizable_optimized_cost,
            savings,
            savings_rate,
            annual_savings: self.annual_savings,
            total_current_spend: self.total_current_spend,
        }
    }
}

/// Items of one outcome and identifier basis. Costs cover optimizable
/// items only and stay zero for the other outcomes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasisTotals {
    pub items: usize,
    pub current_cost: Decimal,
    pub optimized_cost: Decimal,
    pub savings: Decimal,
}

impl BasisTotals {
    fn absorb(&mut self, other: &BasisTotals) {
        self.items += other.items;
        self.current_cost += other.current_cost;
        self.optimized_cost += other.optimized_cost;
        self.savings += other.savings;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeTotals {
    pub items: usize,
    pub unique_items: usize,
    pub by_basis: BTreeMap<IdentifierBasis, BasisTotals>,
}

/// Final figures of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsSummary {
    pub items: usize,
    pub outcomes: BTreeMap<Outcome, OutcomeTotals>,
    /// Items per identifier basis across all outcomes.
    pub basis_counts: BTreeMap<IdentifierBasis, usize>,
    pub price_sources: BTreeMap<PriceSource, usize>,
    /// Optimizable items only.
    pub current_cost: Decimal,
    pub optimized_cost: Decimal,
    pub savings: Decimal,
    pub savings_rate: f64,
    pub annual_savings: Decimal,
    pub total_current_spend: Decimal,
}
