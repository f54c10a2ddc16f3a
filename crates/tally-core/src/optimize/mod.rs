//! Savings search for a matched, priced line item.
//!
//! Two kinds of opportunity exist: the same product bought below the
//! user's price ([`OptionKind::BetterPrice`]), and a compatible entry from
//! the same family with a better cost per page ([`OptionKind::HigherYield`]).
//! Every candidate passes through [`guardrails`] first.

pub mod guardrails;

use crate::catalog::schema::CatalogEntry;
use crate::catalog::CatalogLookup;
use crate::config::OptimizationConfig;
use crate::error::TallyError;
use crate::pricing::{cost_per_page, NormalizedPrice, PriceSource};
use guardrails::{check_compatibility, check_value, Rejection};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

const MONEY_DP: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionKind {
    BetterPrice,
    HigherYield,
}

/// An accepted savings opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub kind: OptionKind,
    pub entry_id: String,
    pub entry_name: String,
    /// Single units of the suggested entry needed to cover the same use.
    pub units: u64,
    pub current_cost: Decimal,
    pub optimized_cost: Decimal,
    pub savings: Decimal,
    pub annual_savings: Decimal,
    /// Relative improvement in CPP (or per-each price for `BetterPrice`).
    pub improvement: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimized_cpp: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedCandidate {
    pub kind: OptionKind,
    pub entry_id: String,
    #[serde(flatten)]
    pub rejection: Rejection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub opportunity: Option<Opportunity>,
    pub considered: usize,
    pub rejected: Vec<RejectedCandidate>,
}

fn ratio(gain: Decimal, base: Decimal) -> f64 {
    if base <= Decimal::ZERO {
        return 0.0;
    }
    (gain / base).to_f64().unwrap_or(0.0)
}

fn annualise(savings: Decimal, config: &OptimizationConfig) -> Decimal {
    let months = Decimal::from(config.period_months.max(1));
    (savings * Decimal::from(12) / months).round_dp(MONEY_DP)
}

fn better_price(
    entry: &CatalogEntry,
    price: &NormalizedPrice,
    current_cost: Decimal,
    config: &OptimizationConfig,
) -> Option<Result<Opportunity, Rejection>> {
    // Estimated prices come from the catalog itself.
    if price.source != PriceSource::LineItem {
        return None;
    }
    let user_each = price.price_per_each?;
    let Some(catalog_each) = price.catalog_price_per_each else {
        return Some(Err(Rejection::MissingPrice));
    };

    let optimized_cost = catalog_each
        .checked_mul(Decimal::from(price.quantity_in_each))?
        .round_dp(MONEY_DP);
    let savings = current_cost - optimized_cost;
    let improvement = ratio(user_each - catalog_each, user_each);
    let annual_savings = annualise(savings, config);
    Some(
        check_value(improvement, savings, annual_savings, config).map(|()| Opportunity {
            kind: OptionKind::BetterPrice,
            entry_id: entry.id.clone(),
            entry_name: entry.name.clone(),
            units: price.quantity_in_each,
            current_cost,
            optimized_cost,
            savings,
            annual_savings,
            improvement,
            optimized_cpp: price.catalog_cpp,
        }),
    )
}

fn higher_yield(
    current: &CatalogEntry,
    alternative: &CatalogEntry,
    price: &NormalizedPrice,
    current_cost: Decimal,
    config: &OptimizationConfig,
) -> Result<Opportunity, Rejection> {
    check_compatibility(current, alternative, config)?;

    let (Some(cur_yield), Some(alt_yield)) = (current.page_yield, alternative.page_yield) else {
        return Err(Rejection::MissingYield);
    };
    let Some(current_cpp) = price.cpp else {
        return Err(Rejection::MissingYield);
    };
    let Some(alt_each) = alternative.price_per_each() else {
        return Err(Rejection::MissingPrice);
    };
    let alt_cpp = cost_per_page(alt_each, Some(alt_yield)).ok_or(Rejection::MissingYield)?;

    let units = Decimal::from(price.quantity_in_each)
        .checked_mul(Decimal::from(cur_yield))
        .map(|pages| (pages / Decimal::from(alt_yield)).ceil())
        .ok_or(Rejection::NoSavings)?;
    let optimized_cost = units
        .checked_mul(alt_each)
        .ok_or(Rejection::NoSavings)?
        .round_dp(MONEY_DP);
    let savings = current_cost - optimized_cost;
    let improvement = ratio(current_cpp - alt_cpp, current_cpp);
    let annual_savings = annualise(savings, config);

    check_value(improvement, savings, annual_savings, config)?;
    Ok(Opportunity {
        kind: OptionKind::HigherYield,
        entry_id: alternative.id.clone(),
        entry_name: alternative.name.clone(),
        units: units.to_u64().unwrap_or(u64::MAX),
        current_cost,
        optimized_cost,
        savings,
        annual_savings,
        improvement,
        optimized_cpp: Some(alt_cpp),
    })
}

fn catalog_cpp(entry: &CatalogEntry) -> Option<Decimal> {
    entry
        .price_per_each()
        .and_then(|p| cost_per_page(p, entry.page_yield))
}

/// Prefer larger savings, then `BetterPrice`, then the lower entry id.
fn rank(a: &Opportunity, b: &Opportunity) -> Ordering {
    b.savings
        .cmp(&a.savings)
        .then_with(|| a.kind.cmp(&b.kind))
        .then_with(|| a.entry_id.cmp(&b.entry_id))
}

/// Search for the best valid savings opportunity for one item.
///
/// Unpriced items get an empty report. Only catalog lookup failures are
/// errors; every rejected candidate is listed with its reason.
pub fn find_opportunity(
    entry: &CatalogEntry,
    price: &NormalizedPrice,
    catalog: &dyn CatalogLookup,
    config: &OptimizationConfig,
) -> Result<OptimizationReport, TallyError> {
    let mut report = OptimizationReport::default();
    let Some(current_cost) = price.current_total.map(|c| c.round_dp(MONEY_DP)) else {
        return Ok(report);
    };
    let mut accepted = Vec::new();

    if let Some(outcome) = better_price(entry, price, current_cost, config) {
        report.considered += 1;
        match outcome {
            Ok(opportunity) => accepted.push(opportunity),
            Err(rejection) => report.rejected.push(RejectedCandidate {
                kind: OptionKind::BetterPrice,
                entry_id: entry.id.clone(),
                rejection,
            }),
        }
    }

    if let Some(family) = entry.family.as_deref() {
        let mut members: Vec<_> = catalog
            .family_members(family)?
            .into_iter()
            .filter(|m| m.id != entry.id)
            .collect();
        // Cheapest cost per page first; unknown CPP last.
        members.sort_by(|a, b| {
            match (catalog_cpp(a), catalog_cpp(b)) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
            .then_with(|| a.id.cmp(&b.id))
        });

        for member in members {
            report.considered += 1;
            match higher_yield(entry, &member, price, current_cost, config) {
                Ok(opportunity) => accepted.push(opportunity),
                Err(rejection) => {
                    debug!(current = %entry.id, candidate = %member.id, %rejection, "alternative rejected");
                    report.rejected.push(RejectedCandidate {
                        kind: OptionKind::HigherYield,
                        entry_id: member.id.clone(),
                        rejection,
                    });
                }
            }
        }
    }

    accepted.sort_by(rank);
    report.opportunity = accepted.into_iter().next();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{parse_catalog_str, InMemoryCatalog};
    use crate::config::PricingConfig;
    use crate::model::ExtractedItem;
    use crate::pricing::normalize_price;
    use rust_decimal_macros::dec;

    const CATALOG: &str = r#"{
        "name": "Toner",
        "version": "1",
        "entries": [
            { "id": "e1", "sku": "CF410A", "name": "HP 410A Black", "brand": "HP",
              "category": "Toner", "color": "Black", "family": "hp-410",
              "page_yield": 300, "yield_class": "standard", "price": "60.00" },
            { "id": "e2", "sku": "CF410X", "name": "HP 410X Black", "brand": "HP",
              "category": "Toner", "color": "Black", "family": "hp-410",
              "page_yield": 600, "yield_class": "high", "price": "90.00" },
            { "id": "e3", "sku": "CF410Z", "name": "HP 410 Jumbo Black", "brand": "HP",
              "category": "Toner", "color": "Black", "family": "hp-410",
              "page_yield": 3000, "yield_class": "extra_high", "price": "200.00" },
            { "id": "e4", "sku": "CF411X", "name": "HP 410X Cyan", "brand": "HP",
              "category": "Toner", "color": "Cyan", "family": "hp-410",
              "page_yield": 600, "yield_class": "high", "price": "80.00" }
        ]
    }"#;

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::new(parse_catalog_str(CATALOG).unwrap())
    }

    fn item(quantity: u64, price: Decimal) -> ExtractedItem {
        ExtractedItem {
            source_row_index: 1,
            description: "HP 410A toner".into(),
            identifiers: vec![],
            quantity,
            unit_price: price,
            unit_of_measure: None,
            pack_quantity: None,
            price_from_total: false,
            extraction_confidence: 1.0,
        }
    }

    fn run(quantity: u64, price: Decimal) -> OptimizationReport {
        let catalog = catalog();
        let entry = catalog.entry("e1").unwrap().unwrap();
        let normalized = normalize_price(&item(quantity, price), Some(&entry), &PricingConfig::default());
        find_opportunity(&entry, &normalized, &catalog, &OptimizationConfig::default()).unwrap()
    }

    #[test]
    fn test_higher_yield_accepted_and_extreme_rejected() {
        let report = run(10, dec!(60.00));
        let best = report.opportunity.unwrap();
        assert_eq!(best.kind, OptionKind::HigherYield);
        assert_eq!(best.entry_id, "e2");
        assert_eq!(best.units, 5);
        assert_eq!(best.current_cost, dec!(600.00));
        assert_eq!(best.optimized_cost, dec!(450.00));
        assert_eq!(best.savings, dec!(150.00));
        assert!((best.improvement - 0.25).abs() < 1e-9);

        assert!(report.rejected.iter().any(|r| r.entry_id == "e3"
            && matches!(r.rejection, Rejection::YieldRatioExceeded { .. })));
        assert!(report
            .rejected
            .iter()
            .any(|r| r.entry_id == "e4" && r.rejection == Rejection::ColorMismatch));
    }

    #[test]
    fn test_largest_savings_wins_over_better_price() {
        let report = run(10, dec!(70.00));
        let best = report.opportunity.unwrap();
        assert_eq!(best.kind, OptionKind::HigherYield);
        assert_eq!(best.savings, dec!(250.00));
    }

    #[test]
    fn test_better_price_suspected_pack_mismatch() {
        // Paying 1000 for a 60 item reads as a case price, not a real gap.
        let report = run(1, dec!(1000.00));
        assert!(report.opportunity.is_none());
        assert!(report.rejected.iter().any(|r| r.kind == OptionKind::BetterPrice
            && matches!(r.rejection, Rejection::ImplausibleImprovement { .. })));
    }

    #[test]
    fn test_annual_savings_floor() {
        // Two cartridges a year: the 600-page swap saves 30, below a raised floor.
        let catalog = catalog();
        let entry = catalog.entry("e1").unwrap().unwrap();
        let normalized = normalize_price(&item(2, dec!(60.00)), Some(&entry), &PricingConfig::default());
        let config = OptimizationConfig {
            min_annual_savings: dec!(100),
            ..OptimizationConfig::default()
        };
        let report = find_opportunity(&entry, &normalized, &catalog, &config).unwrap();
        assert!(report.opportunity.is_none());
        assert!(report
            .rejected
            .iter()
            .any(|r| matches!(r.rejection, Rejection::SavingsBelowFloor { .. })));
    }

    #[test]
    fn test_half_year_period_doubles_annual_savings() {
        let catalog = catalog();
        let entry = catalog.entry("e1").unwrap().unwrap();
        let normalized = normalize_price(&item(10, dec!(60.00)), Some(&entry), &PricingConfig::default());
        let config = OptimizationConfig {
            period_months: 6,
            ..OptimizationConfig::default()
        };
        let report = find_opportunity(&entry, &normalized, &catalog, &config).unwrap();
        assert_eq!(report.opportunity.unwrap().annual_savings, dec!(300.00));
    }

    #[test]
    fn test_unpriced_item_has_no_candidates() {
        let catalog = InMemoryCatalog::new(
            parse_catalog_str(
                r#"{"name":"c","version":"1","entries":[{"id":"x","sku":"X1","name":"Pens"}]}"#,
            )
            .unwrap(),
        );
        let entry = catalog.entry("x").unwrap().unwrap();
        let normalized = normalize_price(&item(1, Decimal::ZERO), Some(&entry), &PricingConfig::default());
        let report = find_opportunity(&entry, &normalized, &catalog, &OptimizationConfig::default()).unwrap();
        assert_eq!(report, OptimizationReport::default());
    }
}
