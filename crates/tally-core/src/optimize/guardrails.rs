//! Hard rejection rules for alternative suggestions. Each rule alone is
//! enough to reject; a missing suggestion is always preferred to an
//! incompatible one.

use crate::catalog::schema::CatalogEntry;
use crate::config::OptimizationConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum Rejection {
    CrossBrand,
    CrossCategory,
    ColorMismatch,
    CrossFamily,
    YieldDowngrade,
    /// A yield jump this large usually means the match is wrong.
    YieldRatioExceeded { ratio: f64 },
    MissingYield,
    MissingPrice,
    /// A CPP gap this large usually means a pack-size or match error.
    ImplausibleImprovement { improvement: f64 },
    InsufficientImprovement { improvement: f64 },
    SavingsBelowFloor { annual_savings: Decimal },
    NoSavings,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::CrossBrand => write!(f, "different brand"),
            Rejection::CrossCategory => write!(f, "different category"),
            Rejection::ColorMismatch => write!(f, "different color"),
            Rejection::CrossFamily => write!(f, "different compatibility family"),
            Rejection::YieldDowngrade => write!(f, "lower yield"),
            Rejection::YieldRatioExceeded { ratio } => write!(f, "yield ratio {ratio:.1}x too large"),
            Rejection::MissingYield => write!(f, "page yield unknown"),
            Rejection::MissingPrice => write!(f, "price unknown"),
            Rejection::ImplausibleImprovement { improvement } => {
                write!(f, "improvement {:.0}% implausible", improvement * 100.0)
            }
            Rejection::InsufficientImprovement { improvement } => {
                write!(f, "improvement {:.1}% too small", improvement * 100.0)
            }
            Rejection::SavingsBelowFloor { annual_savings } => {
                write!(f, "annual savings {annual_savings} below floor")
            }
            Rejection::NoSavings => write!(f, "no savings"),
        }
    }
}

fn key(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

/// Compatibility between the matched entry and an alternative.
pub fn check_compatibility(
    current: &CatalogEntry,
    alternative: &CatalogEntry,
    config: &OptimizationConfig,
) -> Result<(), Rejection> {
    if key(&current.brand) != key(&alternative.brand) {
        return Err(Rejection::CrossBrand);
    }
    if key(&current.category) != key(&alternative.category) {
        return Err(Rejection::CrossCategory);
    }
    if key(&current.color) != key(&alternative.color) {
        return Err(Rejection::ColorMismatch);
    }
    if key(&current.family).is_none() || key(&current.family) != key(&alternative.family) {
        return Err(Rejection::CrossFamily);
    }

    let (Some(cur_yield), Some(alt_yield)) = (current.page_yield, alternative.page_yield) else {
        return Err(Rejection::MissingYield);
    };
    let downgrade = match (current.yield_class, alternative.yield_class) {
        (Some(cur), Some(alt)) => alt < cur,
        _ => alt_yield < cur_yield,
    };
    if downgrade || alt_yield < cur_yield {
        return Err(Rejection::YieldDowngrade);
    }

    let ratio = f64::from(alt_yield) / f64::from(cur_yield);
    if ratio > config.max_yield_ratio {
        return Err(Rejection::YieldRatioExceeded { ratio });
    }
    Ok(())
}

/// Value thresholds: relative improvement within [min, max] and annual
/// savings at or above the floor.
pub fn check_value(
    improvement: f64,
    savings: Decimal,
    annual_savings: Decimal,
    config: &OptimizationConfig,
) -> Result<(), Rejection> {
    if savings <= Decimal::ZERO {
        return Err(Rejection::NoSavings);
    }
    if improvement > config.max_cpp_improvement {
        return Err(Rejection::ImplausibleImprovement { improvement });
    }
    if improvement < config.min_cpp_improvement {
        return Err(Rejection::InsufficientImprovement { improvement });
    }
    if annual_savings < config.min_annual_savings {
        return Err(Rejection::SavingsBelowFloor { annual_savings });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn toner(id: &str, yield_pages: u32) -> CatalogEntry {
        serde_json::from_value(serde_json::json!({
            "id": id, "sku": id, "name": id,
            "brand": "HP", "category": "Toner", "color": "Black",
            "family": "hp-410", "page_yield": yield_pages
        }))
        .unwrap()
    }

    #[test]
    fn test_two_x_yield_accepted() {
        let config = OptimizationConfig::default();
        assert_eq!(check_compatibility(&toner("a", 300), &toner("b", 600), &config), Ok(()));
    }

    #[test]
    fn test_ten_x_yield_rejected() {
        let config = OptimizationConfig::default();
        assert!(matches!(
            check_compatibility(&toner("a", 300), &toner("b", 3000), &config),
            Err(Rejection::YieldRatioExceeded { .. })
        ));
    }

    #[test]
    fn test_attribute_mismatches() {
        let config = OptimizationConfig::default();
        let base = toner("a", 300);

        let mut other = toner("b", 600);
        other.brand = Some("Brother".into());
        assert_eq!(check_compatibility(&base, &other, &config), Err(Rejection::CrossBrand));

        let mut other = toner("b", 600);
        other.category = Some("Ink".into());
        assert_eq!(check_compatibility(&base, &other, &config), Err(Rejection::CrossCategory));

        let mut other = toner("b", 600);
        other.color = Some("Cyan".into());
        assert_eq!(check_compatibility(&base, &other, &config), Err(Rejection::ColorMismatch));

        let mut other = toner("b", 600);
        other.family = Some("hp-26".into());
        assert_eq!(check_compatibility(&base, &other, &config), Err(Rejection::CrossFamily));
    }

    #[test]
    fn test_yield_class_downgrade() {
        let config = OptimizationConfig::default();
        let mut high = toner("a", 600);
        high.yield_class = Some(crate::catalog::schema::YieldClass::High);
        let mut standard = toner("b", 600);
        standard.yield_class = Some(crate::catalog::schema::YieldClass::Standard);
        assert_eq!(
            check_compatibility(&high, &standard, &config),
            Err(Rejection::YieldDowngrade)
        );
        assert_eq!(
            check_compatibility(&toner("a", 600), &toner("b", 300), &config),
            Err(Rejection::YieldDowngrade)
        );
    }

    #[test]
    fn test_value_thresholds() {
        let config = OptimizationConfig::default();
        assert_eq!(check_value(0.3, dec!(50), dec!(50), &config), Ok(()));
        assert_eq!(check_value(0.3, dec!(0), dec!(0), &config), Err(Rejection::NoSavings));
        assert!(matches!(
            check_value(0.95, dec!(50), dec!(50), &config),
            Err(Rejection::ImplausibleImprovement { .. })
        ));
        assert!(matches!(
            check_value(0.01, dec!(50), dec!(50), &config),
            Err(Rejection::InsufficientImprovement { .. })
        ));
        assert!(matches!(
            check_value(0.3, dec!(5), dec!(5), &config),
            Err(Rejection::SavingsBelowFloor { .. })
        ));
    }
}
