//! Per-unit price normalization and the missing-price fallback chain.

use crate::catalog::schema::CatalogEntry;
use crate::config::PricingConfig;
use crate::model::ExtractedItem;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decimal places kept on per-each prices and CPP.
const PRICE_DP: u32 = 8;

/// Where an item's price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    LineItem,
    CatalogListPrice,
    CatalogEachPriceMarkup,
    CatalogCostMarkup,
    /// No usable price anywhere; the item is excluded from savings.
    Unavailable,
}

impl PriceSource {
    pub fn is_estimated(self) -> bool {
        !matches!(self, PriceSource::LineItem | PriceSource::Unavailable)
    }
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PriceSource::LineItem => "line_item",
            PriceSource::CatalogListPrice => "catalog_list_price",
            PriceSource::CatalogEachPriceMarkup => "catalog_each_price_markup",
            PriceSource::CatalogCostMarkup => "catalog_cost_markup",
            PriceSource::Unavailable => "unavailable",
        };
        write!(f, "{s}")
    }
}

/// Where the item's pack quantity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackBasis {
    /// Stated (or implied) by the row's unit of measure.
    Declared,
    /// The row gave none; the matched entry's pack quantity is used.
    AssumedFromCatalog,
    /// Neither side says; one unit per line.
    Default,
}

/// A line item's price on a per-single-unit basis, next to the matched
/// catalog entry's price on the same basis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPrice {
    pub source: PriceSource,
    pub pack_basis: PackBasis,
    pub pack_quantity: u32,
    /// Price per unit of measure as used (stated or estimated).
    pub unit_price: Option<Decimal>,
    pub price_per_each: Option<Decimal>,
    pub quantity_in_each: u64,
    /// `quantity_in_each * price_per_each`.
    pub current_total: Option<Decimal>,
    /// Rated page yield per single unit, from the matched entry.
    pub page_yield: Option<u32>,
    pub cpp: Option<Decimal>,
    pub catalog_price_per_each: Option<Decimal>,
    pub catalog_cpp: Option<Decimal>,
}

impl NormalizedPrice {
    pub fn is_priced(&self) -> bool {
        self.price_per_each.is_some()
    }
}

/// Cost per page; None without a positive yield.
pub fn cost_per_page(price_per_each: Decimal, page_yield: Option<u32>) -> Option<Decimal> {
    page_yield
        .filter(|y| *y > 0)
        .map(|y| (price_per_each / Decimal::from(y)).round_dp(PRICE_DP))
}

fn item_pack(item: &ExtractedItem, entry: Option<&CatalogEntry>) -> (u32, PackBasis) {
    let declared = item
        .pack_quantity
        .or_else(|| item.unit_of_measure.as_ref().and_then(|u| u.implied_pack()))
        .filter(|p| *p > 0);
    match (declared, entry) {
        (Some(p), _) => (p, PackBasis::Declared),
        (None, Some(e)) => (e.pack_quantity.max(1), PackBasis::AssumedFromCatalog),
        (None, None) => (1, PackBasis::Default),
    }
}

/// Normalize an item's price against its matched entry (if any).
///
/// Without a usable line price, falls back in order to the entry's list
/// price, its per-each price times the markup, then its cost times the
/// markup. If all are missing the price is `Unavailable`, never zero.
pub fn normalize_price(
    item: &ExtractedItem,
    entry: Option<&CatalogEntry>,
    config: &PricingConfig,
) -> NormalizedPrice {
    let (pack, pack_basis) = item_pack(item, entry);
    let pack_dec = Decimal::from(pack);
    let markup = config.markup_factor;

    let (source, unit_price, per_each) = if item.has_price() {
        (
            PriceSource::LineItem,
            Some(item.unit_price),
            Some(item.unit_price / pack_dec),
        )
    } else if let Some(list) = entry.and_then(|e| e.list_price).filter(|p| *p > Decimal::ZERO) {
        (PriceSource::CatalogListPrice, Some(list), Some(list / pack_dec))
    } else if let Some(each) = entry.and_then(|e| e.price_per_each()) {
        let per_each = each * markup;
        (
            PriceSource::CatalogEachPriceMarkup,
            Some(per_each * pack_dec),
            Some(per_each),
        )
    } else if let Some((cost, e)) = entry.and_then(|e| {
        e.cost
            .filter(|c| *c > Decimal::ZERO)
            .map(|c| (c, e))
    }) {
        let per_each = cost / e.pack() * markup;
        (
            PriceSource::CatalogCostMarkup,
            Some(per_each * pack_dec),
            Some(per_each),
        )
    } else {
        (PriceSource::Unavailable, None, None)
    };

    let per_each = per_each.map(|p| p.round_dp(PRICE_DP));
    let quantity_in_each = item.effective_quantity().saturating_mul(u64::from(pack));
    let page_yield = entry.and_then(|e| e.page_yield);
    let catalog_price_per_each = entry
        .and_then(|e| e.price_per_each())
        .map(|p| p.round_dp(PRICE_DP));

    NormalizedPrice {
        source,
        pack_basis,
        pack_quantity: pack,
        unit_price,
        price_per_each: per_each,
        quantity_in_each,
        current_total: per_each.and_then(|p| p.checked_mul(Decimal::from(quantity_in_each))),
        page_yield,
        cpp: per_each.and_then(|p| cost_per_page(p, page_yield)),
        catalog_price_per_each,
        catalog_cpp: catalog_price_per_each.and_then(|p| cost_per_page(p, page_yield)),
    }
}
