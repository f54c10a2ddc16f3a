use crate::model::UnitOfMeasure;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A product catalog: the read-only lookup target for matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDef {
    pub name: String,
    pub version: String,
    /// Namespace label of each entry's `sku` field.
    #[serde(default = "default_primary_namespace")]
    pub primary_namespace: String,
    pub entries: Vec<CatalogEntry>,
}

fn default_primary_namespace() -> String {
    "primary".into()
}

/// Page-yield tier of a consumable, ordered from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YieldClass {
    Standard,
    High,
    ExtraHigh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    /// Identifier in the catalog's primary namespace.
    pub sku: String,
    /// Namespace -> identifier (e.g. "oem" -> "CF410A", "wholesaler" -> "HEWCF410A").
    #[serde(default)]
    pub alternate_skus: BTreeMap<String, String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    /// Compatibility group: entries sharing a family fit the same device.
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub page_yield: Option<u32>,
    #[serde(default)]
    pub yield_class: Option<YieldClass>,
    #[serde(default = "default_uom")]
    pub unit_of_measure: UnitOfMeasure,
    #[serde(default = "default_pack")]
    pub pack_quantity: u32,
    /// Selling price per unit of measure.
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub list_price: Option<Decimal>,
    #[serde(default)]
    pub cost: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

fn default_uom() -> UnitOfMeasure {
    UnitOfMeasure::Each
}

fn default_pack() -> u32 {
    1
}

impl CatalogEntry {
    /// All identifiers with their namespace, primary first.
    pub fn identifiers<'a>(
        &'a self,
        primary_namespace: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        std::iter::once((primary_namespace, self.sku.as_str())).chain(
            self.alternate_skus
                .iter()
                .map(|(ns, v)| (ns.as_str(), v.as_str())),
        )
    }

    pub fn pack(&self) -> Decimal {
        Decimal::from(self.pack_quantity.max(1))
    }

    /// Selling price of a single unit, when the entry has a price.
    pub fn price_per_each(&self) -> Option<Decimal> {
        self.price
            .filter(|p| *p > Decimal::ZERO)
            .map(|p| p / self.pack())
    }

    /// Text used for full-text and semantic search.
    pub fn search_text(&self) -> String {
        let mut parts = vec![self.name.as_str()];
        parts.extend(self.description.as_deref());
        parts.extend(self.brand.as_deref());
        parts.extend(self.category.as_deref());
        parts.extend(self.color.as_deref());
        parts.join(" ")
    }
}
