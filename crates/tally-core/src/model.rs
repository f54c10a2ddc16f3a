use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rows of raw string cells exactly as a document reader produced them.
///
/// No row is assumed to be a header; the structure analyzer decides that.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTable {
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        RawTable { rows }
    }

    /// Convenience constructor used heavily by tests and mock readers.
    pub fn from_rows(rows: &[&[&str]]) -> Self {
        RawTable {
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Widest row in the table.
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Trimmed cell text, or "" when the cell does not exist.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(|c| c.trim())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Identifier,
    Description,
    Quantity,
    UnitPrice,
    UnitOfMeasure,
    Unknown,
}

impl fmt::Display for ColumnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnRole::Identifier => write!(f, "identifier"),
            ColumnRole::Description => write!(f, "description"),
            ColumnRole::Quantity => write!(f, "quantity"),
            ColumnRole::UnitPrice => write!(f, "unit_price"),
            ColumnRole::UnitOfMeasure => write!(f, "unit_of_measure"),
            ColumnRole::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitOfMeasure {
    Each,
    Box,
    Case,
    Pack,
    Carton,
    Dozen,
    Roll,
    Ream,
    Other(String),
}

impl UnitOfMeasure {
    /// Recognize a unit-of-measure word or abbreviation.
    pub fn from_str_loose(s: &str) -> Option<UnitOfMeasure> {
        let lower = s.trim().trim_end_matches('.').to_lowercase();
        let uom = match lower.as_str() {
            "" => return None,
            "ea" | "each" | "eh" | "unit" | "units" | "pc" | "pcs" | "piece" => UnitOfMeasure::Each,
            "bx" | "box" | "boxes" => UnitOfMeasure::Box,
            "cs" | "case" | "cases" => UnitOfMeasure::Case,
            "pk" | "pack" | "pkg" | "package" => UnitOfMeasure::Pack,
            "ct" | "ctn" | "carton" | "cartons" => UnitOfMeasure::Carton,
            "dz" | "doz" | "dozen" => UnitOfMeasure::Dozen,
            "rl" | "roll" | "rolls" => UnitOfMeasure::Roll,
            "rm" | "ream" | "reams" => UnitOfMeasure::Ream,
            other => UnitOfMeasure::Other(other.to_string()),
        };
        Some(uom)
    }

    /// Pack size implied by the unit itself, when it has one.
    pub fn implied_pack(&self) -> Option<u32> {
        match self {
            UnitOfMeasure::Each => Some(1),
            UnitOfMeasure::Dozen => Some(12),
            _ => None,
        }
    }
}

impl fmt::Display for UnitOfMeasure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitOfMeasure::Each => write!(f, "EA"),
            UnitOfMeasure::Box => write!(f, "BX"),
            UnitOfMeasure::Case => write!(f, "CS"),
            UnitOfMeasure::Pack => write!(f, "PK"),
            UnitOfMeasure::Carton => write!(f, "CT"),
            UnitOfMeasure::Dozen => write!(f, "DZ"),
            UnitOfMeasure::Roll => write!(f, "RL"),
            UnitOfMeasure::Ream => write!(f, "RM"),
            UnitOfMeasure::Other(s) => write!(f, "{}", s.to_uppercase()),
        }
    }
}

/// Where an identifier was found in its source row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum IdentifierSource {
    /// A column the structure analyzer classified as an identifier column.
    /// Lower priority values are more specific (OEM/part numbers first).
    Designated { priority: u8 },
    /// A token recovered from some other cell in the row.
    Scanned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    pub column: usize,
    pub value: String,
    pub source: IdentifierSource,
}

/// One line item pulled from a data row. Write-once: later stages attach
/// their own records instead of editing this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedItem {
    pub source_row_index: usize,
    pub description: String,
    /// Deduplicated, ordered by priority.
    pub identifiers: Vec<Identifier>,
    /// 0 when the row did not state a quantity.
    pub quantity: u64,
    /// 0 when the row did not state a usable price.
    pub unit_price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_of_measure: Option<UnitOfMeasure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack_quantity: Option<u32>,
    /// True when `unit_price` was derived from an extended/total column.
    #[serde(default)]
    pub price_from_total: bool,
    pub extraction_confidence: f64,
}

impl ExtractedItem {
    /// Description, or the best identifier when the description is empty.
    pub fn display_name(&self) -> &str {
        if !self.description.is_empty() {
            &self.description
        } else {
            self.identifiers
                .first()
                .map(|i| i.value.as_str())
                .unwrap_or("")
        }
    }

    pub fn has_price(&self) -> bool {
        self.unit_price > Decimal::ZERO
    }

    /// Quantity used for cost maths: an unstated quantity counts as one.
    pub fn effective_quantity(&self) -> u64 {
        self.quantity.max(1)
    }

    /// Key for "unique input item" counting. Built from what the item
    /// arrived with, never from what it resolved to.
    pub fn input_key(&self) -> String {
        match self.identifiers.first() {
            Some(id) => id.value.trim().to_uppercase(),
            None => self.description.trim().to_lowercase(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(description: &str, ids: &[&str]) -> ExtractedItem {
        ExtractedItem {
            source_row_index: 3,
            description: description.into(),
            identifiers: ids
                .iter()
                .enumerate()
                .map(|(i, v)| Identifier {
                    column: i,
                    value: v.to_string(),
                    source: IdentifierSource::Scanned,
                })
                .collect(),
            quantity: 0,
            unit_price: Decimal::ZERO,
            unit_of_measure: None,
            pack_quantity: None,
            price_from_total: false,
            extraction_confidence: 0.35,
        }
    }

    #[test]
    fn test_display_name_falls_back_to_identifier() {
        assert_eq!(item("", &["CF410A", "HEWCF410A"]).display_name(), "CF410A");
        assert_eq!(item("Toner black", &["CF410A"]).display_name(), "Toner black");
    }

    #[test]
    fn test_input_key_uses_first_identifier() {
        assert_eq!(item("Toner", &["cf410a"]).input_key(), "CF410A");
        assert_eq!(item(" Copy Paper ", &[]).input_key(), "copy paper");
    }

    #[test]
    fn test_effective_quantity() {
        assert_eq!(item("x", &[]).effective_quantity(), 1);
    }

    #[test]
    fn test_uom_loose() {
        assert_eq!(UnitOfMeasure::from_str_loose("BX"), Some(UnitOfMeasure::Box));
        assert_eq!(UnitOfMeasure::from_str_loose("ea."), Some(UnitOfMeasure::Each));
        assert_eq!(UnitOfMeasure::from_str_loose("DZ").and_then(|u| u.implied_pack()), Some(12));
        assert_eq!(UnitOfMeasure::from_str_loose("  "), None);
    }

    #[test]
    fn test_raw_table_cell() {
        let t = RawTable::from_rows(&[&["a", " b "], &["c"]]);
        assert_eq!(t.cell(0, 1), "b");
        assert_eq!(t.cell(1, 1), "");
        assert_eq!(t.width(), 2);
    }
}
