use crate::model::{ExtractedItem, Identifier, IdentifierSource, RawTable};
use crate::parsing::normalize::{identifier_tokens, normalize_identifier};
use crate::parsing::structure::{is_header_like_row, positional_layout, ColumnLayout, TableStructure};
use crate::parsing::values::{parse_money, parse_quantity, parse_uom};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

const WEIGHT_DESCRIPTION: f64 = 0.25;
const WEIGHT_IDENTIFIER: f64 = 0.35;
const WEIGHT_PRICE: f64 = 0.25;
const WEIGHT_QUANTITY: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Neither a description nor any identifier.
    MissingContent,
    /// A header (or legend) row repeated inside the data.
    RepeatedHeader,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRow {
    pub row_index: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowExtraction {
    pub items: Vec<ExtractedItem>,
    pub skipped: Vec<SkippedRow>,
    /// Non-blank rows at or after the data start.
    pub rows_considered: usize,
    /// Cell values that could not be parsed and were treated as absent.
    pub warnings: Vec<String>,
}

/// Turn every data row into an [`ExtractedItem`] or a [`SkippedRow`].
///
/// Blank rows are ignored entirely. Unparseable quantity or price cells
/// are treated as not stated, never as a row failure.
pub fn extract_items(table: &RawTable, structure: &TableStructure) -> RowExtraction {
    let mut out = RowExtraction::default();

    for (row_index, row) in table.rows.iter().enumerate().skip(structure.data_start) {
        if row.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        out.rows_considered += 1;

        if is_header_like_row(row) {
            debug!(row = row_index, "skipping repeated header row");
            out.skipped.push(SkippedRow {
                row_index,
                reason: SkipReason::RepeatedHeader,
            });
            continue;
        }

        let row_layout;
        let layout = if structure.synthetic_headers {
            row_layout = positional_layout(row).unwrap_or_default();
            &row_layout
        } else {
            &structure.layout
        };

        match extract_row(row_index, row, layout, &mut out.warnings) {
            Some(item) => out.items.push(item),
            None => {
                debug!(row = row_index, "skipping row without description or identifiers");
                out.skipped.push(SkippedRow {
                    row_index,
                    reason: SkipReason::MissingContent,
                });
            }
        }
    }

    out
}

fn cell(row: &[String], col: Option<usize>) -> &str {
    col.and_then(|c| row.get(c)).map(|c| c.trim()).unwrap_or("")
}

fn is_summary_label(text: &str) -> bool {
    let lower = text.trim().trim_end_matches(':').to_lowercase();
    matches!(
        lower.as_str(),
        "total" | "totals" | "subtotal" | "sub total" | "sub-total" | "grand total" | "order total"
    )
}

fn extract_row(
    row_index: usize,
    row: &[String],
    layout: &ColumnLayout,
    warnings: &mut Vec<String>,
) -> Option<ExtractedItem> {
    let raw_description = cell(row, layout.description_column);
    let description = if is_summary_label(raw_description) {
        String::new()
    } else {
        raw_description.split_whitespace().collect::<Vec<_>>().join(" ")
    };

    let identifiers = collect_identifiers(row, layout);
    if description.is_empty() && identifiers.is_empty() {
        return None;
    }

    let quantity = match parse_quantity(cell(row, layout.quantity_column)) {
        Ok(q) => q.unwrap_or(0),
        Err(e) => {
            warnings.push(format!("row {row_index}: quantity treated as unstated ({e})"));
            0
        }
    };

    let mut money = |col: Option<usize>, what: &str| match parse_money(cell(row, col)) {
        Ok(v) => v,
        Err(e) => {
            warnings.push(format!("row {row_index}: {what} treated as unstated ({e})"));
            None
        }
    };

    let mut price_from_total = false;
    let unit_price = match money(layout.unit_price_column, "unit price") {
        Some(p) => p,
        None => match money(layout.total_price_column, "total price") {
            Some(total) if layout.unit_price_column.is_none() => {
                price_from_total = true;
                (total / Decimal::from(quantity.max(1))).round_dp(4)
            }
            _ => Decimal::ZERO,
        },
    };

    let (unit_of_measure, pack_quantity) = match parse_uom(cell(row, layout.uom_column)) {
        Some((uom, pack)) => (Some(uom), pack),
        None => (None, None),
    };

    let mut confidence = 0.0;
    if !description.is_empty() {
        confidence += WEIGHT_DESCRIPTION;
    }
    if !identifiers.is_empty() {
        confidence += WEIGHT_IDENTIFIER;
    }
    if unit_price > Decimal::ZERO {
        confidence += WEIGHT_PRICE;
    }
    if quantity > 0 {
        confidence += WEIGHT_QUANTITY;
    }

    Some(ExtractedItem {
        source_row_index: row_index,
        description,
        identifiers,
        quantity,
        unit_price,
        unit_of_measure,
        pack_quantity,
        price_from_total,
        extraction_confidence: confidence,
    })
}

/// Designated identifier cells by priority, then tokens recovered from
/// cells without a role, left to right. Deduplicated on normalized form.
fn collect_identifiers(row: &[String], layout: &ColumnLayout) -> Vec<Identifier> {
    let mut seen: Vec<String> = Vec::new();
    let mut ids = Vec::new();
    let mut push = |column: usize, value: &str, source: IdentifierSource| {
        let key = normalize_identifier(value);
        if key.is_empty() || seen.contains(&key) {
            return;
        }
        seen.push(key);
        ids.push(Identifier {
            column,
            value: value.to_string(),
            source,
        });
    };

    let mut designated = layout.identifier_columns.clone();
    designated.sort_by_key(|c| (c.priority, c.column));
    for col in &designated {
        let value = cell(row, Some(col.column));
        if matches!(parse_money(value), Ok(None)) {
            // empty or placeholder
            continue;
        }
        push(
            col.column,
            value,
            IdentifierSource::Designated {
                priority: col.priority,
            },
        );
    }

    for (column, text) in row.iter().enumerate() {
        if layout.is_identifier_column(column) || layout.is_value_column(column) {
            continue;
        }
        for token in identifier_tokens(text) {
            push(column, &token, IdentifierSource::Scanned);
        }
    }

    ids
}
