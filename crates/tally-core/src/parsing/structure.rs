//! Structure inference over tables whose headers cannot be trusted.
//!
//! Finds the header row among titles, metadata and blank rows, then assigns
//! a [`ColumnRole`] to every column. Role assignment is an ordered rule list
//! evaluated top to bottom; the first matching rule wins.

use crate::error::TallyError;
use crate::model::{ColumnRole, RawTable};
use crate::parsing::normalize::looks_like_identifier;
use crate::parsing::values::{is_numeric, parse_money, parse_quantity};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Rows inspected when looking for the header.
pub const HEADER_SCAN_ROWS: usize = 20;

/// Data rows sampled when checking header-derived roles against content.
const EVIDENCE_SAMPLE_ROWS: usize = 20;

/// Longest cell text that can still be a column label.
const MAX_HEADER_CELL_LEN: usize = 40;

/// What a header cell says about its column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderKind {
    UnitOfMeasure,
    Quantity,
    /// Extended/total price: computed, used only when no unit price exists.
    TotalPrice,
    UnitPrice,
    Identifier,
    Description,
}

impl HeaderKind {
    /// The role family this header counts toward when qualifying a row.
    pub fn family(self) -> ColumnRole {
        match self {
            HeaderKind::UnitOfMeasure => ColumnRole::UnitOfMeasure,
            HeaderKind::Quantity => ColumnRole::Quantity,
            HeaderKind::TotalPrice | HeaderKind::UnitPrice => ColumnRole::UnitPrice,
            HeaderKind::Identifier => ColumnRole::Identifier,
            HeaderKind::Description => ColumnRole::Description,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Pattern {
    /// Substring anywhere in the lowercased cell.
    Phrase(&'static str),
    /// Whole word, or word prefix for keywords of five characters or more.
    Word(&'static str),
    /// Entire cell.
    Exact(&'static str),
}

struct HeaderRule {
    kind: HeaderKind,
    /// Lower rank wins when several columns claim the same kind.
    rank: u8,
    patterns: &'static [Pattern],
}

use Pattern::{Exact, Phrase, Word};

const HEADER_RULES: &[HeaderRule] = &[
    HeaderRule {
        kind: HeaderKind::UnitOfMeasure,
        rank: 0,
        patterns: &[
            Word("uom"),
            Phrase("u/m"),
            Phrase("unit of measure"),
            Phrase("sell unit"),
            Phrase("pack size"),
            Exact("unit"),
        ],
    },
    HeaderRule {
        kind: HeaderKind::Quantity,
        rank: 0,
        patterns: &[
            Phrase("order qty"),
            Phrase("order quantity"),
            Phrase("ordered quantity"),
            Phrase("qty ordered"),
            Phrase("quantity ordered"),
        ],
    },
    HeaderRule {
        kind: HeaderKind::Quantity,
        rank: 1,
        patterns: &[Word("qty"), Word("quantity")],
    },
    HeaderRule {
        kind: HeaderKind::TotalPrice,
        rank: 0,
        patterns: &[
            Word("total"),
            Word("extended"),
            Phrase("ext price"),
            Phrase("ext. price"),
            Phrase("line amount"),
            Word("subtotal"),
        ],
    },
    HeaderRule {
        kind: HeaderKind::UnitPrice,
        rank: 0,
        patterns: &[
            Phrase("unit price"),
            Phrase("unit cost"),
            Word("each"),
            Word("price"),
            Word("sale"),
            Word("cost"),
            Word("rate"),
        ],
    },
    HeaderRule {
        kind: HeaderKind::UnitPrice,
        rank: 1,
        patterns: &[Word("amount")],
    },
    HeaderRule {
        kind: HeaderKind::Description,
        rank: 0,
        patterns: &[Word("description"), Word("desc")],
    },
    HeaderRule {
        kind: HeaderKind::Identifier,
        rank: 0,
        patterns: &[
            Word("oem"),
            Word("mfr"),
            Word("mfg"),
            Word("manufacturer"),
            Word("mpn"),
            Word("part"),
        ],
    },
    HeaderRule {
        kind: HeaderKind::Identifier,
        rank: 1,
        patterns: &[
            Phrase("item #"),
            Phrase("item#"),
            Phrase("item no"),
            Phrase("item number"),
            Word("catalog"),
            Word("model"),
            Phrase("product code"),
            Word("code"),
            Word("stock"),
        ],
    },
    HeaderRule {
        kind: HeaderKind::Identifier,
        rank: 2,
        patterns: &[Word("sku"), Word("upc")],
    },
    HeaderRule {
        kind: HeaderKind::Description,
        rank: 1,
        patterns: &[Word("item"), Word("product"), Word("name")],
    },
];

/// Result of classifying one header cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderMatch {
    pub kind: HeaderKind,
    pub rank: u8,
}

/// Run the header rules over one cell.
pub fn classify_header(cell: &str) -> Option<HeaderMatch> {
    let lower = cell.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    HEADER_RULES.iter().find_map(|rule| {
        let hit = rule.patterns.iter().any(|p| match *p {
            Phrase(s) => lower.contains(s),
            Exact(s) => lower == s,
            Word(s) => words
                .iter()
                .any(|w| *w == s || (s.len() >= 5 && w.starts_with(s))),
        });
        hit.then_some(HeaderMatch {
            kind: rule.kind,
            rank: rule.rank,
        })
    })
}

/// A cell that reads as a column label: short, digit-free, keyword-bearing.
pub fn is_header_cell(cell: &str) -> bool {
    let cell = cell.trim();
    !cell.is_empty()
        && cell.chars().count() <= MAX_HEADER_CELL_LEN
        && !cell.chars().any(|c| c.is_ascii_digit())
        && classify_header(cell).is_some()
}

/// A cell that is nothing but a column label ("Description", "Qty:", "Item #").
fn is_bare_label(cell: &str) -> bool {
    let lower = cell
        .trim()
        .trim_end_matches(|c| c == ':' || c == '.')
        .trim()
        .to_lowercase();
    HEADER_RULES
        .iter()
        .flat_map(|rule| rule.patterns)
        .any(|p| match *p {
            Phrase(s) | Word(s) | Exact(s) => lower == s,
        })
}

/// A row where more than half of the non-empty cells are column labels.
///
/// A lone label only counts when the cell is a bare label; descriptions
/// such as "Stapler desktop model" merely contain one.
pub fn is_header_like_row(row: &[String]) -> bool {
    let non_empty: Vec<&str> = row
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();
    if non_empty.is_empty() {
        return false;
    }
    let labels: Vec<&str> = non_empty
        .iter()
        .copied()
        .filter(|c| is_header_cell(c))
        .collect();
    if labels.len() * 2 <= non_empty.len() {
        return false;
    }
    labels.len() >= 2 || labels.iter().all(|c| is_bare_label(c))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierColumn {
    pub column: usize,
    /// Lower is more specific: 0 OEM/part, 1 item/catalog/model, 2 generic SKU.
    pub priority: u8,
}

/// The designated columns of a table (or of a single row, for tables
/// without a usable header).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLayout {
    pub identifier_columns: Vec<IdentifierColumn>,
    pub description_column: Option<usize>,
    pub quantity_column: Option<usize>,
    pub unit_price_column: Option<usize>,
    pub total_price_column: Option<usize>,
    pub uom_column: Option<usize>,
}

impl ColumnLayout {
    /// True when `col` carries a designated role (identifier columns excluded).
    pub fn is_value_column(&self, col: usize) -> bool {
        [
            self.description_column,
            self.quantity_column,
            self.unit_price_column,
            self.total_price_column,
            self.uom_column,
        ]
        .contains(&Some(col))
    }

    pub fn is_identifier_column(&self, col: usize) -> bool {
        self.identifier_columns.iter().any(|c| c.column == col)
    }

    fn roles(&self, width: usize) -> Vec<ColumnRole> {
        (0..width)
            .map(|col| {
                if self.is_identifier_column(col) {
                    ColumnRole::Identifier
                } else if self.description_column == Some(col) {
                    ColumnRole::Description
                } else if self.quantity_column == Some(col) {
                    ColumnRole::Quantity
                } else if self.unit_price_column == Some(col) {
                    ColumnRole::UnitPrice
                } else if self.uom_column == Some(col) {
                    ColumnRole::UnitOfMeasure
                } else {
                    ColumnRole::Unknown
                }
            })
            .collect()
    }
}

/// A role the content evidence overruled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRevision {
    pub column: usize,
    pub from: ColumnRole,
    pub to: ColumnRole,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStructure {
    /// None when no usable header row exists.
    pub header_row_index: Option<usize>,
    /// First row that may hold data.
    pub data_start: usize,
    pub roles: Vec<ColumnRole>,
    pub layout: ColumnLayout,
    /// Roles came from positional inference; rows must be read row-locally.
    pub synthetic_headers: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub revisions: Vec<RoleRevision>,
}

/// Locate the header row and classify every column.
pub fn analyze_structure(table: &RawTable) -> Result<TableStructure, TallyError> {
    if table.rows.iter().all(|r| r.iter().all(|c| c.trim().is_empty())) {
        return Err(TallyError::StructureUnresolved(
            "table has no non-empty cells".into(),
        ));
    }

    let scan = table.len().min(HEADER_SCAN_ROWS);
    for row_idx in 0..scan {
        if is_header_row(&table.rows[row_idx]) {
            return Ok(structure_from_header(table, row_idx));
        }
    }

    debug!("no header row found in first {scan} rows, using positional inference");
    for row_idx in 0..scan {
        let row = &table.rows[row_idx];
        if non_empty_count(row) < 2 {
            continue;
        }
        if let Some(layout) = positional_layout(row) {
            return Ok(TableStructure {
                header_row_index: None,
                data_start: row_idx,
                roles: layout.roles(table.width()),
                layout,
                synthetic_headers: true,
                revisions: Vec::new(),
            });
        }
    }

    Err(TallyError::StructureUnresolved(format!(
        "no header row and no identifier or description column in the first {scan} rows"
    )))
}

/// Header test: two distinct role families, or one family on a dense row.
fn is_header_row(row: &[String]) -> bool {
    let mut families: Vec<ColumnRole> = row
        .iter()
        .filter(|c| is_header_cell(c))
        .filter_map(|c| classify_header(c))
        .map(|m| m.kind.family())
        .collect();
    families.sort();
    families.dedup();

    families.len() >= 2 || (families.len() == 1 && non_empty_count(row) >= 5)
}

fn non_empty_count(row: &[String]) -> usize {
    row.iter().filter(|c| !c.trim().is_empty()).count()
}

fn structure_from_header(table: &RawTable, header_idx: usize) -> TableStructure {
    let header = &table.rows[header_idx];
    let mut claims: Vec<(usize, HeaderMatch)> = header
        .iter()
        .enumerate()
        .filter(|(_, c)| is_header_cell(c))
        .filter_map(|(col, c)| classify_header(c).map(|m| (col, m)))
        .collect();
    // Lowest rank first, then leftmost
    claims.sort_by_key(|(col, m)| (m.rank, *col));

    let first_of = |kind: HeaderKind| {
        claims
            .iter()
            .find(|(_, m)| m.kind == kind)
            .map(|(col, _)| *col)
    };

    let mut layout = ColumnLayout {
        identifier_columns: claims
            .iter()
            .filter(|(_, m)| m.kind == HeaderKind::Identifier)
            .map(|(col, m)| IdentifierColumn {
                column: *col,
                priority: m.rank,
            })
            .collect(),
        description_column: first_of(HeaderKind::Description),
        quantity_column: first_of(HeaderKind::Quantity),
        unit_price_column: first_of(HeaderKind::UnitPrice),
        total_price_column: first_of(HeaderKind::TotalPrice),
        uom_column: first_of(HeaderKind::UnitOfMeasure),
    };

    let data_start = header_idx + 1;
    let sample: Vec<&Vec<String>> = table.rows[data_start.min(table.len())..]
        .iter()
        .filter(|r| non_empty_count(r) > 0 && !is_header_like_row(r))
        .take(EVIDENCE_SAMPLE_ROWS)
        .collect();
    let revisions = revise_with_evidence(&mut layout, &sample, table.width());

    debug!(
        header_row = header_idx,
        identifiers = layout.identifier_columns.len(),
        description = ?layout.description_column,
        quantity = ?layout.quantity_column,
        price = ?layout.unit_price_column,
        "header row detected"
    );

    TableStructure {
        header_row_index: Some(header_idx),
        data_start,
        roles: layout.roles(table.width()),
        layout,
        synthetic_headers: false,
        revisions,
    }
}

fn column_values<'a>(sample: &[&'a Vec<String>], col: usize) -> Vec<&'a str> {
    sample
        .iter()
        .filter_map(|r| r.get(col))
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect()
}

fn fraction(values: &[&str], pred: impl Fn(&str) -> bool) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().filter(|v| pred(v)).count() as f64 / values.len() as f64
}

fn is_free_text(s: &str) -> bool {
    s.chars().count() >= 8
        && s.contains(char::is_whitespace)
        && s.chars().any(char::is_alphabetic)
        && !is_numeric(s)
}

fn is_small_count(s: &str) -> bool {
    s.len() <= 6
        && s.chars().all(|c| c.is_ascii_digit() || c == ',')
        && matches!(parse_quantity(s), Ok(Some(n)) if n > 0 && n < 10_000)
}

fn is_currency_like(s: &str) -> bool {
    is_numeric(s) && (s.contains('$') || s.contains('.') || s.contains('€') || s.contains('£'))
}

/// Check header-derived roles against sampled data and repair them.
fn revise_with_evidence(
    layout: &mut ColumnLayout,
    sample: &[&Vec<String>],
    width: usize,
) -> Vec<RoleRevision> {
    let mut revisions = Vec::new();
    if sample.is_empty() {
        return revisions;
    }

    for (slot, role) in [
        (&mut layout.quantity_column, ColumnRole::Quantity),
        (&mut layout.unit_price_column, ColumnRole::UnitPrice),
        (&mut layout.total_price_column, ColumnRole::UnitPrice),
    ] {
        if let Some(col) = *slot {
            let values = column_values(sample, col);
            if !values.is_empty() && fraction(&values, is_numeric) < 0.5 {
                *slot = None;
                revisions.push(RoleRevision {
                    column: col,
                    from: role,
                    to: ColumnRole::Unknown,
                    reason: "fewer than half of sampled values are numeric".into(),
                });
            }
        }
    }

    let unclaimed = |layout: &ColumnLayout, col: usize| {
        !layout.is_value_column(col) && !layout.is_identifier_column(col)
    };

    if layout.description_column.is_none() {
        let best = (0..width)
            .filter(|col| unclaimed(layout, *col))
            .map(|col| {
                let count = sample
                    .iter()
                    .filter(|r| r.get(col).is_some_and(|c| is_free_text(c.trim())))
                    .count();
                (col, count)
            })
            .filter(|(_, count)| *count * 2 >= sample.len() && *count > 0)
            .max_by_key(|(col, count)| (*count, std::cmp::Reverse(*col)));
        if let Some((col, _)) = best {
            layout.description_column = Some(col);
            revisions.push(RoleRevision {
                column: col,
                from: ColumnRole::Unknown,
                to: ColumnRole::Description,
                reason: "unlabelled column holds free text".into(),
            });
        }
    }

    if layout.identifier_columns.is_empty() {
        let found = (0..width).filter(|col| unclaimed(layout, *col)).find(|col| {
            let values = column_values(sample, *col);
            !values.is_empty() && fraction(&values, looks_like_identifier) >= 0.5
        });
        if let Some(col) = found {
            layout.identifier_columns.push(IdentifierColumn {
                column: col,
                priority: 1,
            });
            revisions.push(RoleRevision {
                column: col,
                from: ColumnRole::Unknown,
                to: ColumnRole::Identifier,
                reason: "unlabelled column holds part-number tokens".into(),
            });
        }
    }

    if layout.quantity_column.is_none() {
        let found = (0..width).filter(|col| unclaimed(layout, *col)).find(|col| {
            let values = column_values(sample, *col);
            !values.is_empty() && fraction(&values, is_small_count) >= 0.8
        });
        if let Some(col) = found {
            layout.quantity_column = Some(col);
            revisions.push(RoleRevision {
                column: col,
                from: ColumnRole::Unknown,
                to: ColumnRole::Quantity,
                reason: "unlabelled column holds small whole numbers".into(),
            });
        }
    }

    if layout.unit_price_column.is_none() && layout.total_price_column.is_none() {
        let found = (0..width).filter(|col| unclaimed(layout, *col)).find(|col| {
            let values = column_values(sample, *col);
            !values.is_empty() && fraction(&values, is_currency_like) >= 0.8
        });
        if let Some(col) = found {
            layout.unit_price_column = Some(col);
            revisions.push(RoleRevision {
                column: col,
                from: ColumnRole::Unknown,
                to: ColumnRole::UnitPrice,
                reason: "unlabelled column holds currency values".into(),
            });
        }
    }

    revisions
}

/// Infer roles from the content of a single row.
///
/// Returns None when the row has neither an identifier nor a description.
pub fn positional_layout(row: &[String]) -> Option<ColumnLayout> {
    let cells: Vec<&str> = row.iter().map(|c| c.trim()).collect();

    let identifier = cells
        .iter()
        .position(|c| c.chars().count() <= 20 && looks_like_identifier(c));

    let description = cells
        .iter()
        .enumerate()
        .filter(|(i, c)| Some(*i) != identifier && is_free_text(c))
        .max_by_key(|(i, c)| (c.chars().count(), std::cmp::Reverse(*i)))
        .map(|(i, _)| i);

    if identifier.is_none() && description.is_none() {
        return None;
    }

    let taken = |i: usize| Some(i) == identifier || Some(i) == description;

    let quantity = cells
        .iter()
        .enumerate()
        .find(|(i, c)| !taken(*i) && is_small_count(c))
        .map(|(i, _)| i);

    let price = cells
        .iter()
        .enumerate()
        .find(|(i, c)| {
            !taken(*i)
                && Some(*i) != quantity
                && (is_currency_like(c)
                    || parse_money(c)
                        .ok()
                        .flatten()
                        .is_some_and(|v| v > Decimal::TEN))
        })
        .map(|(i, _)| i);

    Some(ColumnLayout {
        identifier_columns: identifier
            .map(|column| {
                vec![IdentifierColumn {
                    column,
                    priority: 1,
                }]
            })
            .unwrap_or_default(),
        description_column: description,
        quantity_column: quantity,
        unit_price_column: price,
        total_price_column: None,
        uom_column: None,
    })
}
