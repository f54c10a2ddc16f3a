pub mod normalize;
pub mod rows;
pub mod structure;
pub mod values;

use crate::error::TallyError;
use crate::model::{ExtractedItem, RawTable};
use rows::{extract_items, SkippedRow};
use serde::{Deserialize, Serialize};
use structure::{analyze_structure, TableStructure};
use tracing::{debug, info};

/// Everything the parsing stage learned about one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTable {
    pub structure: TableStructure,
    pub items: Vec<ExtractedItem>,
    pub skipped: Vec<SkippedRow>,
    pub rows_considered: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Infer the table's structure and extract its line items.
///
/// Fails only when the structure cannot be resolved at all; bad rows are
/// skipped and reported instead.
pub fn parse_table(table: &RawTable) -> Result<ParsedTable, TallyError> {
    let structure = analyze_structure(table)?;
    debug!(
        header_row = ?structure.header_row_index,
        synthetic = structure.synthetic_headers,
        "structure resolved"
    );

    let extraction = extract_items(table, &structure);
    info!(
        items = extraction.items.len(),
        skipped = extraction.skipped.len(),
        "rows extracted"
    );

    Ok(ParsedTable {
        structure,
        items: extraction.items,
        skipped: extraction.skipped,
        rows_considered: extraction.rows_considered,
        warnings: extraction.warnings,
    })
}
