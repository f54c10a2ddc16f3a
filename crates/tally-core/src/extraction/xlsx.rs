use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};

use crate::error::TallyError;
use crate::extraction::TableReader;
use crate::model::RawTable;

/// Spreadsheet backend using calamine.
///
/// Reads the first worksheet that has any non-empty cell. Cells keep their
/// displayed text where possible so that "1,549" and "$45.99" parse the
/// same way as in delimited exports.
pub struct XlsxReader;

impl XlsxReader {
    pub fn new() -> Self {
        XlsxReader
    }
}

impl Default for XlsxReader {
    fn default() -> Self {
        Self::new()
    }
}

impl TableReader for XlsxReader {
    fn read_table(&self, bytes: &[u8]) -> Result<RawTable, TallyError> {
        let cursor = Cursor::new(bytes);
        let mut workbook: Xlsx<_> = calamine::open_workbook_from_rs(cursor)
            .map_err(|e| TallyError::Extraction(format!("failed to open xlsx: {e}")))?;

        for (name, range) in workbook.worksheets() {
            let rows: Vec<Vec<String>> = range
                .rows()
                .map(|row| row.iter().map(cell_as_string).collect())
                .collect();
            if rows.iter().any(|r| r.iter().any(|c| !c.is_empty())) {
                tracing::debug!(sheet = %name, rows = rows.len(), "using worksheet");
                return Ok(RawTable::new(rows));
            }
        }

        Err(TallyError::Extraction("workbook has no non-empty worksheet".into()))
    }

    fn backend_name(&self) -> &str {
        "calamine"
    }
}

fn cell_as_string(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => format_float(*f),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::Empty | Data::Error(_) => String::new(),
        other => format!("{other}"),
    }
}

/// Whole floats print without a fraction ("12" not "12.0"); others keep
/// the shortest round-trip form.
fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{f}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_as_string() {
        assert_eq!(cell_as_string(&Data::String("  CF410A ".into())), "CF410A");
        assert_eq!(cell_as_string(&Data::Float(12.0)), "12");
        assert_eq!(cell_as_string(&Data::Float(45.99)), "45.99");
        assert_eq!(cell_as_string(&Data::Int(1549)), "1549");
        assert_eq!(cell_as_string(&Data::Empty), "");
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        assert!(matches!(
            XlsxReader::new().read_table(b"not a workbook"),
            Err(TallyError::Extraction(_))
        ));
    }
}
