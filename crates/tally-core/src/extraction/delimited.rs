use crate::error::TallyError;
use crate::extraction::TableReader;
use crate::model::RawTable;

/// Delimited text backend (comma, semicolon or tab, sniffed from the
/// first non-empty line).
///
/// Rows may have different lengths; exports with title lines above the
/// header are common.
pub struct CsvReader {
    delimiter: Option<u8>,
}

impl CsvReader {
    pub fn new() -> Self {
        CsvReader { delimiter: None }
    }

    pub fn with_delimiter(delimiter: u8) -> Self {
        CsvReader {
            delimiter: Some(delimiter),
        }
    }
}

impl Default for CsvReader {
    fn default() -> Self {
        Self::new()
    }
}

impl TableReader for CsvReader {
    fn read_table(&self, bytes: &[u8]) -> Result<RawTable, TallyError> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let delimiter = self.delimiter.unwrap_or_else(|| sniff_delimiter(bytes));

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(bytes);

        let mut rows = Vec::new();
        for record in reader.byte_records() {
            let record = record?;
            rows.push(
                record
                    .iter()
                    .map(|field| String::from_utf8_lossy(field).trim().to_string())
                    .collect(),
            );
        }

        if rows.is_empty() {
            return Err(TallyError::Extraction("no rows found in delimited file".into()));
        }
        Ok(RawTable::new(rows))
    }

    fn backend_name(&self) -> &str {
        "csv"
    }
}

fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let first_line = bytes
        .split(|b| *b == b'\n')
        .find(|line| line.iter().any(|b| !b.is_ascii_whitespace()))
        .unwrap_or(&[]);

    [b',', b';', b'\t']
        .into_iter()
        .max_by_key(|d| (first_line.iter().filter(|b| *b == d).count(), *d == b','))
        .unwrap_or(b',')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_ragged_rows() {
        let data = "Usage report\nItem #,Description,Qty\nCF410A,\"Toner, black\",2\n";
        let table = CsvReader::new().read_table(data.as_bytes()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.rows[0].len(), 1);
        assert_eq!(table.cell(2, 1), "Toner, black");
    }

    #[test]
    fn test_sniff_semicolon_and_tab() {
        assert_eq!(sniff_delimiter(b"\nItem;Description;Qty\n"), b';');
        assert_eq!(sniff_delimiter(b"Item\tDescription\tQty"), b'\t');
        assert_eq!(sniff_delimiter(b"Report"), b',');
    }

    #[test]
    fn test_bom_stripped() {
        let table = CsvReader::new()
            .read_table(b"\xEF\xBB\xBFSKU,Qty\nAB1234,1\n")
            .unwrap();
        assert_eq!(table.cell(0, 0), "SKU");
    }

    #[test]
    fn test_empty_input_is_error() {
        assert!(CsvReader::new().read_table(b"").is_err());
    }
}
