pub mod delimited;
pub mod pdftotext;
pub mod xlsx;

use crate::error::TallyError;
use crate::model::RawTable;
use std::path::Path;

/// Trait for document reading backends.
///
/// A reader only turns bytes into rows of cells. It never decides which row
/// is the header; that is the structure analyzer's job.
pub trait TableReader: Send + Sync {
    /// Read document bytes into a raw table.
    fn read_table(&self, bytes: &[u8]) -> Result<RawTable, TallyError>;

    /// Name of this backend (for diagnostics).
    fn backend_name(&self) -> &str;
}

/// Pick a reader by file extension.
pub fn reader_for_path(path: &Path) -> Result<Box<dyn TableReader>, TallyError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "csv" | "tsv" | "txt" => Ok(Box::new(delimited::CsvReader::new())),
        "xlsx" | "xlsm" => Ok(Box::new(xlsx::XlsxReader::new())),
        "pdf" => Ok(Box::new(pdftotext::PdftotextReader::new())),
        other => Err(TallyError::UnsupportedDocument(if other.is_empty() {
            format!("{} has no file extension", path.display())
        } else {
            format!(".{other} files are not supported (csv, tsv, xlsx, pdf)")
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_for_path() {
        assert_eq!(
            reader_for_path(Path::new("usage.CSV")).unwrap().backend_name(),
            "csv"
        );
        assert_eq!(
            reader_for_path(Path::new("q1.xlsx")).unwrap().backend_name(),
            "calamine"
        );
        assert_eq!(
            reader_for_path(Path::new("invoice.pdf")).unwrap().backend_name(),
            "pdftotext"
        );
        assert!(matches!(
            reader_for_path(Path::new("notes.docx")),
            Err(TallyError::UnsupportedDocument(_))
        ));
    }
}
