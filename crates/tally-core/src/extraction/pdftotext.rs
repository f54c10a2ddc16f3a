use crate::error::TallyError;
use crate::extraction::TableReader;
use crate::model::RawTable;
use std::io::Write;
use std::process::Command;

/// PDF backend using pdftotext (from poppler-utils).
///
/// Uses `pdftotext -layout` to preserve the column alignment of tables,
/// then splits every line into cells on gaps of two or more spaces.
pub struct PdftotextReader;

impl PdftotextReader {
    pub fn new() -> Self {
        PdftotextReader
    }

    /// Check if pdftotext is available on the system.
    pub fn is_available() -> bool {
        Command::new("pdftotext")
            .arg("-v")
            .output()
            .map(|o| o.status.success() || !o.stderr.is_empty())
            .unwrap_or(false)
    }
}

impl Default for PdftotextReader {
    fn default() -> Self {
        Self::new()
    }
}

impl TableReader for PdftotextReader {
    fn read_table(&self, bytes: &[u8]) -> Result<RawTable, TallyError> {
        // Write PDF bytes to a temp file
        let mut tmpfile =
            tempfile::NamedTempFile::new().map_err(|e| TallyError::Extraction(e.to_string()))?;
        tmpfile
            .write_all(bytes)
            .map_err(|e| TallyError::Extraction(e.to_string()))?;

        let output = Command::new("pdftotext")
            .arg("-layout")
            .arg(tmpfile.path())
            .arg("-") // output to stdout
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TallyError::PdftotextNotFound
                } else {
                    TallyError::Extraction(format!("pdftotext failed: {}", e))
                }
            })?;

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(TallyError::PdftotextFailed { code, stderr });
        }

        let text = String::from_utf8_lossy(&output.stdout);
        Ok(layout_text_to_table(&text))
    }

    fn backend_name(&self) -> &str {
        "pdftotext"
    }
}

/// Convert layout-preserving text into rows. Page breaks (form feeds)
/// become blank rows so row indices stay stable.
pub fn layout_text_to_table(text: &str) -> RawTable {
    let rows = text
        .split('\x0c')
        .flat_map(|page| page.lines().chain(std::iter::once("")))
        .map(|line| {
            split_by_whitespace_gaps(line)
                .into_iter()
                .map(|s| s.trim().to_string())
                .collect()
        })
        .collect();
    RawTable::new(rows)
}

/// Split a line by gaps of 2+ whitespace characters.
fn split_by_whitespace_gaps(line: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = None;
    let mut space_count = 0;
    // Byte offset of the first whitespace char of the current gap
    let mut gap_start = 0;

    for (i, c) in line.char_indices() {
        if c.is_whitespace() {
            if space_count == 0 {
                gap_start = i;
            }
            space_count += 1;
            if space_count == 2 {
                if let Some(s) = start {
                    segments.push(&line[s..gap_start]);
                    start = None;
                }
            }
        } else {
            if start.is_none() {
                start = Some(i);
            }
            space_count = 0;
        }
    }

    if let Some(s) = start {
        segments.push(&line[s..]);
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_by_whitespace_gaps() {
        let segments = split_by_whitespace_gaps("CF410A   HP 410A Black Toner    2    $89.99");
        assert_eq!(segments, vec!["CF410A", "HP 410A Black Toner", "2", "$89.99"]);
    }

    #[test]
    fn test_split_with_multibyte_whitespace() {
        let segments = split_by_whitespace_gaps("CF410A\u{a0} HP Toner  2");
        assert_eq!(segments, vec!["CF410A", "HP Toner", "2"]);
        let table = layout_text_to_table("CF410A\u{a0}\u{a0}Toner\u{2003} 2\n");
        assert_eq!(table.cell(0, 0), "CF410A");
        assert_eq!(table.cell(0, 1), "Toner");
        assert_eq!(table.cell(0, 2), "2");
    }

    #[test]
    fn test_layout_text_to_table() {
        let text = "Purchase history\n\nItem #   Description      Qty\nCF410A   Toner black      2\x0cCF411A   Toner cyan   1\n";
        let table = layout_text_to_table(text);
        assert_eq!(table.cell(2, 1), "Description");
        assert_eq!(table.cell(3, 0), "CF410A");
        assert!(table.rows[1].is_empty());
        assert!(table.rows.iter().any(|r| r.first().map(String::as_str) == Some("CF411A")));
    }
}
