use std::path::PathBuf;
use tally_core::error::TallyError;

use crate::output;

pub fn run(
    input_file: PathBuf,
    output_format: &str,
    output_file: Option<PathBuf>,
) -> Result<(), TallyError> {
    let parsed = tally_core::parse_file(&input_file)?;

    match output_file {
        Some(path) => {
            // Always write JSON when saving to file
            let json = serde_json::to_string_pretty(&parsed)?;
            std::fs::write(&path, json)?;
            eprintln!(
                "Parsed {} item(s), written to {}",
                parsed.items.len(),
                path.display()
            );
            for w in &parsed.warnings {
                eprintln!("  warning: {w}");
            }
            if !parsed.skipped.is_empty() {
                eprintln!("  {} row(s) skipped during parsing", parsed.skipped.len());
            }
        }
        None => match output_format {
            "json" => output::json::print(&parsed)?,
            _ => output::table::print_parsed(&parsed),
        },
    }

    Ok(())
}
