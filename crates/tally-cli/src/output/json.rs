use serde::Serialize;
use tally_core::error::TallyError;

pub fn print<T: Serialize>(value: &T) -> Result<(), TallyError> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}
