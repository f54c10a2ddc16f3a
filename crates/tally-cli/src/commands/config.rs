use std::path::Path;
use tally_core::config::{load_config, EngineConfig};
use tally_core::error::TallyError;

use crate::output;

pub fn show(path: Option<&Path>) -> Result<(), TallyError> {
    let config = match path {
        Some(p) => load_config(p)?,
        None => EngineConfig::default(),
    };
    output::json::print(&config)
}
