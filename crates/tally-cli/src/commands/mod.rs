pub mod analyze;
pub mod catalog;
pub mod config;
pub mod parse;
