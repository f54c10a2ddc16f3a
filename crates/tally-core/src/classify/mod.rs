//! Outcome categorization and running savings totals.

pub mod aggregator;
pub mod outcome;

pub use aggregator::{Aggregator, SavingsSummary};
pub use outcome::{categorize, LineRecord, Outcome};
