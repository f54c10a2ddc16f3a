//! End-to-end tests for the analyze() pipeline.
//!
//! Uses a MockReader that returns a pre-built RawTable, so no document
//! backend is involved.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tally_core::analyze;
use tally_core::batch::{CancelFlag, Checkpoint, Engine, JobState};
use tally_core::catalog::embedding::SemanticSearch;
use tally_core::catalog::{parse_catalog_str, InMemoryCatalog, ScoredEntry};
use tally_core::classify::Outcome;
use tally_core::config::EngineConfig;
use tally_core::error::{TallyError, TierError};
use tally_core::extraction::TableReader;
use tally_core::matching::{MatchContext, Resolver, TierName};
use tally_core::model::RawTable;
use tally_core::optimize::OptionKind;
use tally_core::pricing::PriceSource;
use tally_core::trace::TraceStepType;

struct MockReader {
    rows: Vec<Vec<String>>,
}

impl MockReader {
    fn new(rows: &[&[&str]]) -> Self {
        MockReader {
            rows: RawTable::from_rows(rows).rows,
        }
    }
}

impl TableReader for MockReader {
    fn read_table(&self, _bytes: &[u8]) -> Result<RawTable, TallyError> {
        Ok(RawTable::new(self.rows.clone()))
    }

    fn backend_name(&self) -> &str {
        "mock"
    }
}

struct DownSemantic;

impl SemanticSearch for DownSemantic {
    fn search(
        &self,
        _query: &str,
        _limit: usize,
        _timeout: Duration,
    ) -> Result<Vec<ScoredEntry>, TierError> {
        Err(TierError::Unavailable("connection refused".into()))
    }
}

const CATALOG: &str = r#"{
    "name": "Office supplies",
    "version": "2024.1",
    "primary_namespace": "stock",
    "entries": [
        { "id": "e1", "sku": "CF410A", "alternate_skus": { "oem": "HEWCF410A" },
          "name": "HP 410A Black Toner", "brand": "HP", "category": "Toner",
          "color": "Black", "family": "hp-410", "page_yield": 300,
          "yield_class": "standard", "price": "60.00" },
        { "id": "e2", "sku": "CF410X", "name": "HP 410X Black Toner High Yield",
          "brand": "HP", "category": "Toner", "color": "Black", "family": "hp-410",
          "page_yield": 600, "yield_class": "high", "price": "90.00" },
        { "id": "e3", "sku": "CF410Z", "name": "HP 410Z Black Toner Jumbo",
          "brand": "HP", "category": "Toner", "color": "Black", "family": "hp-410",
          "page_yield": 3000, "yield_class": "extra_high", "price": "200.00" },
        { "id": "e4", "sku": "8280B001", "name": "CANON CL-246 C/M/Y COLOR INK",
          "brand": "Canon", "category": "Ink", "list_price": "45.99", "price": "38.00" }
    ]
}"#;

fn engine(config: EngineConfig) -> Engine {
    let catalog = InMemoryCatalog::new(parse_catalog_str(CATALOG).unwrap());
    Engine::new(Arc::new(catalog), config)
}

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.matching.retry.initial_backoff_ms = 0;
    config
}

// ---------------------------------------------------------------------------
// Higher-yield swap accepted, extreme yield jump rejected
// ---------------------------------------------------------------------------
#[test]
fn higher_yield_swap_accepted() {
    let reader = MockReader::new(&[
        &["Item #", "Description", "Qty", "Unit Price"],
        &["CF410A", "HP 410A black toner", "10", "$60.00"],
        &["Q9999", "Stapler desktop", "2", "$15.00"],
    ]);
    let report = analyze(&[], &reader, &engine(fast_config())).unwrap();

    assert_eq!(report.state, JobState::Completed);
    assert_eq!(report.structure.header_row_index, Some(0));
    assert_eq!(report.records.len(), 2);

    let toner = &report.records[0];
    assert_eq!(toner.outcome, Outcome::Optimizable);
    assert_eq!(toner.match_method, TierName::Exact);
    assert_eq!(toner.match_score, 1.0);
    let opportunity = toner.opportunity.as_ref().unwrap();
    assert_eq!(opportunity.kind, OptionKind::HigherYield);
    assert_eq!(opportunity.entry_id, "e2");
    assert_eq!(opportunity.savings, dec!(150.00));

    let trace = &report.trace.entries[0];
    assert!(trace
        .steps
        .iter()
        .any(|s| s.step_type == TraceStepType::GuardrailRejection && s.message.contains("e3")));

    assert_eq!(report.records[1].outcome, Outcome::Unresolved);
}

#[test]
fn optimizable_total_is_sum_of_item_savings() {
    let reader = MockReader::new(&[
        &["Item #", "Description", "Qty", "Unit Price"],
        &["CF410A", "HP 410A black toner", "10", "$60.00"],
        &["HEWCF410A", "HP 410A black toner", "4", "$65.00"],
        &["CF410X", "HP 410X black toner", "2", "$90.00"],
    ]);
    let report = analyze(&[], &reader, &engine(fast_config())).unwrap();

    let item_savings: Decimal = report
        .records
        .iter()
        .filter_map(|r| r.opportunity.as_ref())
        .map(|o| {
            assert!(o.savings > Decimal::ZERO);
            o.savings
        })
        .sum();
    assert_eq!(report.summary.savings, item_savings);

    // Two input SKUs, one catalog product: still two unique items.
    let optimizable = &report.summary.outcomes[&Outcome::Optimizable];
    assert_eq!(optimizable.unique_items, 2);
    assert_eq!(report.records[1].basis, tally_core::matching::IdentifierBasis::Secondary);
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------
#[test]
fn slash_description_resolves_by_substring() {
    let reader = MockReader::new(&[
        &["Description", "Qty", "Price"],
        &["CANON CL-246 C/M/Y COLOR INK", "2", "$30.00"],
    ]);
    let report = analyze(&[], &reader, &engine(fast_config())).unwrap();
    let record = &report.records[0];
    assert_eq!(record.match_method, TierName::Substring);
    assert_eq!(record.matched_entry_id.as_deref(), Some("e4"));
}

#[test]
fn order_quantity_with_thousands_separator() {
    let reader = MockReader::new(&[
        &["Item #", "Description", "Order Quantity", "Price"],
        &["CF410A", "HP 410A black toner", "1,549", "$60.00"],
    ]);
    let report = analyze(&[], &reader, &engine(fast_config())).unwrap();
    assert_eq!(report.records[0].quantity, 1549);
    assert_eq!(report.records[0].price.quantity_in_each, 1549);
}

#[test]
fn missing_price_falls_back_to_list_price() {
    let reader = MockReader::new(&[
        &["Item #", "Description", "Qty"],
        &["8280B001", "Canon color ink", "3"],
    ]);
    let report = analyze(&[], &reader, &engine(fast_config())).unwrap();
    let price = &report.records[0].price;
    assert_eq!(price.source, PriceSource::CatalogListPrice);
    assert_eq!(price.unit_price, Some(dec!(45.99)));
    assert_eq!(price.price_per_each, Some(dec!(45.99)));
    assert_eq!(report.records[0].outcome, Outcome::NoOpportunity);
    assert!(report.quality.is_low_quality());
}

#[test]
fn sparse_header_is_not_counted_as_data() {
    let reader = MockReader::new(&[
        &["", "Description", "", "", "Qty", ""],
        &["CF410A", "HP 410A black toner", "", "", "2", "$60.00"],
        &["CF410X", "HP 410X black toner", "", "", "1", "$90.00"],
    ]);
    let report = analyze(&[], &reader, &engine(fast_config())).unwrap();
    assert_eq!(report.structure.header_row_index, Some(0));
    assert_eq!(report.records.len(), 2);
    assert!(report.records.iter().all(|r| r.source_row_index > 0));
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------
#[test]
fn unresolvable_structure_fails_the_job() {
    let reader = MockReader::new(&[&["", ""], &["", ""]]);
    assert!(matches!(
        analyze(&[], &reader, &engine(fast_config())),
        Err(TallyError::StructureUnresolved(_))
    ));
}

#[test]
fn semantic_outage_degrades_to_unresolved() {
    let reader = MockReader::new(&[
        &["Description", "Qty", "Price"],
        &["Stapler desktop", "1", "$12.00"],
    ]);
    let engine = engine(fast_config()).with_semantic(Arc::new(DownSemantic));
    let report = analyze(&[], &reader, &engine).unwrap();

    assert_eq!(report.records[0].outcome, Outcome::Unresolved);
    assert!(report
        .trace
        .warnings
        .iter()
        .any(|w| w.message.contains("semantic") && w.message.contains("connection refused")));
}

// ---------------------------------------------------------------------------
// Determinism and resume
// ---------------------------------------------------------------------------
#[test]
fn resolver_is_idempotent() {
    let reader = MockReader::new(&[
        &["Item #", "Description", "Qty", "Price"],
        &["cf-410a", "HP 410A black toner", "1", "$60.00"],
        &["", "HP black toner", "1", "$60.00"],
    ]);
    let parsed = tally_core::parse_document(&[], &reader).unwrap();
    let catalog = InMemoryCatalog::new(parse_catalog_str(CATALOG).unwrap());
    let config = fast_config();
    let ctx = MatchContext::new(&catalog, &config.matching);
    let resolver = Resolver::standard();

    for item in &parsed.items {
        let first = serde_json::to_value(resolver.resolve(item, &ctx).unwrap()).unwrap();
        let second = serde_json::to_value(resolver.resolve(item, &ctx).unwrap()).unwrap();
        assert_eq!(first, second);
    }
}

#[test]
fn chunked_resume_matches_single_pass() {
    let reader = MockReader::new(&[
        &["Item #", "Description", "Qty", "Unit Price"],
        &["CF410A", "HP 410A black toner", "10", "$60.00"],
        &["HEWCF410A", "HP 410A black toner", "4", "$65.00"],
        &["Q9999", "Stapler desktop", "2", "$15.00"],
        &["8280B001", "Canon ink", "3", "$44.00"],
        &["CF410X", "HP 410X black toner", "2", "$90.00"],
    ]);
    let parsed = tally_core::parse_document(&[], &reader).unwrap();

    let single = analyze(&[], &reader, &engine(fast_config())).unwrap();

    let mut config = fast_config();
    config.batch.chunk_size = 2;
    let chunked = engine(config);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkpoint.json");

    let mut checkpoint = Checkpoint::new(&parsed.items);
    chunked.run_chunk(&parsed.items, &mut checkpoint).unwrap();
    checkpoint.save(&path).unwrap();

    let mut resumed = Checkpoint::load(&path).unwrap();
    assert_eq!(resumed.cursor, 2);
    chunked
        .run(&parsed.items, &mut resumed, &CancelFlag::new())
        .unwrap();
    assert_eq!(resumed.state, JobState::Completed);

    let report = tally_core::build_report(&parsed, &resumed, &chunked.config().quality);
    assert_eq!(report.summary, single.summary);
    assert_eq!(report.records, single.records);
}
