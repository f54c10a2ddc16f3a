use tally_core::classify::{LineRecord, Outcome};
use tally_core::parsing::ParsedTable;
use tally_core::AnalysisReport;

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

pub fn print_parsed(parsed: &ParsedTable) {
    let s = &parsed.structure;
    match s.header_row_index {
        Some(i) => println!("Header: row {i}"),
        None => println!("Header: none; columns inferred by position"),
    }
    for (col, role) in s.roles.iter().enumerate() {
        println!("  column {col:<3} {role}");
    }
    for r in &s.revisions {
        println!("  column {} revised {} -> {}: {}", r.column, r.from, r.to, r.reason);
    }
    println!();

    println!(
        "  {:<5} {:<16} {:<40} {:>8} {:>10} {:>5}",
        "Row", "Identifier", "Description", "Qty", "Price", "Conf"
    );
    for item in &parsed.items {
        let id = item.identifiers.first().map(|i| i.value.as_str()).unwrap_or("-");
        let price = if item.has_price() {
            item.unit_price.to_string()
        } else {
            "-".into()
        };
        println!(
            "  {:<5} {:<16} {:<40} {:>8} {:>10} {:>5.2}",
            item.source_row_index,
            truncate(id, 16),
            truncate(&item.description, 40),
            item.quantity,
            price,
            item.extraction_confidence
        );
    }
    println!();
    println!(
        "  {} item(s) from {} row(s), {} skipped",
        parsed.items.len(),
        parsed.rows_considered,
        parsed.skipped.len()
    );
}

fn print_record(record: &LineRecord) {
    let matched = match (&record.matched_entry_id, &record.matched_name) {
        (Some(id), Some(name)) => format!("{id} {name}"),
        (Some(id), None) => id.clone(),
        _ => "-".into(),
    };
    let detail = match &record.opportunity {
        Some(o) => format!(
            "{:?} -> {} ({} x {}), save {}",
            o.kind, o.entry_id, o.units, o.entry_name, o.savings
        ),
        None => match record.price.current_total {
            Some(total) => format!("spend {}", total.round_dp(2)),
            None => "price unavailable".into(),
        },
    };
    println!(
        "  {:<5} {:<30} {:<34} {:<9} {:.2}  {}",
        record.source_row_index,
        truncate(&record.description, 30),
        truncate(&matched, 34),
        record.match_method.to_string(),
        record.match_score,
        detail
    );
}

pub fn print_report(report: &AnalysisReport, verbose: bool) {
    let s = &report.summary;
    println!(
        "=== Savings ({} of {} item(s) processed, {:?}) ===\n",
        report.progress.processed, report.progress.total, report.state
    );

    for (outcome, totals) in &s.outcomes {
        println!(
            "  {:<16} {:>5} item(s)  {:>5} unique",
            outcome.to_string(),
            totals.items,
            totals.unique_items
        );
        if verbose {
            for (basis, split) in &totals.by_basis {
                println!(
                    "    {:<14} {:>5} item(s)  savings {}",
                    format!("{basis:?}"),
                    split.items,
                    split.savings
                );
            }
        }
    }
    println!();
    println!("  Current cost (optimizable):   {}", s.current_cost);
    println!("  Optimized cost:               {}", s.optimized_cost);
    println!(
        "  Savings:                      {} ({:.1}%)",
        s.savings,
        s.savings_rate * 100.0
    );
    println!("  Annual savings:               {}", s.annual_savings);
    println!("  Total spend (all priced):     {}", s.total_current_spend);
    println!();

    let shown: Vec<&LineRecord> = report
        .records
        .iter()
        .filter(|r| verbose || r.outcome == Outcome::Optimizable)
        .collect();
    if !shown.is_empty() {
        println!(
            "  {:<5} {:<30} {:<34} {:<9} {:<5} Detail",
            "Row", "Description", "Match", "Method", "Score"
        );
        for record in shown {
            print_record(record);
        }
        println!();
    }

    if !report.quality.flags.is_empty() {
        let label = if report.quality.is_low_quality() {
            "Quality warnings"
        } else {
            "Notes"
        };
        println!("  {label}:");
        for flag in &report.quality.flags {
            println!("    - {flag}");
        }
        println!();
    }

    if verbose {
        for entry in &report.trace.entries {
            println!("  Row {} ({})", entry.source_row_index, entry.input_key);
            for step in &entry.steps {
                println!("    {:?}: {}", step.step_type, step.message);
            }
        }
        for w in &report.trace.warnings {
            match w.source_row_index {
                Some(row) => println!("  warning (row {row}): {}", w.message),
                None => println!("  warning: {}", w.message),
            }
        }
    }
}
