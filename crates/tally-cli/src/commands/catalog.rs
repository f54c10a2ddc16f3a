use std::collections::BTreeSet;
use std::path::Path;
use tally_core::catalog::load_catalog;
use tally_core::error::TallyError;

pub fn schema() -> Result<(), TallyError> {
    println!(
        r#"Catalog JSON format

A catalog is a JSON object with the following fields:

  name               (string, required)  Catalog name
  version            (string, required)  Catalog version
  primary_namespace  (string, optional)  Namespace of the "sku" field (default "primary")
  entries            (array, required)   Products

Each entry:

  id                 (string, required)  Unique entry id
  sku                (string, required)  Identifier in the primary namespace
  alternate_skus     (object, optional)  Namespace -> identifier (OEM, wholesaler, ...)
  name               (string, required)  Product name
  description        (string, optional)
  brand, category    (string, optional)  Alternatives must share both
  color              (string, optional)  Alternatives must share it
  family             (string, optional)  Compatibility group; alternatives come from here
  page_yield         (integer, optional) Rated pages per single unit
  yield_class        (string, optional)  "standard", "high" or "extra_high"
  unit_of_measure    (string, optional)  "each", "box", "case", "pack", ... (default "each")
  pack_quantity      (integer, optional) Singles per unit of measure (default 1)
  price              (string, optional)  Selling price per unit of measure
  list_price         (string, optional)  List price per unit of measure
  cost               (string, optional)  Cost per unit of measure
  embedding          (array, optional)   Precomputed vector for semantic search

Example:

{{
  "name": "Office supplies",
  "version": "2024.1",
  "primary_namespace": "stock",
  "entries": [
    {{
      "id": "e1",
      "sku": "100234",
      "alternate_skus": {{ "oem": "CF410A" }},
      "name": "HP 410A Black Toner",
      "brand": "HP",
      "category": "Toner",
      "color": "Black",
      "family": "hp-410",
      "page_yield": 2300,
      "yield_class": "standard",
      "price": "89.99"
    }}
  ]
}}

Note: prices must be quoted strings, not bare numbers, to preserve exact
decimal precision (e.g., "89.99" not 89.99).
"#
    );
    Ok(())
}

pub fn validate(file: &Path) -> Result<(), TallyError> {
    let catalog = load_catalog(file)?;

    let namespaces: BTreeSet<&str> = std::iter::once(catalog.primary_namespace.as_str())
        .chain(
            catalog
                .entries
                .iter()
                .flat_map(|e| e.alternate_skus.keys().map(String::as_str)),
        )
        .collect();
    let families: BTreeSet<&str> = catalog
        .entries
        .iter()
        .filter_map(|e| e.family.as_deref())
        .collect();

    println!("Catalog '{}' (v{}) is valid.", catalog.name, catalog.version);
    println!("  Entries: {}", catalog.entries.len());
    println!("  Namespaces: {}", namespaces.into_iter().collect::<Vec<_>>().join(", "));
    println!("  Families: {}", families.len());

    // Potential issues (warnings, not errors)
    let mut warnings = Vec::new();
    for entry in &catalog.entries {
        if entry.family.is_some() && entry.page_yield.is_none() {
            warnings.push(format!(
                "entry '{}' has a family but no page_yield; it cannot take part in yield swaps",
                entry.id
            ));
        }
        if entry.price.is_none() && entry.list_price.is_none() && entry.cost.is_none() {
            warnings.push(format!("entry '{}' has no price, list_price or cost", entry.id));
        }
    }

    if !warnings.is_empty() {
        println!("\nWarnings:");
        for w in &warnings {
            println!("  - {w}");
        }
    }

    Ok(())
}
