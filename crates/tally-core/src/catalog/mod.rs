pub mod embedding;
pub mod schema;
pub mod search;

use crate::error::TallyError;
use crate::parsing::normalize::{normalize_identifier, strip_vendor_prefix};
use rust_decimal::Decimal;
use schema::{CatalogDef, CatalogEntry};
use search::FullTextIndex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// A catalog entry with a tier-specific score (coverage, relevance or
/// similarity, depending on who produced it).
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: Arc<CatalogEntry>,
    pub score: f64,
}

/// An identifier lookup hit and the namespace it was found under.
#[derive(Debug, Clone)]
pub struct IdentifierHit {
    pub entry: Arc<CatalogEntry>,
    pub namespace: String,
    pub value: String,
    /// The catalog value only matched after its vendor prefix was removed.
    pub catalog_prefix_stripped: bool,
}

/// Read-only access to the product catalog.
///
/// Errors mean the catalog itself is unreachable and fail the whole job;
/// "not found" is an empty result.
pub trait CatalogLookup: Send + Sync {
    fn primary_namespace(&self) -> &str;

    fn entry(&self, id: &str) -> Result<Option<Arc<CatalogEntry>>, TallyError>;

    /// Case-insensitive exact identifier match in any namespace. Primary
    /// namespace hits come first, then lower entry ids.
    fn exact_identifier(&self, value: &str) -> Result<Vec<IdentifierHit>, TallyError>;

    /// Match on the normalized form (see `normalize_identifier`), including
    /// catalog values whose vendor prefix had to be stripped.
    fn normalized_identifier(&self, normalized: &str) -> Result<Vec<IdentifierHit>, TallyError>;

    /// Entries whose name contains the query or is contained in it, scored
    /// by length coverage (shorter / longer), best first.
    fn substring_name(&self, query: &str) -> Result<Vec<ScoredEntry>, TallyError>;

    /// Full-text ranking with relevance in [0, 1], best first.
    fn full_text(
        &self,
        query: &str,
        min_relevance: f64,
        limit: usize,
    ) -> Result<Vec<ScoredEntry>, TallyError>;

    fn family_members(&self, family: &str) -> Result<Vec<Arc<CatalogEntry>>, TallyError>;
}

/// Load a catalog from a JSON file.
pub fn load_catalog(path: &Path) -> Result<CatalogDef, TallyError> {
    let content = std::fs::read_to_string(path).map_err(|e| TallyError::CatalogLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_catalog(&content, path)
}

/// Parse a catalog from a JSON string.
pub fn parse_catalog(json: &str, source: &Path) -> Result<CatalogDef, TallyError> {
    let catalog: CatalogDef = serde_json::from_str(json).map_err(|e| TallyError::CatalogLoad {
        path: source.to_path_buf(),
        reason: e.to_string(),
    })?;
    validate_catalog(&catalog)?;
    Ok(catalog)
}

/// Parse a catalog from a JSON string (no file path context).
pub fn parse_catalog_str(json: &str) -> Result<CatalogDef, TallyError> {
    let catalog: CatalogDef = serde_json::from_str(json).map_err(TallyError::Json)?;
    validate_catalog(&catalog)?;
    Ok(catalog)
}

/// Validate that a catalog is well-formed.
pub fn validate_catalog(catalog: &CatalogDef) -> Result<(), TallyError> {
    if catalog.entries.is_empty() {
        return Err(TallyError::CatalogInvalid("entries must not be empty".into()));
    }
    if catalog.primary_namespace.trim().is_empty() {
        return Err(TallyError::CatalogInvalid(
            "primary_namespace must not be empty".into(),
        ));
    }

    let mut ids = HashSet::new();
    for entry in &catalog.entries {
        if entry.id.trim().is_empty() {
            return Err(TallyError::CatalogInvalid("entry id must not be empty".into()));
        }
        if !ids.insert(entry.id.as_str()) {
            return Err(TallyError::CatalogInvalid(format!(
                "duplicate entry id '{}'",
                entry.id
            )));
        }
        if entry.sku.trim().is_empty() {
            return Err(TallyError::CatalogInvalid(format!(
                "entry '{}' has an empty sku",
                entry.id
            )));
        }
        if entry.name.trim().is_empty() {
            return Err(TallyError::CatalogInvalid(format!(
                "entry '{}' has an empty name",
                entry.id
            )));
        }
        if entry.pack_quantity == 0 {
            return Err(TallyError::CatalogInvalid(format!(
                "entry '{}' has pack_quantity 0 (must be at least 1)",
                entry.id
            )));
        }
        if entry.page_yield == Some(0) {
            return Err(TallyError::CatalogInvalid(format!(
                "entry '{}' has page_yield 0",
                entry.id
            )));
        }
        for (field, value) in [
            ("price", entry.price),
            ("list_price", entry.list_price),
            ("cost", entry.cost),
        ] {
            if value.is_some_and(|v| v < Decimal::ZERO) {
                return Err(TallyError::CatalogInvalid(format!(
                    "entry '{}' has a negative {}",
                    entry.id, field
                )));
            }
        }
    }

    Ok(())
}

fn collapse_lower(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Catalog held in memory with prebuilt identifier, family and
/// full-text indexes.
pub struct InMemoryCatalog {
    name: String,
    version: String,
    primary_namespace: String,
    entries: Vec<Arc<CatalogEntry>>,
    by_id: HashMap<String, usize>,
    exact: HashMap<String, Vec<(usize, String)>>,
    normalized: HashMap<String, Vec<(usize, String, bool)>>,
    families: BTreeMap<String, Vec<usize>>,
    names: Vec<String>,
    full_text: FullTextIndex,
}

impl InMemoryCatalog {
    pub fn new(def: CatalogDef) -> Self {
        let primary_namespace = def.primary_namespace;
        let entries: Vec<Arc<CatalogEntry>> = def.entries.into_iter().map(Arc::new).collect();

        let mut by_id = HashMap::new();
        let mut exact: HashMap<String, Vec<(usize, String)>> = HashMap::new();
        let mut normalized: HashMap<String, Vec<(usize, String, bool)>> = HashMap::new();
        let mut families: BTreeMap<String, Vec<usize>> = BTreeMap::new();

        for (idx, entry) in entries.iter().enumerate() {
            by_id.insert(entry.id.clone(), idx);
            for (ns, value) in entry.identifiers(&primary_namespace) {
                exact
                    .entry(value.trim().to_uppercase())
                    .or_default()
                    .push((idx, ns.to_string()));
                let norm = normalize_identifier(value);
                if norm.is_empty() {
                    continue;
                }
                if let Some(stripped) = strip_vendor_prefix(&norm) {
                    normalized
                        .entry(stripped)
                        .or_default()
                        .push((idx, ns.to_string(), true));
                }
                normalized
                    .entry(norm)
                    .or_default()
                    .push((idx, ns.to_string(), false));
            }
            if let Some(family) = &entry.family {
                families
                    .entry(family.trim().to_lowercase())
                    .or_default()
                    .push(idx);
            }
        }

        let names = entries.iter().map(|e| collapse_lower(&e.name)).collect();
        let full_text = FullTextIndex::build(entries.iter().map(|e| e.as_ref()), &primary_namespace);

        InMemoryCatalog {
            name: def.name,
            version: def.version,
            primary_namespace,
            entries,
            by_id,
            exact,
            normalized,
            families,
            names,
            full_text,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn entries(&self) -> &[Arc<CatalogEntry>] {
        &self.entries
    }

    fn sort_hits(&self, hits: &mut [IdentifierHit]) {
        hits.sort_by(|a, b| {
            a.catalog_prefix_stripped
                .cmp(&b.catalog_prefix_stripped)
                .then_with(|| {
                    (b.namespace == self.primary_namespace)
                        .cmp(&(a.namespace == self.primary_namespace))
                })
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
    }
}

impl CatalogLookup for InMemoryCatalog {
    fn primary_namespace(&self) -> &str {
        &self.primary_namespace
    }

    fn entry(&self, id: &str) -> Result<Option<Arc<CatalogEntry>>, TallyError> {
        Ok(self.by_id.get(id).map(|i| Arc::clone(&self.entries[*i])))
    }

    fn exact_identifier(&self, value: &str) -> Result<Vec<IdentifierHit>, TallyError> {
        let key = value.trim().to_uppercase();
        let mut hits: Vec<IdentifierHit> = self
            .exact
            .get(&key)
            .into_iter()
            .flatten()
            .map(|(idx, ns)| IdentifierHit {
                entry: Arc::clone(&self.entries[*idx]),
                namespace: ns.clone(),
                value: key.clone(),
                catalog_prefix_stripped: false,
            })
            .collect();
        self.sort_hits(&mut hits);
        Ok(hits)
    }

    fn normalized_identifier(&self, normalized: &str) -> Result<Vec<IdentifierHit>, TallyError> {
        let mut hits: Vec<IdentifierHit> = self
            .normalized
            .get(normalized)
            .into_iter()
            .flatten()
            .map(|(idx, ns, stripped)| IdentifierHit {
                entry: Arc::clone(&self.entries[*idx]),
                namespace: ns.clone(),
                value: normalized.to_string(),
                catalog_prefix_stripped: *stripped,
            })
            .collect();
        self.sort_hits(&mut hits);
        Ok(hits)
    }

    fn substring_name(&self, query: &str) -> Result<Vec<ScoredEntry>, TallyError> {
        let query = collapse_lower(query);
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let q_len = query.chars().count();
        let mut hits: Vec<ScoredEntry> = self
            .names
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.is_empty())
            .filter(|(_, name)| name.contains(&query) || query.contains(name.as_str()))
            .map(|(idx, name)| {
                let n_len = name.chars().count();
                let coverage = q_len.min(n_len) as f64 / q_len.max(n_len) as f64;
                ScoredEntry {
                    entry: Arc::clone(&self.entries[idx]),
                    score: coverage,
                }
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        Ok(hits)
    }

    fn full_text(
        &self,
        query: &str,
        min_relevance: f64,
        limit: usize,
    ) -> Result<Vec<ScoredEntry>, TallyError> {
        let mut hits: Vec<ScoredEntry> = self
            .full_text
            .search(query, min_relevance)
            .into_iter()
            .map(|(idx, score)| ScoredEntry {
                entry: Arc::clone(&self.entries[idx]),
                score,
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    fn family_members(&self, family: &str) -> Result<Vec<Arc<CatalogEntry>>, TallyError> {
        Ok(self
            .families
            .get(&family.trim().to_lowercase())
            .into_iter()
            .flatten()
            .map(|i| Arc::clone(&self.entries[*i]))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "name": "Test",
        "version": "1",
        "primary_namespace": "stock",
        "entries": [
            { "id": "e2", "sku": "CF410A", "name": "HP 410A Black Toner", "family": "hp-410" },
            { "id": "e1", "sku": "100234", "alternate_skus": { "oem": "CF410A", "wholesaler": "HEWCF410A" },
              "name": "HP 410A Black Toner (Remanufactured)", "family": "HP-410" },
            { "id": "e3", "sku": "8280B001", "name": "CANON CL-246 C/M/Y COLOR INK" }
        ]
    }"#;

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::new(parse_catalog_str(CATALOG).unwrap())
    }

    #[test]
    fn test_parse_valid_catalog() {
        let def = parse_catalog_str(CATALOG).unwrap();
        assert_eq!(def.entries.len(), 3);
        assert_eq!(def.primary_namespace, "stock");
    }

    #[test]
    fn test_empty_entries_rejected() {
        let json = r#"{ "name": "Bad", "version": "1", "entries": [] }"#;
        assert!(matches!(parse_catalog_str(json), Err(TallyError::CatalogInvalid(_))));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let json = r#"{ "name": "Bad", "version": "1", "entries": [
            { "id": "a", "sku": "1", "name": "x" },
            { "id": "a", "sku": "2", "name": "y" }
        ] }"#;
        assert!(parse_catalog_str(json).is_err());
    }

    #[test]
    fn test_zero_pack_and_negative_price_rejected() {
        let zero_pack = r#"{ "name": "Bad", "version": "1", "entries": [
            { "id": "a", "sku": "1", "name": "x", "pack_quantity": 0 }
        ] }"#;
        assert!(parse_catalog_str(zero_pack).is_err());
        let negative = r#"{ "name": "Bad", "version": "1", "entries": [
            { "id": "a", "sku": "1", "name": "x", "price": "-1.00" }
        ] }"#;
        assert!(parse_catalog_str(negative).is_err());
    }

    #[test]
    fn test_exact_prefers_primary_namespace() {
        let hits = catalog().exact_identifier("cf410a").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entry.id, "e2");
        assert_eq!(hits[0].namespace, "stock");
        assert_eq!(hits[1].namespace, "oem");
    }

    #[test]
    fn test_normalized_lookup_marks_stripped_catalog_values() {
        let hits = catalog().normalized_identifier("CF410A").unwrap();
        assert!(!hits[0].catalog_prefix_stripped);
        let stripped: Vec<_> = hits.iter().filter(|h| h.catalog_prefix_stripped).collect();
        assert_eq!(stripped.len(), 1);
        assert_eq!(stripped[0].namespace, "wholesaler");
    }

    #[test]
    fn test_substring_both_directions() {
        let c = catalog();
        let hits = c.substring_name("canon cl-246 c/m/y color ink").unwrap();
        assert_eq!(hits[0].entry.id, "e3");
        assert!((hits[0].score - 1.0).abs() < 1e-9);

        let hits = c.substring_name("HP 410A Black Toner").unwrap();
        assert_eq!(hits[0].entry.id, "e2");
        assert_eq!(hits.len(), 2);
        assert!(hits[1].score < 1.0);
    }

    #[test]
    fn test_family_members_case_insensitive() {
        assert_eq!(catalog().family_members("HP-410").unwrap().len(), 2);
        assert!(catalog().family_members("none").unwrap().is_empty());
    }

    #[test]
    fn test_entry_by_id() {
        assert!(catalog().entry("e3").unwrap().is_some());
        assert!(catalog().entry("zz").unwrap().is_none());
    }
}
