//! Token-based full-text ranking over catalog entries.

use crate::catalog::schema::CatalogEntry;
use crate::parsing::normalize::normalize_identifier;
use std::collections::{BTreeSet, HashMap};

const STOPWORDS: &[&str] = &["the", "and", "for", "with", "of", "a", "an", "in", "to"];

/// Weight of a query token found only outside the entry name.
pub const SECONDARY_FIELD_WEIGHT: f64 = 0.6;

/// Lowercase alphanumeric tokens of two or more characters.
///
/// Splits on every non-alphanumeric character, so "C/M/Y" yields nothing
/// and "CL-246" yields `cl` and `246`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

struct Document {
    /// Name and identifier tokens.
    primary: BTreeSet<String>,
    /// Description, brand, category and color tokens.
    secondary: BTreeSet<String>,
}

/// Inverted index with a weighted-coverage relevance score in [0, 1].
pub struct FullTextIndex {
    docs: Vec<Document>,
    postings: HashMap<String, Vec<usize>>,
}

impl FullTextIndex {
    pub fn build<'a>(entries: impl IntoIterator<Item = &'a CatalogEntry>, primary_ns: &str) -> Self {
        let mut docs = Vec::new();
        let mut postings: HashMap<String, Vec<usize>> = HashMap::new();

        for (idx, entry) in entries.into_iter().enumerate() {
            let mut primary: BTreeSet<String> = tokenize(&entry.name).into_iter().collect();
            for (_, value) in entry.identifiers(primary_ns) {
                primary.extend(tokenize(value));
                let normalized = normalize_identifier(value).to_lowercase();
                if normalized.len() >= 2 {
                    primary.insert(normalized);
                }
            }
            let secondary: BTreeSet<String> = [
                entry.description.as_deref(),
                entry.brand.as_deref(),
                entry.category.as_deref(),
                entry.color.as_deref(),
            ]
            .into_iter()
            .flatten()
            .flat_map(tokenize)
            .filter(|t| !primary.contains(t))
            .collect();

            for token in primary.iter().chain(secondary.iter()) {
                postings.entry(token.clone()).or_default().push(idx);
            }
            docs.push(Document { primary, secondary });
        }

        FullTextIndex { docs, postings }
    }

    /// Rank documents for a query. Returns (document index, relevance)
    /// for every document with relevance >= `min_relevance`, best first;
    /// ties keep document order.
    pub fn search(&self, query: &str, min_relevance: f64) -> Vec<(usize, f64)> {
        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();
        if terms.is_empty() {
            return Vec::new();
        }

        let candidates: BTreeSet<usize> = terms
            .iter()
            .filter_map(|t| self.postings.get(t))
            .flatten()
            .copied()
            .collect();

        let mut ranked: Vec<(usize, f64)> = candidates
            .into_iter()
            .map(|idx| (idx, self.relevance(idx, &terms)))
            .filter(|(_, rel)| *rel >= min_relevance)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
    }

    fn relevance(&self, idx: usize, terms: &[String]) -> f64 {
        let doc = &self.docs[idx];
        let matched: f64 = terms
            .iter()
            .map(|t| {
                if doc.primary.contains(t) {
                    1.0
                } else if doc.secondary.contains(t) {
                    SECONDARY_FIELD_WEIGHT
                } else {
                    0.0
                }
            })
            .sum();
        matched / terms.len() as f64
    }
}
