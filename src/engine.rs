//! Serializable full-text index engine.
//!
//! The [`SerializableIndex`] trait is the seam between the index manager and
//! the ranking engine: anything that can build from a record set, serialize
//! to text, deserialize under the same build options, and answer scored
//! queries can be swapped in. The shipped implementation, [`Bm25Index`], is
//! an in-memory BM25 inverted index over the `title` and `text` fields with
//! prefix and edit-distance tolerant matching.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::ConversationRecord;

/// Index build or restore failure. Always non-fatal: callers fall back to a
/// rebuild, or to exact search if no index can be produced at all.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index serialization failed: {0}")]
    Serialize(String),

    #[error("index deserialization failed: {0}")]
    Deserialize(String),

    /// The serialized artifact was built with different options. Restoring
    /// it would silently change search behavior, so it is refused.
    #[error("index artifact was built with different options")]
    OptionsMismatch,
}

/// Options the index is built with. An artifact only restores under the
/// exact options it was built with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexOptions {
    /// Match query tokens as prefixes of indexed terms.
    pub prefix: bool,
    /// Maximum edit distance for fuzzy term matching; 0 disables it.
    pub max_edit_distance: u32,
    /// Score multiplier for matches in the `title` field.
    pub title_boost: f64,
    /// BM25 term-frequency saturation.
    pub k1: f64,
    /// BM25 length normalization.
    pub b: f64,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            prefix: true,
            max_edit_distance: 1,
            title_boost: 2.0,
            k1: 1.2,
            b: 0.75,
        }
    }
}

/// A scored hit carrying the stored fields of one record.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub id: String,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub score: f64,
}

/// Capability contract for a substitutable full-text engine.
pub trait SerializableIndex: Sized {
    /// Build a fresh index over the record set.
    fn build(records: &[ConversationRecord], options: &IndexOptions) -> Self;

    /// Serialize the whole index to text.
    fn serialize(&self) -> Result<String, IndexError>;

    /// Reconstruct an index from text. `options` must equal the options the
    /// artifact was built with, byte for byte, or the restore is refused.
    fn deserialize(text: &str, options: &IndexOptions) -> Result<Self, IndexError>;

    /// Run a query with the engine's default ranking, score descending.
    /// An empty or all-separator query returns no hits.
    fn query(&self, query: &str) -> Vec<IndexHit>;

    /// Number of indexed documents.
    fn doc_count(&self) -> usize;
}

/// Serialization format version; bump on any layout change so stale
/// artifacts fail deserialization and trigger a rebuild.
const SERIAL_FORMAT: u32 = 1;

/// Downweights applied to non-exact term matches.
const PREFIX_WEIGHT: f64 = 0.375;
const FUZZY_WEIGHT: f64 = 0.45;

/// Tokens shorter than this get no edit-distance tolerance; nearly every
/// short token is within one edit of another short token.
const MIN_FUZZY_TOKEN_LEN: usize = 4;

/// Stored fields for one indexed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDoc {
    id: String,
    title: String,
    created_at: i64,
    updated_at: i64,
    /// Token counts of the indexed fields: `[title, text]`.
    field_len: [u32; 2],
}

/// Posting lists for one term, per indexed field: `(doc ordinal, tf)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TermPostings {
    title: Vec<(u32, u32)>,
    text: Vec<(u32, u32)>,
    /// Number of distinct documents containing the term in any field.
    df: u32,
}

/// In-memory BM25 inverted index with text serialization.
#[derive(Debug, Serialize, Deserialize)]
pub struct Bm25Index {
    format: u32,
    options: IndexOptions,
    docs: Vec<StoredDoc>,
    /// Average token counts of the indexed fields: `[title, text]`.
    avg_field_len: [f64; 2],
    terms: BTreeMap<String, TermPostings>,
}

/// Lowercase and split on non-alphanumeric boundaries.
pub(crate) fn tokenize(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn term_frequencies(tokens: &[String]) -> BTreeMap<&str, u32> {
    let mut tf: BTreeMap<&str, u32> = BTreeMap::new();
    for token in tokens {
        *tf.entry(token.as_str()).or_insert(0) += 1;
    }
    tf
}

impl SerializableIndex for Bm25Index {
    fn build(records: &[ConversationRecord], options: &IndexOptions) -> Self {
        let mut docs: Vec<StoredDoc> = Vec::with_capacity(records.len());
        let mut terms: BTreeMap<String, TermPostings> = BTreeMap::new();

        for (ordinal, record) in records.iter().enumerate() {
            let ordinal = ordinal as u32;
            let title_tokens = tokenize(&record.title);
            let text_tokens = tokenize(&record.text);

            for (term, tf) in term_frequencies(&title_tokens) {
                let postings = terms.entry(term.to_string()).or_default();
                postings.title.push((ordinal, tf));
            }
            for (term, tf) in term_frequencies(&text_tokens) {
                let postings = terms.entry(term.to_string()).or_default();
                postings.text.push((ordinal, tf));
            }

            docs.push(StoredDoc {
                id: record.id.clone(),
                title: record.title.clone(),
                created_at: record.created_at,
                updated_at: record.updated_at,
                field_len: [title_tokens.len() as u32, text_tokens.len() as u32],
            });
        }

        // Document frequency counts each document once even when the term
        // occurs in both fields. Posting lists are in ordinal order, so a
        // linear merge is enough.
        for postings in terms.values_mut() {
            postings.df = merged_doc_count(&postings.title, &postings.text);
        }

        let n = docs.len().max(1) as f64;
        let avg_field_len = [
            docs.iter().map(|d| f64::from(d.field_len[0])).sum::<f64>() / n,
            docs.iter().map(|d| f64::from(d.field_len[1])).sum::<f64>() / n,
        ];

        Self {
            format: SERIAL_FORMAT,
            options: options.clone(),
            docs,
            avg_field_len,
            terms,
        }
    }

    fn serialize(&self) -> Result<String, IndexError> {
        serde_json::to_string(self).map_err(|e| IndexError::Serialize(e.to_string()))
    }

    fn deserialize(text: &str, options: &IndexOptions) -> Result<Self, IndexError> {
        let index: Bm25Index =
            serde_json::from_str(text).map_err(|e| IndexError::Deserialize(e.to_string()))?;
        if index.format != SERIAL_FORMAT {
            return Err(IndexError::Deserialize(format!(
                "unsupported index format version {}",
                index.format
            )));
        }
        if index.options != *options {
            return Err(IndexError::OptionsMismatch);
        }
        Ok(index)
    }

    fn query(&self, query: &str) -> Vec<IndexHit> {
        let tokens = tokenize(query);
        if tokens.is_empty() || self.docs.is_empty() {
            return Vec::new();
        }

        // Deterministic accumulation: BTreeMaps fix the iteration and
        // summation order, so the same query always yields identical scores.
        let mut doc_scores: BTreeMap<u32, f64> = BTreeMap::new();
        for token in &tokens {
            for (term, weight) in self.matching_terms(token) {
                self.score_term(&term, weight, &mut doc_scores);
            }
        }

        let mut hits: Vec<(u32, f64)> = doc_scores.into_iter().collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        hits.into_iter()
            .map(|(ordinal, score)| {
                let doc = &self.docs[ordinal as usize];
                IndexHit {
                    id: doc.id.clone(),
                    title: doc.title.clone(),
                    created_at: doc.created_at,
                    updated_at: doc.updated_at,
                    score,
                }
            })
            .collect()
    }

    fn doc_count(&self) -> usize {
        self.docs.len()
    }
}

impl Bm25Index {
    /// Collect index terms matching one query token: the exact term, prefix
    /// extensions, and terms within the edit-distance budget. A term matched
    /// several ways keeps its best weight.
    fn matching_terms(&self, token: &str) -> BTreeMap<String, f64> {
        let mut matches: BTreeMap<String, f64> = BTreeMap::new();

        if self.terms.contains_key(token) {
            matches.insert(token.to_string(), 1.0);
        }

        if self.options.prefix {
            for term in self
                .terms
                .range(token.to_string()..)
                .map(|(t, _)| t)
                .take_while(|t| t.starts_with(token))
            {
                matches
                    .entry(term.clone())
                    .and_modify(|w| *w = w.max(PREFIX_WEIGHT))
                    .or_insert(PREFIX_WEIGHT);
            }
        }

        if self.options.max_edit_distance > 0 && token.chars().count() >= MIN_FUZZY_TOKEN_LEN {
            let max = self.options.max_edit_distance;
            let token_len = token.chars().count();
            for term in self.terms.keys() {
                let term_len = term.chars().count();
                if term_len.abs_diff(token_len) > max as usize {
                    continue;
                }
                if matches.contains_key(term) {
                    continue;
                }
                if levenshtein(token, term) <= max as usize {
                    matches.insert(term.clone(), FUZZY_WEIGHT);
                }
            }
        }

        matches
    }

    fn score_term(&self, term: &str, weight: f64, doc_scores: &mut BTreeMap<u32, f64>) {
        let Some(postings) = self.terms.get(term) else {
            return;
        };
        let n = self.docs.len() as f64;
        let df = f64::from(postings.df);
        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

        for &(ordinal, tf) in &postings.title {
            let score = weight
                * self.options.title_boost
                * idf
                * self.bm25_tf(tf, self.docs[ordinal as usize].field_len[0], self.avg_field_len[0]);
            *doc_scores.entry(ordinal).or_insert(0.0) += score;
        }
        for &(ordinal, tf) in &postings.text {
            let score = weight
                * idf
                * self.bm25_tf(tf, self.docs[ordinal as usize].field_len[1], self.avg_field_len[1]);
            *doc_scores.entry(ordinal).or_insert(0.0) += score;
        }
    }

    fn bm25_tf(&self, tf: u32, field_len: u32, avg_len: f64) -> f64 {
        let tf = f64::from(tf);
        let norm = if avg_len > 0.0 {
            f64::from(field_len) / avg_len
        } else {
            1.0
        };
        tf * (self.options.k1 + 1.0) / (tf + self.options.k1 * (1.0 - self.options.b + self.options.b * norm))
    }
}

fn merged_doc_count(a: &[(u32, u32)], b: &[(u32, u32)]) -> u32 {
    let mut count = 0u32;
    let (mut i, mut j) = (0usize, 0usize);
    while i < a.len() || j < b.len() {
        count += 1;
        match (a.get(i), b.get(j)) {
            (Some(&(da, _)), Some(&(db, _))) => {
                if da < db {
                    i += 1;
                } else if db < da {
                    j += 1;
                } else {
                    i += 1;
                    j += 1;
                }
            }
            (Some(_), None) => i += 1,
            (None, Some(_)) => j += 1,
            (None, None) => unreachable!(),
        }
    }
    count
}

/// Classic two-row Levenshtein over chars.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr: Vec<usize> = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
