//! Lexical (BM25) indexing and scoring.
//!
//! Tokenization lowercases, extracts word characters, and drops a
//! standard English stop-word list. Scoring is classic BM25 over the
//! tokenized chunks. Index construction and scoring are CPU-bound and
//! expected to run under `spawn_blocking`.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

/// BM25 term-frequency saturation parameter.
const BM25_K1: f64 = 1.5;
/// BM25 length-normalization parameter.
const BM25_B: f64 = 0.75;

/// Standard English stop words excluded from the lexical index.
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "cannot", "could", "did", "do", "does", "doing", "down", "during", "each",
    "few", "for", "from", "further", "had", "has", "have", "having", "he", "her", "here",
    "hers", "herself", "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it",
    "its", "itself", "just", "me", "more", "most", "my", "myself", "no", "nor", "not", "now",
    "of", "off", "on", "once", "only", "or", "other", "our", "ours", "ourselves", "out",
    "over", "own", "same", "she", "should", "so", "some", "such", "than", "that", "the",
    "their", "theirs", "them", "themselves", "then", "there", "these", "they", "this",
    "those", "through", "to", "too", "under", "until", "up", "very", "was", "we", "were",
    "what", "when", "where", "which", "while", "who", "whom", "why", "will", "with", "would",
    "you", "your", "yours", "yourself", "yourselves",
];

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+").unwrap_or_else(|_| unreachable!("static regex")));

static STOP_SET: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| STOP_WORDS.iter().copied().collect());

/// Tokenizes text: lowercase word characters minus stop words.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    WORD_RE
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .filter(|token| !STOP_SET.contains(token.as_str()))
        .collect()
}

/// BM25 scoring structure over a fixed set of documents.
#[derive(Debug, Clone)]
pub struct Bm25Index {
    doc_lens: Vec<usize>,
    avg_doc_len: f64,
    /// term → (doc index → term frequency)
    term_freqs: HashMap<String, HashMap<usize, usize>>,
    doc_count: usize,
}

impl Bm25Index {
    /// Builds an index over the given documents.
    #[must_use]
    pub fn build(docs: &[String]) -> Self {
        let tokenized: Vec<Vec<String>> = docs.iter().map(|d| tokenize(d)).collect();
        let doc_lens: Vec<usize> = tokenized.iter().map(Vec::len).collect();
        let doc_count = docs.len();
        let avg_doc_len = if doc_count == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            {
                doc_lens.iter().sum::<usize>() as f64 / doc_count as f64
            }
        };

        let mut term_freqs: HashMap<String, HashMap<usize, usize>> = HashMap::new();
        for (doc_idx, tokens) in tokenized.iter().enumerate() {
            for token in tokens {
                *term_freqs
                    .entry(token.clone())
                    .or_default()
                    .entry(doc_idx)
                    .or_default() += 1;
            }
        }

        Self {
            doc_lens,
            avg_doc_len,
            term_freqs,
            doc_count,
        }
    }

    /// Number of indexed documents.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.doc_count
    }

    /// Whether the index is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.doc_count == 0
    }

    /// BM25 score of every document against the tokenized query, in
    /// document order.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn scores(&self, query_tokens: &[String]) -> Vec<f64> {
        let mut scores = vec![0.0f64; self.doc_count];
        if self.doc_count == 0 || self.avg_doc_len == 0.0 {
            return scores;
        }

        let n = self.doc_count as f64;
        for token in query_tokens {
            let Some(postings) = self.term_freqs.get(token) else {
                continue;
            };
            let df = postings.len() as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for (&doc_idx, &tf) in postings {
                let tf = tf as f64;
                let doc_len = self.doc_lens[doc_idx] as f64;
                let denom = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / self.avg_doc_len);
                scores[doc_idx] += idf * (tf * (BM25_K1 + 1.0)) / denom;
            }
        }
        scores
    }

    /// Document indices ranked by descending score, ties broken by
    /// document order for determinism.
    #[must_use]
    pub fn ranked(&self, query_tokens: &[String]) -> Vec<(usize, f64)> {
        let scores = self.scores(query_tokens);
        let mut ranked: Vec<(usize, f64)> = scores.into_iter().enumerate().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0)));
        ranked
    }
}
