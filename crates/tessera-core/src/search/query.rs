//! Lexical query construction.
//!
//! A [`QueryMode`] turns raw query text into the term list handed to the
//! lexical index. Every mode is a pure function of its input, so identical
//! text always yields identical terms, and the index never sees mode logic.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::DEFAULT_MAX_QUERY_TERMS;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("static regex"));

/// Tokens shorter than this are dropped in heuristic mode.
const MIN_TERM_LEN: usize = 3;

/// Words that never help a lexical match: function words plus the
/// instruction vocabulary users wrap around a question ("summarize the
/// main points and cite sources").
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "not", "to", "of", "in", "on", "for", "with", "by", "from",
    "is", "are", "was", "were", "be", "been", "being", "as", "at", "it", "this", "that",
    "these", "those", "i", "you", "we", "they", "he", "she", "my", "your", "our", "their",
    "summarize", "summary", "main", "points", "cite", "sources", "document", "documents",
    "uploaded",
];

static STOPWORD_SET: Lazy<HashSet<&'static str>> = Lazy::new(|| STOPWORDS.iter().copied().collect());

/// Strategy for turning a raw query into lexical terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum QueryMode {
    /// Every word token, lowercased, in order.
    Raw,
    /// Drops short tokens and stopwords, de-duplicates, caps the term count.
    Heuristic { max_terms: usize },
    /// Caller-supplied lexical query, tokenized as [`QueryMode::Raw`].
    Explicit { query: String },
}

impl Default for QueryMode {
    fn default() -> Self {
        QueryMode::Heuristic {
            max_terms: DEFAULT_MAX_QUERY_TERMS,
        }
    }
}

/// Result of applying a [`QueryMode`] to a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryTerms {
    /// Word tokens of the original query, lowercased
    pub original_tokens: Vec<String>,
    /// Terms sent to the lexical index
    pub terms: Vec<String>,
}

impl QueryTerms {
    /// Terms joined with single spaces.
    pub fn as_query(&self) -> String {
        self.terms.join(" ")
    }

    /// True when nothing is left to match.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Original tokens that did not make it into the term list.
    pub fn removed_tokens(&self) -> Vec<String> {
        let kept: HashSet<&str> = self.terms.iter().map(String::as_str).collect();
        self.original_tokens
            .iter()
            .filter(|t| !kept.contains(t.as_str()))
            .cloned()
            .collect()
    }
}

impl QueryMode {
    /// Builds the lexical terms for `query`.
    pub fn tokenize(&self, query: &str) -> QueryTerms {
        let original_tokens = word_tokens(query);
        let terms = match self {
            QueryMode::Raw => original_tokens.clone(),
            QueryMode::Heuristic { max_terms } => heuristic_terms(&original_tokens, *max_terms),
            QueryMode::Explicit { query } => word_tokens(query),
        };
        QueryTerms {
            original_tokens,
            terms,
        }
    }

    /// Short label for diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            QueryMode::Raw => "raw",
            QueryMode::Heuristic { .. } => "heuristic",
            QueryMode::Explicit { .. } => "explicit",
        }
    }
}

/// Lowercased `\w+` tokens; punctuation is discarded.
pub fn word_tokens(text: &str) -> Vec<String> {
    WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Returns true if `token` is in the stopword list.
pub fn is_stopword(token: &str) -> bool {
    STOPWORD_SET.contains(token)
}

fn heuristic_terms(tokens: &[String], max_terms: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    for token in tokens {
        if kept.len() >= max_terms {
            break;
        }
        if token.chars().count() < MIN_TERM_LEN || is_stopword(token) {
            continue;
        }
        if seen.insert(token.as_str()) {
            kept.push(token.clone());
        }
    }
    kept
}
