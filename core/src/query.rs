//! Query parsing and TF-IDF scoring.

use crate::error::{Result, SearchError};
use crate::index::{Field, IndexReader};
use crate::tokenizer::tokenize;
use crate::DocId;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Nothing to search for.
    Empty,
    Term { field: Field, term: String },
    /// Matches when any sub-query matches.
    Or(Vec<Query>),
}

impl Query {
    /// The (field, term) leaves of the query, in order.
    pub fn terms(&self) -> Vec<(Field, &str)> {
        let mut out = Vec::new();
        self.collect_terms(&mut out);
        out
    }

    fn collect_terms<'a>(&'a self, out: &mut Vec<(Field, &'a str)>) {
        match self {
            Query::Empty => {}
            Query::Term { field, term } => out.push((*field, term.as_str())),
            Query::Or(clauses) => clauses.iter().for_each(|q| q.collect_terms(out)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms().is_empty()
    }
}

/// Build an OR-of-terms query over every field in `fields`.
///
/// A blank string gives [`Query::Empty`]. A non-blank string without a single searchable
/// term (only punctuation, say) is a parse error.
pub fn parse(query: &str, fields: &[Field]) -> Result<Query> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Ok(Query::Empty);
    }
    if fields.is_empty() {
        return Err(SearchError::QueryParse("no fields to search".into()));
    }
    let mut terms: Vec<String> = Vec::new();
    for term in tokenize(trimmed) {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    if terms.is_empty() {
        return Err(SearchError::QueryParse(format!("no searchable terms in {trimmed:?}")));
    }
    let per_field = fields
        .iter()
        .map(|&field| Query::Or(terms.iter().map(|term| Query::Term { field, term: term.clone() }).collect()))
        .collect();
    Ok(Query::Or(per_field))
}

/// Per-field score multipliers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldBoosts {
    pub title: f32,
    pub content: f32,
}

impl Default for FieldBoosts {
    fn default() -> Self {
        Self { title: 2.0, content: 1.0 }
    }
}

impl FieldBoosts {
    fn boost(&self, field: Field) -> f32 {
        match field {
            Field::Title => self.title,
            Field::Content => self.content,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredDoc {
    pub doc_id: DocId,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopDocs {
    /// Every matching document, not only the returned ones.
    pub total_hits: usize,
    pub hits: Vec<ScoredDoc>,
}

/// Score all matching documents and keep the best `max_results`.
///
/// Each matching (field, term) adds `sqrt(freq) * ln(1 + N / df) * boost`. Ties are broken by
/// ascending doc id.
pub fn execute(reader: &IndexReader, query: &Query, max_results: usize, boosts: &FieldBoosts) -> TopDocs {
    let total_docs = reader.document_count() as f32;
    let mut scores: HashMap<DocId, f32> = HashMap::new();
    for (field, term) in query.terms() {
        let df = reader.doc_freq(term, field);
        if df == 0 {
            continue;
        }
        let idf = (1.0 + total_docs / df as f32).ln();
        let weight = idf * boosts.boost(field);
        for posting in reader.postings_for(term, field) {
            *scores.entry(posting.doc_id).or_insert(0.0) += (posting.freq as f32).sqrt() * weight;
        }
    }

    let total_hits = scores.len();
    let mut hits: Vec<ScoredDoc> = scores.into_iter().map(|(doc_id, score)| ScoredDoc { doc_id, score }).collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.doc_id.cmp(&b.doc_id))
    });
    hits.truncate(max_results);
    TopDocs { total_hits, hits }
}
