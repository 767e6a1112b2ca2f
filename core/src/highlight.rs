//! Snippet extraction with query-term highlighting.

use crate::query::Query;
use crate::tokenizer::{tokens, Token};
use std::collections::HashSet;
use thiserror::Error;

pub const DEFAULT_FRAGMENT_SIZE: usize = 150;
pub const DEFAULT_EXCERPT_CHARS: usize = 200;

const PRE_TAG: &str = "<em>";
const POST_TAG: &str = "</em>";

#[derive(Debug, Error)]
pub enum HighlightError {
    #[error("offsets {start}..{end} are not valid in a text of {len} bytes")]
    Offsets { start: usize, end: usize, len: usize },
}

#[derive(Debug, Clone)]
pub struct Highlighter {
    fragment_size: usize,
    excerpt_chars: usize,
}

impl Default for Highlighter {
    fn default() -> Self {
        Self::new(DEFAULT_FRAGMENT_SIZE, DEFAULT_EXCERPT_CHARS)
    }
}

impl Highlighter {
    pub fn new(fragment_size: usize, excerpt_chars: usize) -> Self {
        Self { fragment_size: fragment_size.max(1), excerpt_chars }
    }

    /// Best highlighted fragment of `text`, or a prefix excerpt when no query term occurs in
    /// it. Never fails.
    pub fn highlight(&self, query: &Query, text: &str) -> String {
        match self.best_fragment(query, text) {
            Ok(Some(fragment)) => fragment,
            Ok(None) => excerpt(text, self.excerpt_chars),
            Err(err) => {
                tracing::warn!(error = %err, "highlighting failed, using excerpt");
                excerpt(text, self.excerpt_chars)
            }
        }
    }

    /// The window of `fragment_size` bytes holding the most query-term occurrences, with
    /// each occurrence wrapped in `<em>` tags. `None` when nothing matches.
    pub fn best_fragment(&self, query: &Query, text: &str) -> Result<Option<String>, HighlightError> {
        if text.is_empty() {
            return Ok(None);
        }
        let terms: HashSet<&str> = query.terms().into_iter().map(|(_, term)| term).collect();
        if terms.is_empty() {
            return Ok(None);
        }
        let matches: Vec<Token> = tokens(text).into_iter().filter(|t| terms.contains(t.term.as_str())).collect();
        if matches.is_empty() {
            return Ok(None);
        }

        let (first, count) = densest_window(&matches, self.fragment_size);
        let covered_start = matches[first].start;
        let covered_end = matches[first + count - 1].end;
        let slack = self.fragment_size.saturating_sub(covered_end - covered_start);
        let start = floor_char_boundary(text, covered_start.saturating_sub(slack / 2));
        let end = floor_char_boundary(text, (start + self.fragment_size).min(text.len())).max(covered_end);

        let mut out = String::with_capacity(end - start + count * (PRE_TAG.len() + POST_TAG.len()));
        let mut cursor = start;
        for m in matches.iter().filter(|m| m.start >= start && m.end <= end) {
            out.push_str(slice(text, cursor, m.start)?);
            out.push_str(PRE_TAG);
            out.push_str(slice(text, m.start, m.end)?);
            out.push_str(POST_TAG);
            cursor = m.end;
        }
        out.push_str(slice(text, cursor, end)?);
        Ok(Some(out.trim().to_string()))
    }
}

/// First `max_chars` characters of `text`, with `...` appended when it was cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Returns (index of first match, number of matches) of the densest window.
fn densest_window(matches: &[Token], size: usize) -> (usize, usize) {
    let mut best = (0, 1);
    let mut j = 0;
    for i in 0..matches.len() {
        j = j.max(i + 1);
        let limit = matches[i].start + size;
        while j < matches.len() && matches[j].end <= limit {
            j += 1;
        }
        if j - i > best.1 {
            best = (i, j - i);
        }
    }
    best
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn slice(text: &str, start: usize, end: usize) -> Result<&str, HighlightError> {
    text.get(start..end).ok_or(HighlightError::Offsets { start, end, len: text.len() })
}
