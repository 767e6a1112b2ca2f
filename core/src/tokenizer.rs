use lazy_static::lazy_static;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref RE: Regex =
        Regex::new(r"(?u)[\p{L}\p{N}][\p{L}\p{M}\p{N}]*(?:['_][\p{L}\p{M}\p{N}]+)*").expect("valid regex");
}

/// A normalized term with its byte span in the original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub term: String,
    pub position: usize,
    pub start: usize,
    pub end: usize,
}

/// Tokenize text into normalized terms (NFKC, lowercase). Punctuation never forms a term.
pub fn tokenize(text: &str) -> Vec<String> {
    tokens(text).into_iter().map(|t| t.term).collect()
}

/// Like [`tokenize`], keeping positions and byte offsets into `text`.
pub fn tokens(text: &str) -> Vec<Token> {
    RE.find_iter(text)
        .enumerate()
        .map(|(position, mat)| Token {
            term: normalize(mat.as_str()),
            position,
            start: mat.start(),
            end: mat.end(),
        })
        .collect()
}

fn normalize(word: &str) -> String {
    word.nfkc().collect::<String>().to_lowercase()
}
