use crate::error::{Result, SearchError};
use std::path::Path;

/// Text pulled out of an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub text: String,
    pub content_type: String,
    pub size: u64,
}

pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], file_name: &str) -> Result<Extracted>;
}

/// Accepts UTF-8 text files only.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    fn content_type(file_name: &str) -> &'static str {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|s| s.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("html") | Some("htm") => "text/html",
            Some("xml") => "application/xml",
            Some("md") => "text/markdown",
            Some("json") => "application/json",
            Some("csv") => "text/csv",
            _ => "text/plain",
        }
    }
}

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8], file_name: &str) -> Result<Extracted> {
        let text = std::str::from_utf8(bytes)
            .map_err(|err| SearchError::Extraction(format!("{file_name} is not UTF-8 text: {err}")))?;
        if text.contains('\0') {
            return Err(SearchError::Extraction(format!("{file_name} looks like a binary file")));
        }
        Ok(Extracted {
            text: text.to_string(),
            content_type: Self::content_type(file_name).to_string(),
            size: bytes.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_utf8_with_content_type() {
        let out = PlainTextExtractor.extract("héllo".as_bytes(), "Notes.MD").unwrap();
        assert_eq!(out.text, "héllo");
        assert_eq!(out.content_type, "text/markdown");
        assert_eq!(out.size, 6);
    }

    #[test]
    fn rejects_binary_input() {
        assert!(matches!(
            PlainTextExtractor.extract(&[0xff, 0xfe, 0x00], "blob.pdf"),
            Err(SearchError::Extraction(_))
        ));
        assert!(matches!(
            PlainTextExtractor.extract(b"a\0b", "blob.txt"),
            Err(SearchError::Extraction(_))
        ));
    }
}
