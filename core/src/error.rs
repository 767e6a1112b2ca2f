use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SearchError {
    /// Rejected input; nothing was touched.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("index I/O error: {0}")]
    IndexIo(String),

    #[error("query parse error: {0}")]
    QueryParse(String),

    #[error("document {0} not found")]
    NotFound(crate::DocId),

    #[error("text extraction failed: {0}")]
    Extraction(String),

    #[error("document store error: {0}")]
    Store(String),

    #[error("search history error: {0}")]
    History(String),
}

pub type Result<T> = std::result::Result<T, SearchError>;

impl SearchError {
    pub fn index_io(err: anyhow::Error) -> Self {
        SearchError::IndexIo(format!("{err:#}"))
    }

    pub fn store(err: impl std::fmt::Display) -> Self {
        SearchError::Store(err.to_string())
    }

    pub fn history(err: impl std::fmt::Display) -> Self {
        SearchError::History(err.to_string())
    }
}
