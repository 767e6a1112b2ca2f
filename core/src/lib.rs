//! Full-text indexing and ranked retrieval over text documents.

pub mod config;
pub mod docstore;
pub mod engine;
pub mod error;
pub mod extract;
pub mod highlight;
pub mod history;
pub mod index;
pub mod indexing;
pub mod persist;
pub mod query;
pub mod search;
pub mod tokenizer;

pub use config::SearchConfig;
pub use engine::SearchEngine;
pub use error::{Result, SearchError};

pub type DocId = u64;
pub type SegmentId = u64;
