use crate::highlight::{DEFAULT_EXCERPT_CHARS, DEFAULT_FRAGMENT_SIZE};
use crate::query::FieldBoosts;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Upper bound for requested page sizes.
    pub max_page_size: usize,
    /// Highlight window, in bytes.
    pub fragment_size: usize,
    /// Length of the fallback excerpt, in characters.
    pub excerpt_chars: usize,
    pub title_boost: f32,
    pub content_boost: f32,
    /// Score given to every result of the document store fallback.
    pub fallback_score: f32,
    pub suggestion_limit: usize,
    /// Content type recorded for documents indexed directly from text.
    pub default_content_type: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_page_size: 100,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
            title_boost: 2.0,
            content_boost: 1.0,
            fallback_score: 1.0,
            suggestion_limit: 5,
            default_content_type: "text/html".into(),
        }
    }
}

impl SearchConfig {
    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut f = File::open(path).with_context(|| format!("opening config {}", path.display()))?;
        let mut buf = String::new();
        f.read_to_string(&mut buf)?;
        let config: SearchConfig = serde_json::from_str(&buf).with_context(|| format!("parsing config {}", path.display()))?;
        anyhow::ensure!(config.max_page_size > 0, "max_page_size in {} must be at least 1", path.display());
        Ok(config)
    }

    pub fn boosts(&self) -> FieldBoosts {
        FieldBoosts { title: self.title_boost, content: self.content_boost }
    }
}
