//! Append-only log of executed searches and the analytics computed over it.

use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: u64,
    pub query: String,
    pub results_count: usize,
    pub search_time_ms: u64,
    pub user_ip: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryFrequency {
    pub query: String,
    pub count: usize,
}

pub trait SearchHistory: Send + Sync {
    /// Append an entry. Entries are never updated or deleted.
    fn record(&self, query: &str, results_count: usize, search_time_ms: u64, user_ip: Option<&str>)
        -> Result<HistoryEntry>;

    /// Most recent first.
    fn recent_searches(&self, limit: usize) -> Result<Vec<HistoryEntry>>;

    /// Entries created at or after `since`, oldest first.
    fn entries_since(&self, since: OffsetDateTime) -> Result<Vec<HistoryEntry>>;

    /// Literal query strings grouped and ordered by descending count.
    fn top_queries_by_frequency(&self, since: OffsetDateTime) -> Result<Vec<QueryFrequency>> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for entry in self.entries_since(since)? {
            *counts.entry(entry.query).or_insert(0) += 1;
        }
        let mut top: Vec<QueryFrequency> = counts.into_iter().map(|(query, count)| QueryFrequency { query, count }).collect();
        top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.query.cmp(&b.query)));
        Ok(top)
    }

    /// Mean search time in the window, `None` when the window holds no entries.
    fn average_search_time(&self, since: OffsetDateTime) -> Result<Option<f64>> {
        let entries = self.entries_since(since)?;
        if entries.is_empty() {
            return Ok(None);
        }
        let total: u64 = entries.iter().map(|e| e.search_time_ms).sum();
        Ok(Some(total as f64 / entries.len() as f64))
    }
}

pub struct SledSearchHistory {
    db: sled::Db,
    entries: sled::Tree,
}

impl SledSearchHistory {
    pub fn new(db: &sled::Db) -> Result<Self> {
        let entries = db.open_tree("search_history").map_err(SearchError::history)?;
        Ok(Self { db: db.clone(), entries })
    }

    fn decode(bytes: &[u8]) -> Result<HistoryEntry> {
        bincode::deserialize(bytes).map_err(SearchError::history)
    }
}

impl SearchHistory for SledSearchHistory {
    fn record(&self, query: &str, results_count: usize, search_time_ms: u64, user_ip: Option<&str>)
        -> Result<HistoryEntry> {
        let entry = HistoryEntry {
            id: self.db.generate_id().map_err(SearchError::history)? + 1,
            query: query.to_string(),
            results_count,
            search_time_ms,
            user_ip: user_ip.map(str::to_string),
            created_at: OffsetDateTime::now_utc(),
        };
        let bytes = bincode::serialize(&entry).map_err(SearchError::history)?;
        self.entries.insert(entry.id.to_be_bytes(), bytes).map_err(SearchError::history)?;
        Ok(entry)
    }

    fn recent_searches(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.entries
            .iter()
            .rev()
            .take(limit)
            .map(|item| item.map_err(SearchError::history).and_then(|(_, bytes)| Self::decode(&bytes)))
            .collect()
    }

    fn entries_since(&self, since: OffsetDateTime) -> Result<Vec<HistoryEntry>> {
        let mut out = Vec::new();
        for value in self.entries.iter().values() {
            let entry = Self::decode(&value.map_err(SearchError::history)?)?;
            if entry.created_at >= since {
                out.push(entry);
            }
        }
        Ok(out)
    }
}
