//! Search orchestration: ranked index search with pagination, metadata enrichment and
//! history recording, falling back to a substring scan of the document store when the
//! index cannot answer.

use crate::config::SearchConfig;
use crate::docstore::{DocumentStore, PageRequest};
use crate::error::{Result, SearchError};
use crate::highlight::{excerpt, Highlighter};
use crate::history::{HistoryEntry, QueryFrequency, SearchHistory};
use crate::index::{Field, IndexStore};
use crate::query::{self, ScoredDoc};
use crate::DocId;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: DocId,
    pub title: String,
    pub content: String,
    pub url: String,
    pub highlighted_content: String,
    pub score: f32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchHit>,
    pub total_results: usize,
    pub page: usize,
    pub page_size: usize,
    pub search_time_ms: u64,
    pub suggestions: Vec<String>,
}

/// Query completion hook.
pub trait Suggester: Send + Sync {
    fn suggest(&self, query: &str, limit: usize) -> Result<Vec<String>>;
}

/// The default suggester: never suggests anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSuggestions;

impl Suggester for NoSuggestions {
    fn suggest(&self, _query: &str, _limit: usize) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

pub struct SearchService {
    index: Arc<IndexStore>,
    documents: Arc<dyn DocumentStore>,
    history: Arc<dyn SearchHistory>,
    suggester: Arc<dyn Suggester>,
    highlighter: Highlighter,
    config: SearchConfig,
}

impl SearchService {
    pub fn new(
        index: Arc<IndexStore>,
        documents: Arc<dyn DocumentStore>,
        history: Arc<dyn SearchHistory>,
        config: SearchConfig,
    ) -> Self {
        Self {
            index,
            documents,
            history,
            suggester: Arc::new(NoSuggestions),
            highlighter: Highlighter::new(config.fragment_size, config.excerpt_chars),
            config,
        }
    }

    pub fn with_suggester(mut self, suggester: Arc<dyn Suggester>) -> Self {
        self.suggester = suggester;
        self
    }

    pub fn search(&self, query: &str, page: usize, page_size: usize) -> Result<SearchResponse> {
        self.search_from(query, page, page_size, None)
    }

    /// Like [`SearchService::search`], recording the client address in the history.
    ///
    /// The query is trimmed before it is searched, echoed and recorded. Only a blank query
    /// is an error. Index failures are answered by the fallback path, and
    /// a failing fallback yields an empty response.
    pub fn search_from(&self, query: &str, page: usize, page_size: usize, user_ip: Option<&str>) -> Result<SearchResponse> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::Validation("search query must not be blank".into()));
        }
        let page_size = page_size.max(1).min(self.config.max_page_size.max(1));
        let started = Instant::now();

        let (results, total_results) = match self.index_search(query, page, page_size) {
            Ok(found) => found,
            Err(err) => {
                tracing::error!(query, error = %err, "index search failed, falling back to document store");
                return Ok(self.fallback_search(query, page, page_size, started, user_ip));
            }
        };

        let suggestions = self.suggestions(query);
        let search_time_ms = elapsed_ms(started);
        self.record_history(query, total_results, search_time_ms, user_ip);
        tracing::info!(query, total_results, search_time_ms, "search completed");
        Ok(SearchResponse { query: query.to_string(), results, total_results, page, page_size, search_time_ms, suggestions })
    }

    fn index_search(&self, query: &str, page: usize, page_size: usize) -> Result<(Vec<SearchHit>, usize)> {
        let parsed = query::parse(query, &Field::ALL)?;
        let reader = self.index.open_reader()?;
        let max_results = (page + 1).saturating_mul(page_size);
        let top = query::execute(&reader, &parsed, max_results, &self.config.boosts());

        let start = page.saturating_mul(page_size);
        let mut results = Vec::with_capacity(page_size.min(top.hits.len()));
        for &ScoredDoc { doc_id, score } in top.hits.iter().skip(start).take(page_size) {
            let Some(stored) = reader.stored_fields(doc_id) else {
                tracing::warn!(doc_id, "ranked document has no stored fields");
                continue;
            };
            results.push(SearchHit {
                id: doc_id,
                title: stored.title.clone(),
                content: stored.content.clone(),
                url: stored.url.clone(),
                highlighted_content: self.highlighter.highlight(&parsed, &stored.content),
                score,
                created_at: self.created_at(doc_id),
            });
        }
        Ok((results, top.total_hits))
    }

    fn fallback_search(&self, query: &str, page: usize, page_size: usize, started: Instant, user_ip: Option<&str>) -> SearchResponse {
        tracing::info!(query, "performing fallback document store search");
        let found = match self.documents.find_by_keyword(query, PageRequest { page, size: page_size }) {
            Ok(found) => found,
            Err(err) => {
                tracing::error!(query, error = %err, "fallback search failed");
                return SearchResponse {
                    query: query.to_string(),
                    results: Vec::new(),
                    total_results: 0,
                    page,
                    page_size,
                    search_time_ms: elapsed_ms(started),
                    suggestions: Vec::new(),
                };
            }
        };

        let results = found
            .items
            .into_iter()
            .map(|doc| SearchHit {
                id: doc.id,
                highlighted_content: excerpt(&doc.content, self.config.excerpt_chars),
                score: self.config.fallback_score,
                created_at: Some(doc.created_at),
                title: doc.title,
                content: doc.content,
                url: doc.url,
            })
            .collect();
        let search_time_ms = elapsed_ms(started);
        self.record_history(query, found.total, search_time_ms, user_ip);
        SearchResponse {
            query: query.to_string(),
            results,
            total_results: found.total,
            page,
            page_size,
            search_time_ms,
            suggestions: Vec::new(),
        }
    }

    fn created_at(&self, doc_id: DocId) -> Option<OffsetDateTime> {
        match self.documents.find_by_id(doc_id) {
            Ok(doc) => doc.map(|d| d.created_at),
            Err(err) => {
                tracing::warn!(doc_id, error = %err, "could not load document metadata");
                None
            }
        }
    }

    fn suggestions(&self, query: &str) -> Vec<String> {
        match self.suggester.suggest(query, self.config.suggestion_limit) {
            Ok(mut suggestions) => {
                suggestions.truncate(self.config.suggestion_limit);
                suggestions
            }
            Err(err) => {
                tracing::warn!(query, error = %err, "error getting suggestions");
                Vec::new()
            }
        }
    }

    fn record_history(&self, query: &str, results_count: usize, search_time_ms: u64, user_ip: Option<&str>) {
        if let Err(err) = self.history.record(query, results_count, search_time_ms, user_ip) {
            tracing::warn!(query, error = %err, "error saving search history");
        }
    }

    pub fn recent_searches(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.history.recent_searches(limit)
    }

    pub fn popular_queries(&self, days: i64) -> Result<Vec<QueryFrequency>> {
        self.history.top_queries_by_frequency(window_start(days))
    }

    /// `None` when no search ran in the window.
    pub fn average_search_time(&self, days: i64) -> Result<Option<f64>> {
        self.history.average_search_time(window_start(days))
    }
}

fn window_start(days: i64) -> OffsetDateTime {
    OffsetDateTime::now_utc() - Duration::days(days.max(0))
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
