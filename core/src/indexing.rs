//! Write side: keeps the document store and the index in step.

use crate::docstore::{Document, DocumentStore};
use crate::error::{Result, SearchError};
use crate::extract::TextExtractor;
use crate::index::IndexStore;
use crate::DocId;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub total_documents: usize,
    pub indexed_documents: usize,
    pub index_documents: usize,
    pub by_content_type: BTreeMap<String, usize>,
}

/// Clones share one write lock. Every write holds it from the first store read to the
/// index commit, so the store and the index change together.
#[derive(Clone)]
pub struct IndexingService {
    index: Arc<IndexStore>,
    documents: Arc<dyn DocumentStore>,
    default_content_type: String,
    write_lock: Arc<Mutex<()>>,
}

impl IndexingService {
    pub fn new(index: Arc<IndexStore>, documents: Arc<dyn DocumentStore>, default_content_type: &str) -> Self {
        Self {
            index,
            documents,
            default_content_type: default_content_type.to_string(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create a document, or update the one already stored under `url`.
    pub fn index_document(&self, title: &str, content: &str, url: &str) -> Result<Document> {
        validate(title, url)?;
        let _write = self.write_lock.lock();
        if let Some(existing) = self.documents.find_by_url(url)? {
            tracing::info!(url, doc_id = existing.id, "document already exists, updating");
            return self.apply_update(existing, title, content, url);
        }
        let document = self.documents.save(Document::new(title, content, url, &self.default_content_type))?;
        let document = self.write_to_index(document)?;
        tracing::info!(doc_id = document.id, title, "indexed document");
        Ok(document)
    }

    pub fn update_document(&self, id: DocId, title: &str, content: &str, url: &str) -> Result<Document> {
        validate(title, url)?;
        let _write = self.write_lock.lock();
        let document = self.documents.find_by_id(id)?.ok_or(SearchError::NotFound(id))?;
        self.apply_update(document, title, content, url)
    }

    /// Caller holds the write lock.
    fn apply_update(&self, mut document: Document, title: &str, content: &str, url: &str) -> Result<Document> {
        let id = document.id;
        document.title = title.to_string();
        document.content = content.to_string();
        document.url = url.to_string();
        document.updated_at = OffsetDateTime::now_utc();
        // the index still holds the old content until the commit below
        document.is_indexed = false;
        let document = self.documents.save(document)?;
        let document = self.write_to_index(document)?;
        tracing::info!(doc_id = id, title, "updated document");
        Ok(document)
    }

    pub fn delete_document(&self, id: DocId) -> Result<()> {
        let _write = self.write_lock.lock();
        if self.documents.find_by_id(id)?.is_none() {
            return Err(SearchError::NotFound(id));
        }
        self.index.remove(id)?;
        self.documents.delete_by_id(id)?;
        tracing::info!(doc_id = id, "deleted document");
        Ok(())
    }

    /// Extract text from an uploaded file and index it. Title defaults to the file name and
    /// url to `file://{file_name}`.
    pub fn index_file(
        &self,
        extractor: &dyn TextExtractor,
        bytes: &[u8],
        file_name: &str,
        title: Option<&str>,
        url: Option<&str>,
    ) -> Result<Document> {
        if bytes.is_empty() {
            return Err(SearchError::Validation("file is empty".into()));
        }
        let extracted = extractor.extract(bytes, file_name)?;
        let title = title.filter(|t| !t.trim().is_empty()).unwrap_or(file_name);
        let url = match url.filter(|u| !u.trim().is_empty()) {
            Some(url) => url.to_string(),
            None => format!("file://{file_name}"),
        };
        validate(title, &url)?;

        let _write = self.write_lock.lock();
        let mut document = match self.documents.find_by_url(&url)? {
            Some(mut existing) => {
                existing.title = title.to_string();
                existing.content = extracted.text;
                existing.updated_at = OffsetDateTime::now_utc();
                existing
            }
            None => Document::new(title, &extracted.text, &url, &extracted.content_type),
        };
        document.content_type = extracted.content_type;
        document.file_size = Some(extracted.size);
        document.is_indexed = false;
        let document = self.documents.save(document)?;
        let document = self.write_to_index(document)?;
        tracing::info!(doc_id = document.id, file_name, "indexed file");
        Ok(document)
    }

    /// Rebuild the index entry of every stored document on a background thread, one commit
    /// per document. A failing document is counted and left unindexed; one deleted while the
    /// reindex runs is skipped and drops out of `total`.
    pub fn reindex_all(&self) -> ReindexHandle {
        let progress = Arc::new(ReindexProgress::default());
        let (tx, rx) = mpsc::channel();
        let service = self.clone();
        let worker_progress = Arc::clone(&progress);
        let thread = thread::spawn(move || {
            let outcome = service.reindex_documents(&worker_progress);
            worker_progress.finished.store(true, Ordering::SeqCst);
            // the handle may already be gone
            let _ = tx.send(outcome);
        });
        ReindexHandle { progress, done: rx, thread: Some(thread) }
    }

    fn reindex_documents(&self, progress: &ReindexProgress) -> Result<ReindexReport> {
        tracing::info!("starting reindex of all documents");
        let documents = self.documents.find_all().map_err(|err| {
            tracing::error!(error = %err, "reindex could not list documents");
            err
        })?;
        let ids: Vec<DocId> = documents.into_iter().map(|d| d.id).collect();
        progress.total.store(ids.len(), Ordering::SeqCst);
        for id in ids {
            // reload under the write lock; the listing may be stale by now
            let _write = self.write_lock.lock();
            let outcome = match self.documents.find_by_id(id) {
                Ok(Some(document)) => self.write_to_index(document).map(|_| ()),
                Ok(None) => {
                    tracing::debug!(doc_id = id, "document deleted during reindex, skipping");
                    progress.total.fetch_sub(1, Ordering::SeqCst);
                    continue;
                }
                Err(err) => Err(err),
            };
            match outcome {
                Ok(()) => {
                    progress.indexed.fetch_add(1, Ordering::SeqCst);
                }
                Err(err) => {
                    tracing::error!(doc_id = id, error = %err, "error reindexing document");
                    progress.errors.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
        let report = progress.snapshot();
        tracing::info!(total = report.total, indexed = report.indexed, errors = report.errors, "reindexing completed");
        Ok(report)
    }

    pub fn all_documents(&self) -> Result<Vec<Document>> {
        self.documents.find_all()
    }

    pub fn unindexed_documents(&self) -> Result<Vec<Document>> {
        Ok(self.documents.find_all()?.into_iter().filter(|d| !d.is_indexed).collect())
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let reader = self.index.open_reader()?;
        Ok(IndexStats {
            total_documents: self.documents.find_all()?.len(),
            indexed_documents: self.documents.count_indexed()?,
            index_documents: reader.document_count(),
            by_content_type: self.documents.count_by_content_type()?,
        })
    }

    pub fn optimize(&self) -> Result<()> {
        self.index.optimize()
    }

    /// Replace the index entry of `document` and record the outcome on it. On failure the
    /// document is saved as unindexed and the index error is returned.
    fn write_to_index(&self, mut document: Document) -> Result<Document> {
        match self.index.replace(document.id, &document.index_fields()) {
            Ok(generation) => {
                tracing::debug!(doc_id = document.id, generation, "document committed to index");
                document.is_indexed = true;
                document.indexed_at = Some(OffsetDateTime::now_utc());
                self.documents.save(document)
            }
            Err(err) => {
                document.is_indexed = false;
                if let Err(save_err) = self.documents.save(document.clone()) {
                    tracing::warn!(doc_id = document.id, error = %save_err, "could not mark document unindexed");
                }
                Err(err)
            }
        }
    }
}

fn validate(title: &str, url: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(SearchError::Validation("title must not be blank".into()));
    }
    if url.trim().is_empty() {
        return Err(SearchError::Validation("url must not be blank".into()));
    }
    Ok(())
}

#[derive(Debug, Default)]
struct ReindexProgress {
    total: AtomicUsize,
    indexed: AtomicUsize,
    errors: AtomicUsize,
    finished: AtomicBool,
}

impl ReindexProgress {
    fn snapshot(&self) -> ReindexReport {
        ReindexReport {
            total: self.total.load(Ordering::SeqCst),
            indexed: self.indexed.load(Ordering::SeqCst),
            errors: self.errors.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    pub total: usize,
    pub indexed: usize,
    pub errors: usize,
}

/// Observes a running reindex. Dropping it does not stop the worker.
pub struct ReindexHandle {
    progress: Arc<ReindexProgress>,
    done: Receiver<Result<ReindexReport>>,
    thread: Option<JoinHandle<()>>,
}

impl ReindexHandle {
    /// Counters so far.
    pub fn progress(&self) -> ReindexReport {
        self.progress.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.progress.finished.load(Ordering::SeqCst)
    }

    /// Block until the worker finishes.
    pub fn wait(mut self) -> Result<ReindexReport> {
        let outcome = self.done.recv().unwrap_or_else(|_| Err(worker_lost()));
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        outcome
    }
}

fn worker_lost() -> SearchError {
    SearchError::IndexIo("reindex worker terminated without a report".into())
}
