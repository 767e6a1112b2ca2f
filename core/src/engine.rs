use crate::config::SearchConfig;
use crate::docstore::{DocumentStore, SledDocumentStore};
use crate::error::{Result, SearchError};
use crate::history::{SearchHistory, SledSearchHistory};
use crate::index::IndexStore;
use crate::indexing::IndexingService;
use crate::search::SearchService;
use std::path::Path;
use std::sync::Arc;

/// All services over one data directory: `db/` holds documents and search history,
/// `index/` the inverted index.
pub struct SearchEngine {
    db: sled::Db,
    index: Arc<IndexStore>,
    search: SearchService,
    indexing: IndexingService,
}

impl SearchEngine {
    pub fn open<P: AsRef<Path>>(data_dir: P, config: SearchConfig) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let db = sled::open(data_dir.join("db")).map_err(SearchError::store)?;
        let index = Arc::new(IndexStore::open(data_dir.join("index"))?);
        tracing::info!(data_dir = %data_dir.display(), "opened search engine");
        Self::assemble(db, index, config)
    }

    /// Throwaway engine: temporary sled database and an in-memory index.
    pub fn temporary(config: SearchConfig) -> Result<Self> {
        let db = sled::Config::new().temporary(true).open().map_err(SearchError::store)?;
        Self::assemble(db, Arc::new(IndexStore::in_memory()), config)
    }

    fn assemble(db: sled::Db, index: Arc<IndexStore>, config: SearchConfig) -> Result<Self> {
        let documents: Arc<dyn DocumentStore> = Arc::new(SledDocumentStore::new(&db)?);
        let history: Arc<dyn SearchHistory> = Arc::new(SledSearchHistory::new(&db)?);
        let indexing = IndexingService::new(Arc::clone(&index), Arc::clone(&documents), &config.default_content_type);
        let search = SearchService::new(Arc::clone(&index), documents, history, config);
        Ok(Self { db, index, search, indexing })
    }

    pub fn search(&self) -> &SearchService {
        &self.search
    }

    pub fn indexing(&self) -> &IndexingService {
        &self.indexing
    }

    pub fn index(&self) -> &Arc<IndexStore> {
        &self.index
    }

    /// Flush the document and history database to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(SearchError::store)?;
        Ok(())
    }
}
