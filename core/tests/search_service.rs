use search_core::docstore::{Document, DocumentStore, Page, PageRequest, SledDocumentStore};
use search_core::extract::PlainTextExtractor;
use search_core::history::{HistoryEntry, SearchHistory, SledSearchHistory};
use search_core::index::IndexStore;
use search_core::indexing::IndexingService;
use search_core::search::{SearchService, Suggester};
use search_core::{DocId, SearchConfig, SearchEngine, SearchError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use time::OffsetDateTime;

fn engine_with_samples() -> (SearchEngine, Vec<Document>) {
    let engine = SearchEngine::temporary(SearchConfig::default()).unwrap();
    let docs = vec![
        engine
            .indexing()
            .index_document("Java Programming Guide", "Java is a programming language used for enterprise software.", "https://docs/java")
            .unwrap(),
        engine
            .indexing()
            .index_document("Spring Boot Tutorial", "Spring Boot makes it easy to create stand-alone applications.", "https://docs/spring")
            .unwrap(),
        engine
            .indexing()
            .index_document("Database Design", "Database design principles for relational schemas.", "https://docs/db")
            .unwrap(),
    ];
    (engine, docs)
}

/// History wrapper counting appends, optionally failing all of them.
struct CountingHistory {
    inner: SledSearchHistory,
    records: AtomicUsize,
    fail: bool,
}

impl CountingHistory {
    fn new(fail: bool) -> Self {
        let db = sled::Config::new().temporary(true).open().unwrap();
        Self { inner: SledSearchHistory::new(&db).unwrap(), records: AtomicUsize::new(0), fail }
    }
}

impl SearchHistory for CountingHistory {
    fn record(&self, query: &str, results_count: usize, search_time_ms: u64, user_ip: Option<&str>) -> search_core::Result<HistoryEntry> {
        self.records.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SearchError::History("history database unavailable".into()));
        }
        self.inner.record(query, results_count, search_time_ms, user_ip)
    }

    fn recent_searches(&self, limit: usize) -> search_core::Result<Vec<HistoryEntry>> {
        self.inner.recent_searches(limit)
    }

    fn entries_since(&self, since: OffsetDateTime) -> search_core::Result<Vec<HistoryEntry>> {
        self.inner.entries_since(since)
    }
}

/// Document store whose lookups by id always fail.
struct UnreachableLookups(SledDocumentStore);

impl DocumentStore for UnreachableLookups {
    fn find_by_id(&self, _id: DocId) -> search_core::Result<Option<Document>> {
        Err(SearchError::Store("connection refused".into()))
    }
    fn find_by_url(&self, url: &str) -> search_core::Result<Option<Document>> {
        self.0.find_by_url(url)
    }
    fn save(&self, document: Document) -> search_core::Result<Document> {
        self.0.save(document)
    }
    fn delete_by_id(&self, id: DocId) -> search_core::Result<()> {
        self.0.delete_by_id(id)
    }
    fn find_all(&self) -> search_core::Result<Vec<Document>> {
        self.0.find_all()
    }
    fn find_by_keyword(&self, keyword: &str, page: PageRequest) -> search_core::Result<Page<Document>> {
        self.0.find_by_keyword(keyword, page)
    }
    fn count_indexed(&self) -> search_core::Result<usize> {
        self.0.count_indexed()
    }
    fn count_by_content_type(&self) -> search_core::Result<BTreeMap<String, usize>> {
        self.0.count_by_content_type()
    }
}

/// Document store whose first listing pauses until the test has had its turn.
struct PausedListing {
    inner: SledDocumentStore,
    paused: AtomicBool,
    barrier: Barrier,
}

impl PausedListing {
    fn new() -> Self {
        Self { inner: sled_store(), paused: AtomicBool::new(true), barrier: Barrier::new(2) }
    }
}

impl DocumentStore for PausedListing {
    fn find_by_id(&self, id: DocId) -> search_core::Result<Option<Document>> {
        self.inner.find_by_id(id)
    }
    fn find_by_url(&self, url: &str) -> search_core::Result<Option<Document>> {
        self.inner.find_by_url(url)
    }
    fn save(&self, document: Document) -> search_core::Result<Document> {
        self.inner.save(document)
    }
    fn delete_by_id(&self, id: DocId) -> search_core::Result<()> {
        self.inner.delete_by_id(id)
    }
    fn find_all(&self) -> search_core::Result<Vec<Document>> {
        let listed = self.inner.find_all();
        if self.paused.swap(false, Ordering::SeqCst) {
            // listed; let the test act, then wait for it to finish
            self.barrier.wait();
            self.barrier.wait();
        }
        listed
    }
    fn find_by_keyword(&self, keyword: &str, page: PageRequest) -> search_core::Result<Page<Document>> {
        self.inner.find_by_keyword(keyword, page)
    }
    fn count_indexed(&self) -> search_core::Result<usize> {
        self.inner.count_indexed()
    }
    fn count_by_content_type(&self) -> search_core::Result<BTreeMap<String, usize>> {
        self.inner.count_by_content_type()
    }
}

struct Parts {
    index: Arc<IndexStore>,
    documents: Arc<dyn DocumentStore>,
    history: Arc<CountingHistory>,
}

fn parts(documents: Arc<dyn DocumentStore>, failing_history: bool) -> Parts {
    Parts { index: Arc::new(IndexStore::in_memory()), documents, history: Arc::new(CountingHistory::new(failing_history)) }
}

fn sled_store() -> SledDocumentStore {
    let db = sled::Config::new().temporary(true).open().unwrap();
    SledDocumentStore::new(&db).unwrap()
}

impl Parts {
    fn indexing(&self) -> IndexingService {
        IndexingService::new(Arc::clone(&self.index), Arc::clone(&self.documents), "text/html")
    }

    fn search(&self) -> SearchService {
        SearchService::new(Arc::clone(&self.index), Arc::clone(&self.documents), self.history.clone(), SearchConfig::default())
    }
}

#[test]
fn java_query_ranks_the_java_guide_first() {
    let (engine, docs) = engine_with_samples();
    let response = engine.search().search("Java programming", 0, 10).unwrap();
    assert!(response.total_results >= 1);
    let top = &response.results[0];
    assert_eq!(top.id, docs[0].id);
    assert!(top.score > 0.0);
    assert!(top.highlighted_content.contains("Java"));
    assert!(top.highlighted_content.contains("<em>"));
    assert_eq!(top.created_at, Some(docs[0].created_at));
    assert!(response.suggestions.is_empty());
}

#[test]
fn exact_title_term_round_trips() {
    let (engine, docs) = engine_with_samples();
    let response = engine.search().search("spring", 0, 10).unwrap();
    assert_eq!(response.total_results, 1);
    assert_eq!(response.results[0].id, docs[1].id);
    assert_eq!(response.results[0].title, "Spring Boot Tutorial");
    assert_eq!(response.results[0].url, "https://docs/spring");
}

#[test]
fn unknown_terms_return_empty_and_are_recorded() {
    let (engine, _) = engine_with_samples();
    let response = engine.search().search("nonexistent query xyz", 0, 10).unwrap();
    assert_eq!(response.total_results, 0);
    assert!(response.results.is_empty());

    let recent = engine.search().recent_searches(1).unwrap();
    assert_eq!(recent[0].query, "nonexistent query xyz");
    assert_eq!(recent[0].results_count, 0);
}

#[test]
fn blank_query_is_rejected_without_side_effects() {
    let (engine, _) = engine_with_samples();
    assert!(matches!(engine.search().search("   ", 0, 10), Err(SearchError::Validation(_))));
    assert!(engine.search().recent_searches(10).unwrap().is_empty());
}

#[test]
fn page_size_is_clamped() {
    let (engine, _) = engine_with_samples();
    let response = engine.search().search("design", 0, 1000).unwrap();
    assert_eq!(response.page_size, 100);
    let response = engine.search().search("design", 0, 0).unwrap();
    assert_eq!(response.page_size, 1);
}

#[test]
fn pages_slice_the_ranked_list() {
    let engine = SearchEngine::temporary(SearchConfig::default()).unwrap();
    for i in 0..7 {
        engine
            .indexing()
            .index_document(&format!("Note {i}"), "shared topic", &format!("https://notes/{i}"))
            .unwrap();
    }
    let mut seen = Vec::new();
    for page in 0..3 {
        let response = engine.search().search("shared", page, 3).unwrap();
        assert_eq!(response.total_results, 7);
        assert!(response.results.len() <= 3);
        seen.extend(response.results.iter().map(|r| r.id));
    }
    assert_eq!(seen.len(), 7);
    let mut unique = seen.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), seen.len());

    let beyond = engine.search().search("shared", 10, 3).unwrap();
    assert!(beyond.results.is_empty());
    assert_eq!(beyond.total_results, 7);
}

#[test]
fn reindexing_a_url_updates_in_place() {
    let (engine, docs) = engine_with_samples();
    let again = engine
        .indexing()
        .index_document("Java Programming Guide, 2nd edition", "Kotlin interop chapter.", "https://docs/java")
        .unwrap();
    assert_eq!(again.id, docs[0].id);
    assert_eq!(engine.indexing().all_documents().unwrap().len(), 3);

    let response = engine.search().search("java", 0, 10).unwrap();
    assert_eq!(response.total_results, 1);
    let response = engine.search().search("kotlin", 0, 10).unwrap();
    assert_eq!(response.results[0].id, docs[0].id);
    assert_eq!(engine.index().open_reader().unwrap().document_count(), 3);
}

#[test]
fn closed_index_falls_back_to_document_store() {
    let p = parts(Arc::new(sled_store()), false);
    let indexing = p.indexing();
    let doc = indexing.index_document("Rust Book", "Ownership and borrowing explained.", "https://rust").unwrap();
    indexing.index_document("Go Tour", "Goroutines and channels.", "https://go").unwrap();
    let search = p.search();

    p.index.close();
    let response = search.search("BORROWING", 0, 10).unwrap();
    assert_eq!(response.total_results, 1);
    assert_eq!(response.results[0].id, doc.id);
    assert_eq!(response.results[0].score, 1.0);
    assert_eq!(response.results[0].highlighted_content, "Ownership and borrowing explained.");
    assert_eq!(p.history.records.load(Ordering::SeqCst), 1);
    assert_eq!(p.history.recent_searches(1).unwrap()[0].results_count, 1);
}

#[test]
fn punctuation_query_goes_through_fallback() {
    let p = parts(Arc::new(sled_store()), false);
    p.indexing().index_document("C++ Primer", "Templates in C++.", "https://cpp").unwrap();
    let response = p.search().search("++", 0, 10).unwrap();
    assert_eq!(response.total_results, 1);
    assert_eq!(p.history.records.load(Ordering::SeqCst), 1);
}

#[test]
fn failing_history_never_fails_a_search() {
    let p = parts(Arc::new(sled_store()), true);
    p.indexing().index_document("Kept", "still searchable", "https://kept").unwrap();
    let response = p.search().search("searchable", 0, 10).unwrap();
    assert_eq!(response.total_results, 1);
    assert_eq!(p.history.records.load(Ordering::SeqCst), 1);
}

#[test]
fn unreachable_metadata_is_tolerated() {
    let p = parts(Arc::new(UnreachableLookups(sled_store())), false);
    p.indexing().index_document("Orphan", "metadata lookups fail", "https://orphan").unwrap();
    let response = p.search().search("metadata", 0, 10).unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].created_at, None);
}

#[test]
fn suggestion_errors_leave_an_empty_list() {
    struct Broken;
    impl Suggester for Broken {
        fn suggest(&self, _query: &str, _limit: usize) -> search_core::Result<Vec<String>> {
            Err(SearchError::IndexIo("suggest index missing".into()))
        }
    }
    let p = parts(Arc::new(sled_store()), false);
    p.indexing().index_document("Doc", "words", "https://doc").unwrap();
    let response = p.search().with_suggester(Arc::new(Broken)).search("words", 0, 10).unwrap();
    assert_eq!(response.total_results, 1);
    assert!(response.suggestions.is_empty());
}

#[test]
fn average_search_time_without_searches_is_no_data() {
    let engine = SearchEngine::temporary(SearchConfig::default()).unwrap();
    assert_eq!(engine.search().average_search_time(7).unwrap(), None);
    engine.search().search("anything", 0, 10).unwrap();
    assert!(engine.search().average_search_time(7).unwrap().is_some());
    assert_eq!(engine.search().popular_queries(7).unwrap()[0].query, "anything");
}

#[test]
fn index_failure_leaves_document_unindexed() {
    let p = parts(Arc::new(sled_store()), false);
    p.index.close();
    let err = p.indexing().index_document("Late", "never indexed", "https://late").unwrap_err();
    assert!(matches!(err, SearchError::IndexIo(_)));
    let stored = p.documents.find_by_url("https://late").unwrap().unwrap();
    assert!(!stored.is_indexed);
    assert_eq!(p.indexing().unindexed_documents().unwrap().len(), 1);
}

#[test]
fn update_and_delete_unknown_ids_are_not_found() {
    let (engine, _) = engine_with_samples();
    assert!(matches!(engine.indexing().update_document(999, "t", "c", "u"), Err(SearchError::NotFound(999))));
    assert!(matches!(engine.indexing().delete_document(999), Err(SearchError::NotFound(999))));
}

#[test]
fn delete_removes_from_index_and_store() {
    let (engine, docs) = engine_with_samples();
    engine.indexing().delete_document(docs[2].id).unwrap();
    let response = engine.search().search("database", 0, 10).unwrap();
    assert_eq!(response.total_results, 0);
    assert_eq!(engine.indexing().all_documents().unwrap().len(), 2);
}

#[test]
fn index_file_uses_extractor_and_defaults() {
    let engine = SearchEngine::temporary(SearchConfig::default()).unwrap();
    let doc = engine
        .indexing()
        .index_file(&PlainTextExtractor, b"plain text about compilers", "notes.txt", None, None)
        .unwrap();
    assert_eq!(doc.title, "notes.txt");
    assert_eq!(doc.url, "file://notes.txt");
    assert_eq!(doc.content_type, "text/plain");
    assert_eq!(doc.file_size, Some(26));
    assert!(doc.is_indexed);

    assert!(matches!(
        engine.indexing().index_file(&PlainTextExtractor, b"", "empty.txt", None, None),
        Err(SearchError::Validation(_))
    ));
    assert!(matches!(
        engine.indexing().index_file(&PlainTextExtractor, &[0xff, 0x00], "blob.bin", None, None),
        Err(SearchError::Extraction(_))
    ));

    let stats = engine.indexing().stats().unwrap();
    assert_eq!(stats.total_documents, 1);
    assert_eq!(stats.indexed_documents, 1);
    assert_eq!(stats.index_documents, 1);
    assert_eq!(stats.by_content_type.get("text/plain"), Some(&1));
}

#[test]
fn reindex_all_reports_counters() {
    let (engine, _) = engine_with_samples();
    let report = engine.indexing().reindex_all().wait().unwrap();
    assert_eq!(report.total, 3);
    assert_eq!(report.indexed, 3);
    assert_eq!(report.errors, 0);
    assert_eq!(engine.index().open_reader().unwrap().document_count(), 3);
    assert_eq!(engine.search().search("java", 0, 10).unwrap().total_results, 1);
}

#[test]
fn reindex_isolates_failures_per_document() {
    let p = parts(Arc::new(sled_store()), false);
    p.indexing().index_document("One", "first", "https://one").unwrap();
    p.indexing().index_document("Two", "second", "https://two").unwrap();
    p.index.close();

    let handle = p.indexing().reindex_all();
    let report = handle.wait().unwrap();
    assert_eq!(report, search_core::indexing::ReindexReport { total: 2, indexed: 0, errors: 2 });
    assert_eq!(p.documents.count_indexed().unwrap(), 0);
}

#[test]
fn searches_keep_working_during_optimize() {
    let (engine, _) = engine_with_samples();
    engine.indexing().index_document("Java Streams", "streams in java", "https://docs/streams").unwrap();
    let reader = engine.index().open_reader().unwrap();
    engine.indexing().optimize().unwrap();
    assert_eq!(reader.document_count(), 4);
    drop(reader);
    assert_eq!(engine.search().search("java", 0, 10).unwrap().total_results, 2);
    assert_eq!(engine.index().open_readers(), 0);
}

#[test]
fn documents_deleted_during_reindex_stay_deleted() {
    let store = Arc::new(PausedListing::new());
    let p = parts(store.clone(), false);
    let gone = p.indexing().index_document("Gone", "ephemeral words", "https://gone").unwrap();
    let kept = p.indexing().index_document("Kept", "durable words", "https://kept").unwrap();

    let handle = p.indexing().reindex_all();
    store.barrier.wait();
    p.indexing().delete_document(gone.id).unwrap();
    p.indexing().update_document(kept.id, "Kept", "revised words", "https://kept").unwrap();
    store.barrier.wait();

    let report = handle.wait().unwrap();
    assert_eq!(report, search_core::indexing::ReindexReport { total: 1, indexed: 1, errors: 0 });
    assert!(p.documents.find_by_id(gone.id).unwrap().is_none());
    assert_eq!(p.documents.find_by_id(kept.id).unwrap().unwrap().content, "revised words");

    let search = p.search();
    assert_eq!(search.search("ephemeral", 0, 10).unwrap().total_results, 0);
    assert_eq!(search.search("durable", 0, 10).unwrap().total_results, 0);
    assert_eq!(search.search("revised", 0, 10).unwrap().results[0].id, kept.id);
}

#[test]
fn concurrent_indexing_of_one_url_yields_one_document() {
    let engine = SearchEngine::temporary(SearchConfig::default()).unwrap();
    let ids: Vec<DocId> = thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|i| {
                let indexing = engine.indexing().clone();
                scope.spawn(move || indexing.index_document("Shared", &format!("version {i}"), "https://shared").unwrap().id)
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });
    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(engine.indexing().all_documents().unwrap().len(), 1);
    assert_eq!(engine.index().open_reader().unwrap().document_count(), 1);
}

#[test]
fn zero_max_page_size_still_serves_one_result_per_page() {
    let p = parts(Arc::new(sled_store()), false);
    p.indexing().index_document("Alpha", "common", "https://a").unwrap();
    p.indexing().index_document("Beta", "common", "https://b").unwrap();
    let config = SearchConfig { max_page_size: 0, ..SearchConfig::default() };
    let search = SearchService::new(Arc::clone(&p.index), Arc::clone(&p.documents), p.history.clone(), config);
    let response = search.search("common", 0, 10).unwrap();
    assert_eq!(response.page_size, 1);
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.total_results, 2);
}

#[test]
fn failed_update_leaves_document_marked_unindexed() {
    let p = parts(Arc::new(sled_store()), false);
    let doc = p.indexing().index_document("Draft", "first cut", "https://draft").unwrap();
    assert!(doc.is_indexed);

    p.index.close();
    let err = p.indexing().update_document(doc.id, "Draft", "second cut", "https://draft").unwrap_err();
    assert!(matches!(err, SearchError::IndexIo(_)));
    let stored = p.documents.find_by_id(doc.id).unwrap().unwrap();
    assert_eq!(stored.content, "second cut");
    assert!(!stored.is_indexed);
}

#[test]
fn queries_are_trimmed_before_recording() {
    let (engine, _) = engine_with_samples();
    let response = engine.search().search("  java ", 0, 10).unwrap();
    assert_eq!(response.query, "java");
    engine.search().search("java", 0, 10).unwrap();

    let popular = engine.search().popular_queries(7).unwrap();
    assert_eq!(popular.len(), 1);
    assert_eq!(popular[0].query, "java");
    assert_eq!(popular[0].count, 2);
}
