//! Inverted index store.
//!
//! Writes are buffered by a single [`IndexWriter`] and published by `commit` as a new
//! immutable [`Generation`]. Readers pin the generation that was current when they were
//! opened, so later commits never change what an open reader sees.
//!
//! A generation is a list of immutable segments, each paired with the set of its documents
//! that have been deleted (tombstoned) since it was written. Tombstoned entries stay in the
//! segment until [`IndexStore::optimize`] merges all live documents into a single segment.

use crate::error::{Result, SearchError};
use crate::persist::{self, IndexPaths, MetaFile, SegmentMeta};
use crate::tokenizer::tokens;
use crate::{DocId, SegmentId};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;

/// Indexed (tokenized) fields. `url` and `content_type` are stored only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    Title,
    Content,
}

impl Field {
    pub const ALL: [Field; 2] = [Field::Title, Field::Content];

    pub fn name(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Content => "content",
        }
    }
}

/// Raw field values handed to the index for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentFields {
    pub title: String,
    pub content: String,
    pub url: String,
    pub content_type: String,
}

impl DocumentFields {
    fn text(&self, field: Field) -> &str {
        match field {
            Field::Title => &self.title,
            Field::Content => &self.content,
        }
    }
}

/// The denormalized copy of a document kept by the index for display and highlighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFields {
    pub id: DocId,
    pub title: String,
    pub content: String,
    pub url: String,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    pub freq: u32,
    pub positions: Vec<u32>,
}

type FieldTerms = HashMap<Field, BTreeMap<String, Vec<u32>>>;

/// A document analyzed by `add`, waiting for the next commit.
struct PendingDoc {
    stored: StoredFields,
    terms: FieldTerms,
}

impl PendingDoc {
    fn analyze(id: DocId, fields: &DocumentFields) -> Self {
        let mut terms: FieldTerms = HashMap::new();
        for field in Field::ALL {
            for token in tokens(fields.text(field)) {
                terms
                    .entry(field)
                    .or_default()
                    .entry(token.term)
                    .or_default()
                    .push(token.position as u32);
            }
        }
        let stored = StoredFields {
            id,
            title: fields.title.clone(),
            content: fields.content.clone(),
            url: fields.url.clone(),
            content_type: fields.content_type.clone(),
        };
        Self { stored, terms }
    }
}

/// Immutable unit of the index. Posting lists are sorted by doc id.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub postings: HashMap<Field, HashMap<String, Vec<Posting>>>,
    pub stored: HashMap<DocId, StoredFields>,
}

impl Segment {
    fn build(id: SegmentId, docs: BTreeMap<DocId, PendingDoc>) -> Self {
        let mut segment = Segment { id, ..Default::default() };
        // BTreeMap iteration keeps every posting list in doc id order
        for (doc_id, doc) in docs {
            for (field, terms) in doc.terms {
                let field_postings = segment.postings.entry(field).or_default();
                for (term, positions) in terms {
                    field_postings.entry(term).or_default().push(Posting {
                        doc_id,
                        freq: positions.len() as u32,
                        positions,
                    });
                }
            }
            segment.stored.insert(doc_id, doc.stored);
        }
        segment
    }

    /// Merge the live documents of `views` into one segment without tombstones.
    fn merge(id: SegmentId, views: &[SegmentView]) -> Self {
        let mut merged = Segment { id, ..Default::default() };
        for view in views {
            for (field, terms) in &view.segment.postings {
                let target = merged.postings.entry(*field).or_default();
                for (term, postings) in terms {
                    let live = postings.iter().filter(|p| !view.deleted.contains(&p.doc_id)).cloned();
                    target.entry(term.clone()).or_default().extend(live);
                }
            }
            for (doc_id, stored) in &view.segment.stored {
                if !view.deleted.contains(doc_id) {
                    merged.stored.insert(*doc_id, stored.clone());
                }
            }
        }
        for terms in merged.postings.values_mut() {
            terms.retain(|_, postings| !postings.is_empty());
            for postings in terms.values_mut() {
                postings.sort_by_key(|p| p.doc_id);
            }
        }
        merged
    }

    fn postings(&self, field: Field, term: &str) -> &[Posting] {
        self.postings
            .get(&field)
            .and_then(|terms| terms.get(term))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// A segment as seen by one generation.
#[derive(Debug, Clone)]
struct SegmentView {
    segment: Arc<Segment>,
    deleted: Arc<HashSet<DocId>>,
}

impl SegmentView {
    fn new(segment: Arc<Segment>) -> Self {
        Self { segment, deleted: Arc::default() }
    }

    fn is_live(&self, doc_id: DocId) -> bool {
        self.segment.stored.contains_key(&doc_id) && !self.deleted.contains(&doc_id)
    }

    fn live_count(&self) -> usize {
        self.segment.stored.len() - self.deleted.len()
    }
}

/// A published, immutable state of the index.
#[derive(Debug, Default)]
pub struct Generation {
    number: u64,
    segments: Vec<SegmentView>,
}

impl Generation {
    fn to_meta(&self, next_segment_id: SegmentId) -> MetaFile {
        let segments = self
            .segments
            .iter()
            .map(|view| {
                let mut deleted: Vec<DocId> = view.deleted.iter().copied().collect();
                deleted.sort_unstable();
                SegmentMeta { id: view.segment.id, deleted }
            })
            .collect();
        MetaFile {
            version: persist::FORMAT_VERSION,
            generation: self.number,
            next_segment_id,
            segments,
            committed_at: time::OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        }
    }
}

#[derive(Default)]
struct WriterState {
    pending_docs: BTreeMap<DocId, PendingDoc>,
    pending_deletes: HashSet<DocId>,
    next_segment_id: SegmentId,
}

impl WriterState {
    fn has_pending(&self) -> bool {
        !self.pending_docs.is_empty() || !self.pending_deletes.is_empty()
    }

    fn clear(&mut self) {
        self.pending_docs.clear();
        self.pending_deletes.clear();
    }
}

pub struct IndexStore {
    paths: Option<IndexPaths>,
    current: RwLock<Arc<Generation>>,
    writer: Mutex<WriterState>,
    open_readers: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl IndexStore {
    /// An index that lives only in memory.
    pub fn in_memory() -> Self {
        Self::from_parts(None, Generation::default(), 0)
    }

    /// Open (or create) an index directory and load its last committed generation.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let paths = IndexPaths::new(root);
        let (generation, next_segment_id) = match persist::load_meta(&paths).map_err(SearchError::index_io)? {
            Some(meta) => {
                let mut segments = Vec::with_capacity(meta.segments.len());
                for seg in &meta.segments {
                    let segment = persist::load_segment(&paths, seg.id).map_err(SearchError::index_io)?;
                    segments.push(SegmentView {
                        segment: Arc::new(segment),
                        deleted: Arc::new(seg.deleted.iter().copied().collect()),
                    });
                }
                (Generation { number: meta.generation, segments }, meta.next_segment_id)
            }
            None => (Generation::default(), 0),
        };
        let live: usize = generation.segments.iter().map(SegmentView::live_count).sum();
        tracing::info!(root = %paths.root.display(), generation = generation.number, docs = live, "opened index");
        Ok(Self::from_parts(Some(paths), generation, next_segment_id))
    }

    fn from_parts(paths: Option<IndexPaths>, generation: Generation, next_segment_id: SegmentId) -> Self {
        Self {
            paths,
            current: RwLock::new(Arc::new(generation)),
            writer: Mutex::new(WriterState { next_segment_id, ..Default::default() }),
            open_readers: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SearchError::IndexIo("index store is closed".into()));
        }
        Ok(())
    }

    /// Acquire the single writer. Blocks while another writer or `optimize` is active.
    pub fn writer(&self) -> Result<IndexWriter<'_>> {
        self.ensure_open()?;
        let state = self.writer.lock();
        Ok(IndexWriter { store: self, state })
    }

    /// Open a reader pinned to the current generation. Dropping the reader releases it.
    pub fn open_reader(&self) -> Result<IndexReader> {
        self.ensure_open()?;
        let generation = self.current.read().clone();
        self.open_readers.fetch_add(1, Ordering::SeqCst);
        Ok(IndexReader { generation, open_readers: Arc::clone(&self.open_readers) })
    }

    /// Index a document, superseding any committed entry with the same id, and commit.
    pub fn replace(&self, doc_id: DocId, fields: &DocumentFields) -> Result<u64> {
        let mut writer = self.writer()?;
        writer.delete(doc_id);
        writer.add(doc_id, fields);
        writer.commit()
    }

    /// Delete a document and commit.
    pub fn remove(&self, doc_id: DocId) -> Result<u64> {
        let mut writer = self.writer()?;
        writer.delete(doc_id);
        writer.commit()
    }

    /// Merge every live document into a single segment, dropping tombstoned entries.
    pub fn optimize(&self) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.writer.lock();
        let base = self.current.read().clone();
        let fragmented = base.segments.len() > 1 || base.segments.iter().any(|view| !view.deleted.is_empty());
        if !fragmented {
            tracing::debug!(generation = base.number, "index already optimized");
            return Ok(());
        }

        let merged = Segment::merge(state.next_segment_id, &base.segments);
        let next_segment_id = state.next_segment_id + 1;
        let mut new_segments = Vec::new();
        let mut segments = Vec::new();
        if !merged.stored.is_empty() {
            let segment = Arc::new(merged);
            new_segments.push(Arc::clone(&segment));
            segments.push(SegmentView::new(segment));
        }
        let generation = Generation { number: base.number + 1, segments };
        let number = self.publish(generation, next_segment_id, &new_segments)?;
        state.next_segment_id = next_segment_id;

        if let Some(paths) = &self.paths {
            let live: HashSet<SegmentId> = new_segments.iter().map(|s| s.id).collect();
            match persist::remove_unreferenced_segments(paths, &live) {
                Ok(removed) => tracing::debug!(removed, "removed merged segment files"),
                Err(err) => tracing::warn!(error = %format!("{err:#}"), "could not remove merged segment files"),
            }
        }
        tracing::info!(generation = number, "index optimization completed");
        Ok(())
    }

    /// Refuse all further reads and writes. Open readers stay valid.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        tracing::info!("index store closed");
    }

    pub fn generation(&self) -> u64 {
        self.current.read().number
    }

    /// Number of readers currently alive.
    pub fn open_readers(&self) -> usize {
        self.open_readers.load(Ordering::SeqCst)
    }

    /// Persist then swap in `generation`. Nothing becomes visible if persisting fails.
    fn publish(&self, generation: Generation, next_segment_id: SegmentId, new_segments: &[Arc<Segment>]) -> Result<u64> {
        if let Some(paths) = &self.paths {
            for segment in new_segments {
                persist::save_segment(paths, segment).map_err(SearchError::index_io)?;
            }
            persist::save_meta(paths, &generation.to_meta(next_segment_id)).map_err(SearchError::index_io)?;
        }
        let number = generation.number;
        *self.current.write() = Arc::new(generation);
        Ok(number)
    }
}

/// Exclusive handle for buffering writes. Uncommitted changes are discarded on drop.
pub struct IndexWriter<'a> {
    store: &'a IndexStore,
    state: MutexGuard<'a, WriterState>,
}

impl IndexWriter<'_> {
    /// Analyze and buffer a document. A committed entry with the same id is superseded.
    pub fn add(&mut self, doc_id: DocId, fields: &DocumentFields) {
        self.state.pending_docs.insert(doc_id, PendingDoc::analyze(doc_id, fields));
    }

    /// Tombstone a document, including one added earlier in this batch.
    pub fn delete(&mut self, doc_id: DocId) {
        self.state.pending_docs.remove(&doc_id);
        self.state.pending_deletes.insert(doc_id);
    }

    /// Publish the buffered changes as a new generation and return its number.
    /// On failure the batch is rolled back and the previous generation stays current.
    pub fn commit(mut self) -> Result<u64> {
        self.store.ensure_open()?;
        let docs = std::mem::take(&mut self.state.pending_docs);
        let deletes = std::mem::take(&mut self.state.pending_deletes);
        let base = self.store.current.read().clone();

        let superseded: HashSet<DocId> = deletes.iter().copied().chain(docs.keys().copied()).collect();
        let mut segments = base.segments.clone();
        for view in segments.iter_mut() {
            let hits: Vec<DocId> = superseded.iter().copied().filter(|id| view.is_live(*id)).collect();
            if !hits.is_empty() {
                Arc::make_mut(&mut view.deleted).extend(hits);
            }
        }

        let added = docs.len();
        let mut next_segment_id = self.state.next_segment_id;
        let mut new_segments = Vec::new();
        if !docs.is_empty() {
            let segment = Arc::new(Segment::build(next_segment_id, docs));
            next_segment_id += 1;
            new_segments.push(Arc::clone(&segment));
            segments.push(SegmentView::new(segment));
        }

        let generation = Generation { number: base.number + 1, segments };
        let number = self.store.publish(generation, next_segment_id, &new_segments)?;
        self.state.next_segment_id = next_segment_id;
        tracing::debug!(generation = number, added, deleted = deletes.len(), "committed index changes");
        Ok(number)
    }

    pub fn rollback(mut self) {
        self.state.clear();
    }
}

impl Drop for IndexWriter<'_> {
    fn drop(&mut self) {
        if self.state.has_pending() {
            tracing::debug!("discarding uncommitted index changes");
            self.state.clear();
        }
    }
}

/// Point-in-time view of the index.
pub struct IndexReader {
    generation: Arc<Generation>,
    open_readers: Arc<AtomicUsize>,
}

impl IndexReader {
    pub fn generation(&self) -> u64 {
        self.generation.number
    }

    /// Live postings of `term` in `field` across all segments.
    pub fn postings_for<'a>(&'a self, term: &'a str, field: Field) -> impl Iterator<Item = &'a Posting> + 'a {
        self.generation.segments.iter().flat_map(move |view| {
            view.segment
                .postings(field, term)
                .iter()
                .filter(move |p| !view.deleted.contains(&p.doc_id))
        })
    }

    /// Number of live documents containing `term` in `field`.
    pub fn doc_freq(&self, term: &str, field: Field) -> usize {
        self.postings_for(term, field).count()
    }

    pub fn stored_fields(&self, doc_id: DocId) -> Option<&StoredFields> {
        self.generation
            .segments
            .iter()
            .rev()
            .find(|view| view.is_live(doc_id))
            .and_then(|view| view.segment.stored.get(&doc_id))
    }

    pub fn document_count(&self) -> usize {
        self.generation.segments.iter().map(SegmentView::live_count).sum()
    }

    pub fn segment_count(&self) -> usize {
        self.generation.segments.len()
    }
}

impl Drop for IndexReader {
    fn drop(&mut self) {
        self.open_readers.fetch_sub(1, Ordering::SeqCst);
    }
}
