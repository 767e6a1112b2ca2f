//! Authoritative document metadata, kept outside the index.

use crate::error::{Result, SearchError};
use crate::index::DocumentFields;
use crate::DocId;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use std::collections::BTreeMap;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// 0 until the document is first saved.
    pub id: DocId,
    pub title: String,
    pub content: String,
    pub url: String,
    pub content_type: String,
    pub file_size: Option<u64>,
    pub is_indexed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub indexed_at: Option<OffsetDateTime>,
}

impl Document {
    pub fn new(title: &str, content: &str, url: &str, content_type: &str) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: 0,
            title: title.to_string(),
            content: content.to_string(),
            url: url.to_string(),
            content_type: content_type.to_string(),
            file_size: None,
            is_indexed: false,
            created_at: now,
            updated_at: now,
            indexed_at: None,
        }
    }

    /// The copy of this document handed to the index.
    pub fn index_fields(&self) -> DocumentFields {
        DocumentFields {
            title: self.title.clone(),
            content: self.content.clone(),
            url: self.url.clone(),
            content_type: self.content_type.clone(),
        }
    }
}

/// Sled value for a [`Document`]. Timestamps keep the compact binary encoding, since the
/// RFC 3339 option codec cannot be read back by bincode.
#[derive(Serialize, Deserialize)]
struct DocumentRecord {
    id: DocId,
    title: String,
    content: String,
    url: String,
    content_type: String,
    file_size: Option<u64>,
    is_indexed: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    indexed_at: Option<OffsetDateTime>,
}

impl From<Document> for DocumentRecord {
    fn from(d: Document) -> Self {
        Self {
            id: d.id,
            title: d.title,
            content: d.content,
            url: d.url,
            content_type: d.content_type,
            file_size: d.file_size,
            is_indexed: d.is_indexed,
            created_at: d.created_at,
            updated_at: d.updated_at,
            indexed_at: d.indexed_at,
        }
    }
}

impl From<DocumentRecord> for Document {
    fn from(r: DocumentRecord) -> Self {
        Self {
            id: r.id,
            title: r.title,
            content: r.content,
            url: r.url,
            content_type: r.content_type,
            file_size: r.file_size,
            is_indexed: r.is_indexed,
            created_at: r.created_at,
            updated_at: r.updated_at,
            indexed_at: r.indexed_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Matches across all pages.
    pub total: usize,
}

pub trait DocumentStore: Send + Sync {
    fn find_by_id(&self, id: DocId) -> Result<Option<Document>>;
    fn find_by_url(&self, url: &str) -> Result<Option<Document>>;
    /// Insert or update. A document with id 0 is assigned a fresh id.
    fn save(&self, document: Document) -> Result<Document>;
    fn delete_by_id(&self, id: DocId) -> Result<()>;
    fn find_all(&self) -> Result<Vec<Document>>;
    /// Case-insensitive substring match on title or content, in id order.
    fn find_by_keyword(&self, keyword: &str, page: PageRequest) -> Result<Page<Document>>;
    fn count_indexed(&self) -> Result<usize>;
    fn count_by_content_type(&self) -> Result<BTreeMap<String, usize>>;
}

pub struct SledDocumentStore {
    db: sled::Db,
    docs: sled::Tree,
    urls: sled::Tree,
}

impl SledDocumentStore {
    pub fn new(db: &sled::Db) -> Result<Self> {
        let docs = db.open_tree("documents").map_err(SearchError::store)?;
        let urls = db.open_tree("document_urls").map_err(SearchError::store)?;
        Ok(Self { db: db.clone(), docs, urls })
    }

    fn decode(bytes: &[u8]) -> Result<Document> {
        let record: DocumentRecord = bincode::deserialize(bytes).map_err(SearchError::store)?;
        Ok(record.into())
    }

    fn encode(document: &Document) -> Result<Vec<u8>> {
        bincode::serialize(&DocumentRecord::from(document.clone())).map_err(SearchError::store)
    }

    fn scan(&self) -> impl Iterator<Item = Result<Document>> + '_ {
        self.docs
            .iter()
            .values()
            .map(|value| value.map_err(SearchError::store).and_then(|bytes| Self::decode(&bytes)))
    }
}

fn decode_id(bytes: &[u8]) -> Result<DocId> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| SearchError::Store(format!("corrupt document id of {} bytes", bytes.len())))?;
    Ok(DocId::from_be_bytes(raw))
}

impl DocumentStore for SledDocumentStore {
    fn find_by_id(&self, id: DocId) -> Result<Option<Document>> {
        match self.docs.get(id.to_be_bytes()).map_err(SearchError::store)? {
            Some(bytes) => Self::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn find_by_url(&self, url: &str) -> Result<Option<Document>> {
        match self.urls.get(url.as_bytes()).map_err(SearchError::store)? {
            Some(id) => self.find_by_id(decode_id(&id)?),
            None => Ok(None),
        }
    }

    /// The url check and both tree writes run in one transaction, so two documents can
    /// never claim the same url.
    fn save(&self, mut document: Document) -> Result<Document> {
        if document.id == 0 {
            document.id = self.db.generate_id().map_err(SearchError::store)? + 1;
        }
        let bytes = Self::encode(&document)?;
        let key = document.id.to_be_bytes();
        let url = document.url.as_str();
        let id = document.id;

        let outcome = (&self.docs, &self.urls).transaction(|(docs, urls)| {
            if let Some(owner) = urls.get(url.as_bytes())? {
                let owner = decode_id(&owner).map_err(ConflictableTransactionError::Abort)?;
                if owner != id {
                    return Err(ConflictableTransactionError::Abort(SearchError::Validation(format!(
                        "url {url} already belongs to document {owner}"
                    ))));
                }
            }
            if let Some(previous) = docs.get(key)? {
                let previous = Self::decode(&previous).map_err(ConflictableTransactionError::Abort)?;
                if previous.url != url {
                    urls.remove(previous.url.as_bytes())?;
                }
            }
            docs.insert(&key[..], bytes.as_slice())?;
            urls.insert(url.as_bytes(), &key[..])?;
            Ok(())
        });
        match outcome {
            Ok(()) => Ok(document),
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(SearchError::store(err)),
        }
    }

    fn delete_by_id(&self, id: DocId) -> Result<()> {
        let key = id.to_be_bytes();
        let outcome = (&self.docs, &self.urls).transaction(|(docs, urls)| {
            if let Some(bytes) = docs.remove(&key[..])? {
                let document = Self::decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
                urls.remove(document.url.as_bytes())?;
            }
            Ok(())
        });
        match outcome {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(SearchError::store(err)),
        }
    }

    fn find_all(&self) -> Result<Vec<Document>> {
        self.scan().collect()
    }

    fn find_by_keyword(&self, keyword: &str, page: PageRequest) -> Result<Page<Document>> {
        let needle = keyword.to_lowercase();
        let mut total = 0;
        let mut items = Vec::new();
        let skip = page.page.saturating_mul(page.size);
        for document in self.scan() {
            let document = document?;
            if document.title.to_lowercase().contains(&needle) || document.content.to_lowercase().contains(&needle) {
                if total >= skip && items.len() < page.size {
                    items.push(document);
                }
                total += 1;
            }
        }
        Ok(Page { items, total })
    }

    fn count_indexed(&self) -> Result<usize> {
        let mut count = 0;
        for document in self.scan() {
            if document?.is_indexed {
                count += 1;
            }
        }
        Ok(count)
    }

    fn count_by_content_type(&self) -> Result<BTreeMap<String, usize>> {
        let mut counts = BTreeMap::new();
        for document in self.scan() {
            *counts.entry(document?.content_type).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SledDocumentStore {
        let db = sled::Config::new().temporary(true).open().unwrap();
        SledDocumentStore::new(&db).unwrap()
    }

    #[test]
    fn save_assigns_ids_and_indexes_urls() {
        let store = store();
        let a = store.save(Document::new("A", "alpha", "https://a", "text/plain")).unwrap();
        let b = store.save(Document::new("B", "beta", "https://b", "text/html")).unwrap();
        assert!(a.id > 0);
        assert_ne!(a.id, b.id);
        assert_eq!(store.find_by_url("https://b").unwrap().unwrap().id, b.id);
        assert_eq!(store.find_by_id(a.id).unwrap().unwrap().title, "A");
    }

    #[test]
    fn indexed_documents_read_back_intact() {
        let store = store();
        let mut doc = store.save(Document::new("Java Guide", "java text", "https://java", "text/html")).unwrap();
        doc.is_indexed = true;
        doc.file_size = Some(9);
        doc.indexed_at = Some(OffsetDateTime::now_utc());
        store.save(doc.clone()).unwrap();

        assert_eq!(store.find_by_id(doc.id).unwrap().unwrap(), doc);
        assert_eq!(store.find_by_url("https://java").unwrap().unwrap(), doc);
        assert_eq!(store.find_all().unwrap(), vec![doc.clone()]);
        store.delete_by_id(doc.id).unwrap();
        assert!(store.find_by_url("https://java").unwrap().is_none());
    }

    #[test]
    fn changing_url_moves_the_lookup() {
        let store = store();
        let mut doc = store.save(Document::new("A", "alpha", "https://old", "text/plain")).unwrap();
        doc.url = "https://new".into();
        store.save(doc.clone()).unwrap();
        assert!(store.find_by_url("https://old").unwrap().is_none());
        assert_eq!(store.find_by_url("https://new").unwrap().unwrap().id, doc.id);
    }

    #[test]
    fn urls_are_unique() {
        let store = store();
        store.save(Document::new("A", "alpha", "https://same", "text/plain")).unwrap();
        let err = store.save(Document::new("B", "beta", "https://same", "text/plain")).unwrap_err();
        assert!(matches!(err, SearchError::Validation(_)));
    }

    #[test]
    fn keyword_search_is_case_insensitive_and_paged() {
        let store = store();
        for i in 0..5 {
            store
                .save(Document::new(&format!("Rust note {i}"), "body", &format!("https://n/{i}"), "text/plain"))
                .unwrap();
        }
        store.save(Document::new("Other", "mentions RUST too", "https://other", "text/plain")).unwrap();
        store.save(Document::new("Unrelated", "nothing", "https://x", "text/plain")).unwrap();

        let first = store.find_by_keyword("rust", PageRequest { page: 0, size: 4 }).unwrap();
        assert_eq!(first.total, 6);
        assert_eq!(first.items.len(), 4);
        let second = store.find_by_keyword("rust", PageRequest { page: 1, size: 4 }).unwrap();
        assert_eq!(second.items.len(), 2);
        assert_eq!(second.items[1].title, "Other");
        let beyond = store.find_by_keyword("rust", PageRequest { page: 5, size: 4 }).unwrap();
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.total, 6);
    }

    #[test]
    fn counts_and_delete() {
        let store = store();
        let mut a = store.save(Document::new("A", "alpha", "https://a", "text/plain")).unwrap();
        store.save(Document::new("B", "beta", "https://b", "text/html")).unwrap();
        a.is_indexed = true;
        store.save(a.clone()).unwrap();
        assert_eq!(store.count_indexed().unwrap(), 1);
        assert_eq!(store.count_by_content_type().unwrap().get("text/html"), Some(&1));

        store.delete_by_id(a.id).unwrap();
        assert!(store.find_by_id(a.id).unwrap().is_none());
        assert!(store.find_by_url("https://a").unwrap().is_none());
        assert_eq!(store.find_all().unwrap().len(), 1);
    }
}
