//! In-memory table of the buffers the client has open.

use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use crate::protocol::TextDocumentItem;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    #[error("document is not open: {0}")]
    NotOpen(Url),
    #[error("stale version for {uri}: have {current}, got {received}")]
    StaleVersion {
        uri: Url,
        current: i32,
        received: i32,
    },
}

/// One open buffer.
#[derive(Debug, Clone)]
pub struct Document {
    text: Arc<str>,
    version: i32,
    language_id: String,
    /// Edited in the editor and not yet saved.
    dirty: bool,
}

impl Document {
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn version(&self) -> i32 {
        self.version
    }

    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// Immutable copy of a document handed to workers.
///
/// Sharing the text through `Arc` keeps snapshots cheap; the store replaces
/// the `Arc` on every change instead of mutating it.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    pub uri: Url,
    pub version: i32,
    pub text: Arc<str>,
}

#[derive(Debug, Default)]
pub struct DocumentStore {
    docs: HashMap<Url, Document>,
}

impl DocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly opened buffer. Reopening replaces the old entry.
    pub fn open(&mut self, item: TextDocumentItem) {
        let doc = Document {
            text: Arc::from(item.text),
            version: item.version,
            language_id: item.language_id,
            dirty: false,
        };
        if self.docs.insert(item.uri.clone(), doc).is_some() {
            tracing::warn!(uri = %item.uri, "document opened twice, replacing");
        }
    }

    /// Replace the text of an open document and mark it dirty.
    pub fn change(&mut self, uri: &Url, version: i32, text: String) -> Result<(), DocumentError> {
        let doc = self
            .docs
            .get_mut(uri)
            .ok_or_else(|| DocumentError::NotOpen(uri.clone()))?;
        if version < doc.version {
            return Err(DocumentError::StaleVersion {
                uri: uri.clone(),
                current: doc.version,
                received: version,
            });
        }
        doc.text = Arc::from(text);
        doc.version = version;
        doc.dirty = true;
        Ok(())
    }

    /// Mark an open document as saved. When the client includes the saved
    /// text it becomes the document text.
    pub fn save(&mut self, uri: &Url, text: Option<String>) -> Result<(), DocumentError> {
        let doc = self
            .docs
            .get_mut(uri)
            .ok_or_else(|| DocumentError::NotOpen(uri.clone()))?;
        if let Some(text) = text {
            doc.text = Arc::from(text);
        }
        doc.dirty = false;
        Ok(())
    }

    pub fn close(&mut self, uri: &Url) -> Result<Document, DocumentError> {
        self.docs
            .remove(uri)
            .ok_or_else(|| DocumentError::NotOpen(uri.clone()))
    }

    #[must_use]
    pub fn get(&self, uri: &Url) -> Option<&Document> {
        self.docs.get(uri)
    }

    #[must_use]
    pub fn snapshot(&self, uri: &Url) -> Option<DocumentSnapshot> {
        self.docs.get(uri).map(|doc| DocumentSnapshot {
            uri: uri.clone(),
            version: doc.version,
            text: Arc::clone(&doc.text),
        })
    }

    #[must_use]
    pub fn version(&self, uri: &Url) -> Option<i32> {
        self.docs.get(uri).map(Document::version)
    }

    #[must_use]
    pub fn is_open_and_dirty(&self, uri: &Url) -> bool {
        self.docs.get(uri).is_some_and(Document::is_dirty)
    }

    pub fn uris(&self) -> impl Iterator<Item = &Url> {
        self.docs.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}
