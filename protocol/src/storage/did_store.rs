//! Finalized DID documents.

use std::sync::Arc;

use tracing::debug;

use super::db::{DbResult, KvStore};
use crate::didweb::DidWebUrl;
use crate::document::DidDocument;

/// Store of issued documents, keyed by the method-specific id
/// (`example.com:alice`).
#[derive(Debug, Clone)]
pub struct DidStore {
    store: Arc<dyn KvStore>,
}

impl DidStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Persist `doc` under the canonical id derived from `doc.id`.
    ///
    /// Returns `false` if a document is already stored under that id; the
    /// stored document is never replaced.
    pub fn register(&self, doc: &DidDocument) -> DbResult<bool> {
        let key = DidWebUrl::parse(&doc.id)?.id();
        let bytes = serde_json::to_vec(doc)?;
        let inserted = self.store.insert_if_absent(&key, &bytes)?;
        if inserted {
            debug!(id = %key, "stored did document");
        }
        Ok(inserted)
    }

    /// Look up a document by method-specific id.
    pub fn resolve(&self, id: &str) -> DbResult<Option<DidDocument>> {
        match self.store.get(id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether a document exists for `id`.
    pub fn contains(&self, id: &str) -> DbResult<bool> {
        Ok(self.store.get(id)?.is_some())
    }

    /// Remove the document for `id`. Missing ids are ignored.
    pub fn delete(&self, id: &str) -> DbResult<()> {
        self.store.delete(id)
    }
}
