//! In-flight registrations.
//!
//! Two kinds of record, each in its own tree:
//!
//! - **pending** (`reg`): hex nonce → the document waiting for payment.
//! - **invoice** (`inv`): full DID → the payment request issued for it and
//!   the nonce it pays for.
//!
//! Nonce lookups never touch the invoice tree, whatever string a webhook
//! caller passes as the nonce.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::db::{DbResult, KvStore};
use crate::document::DidDocument;

/// A document waiting for its invoice to be paid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRegistration {
    pub document: DidDocument,
    pub requested_at: DateTime<Utc>,
}

/// The invoice most recently issued for a DID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRecord {
    pub payment_request: String,
    pub nonce: String,
}

#[derive(Debug, Clone)]
pub struct PendingStore {
    pending: Arc<dyn KvStore>,
    invoices: Arc<dyn KvStore>,
}

impl PendingStore {
    pub fn new(pending: Arc<dyn KvStore>, invoices: Arc<dyn KvStore>) -> Self {
        Self { pending, invoices }
    }

    pub fn put_pending(&self, nonce: &str, pending: &PendingRegistration) -> DbResult<()> {
        self.pending.set(nonce, &serde_json::to_vec(pending)?)
    }

    pub fn pending(&self, nonce: &str) -> DbResult<Option<PendingRegistration>> {
        decode(self.pending.get(nonce)?)
    }

    /// Atomically remove and return the pending record for `nonce`.
    /// Concurrent callers with the same nonce: at most one gets `Some`.
    pub fn take_pending(&self, nonce: &str) -> DbResult<Option<PendingRegistration>> {
        decode(self.pending.take(nonce)?)
    }

    pub fn put_invoice(&self, did: &str, invoice: &InvoiceRecord) -> DbResult<()> {
        self.invoices.set(did, &serde_json::to_vec(invoice)?)
    }

    pub fn invoice(&self, did: &str) -> DbResult<Option<InvoiceRecord>> {
        decode(self.invoices.get(did)?)
    }

    /// Drop the invoice record for `did` if it was issued for `nonce`.
    ///
    /// Returns whether a record was removed. A newer invoice (different
    /// nonce) is left in place.
    pub fn clear_invoice(&self, did: &str, nonce: &str) -> DbResult<bool> {
        match self.invoice(did)? {
            Some(record) if record.nonce == nonce => {
                self.invoices.delete(did)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(bytes: Option<Vec<u8>>) -> DbResult<Option<T>> {
    match bytes {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::Database;

    fn store() -> PendingStore {
        let db = Database::open_temporary().unwrap();
        PendingStore::new(
            Arc::new(db.tree("reg").unwrap()),
            Arc::new(db.tree("inv").unwrap()),
        )
    }

    fn pending(id: &str) -> PendingRegistration {
        PendingRegistration {
            document: DidDocument::new(id),
            requested_at: Utc::now(),
        }
    }

    #[test]
    fn pending_record_is_taken_once() {
        let store = store();
        let record = pending("example.com:alice");
        store.put_pending("ab12", &record).unwrap();

        assert_eq!(store.pending("ab12").unwrap(), Some(record.clone()));
        assert_eq!(store.take_pending("ab12").unwrap(), Some(record));
        assert_eq!(store.take_pending("ab12").unwrap(), None);
    }

    #[test]
    fn pending_record_json_shape() {
        let store = store();
        store.put_pending("n", &pending("example.com:alice")).unwrap();
        let raw = store.pending.get("n").unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();

        assert_eq!(value["document"]["id"], "did:web:example.com:alice");
        assert!(value["requestedAt"].is_string());
    }

    #[test]
    fn invoice_round_trip() {
        let store = store();
        let invoice = InvoiceRecord {
            payment_request: "lnbc1...".into(),
            nonce: "n1".into(),
        };
        store.put_invoice("did:web:example.com:alice", &invoice).unwrap();
        assert_eq!(
            store.invoice("did:web:example.com:alice").unwrap(),
            Some(invoice)
        );
    }

    #[test]
    fn clear_invoice_only_for_matching_nonce() {
        let store = store();
        let did = "did:web:example.com:alice";
        store
            .put_invoice(
                did,
                &InvoiceRecord {
                    payment_request: "lnbc-new".into(),
                    nonce: "new".into(),
                },
            )
            .unwrap();

        assert!(!store.clear_invoice(did, "old").unwrap());
        assert!(store.invoice(did).unwrap().is_some());

        assert!(store.clear_invoice(did, "new").unwrap());
        assert!(store.invoice(did).unwrap().is_none());
    }

    #[test]
    fn taking_a_did_as_nonce_leaves_invoice_alone() {
        let store = store();
        let did = "did:web:example.com:alice";
        let invoice = InvoiceRecord {
            payment_request: "lnbc1".into(),
            nonce: "n1".into(),
        };
        store.put_invoice(did, &invoice).unwrap();

        assert_eq!(store.take_pending(did).unwrap(), None);
        assert_eq!(store.invoice(did).unwrap(), Some(invoice));
    }
}
