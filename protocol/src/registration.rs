//! # Registration — Payment-Gated Identity Issuance
//!
//! A new identity goes through four states:
//!
//! ```text
//! Requested ──► InvoicePending ──► Paid ──► Finalized
//!     │
//!     └──► Rejected (duplicate, foreign domain, no assertion method)
//! ```
//!
//! [`RegistrationService::request_registration`] validates the identifier,
//! builds the document and obtains an invoice. The document waits in the
//! [`PendingStore`] under a random nonce that is embedded in the gateway's
//! webhook URL. [`RegistrationService::confirm_payment`] is called when
//! that webhook fires: it atomically takes the pending record and commits
//! the document to the [`DidStore`].
//!
//! ## Concurrency
//!
//! The stores are shared by every request with no extra locking. Finalize
//! relies on [`PendingStore::take_pending`] being a single atomic
//! read-and-remove: of several deliveries of the same webhook, exactly one
//! finds the record. The writes in `request_registration` are not
//! transactional; a crash between them leaves either an orphaned pending
//! record (harmless, never paid) or an invoice record pointing at a nonce
//! that does not exist (ignored by the idempotency check).

use std::sync::Arc;

use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{
    DEFAULT_INVOICE_AMOUNT, DID_TREE, INVOICE_TREE, NONCE_LENGTH, REGISTRATION_TREE,
};
use crate::didweb::{DidWebError, DidWebUrl};
use crate::document::{DidDocument, DocumentError, Service, VerificationMethod, VerificationRelationship};
use crate::payment::{GatewayError, InvoiceRequest, PaymentGateway};
use crate::storage::{Database, DbError, DidStore, InvoiceRecord, PendingRegistration, PendingStore};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The identifier does not parse.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(#[from] DidWebError),

    /// The identifier is not a path under the served domain.
    #[error("id must be in the format {domain}:name, got '{id}'")]
    InvalidDomain { domain: String, id: String },

    /// A document is already registered under this identifier.
    #[error("did exists: {0}")]
    DuplicateIdentifier(String),

    /// The document would carry no assertion method.
    #[error("did document must have at least one assertion verification method")]
    NoAssertionMethod,

    /// No pending registration for the nonce, either never issued or
    /// already consumed.
    #[error("unknown or already used payment nonce")]
    UnknownNonce,

    #[error("invalid document: {0}")]
    Document(#[from] DocumentError),

    #[error("payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("storage error: {0}")]
    Store(#[from] DbError),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One key submitted for registration and the relationships it serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInput {
    /// Relationship names such as `assertionMethod`. Matched
    /// case-insensitively; unknown names are ignored.
    #[serde(default)]
    pub purposes: Vec<String>,
    pub verification_method: VerificationMethod,
}

/// Where an identifier is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RegistrationState {
    /// Nothing is known about the identifier.
    Requested,
    /// An invoice has been issued and not yet paid.
    InvoicePending,
    /// The document is registered and resolvable.
    Finalized,
}

/// The invoice handed back to a registering client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedInvoice {
    /// Full DID the invoice pays for.
    pub did: String,
    pub payment_request: String,
    /// `true` when an earlier invoice for the same document was returned
    /// instead of a new one.
    pub reused: bool,
}

/// Settings for [`RegistrationService`].
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    /// DNS name identities are issued under, e.g. `example.com`.
    pub domain: String,
    /// Base URL the gateway calls back on, e.g. `https://example.com`.
    pub public_url: String,
    /// Invoice amount in satoshis.
    pub invoice_amount: u64,
}

impl RegistrationConfig {
    /// Defaults for `domain`: webhook on `https://<domain>`, standard amount.
    pub fn for_domain(domain: impl Into<String>) -> Self {
        let domain = domain.into();
        Self {
            public_url: format!("https://{domain}"),
            domain,
            invoice_amount: DEFAULT_INVOICE_AMOUNT,
        }
    }
}

// ---------------------------------------------------------------------------
// RegistrationService
// ---------------------------------------------------------------------------

/// Orchestrates registration requests and payment confirmations.
#[derive(Clone)]
pub struct RegistrationService {
    config: RegistrationConfig,
    dids: DidStore,
    pending: PendingStore,
    gateway: Arc<dyn PaymentGateway>,
}

impl std::fmt::Debug for RegistrationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RegistrationService {
    pub fn new(
        config: RegistrationConfig,
        dids: DidStore,
        pending: PendingStore,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let mut config = config;
        config.public_url = config.public_url.trim_end_matches('/').to_string();
        Self {
            config,
            dids,
            pending,
            gateway,
        }
    }

    /// Build a service over the standard trees of `db`.
    pub fn from_database(
        db: &Database,
        config: RegistrationConfig,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Result<Self, DbError> {
        let dids = DidStore::new(Arc::new(db.tree(DID_TREE)?));
        let pending = PendingStore::new(
            Arc::new(db.tree(REGISTRATION_TREE)?),
            Arc::new(db.tree(INVOICE_TREE)?),
        );
        Ok(Self::new(config, dids, pending, gateway))
    }

    pub fn domain(&self) -> &str {
        &self.config.domain
    }

    /// The store of finalized documents.
    pub fn dids(&self) -> &DidStore {
        &self.dids
    }

    /// Request an identity and get an invoice to pay for it.
    ///
    /// `id` is `<domain>:<name>[:<name>...]`, with or without the
    /// `did:web:` prefix. Asking twice for the same identifier and the same
    /// document before paying returns the same invoice, provided the
    /// gateway still accepts it.
    pub async fn request_registration(
        &self,
        id: &str,
        keys: Vec<KeyInput>,
        services: Vec<Service>,
    ) -> Result<IssuedInvoice, RegistrationError> {
        let parsed = self.normalize(id)?;
        let canonical = parsed.id();

        if self.dids.contains(&canonical)? {
            return Err(RegistrationError::DuplicateIdentifier(parsed.did()));
        }

        let doc = build_document(&canonical, keys, services)?;

        if let Some(payment_request) = self.reusable_invoice(&doc).await? {
            info!(did = %doc.id, "returning existing invoice");
            return Ok(IssuedInvoice {
                did: doc.id,
                payment_request,
                reused: true,
            });
        }

        let nonce = generate_nonce();
        let request = InvoiceRequest::incoming(
            self.config.invoice_amount,
            format!("Register {}", doc.id),
            format!("{}/paid/{}", self.config.public_url, nonce),
        );
        let invoice = self.gateway.create_invoice(&request).await?;

        self.pending.put_pending(
            &nonce,
            &PendingRegistration {
                document: doc.clone(),
                requested_at: Utc::now(),
            },
        )?;
        self.pending.put_invoice(
            &doc.id,
            &InvoiceRecord {
                payment_request: invoice.payment_request.clone(),
                nonce: nonce.clone(),
            },
        )?;

        info!(
            did = %doc.id,
            nonce = nonce_prefix(&nonce),
            amount = self.config.invoice_amount,
            "invoice issued"
        );

        Ok(IssuedInvoice {
            did: doc.id,
            payment_request: invoice.payment_request,
            reused: false,
        })
    }

    /// Commit the registration paid for by `nonce`.
    ///
    /// The pending record is removed before anything else happens, so a
    /// nonce finalizes at most once. A second call with the same nonce
    /// fails with [`RegistrationError::UnknownNonce`], as does anything
    /// that is not shaped like a nonce this service issued.
    pub fn confirm_payment(&self, nonce: &str) -> Result<DidDocument, RegistrationError> {
        if !is_issued_nonce(nonce) {
            debug!(nonce = nonce_prefix(nonce), "malformed payment nonce");
            return Err(RegistrationError::UnknownNonce);
        }
        let Some(pending) = self.pending.take_pending(nonce)? else {
            debug!(nonce = nonce_prefix(nonce), "no pending registration for nonce");
            return Err(RegistrationError::UnknownNonce);
        };
        let doc = pending.document;

        // Another paid request for the same identifier got here first.
        if !self.dids.register(&doc)? {
            warn!(did = %doc.id, nonce = nonce_prefix(nonce), "payment for already registered did");
            self.pending.clear_invoice(&doc.id, nonce)?;
            return Err(RegistrationError::DuplicateIdentifier(doc.id));
        }
        self.pending.clear_invoice(&doc.id, nonce)?;

        info!(did = %doc.id, nonce = nonce_prefix(nonce), "registration finalized");
        Ok(doc)
    }

    /// Current state of `id` (with or without the `did:web:` prefix).
    pub fn state_of(&self, id: &str) -> Result<RegistrationState, RegistrationError> {
        let parsed = DidWebUrl::parse_id(id)?;
        if self.dids.contains(&parsed.id())? {
            return Ok(RegistrationState::Finalized);
        }
        if self.pending.invoice(&parsed.did())?.is_some() {
            return Ok(RegistrationState::InvoicePending);
        }
        Ok(RegistrationState::Requested)
    }

    /// Parse `id` and check it names a path under the served domain that
    /// maps to a document location.
    fn normalize(&self, id: &str) -> Result<DidWebUrl, RegistrationError> {
        let parsed = DidWebUrl::parse_id(id)?;
        if !parsed.query().is_empty() || parsed.fragment().is_some() {
            return Err(DidWebError::MalformedIdentifier(id.to_string()).into());
        }
        parsed.url()?;
        if parsed.raw_host() != self.config.domain || parsed.segments().is_empty() {
            return Err(RegistrationError::InvalidDomain {
                domain: self.config.domain.clone(),
                id: id.to_string(),
            });
        }
        Ok(parsed)
    }

    /// The outstanding invoice for exactly this document, if the gateway
    /// still vouches for it.
    async fn reusable_invoice(&self, doc: &DidDocument) -> Result<Option<String>, RegistrationError> {
        let Some(record) = self.pending.invoice(&doc.id)? else {
            return Ok(None);
        };
        match self.pending.pending(&record.nonce)? {
            Some(pending) if pending.document == *doc => {}
            _ => return Ok(None),
        }

        match self.gateway.validate_payment_request(&record.payment_request).await {
            Ok(true) => Ok(Some(record.payment_request)),
            Ok(false) => {
                warn!(did = %doc.id, "stored payment request rejected by gateway");
                Ok(None)
            }
            Err(e) => {
                warn!(did = %doc.id, error = %e, "could not validate stored payment request");
                Ok(None)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build the document for `did:web:<id>` from submitted keys and services.
///
/// Every key's controller is set to the new DID. Fails with
/// [`RegistrationError::NoAssertionMethod`] unless at least one key is
/// bound as an assertion method.
pub fn build_document(
    id: &str,
    keys: Vec<KeyInput>,
    services: Vec<Service>,
) -> Result<DidDocument, RegistrationError> {
    let mut doc = DidDocument::new(id);

    for key in keys {
        let mut method = key.verification_method;
        method.controller = doc.id.clone();
        let fragment = method
            .id
            .strip_prefix(doc.id.as_str())
            .unwrap_or(&method.id)
            .trim_start_matches('#');
        let reference = format!("#{fragment}");
        doc.add_verification_method(method)?;

        for purpose in &key.purposes {
            match purpose.parse::<VerificationRelationship>() {
                Ok(relationship) => doc.add_relationship(relationship, &reference)?,
                Err(_) => debug!(purpose = %purpose, "ignoring unknown key purpose"),
            }
        }
    }

    if !doc.has_assertion_method() {
        return Err(RegistrationError::NoAssertionMethod);
    }

    for service in services {
        doc.add_service(service)?;
    }

    Ok(doc)
}

/// 64 bytes from the OS CSPRNG, hex-encoded.
fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_LENGTH];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Exactly the shape [`generate_nonce`] produces: lowercase hex,
/// `NONCE_LENGTH` bytes.
fn is_issued_nonce(nonce: &str) -> bool {
    nonce.len() == NONCE_LENGTH * 2 && nonce.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Enough of a nonce to correlate log lines without exposing it.
pub fn nonce_prefix(nonce: &str) -> &str {
    nonce.get(..8).unwrap_or(nonce)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::PaymentResponse;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Gateway double: numbered invoices, records every request.
    #[derive(Default)]
    struct FakeGateway {
        created: Mutex<Vec<InvoiceRequest>>,
        validations: AtomicUsize,
        reject_stored: AtomicBool,
        fail: AtomicBool,
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn create_invoice(&self, request: &InvoiceRequest) -> Result<PaymentResponse, GatewayError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(GatewayError::UnexpectedStatus { status: 500 });
            }
            let mut created = self.created.lock();
            created.push(request.clone());
            Ok(PaymentResponse {
                payment_hash: format!("hash{}", created.len()),
                payment_request: format!("lnbc{}", created.len()),
            })
        }

        async fn validate_payment_request(&self, _payment_request: &str) -> Result<bool, GatewayError> {
            self.validations.fetch_add(1, Ordering::SeqCst);
            Ok(!self.reject_stored.load(Ordering::SeqCst))
        }
    }

    fn service(gateway: Arc<FakeGateway>) -> RegistrationService {
        let db = Database::open_temporary().unwrap();
        RegistrationService::from_database(&db, RegistrationConfig::for_domain("example.com"), gateway)
            .unwrap()
    }

    fn key(id: &str, purposes: &[&str]) -> KeyInput {
        KeyInput {
            purposes: purposes.iter().map(|p| p.to_string()).collect(),
            verification_method: VerificationMethod {
                id: id.to_string(),
                type_: "JsonWebKey2020".to_string(),
                controller: String::new(),
                public_key_multibase: None,
                public_key_base58: None,
                public_key_jwk: Some(serde_json::json!({"kty": "OKP", "crv": "Ed25519", "x": "abc"})),
            },
        }
    }

    fn nonce_of(request: &InvoiceRequest) -> String {
        request.webhook.rsplit('/').next().unwrap().to_string()
    }

    // -- build_document ------------------------------------------------------

    #[test]
    fn build_document_binds_purposes_case_insensitively() {
        let doc = build_document(
            "example.com:alice",
            vec![key("key-1", &["ASSERTIONMETHOD", "authentication", "telepathy"])],
            vec![],
        )
        .unwrap();

        assert_eq!(doc.id, "did:web:example.com:alice");
        assert_eq!(doc.assertion_method, vec!["#key-1"]);
        assert_eq!(doc.authentication, vec!["#key-1"]);
        assert!(doc.key_agreement.is_empty());
        assert_eq!(doc.verification_method[0].controller, "did:web:example.com:alice");
    }

    #[test]
    fn build_document_accepts_full_method_urls() {
        let doc = build_document(
            "did:web:example.com:alice",
            vec![key("did:web:example.com:alice#key-1", &["assertionMethod", "authentication"])],
            vec![],
        )
        .unwrap();

        assert_eq!(doc.assertion_method, vec!["#key-1".to_string()]);
        assert_eq!(doc.authentication, vec!["#key-1".to_string()]);
        assert!(doc.has_verification_method("#key-1"));
    }

    #[test]
    fn build_document_requires_assertion_method() {
        let result = build_document("example.com:alice", vec![key("key-1", &["authentication"])], vec![]);
        assert!(matches!(result, Err(RegistrationError::NoAssertionMethod)));
    }

    #[test]
    fn build_document_adds_services() {
        let doc = build_document(
            "example.com:alice",
            vec![key("key-1", &["assertionMethod"])],
            vec![Service {
                id: "#hub".into(),
                type_: "LinkedDomains".into(),
                service_endpoint: serde_json::json!("https://alice.example"),
            }],
        )
        .unwrap();
        assert_eq!(doc.service.len(), 1);
    }

    // -- request_registration ------------------------------------------------

    #[tokio::test]
    async fn request_issues_invoice_with_webhook_nonce() {
        let gateway = Arc::new(FakeGateway::default());
        let svc = service(gateway.clone());

        let invoice = svc
            .request_registration("example.com:alice", vec![key("key-1", &["assertionMethod"])], vec![])
            .await
            .unwrap();

        assert_eq!(invoice.did, "did:web:example.com:alice");
        assert_eq!(invoice.payment_request, "lnbc1");
        assert!(!invoice.reused);

        let created = gateway.created.lock();
        assert_eq!(created[0].amount, DEFAULT_INVOICE_AMOUNT);
        assert_eq!(created[0].memo, "Register did:web:example.com:alice");
        assert!(created[0].webhook.starts_with("https://example.com/paid/"));
        let nonce = nonce_of(&created[0]);
        assert_eq!(nonce.len(), NONCE_LENGTH * 2);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
        drop(created);

        assert_eq!(svc.state_of("example.com:alice").unwrap(), RegistrationState::InvoicePending);
    }

    #[tokio::test]
    async fn request_accepts_full_did() {
        let svc = service(Arc::new(FakeGateway::default()));
        let invoice = svc
            .request_registration("did:web:example.com:alice", vec![key("key-1", &["assertionMethod"])], vec![])
            .await
            .unwrap();
        assert_eq!(invoice.did, "did:web:example.com:alice");
    }

    #[tokio::test]
    async fn repeated_request_reuses_invoice_after_live_check() {
        let gateway = Arc::new(FakeGateway::default());
        let svc = service(gateway.clone());
        let keys = || vec![key("key-1", &["assertionMethod"])];

        let first = svc.request_registration("example.com:alice", keys(), vec![]).await.unwrap();
        let second = svc.request_registration("example.com:alice", keys(), vec![]).await.unwrap();

        assert_eq!(first.payment_request, second.payment_request);
        assert!(second.reused);
        assert_eq!(gateway.created.lock().len(), 1);
        assert_eq!(gateway.validations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_stored_invoice_is_replaced() {
        let gateway = Arc::new(FakeGateway::default());
        let svc = service(gateway.clone());
        let keys = || vec![key("key-1", &["assertionMethod"])];

        svc.request_registration("example.com:alice", keys(), vec![]).await.unwrap();
        gateway.reject_stored.store(true, Ordering::SeqCst);
        let second = svc.request_registration("example.com:alice", keys(), vec![]).await.unwrap();

        assert_eq!(second.payment_request, "lnbc2");
        assert!(!second.reused);
    }

    #[tokio::test]
    async fn different_document_gets_new_invoice() {
        let gateway = Arc::new(FakeGateway::default());
        let svc = service(gateway.clone());

        svc.request_registration("example.com:alice", vec![key("key-1", &["assertionMethod"])], vec![])
            .await
            .unwrap();
        let second = svc
            .request_registration("example.com:alice", vec![key("key-2", &["assertionMethod"])], vec![])
            .await
            .unwrap();

        assert_eq!(second.payment_request, "lnbc2");
        assert_eq!(gateway.validations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn foreign_domain_is_rejected() {
        let gateway = Arc::new(FakeGateway::default());
        let svc = service(gateway.clone());

        let result = svc
            .request_registration("evil.example:alice", vec![key("key-1", &["assertionMethod"])], vec![])
            .await;
        assert!(matches!(result, Err(RegistrationError::InvalidDomain { .. })));

        let bare = svc
            .request_registration("example.com", vec![key("key-1", &["assertionMethod"])], vec![])
            .await;
        assert!(matches!(bare, Err(RegistrationError::InvalidDomain { .. })));
        assert!(gateway.created.lock().is_empty());
    }

    #[tokio::test]
    async fn malformed_identifier_is_rejected() {
        let svc = service(Arc::new(FakeGateway::default()));
        let result = svc
            .request_registration("example.com:bad%zz", vec![key("key-1", &["assertionMethod"])], vec![])
            .await;
        assert!(matches!(result, Err(RegistrationError::InvalidIdentifier(_))));
    }

    #[tokio::test]
    async fn unaddressable_identifiers_are_rejected() {
        let gateway = Arc::new(FakeGateway::default());
        let svc = service(gateway.clone());
        for id in ["example.com:a:..:b", "example.com:.", "example.com:a%09b"] {
            let result = svc
                .request_registration(id, vec![key("key-1", &["assertionMethod"])], vec![])
                .await;
            assert!(
                matches!(result, Err(RegistrationError::InvalidIdentifier(_))),
                "{id} should be rejected"
            );
        }
        assert!(gateway.created.lock().is_empty());
    }

    #[tokio::test]
    async fn missing_assertion_method_never_reaches_store() {
        let gateway = Arc::new(FakeGateway::default());
        let svc = service(gateway.clone());

        let result = svc
            .request_registration("example.com:alice", vec![key("key-1", &["authentication"])], vec![])
            .await;

        assert!(matches!(result, Err(RegistrationError::NoAssertionMethod)));
        assert!(gateway.created.lock().is_empty());
        assert_eq!(svc.state_of("example.com:alice").unwrap(), RegistrationState::Requested);
    }

    #[tokio::test]
    async fn gateway_failure_stores_nothing() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.fail.store(true, Ordering::SeqCst);
        let svc = service(gateway);

        let result = svc
            .request_registration("example.com:alice", vec![key("key-1", &["assertionMethod"])], vec![])
            .await;
        assert!(matches!(result, Err(RegistrationError::Gateway(_))));
        assert_eq!(svc.state_of("example.com:alice").unwrap(), RegistrationState::Requested);
    }

    // -- confirm_payment -----------------------------------------------------

    #[tokio::test]
    async fn confirm_finalizes_and_clears_invoice() {
        let gateway = Arc::new(FakeGateway::default());
        let svc = service(gateway.clone());
        svc.request_registration("example.com:alice", vec![key("key-1", &["assertionMethod"])], vec![])
            .await
            .unwrap();
        let nonce = nonce_of(&gateway.created.lock()[0]);

        let doc = svc.confirm_payment(&nonce).unwrap();

        assert_eq!(doc.id, "did:web:example.com:alice");
        assert_eq!(svc.dids().resolve("example.com:alice").unwrap(), Some(doc));
        assert_eq!(svc.state_of("did:web:example.com:alice").unwrap(), RegistrationState::Finalized);
        assert!(svc.pending.invoice("did:web:example.com:alice").unwrap().is_none());
    }

    #[tokio::test]
    async fn confirm_twice_fails_with_unknown_nonce() {
        let gateway = Arc::new(FakeGateway::default());
        let svc = service(gateway.clone());
        svc.request_registration("example.com:alice", vec![key("key-1", &["assertionMethod"])], vec![])
            .await
            .unwrap();
        let nonce = nonce_of(&gateway.created.lock()[0]);

        svc.confirm_payment(&nonce).unwrap();
        assert!(matches!(svc.confirm_payment(&nonce), Err(RegistrationError::UnknownNonce)));
        assert!(matches!(svc.confirm_payment("deadbeef"), Err(RegistrationError::UnknownNonce)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_confirm_finalizes_once() {
        let gateway = Arc::new(FakeGateway::default());
        let svc = service(gateway.clone());
        svc.request_registration("example.com:alice", vec![key("key-1", &["assertionMethod"])], vec![])
            .await
            .unwrap();
        let nonce = nonce_of(&gateway.created.lock()[0]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let svc = svc.clone();
                let nonce = nonce.clone();
                tokio::task::spawn_blocking(move || svc.confirm_payment(&nonce))
            })
            .collect();

        let mut ok = 0;
        let mut unknown = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(RegistrationError::UnknownNonce) => unknown += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(unknown, 7);
    }

    #[tokio::test]
    async fn did_passed_as_nonce_leaves_invoice_in_place() {
        let gateway = Arc::new(FakeGateway::default());
        let svc = service(gateway.clone());
        svc.request_registration("example.com:alice", vec![key("key-1", &["assertionMethod"])], vec![])
            .await
            .unwrap();

        assert!(matches!(
            svc.confirm_payment("did:web:example.com:alice"),
            Err(RegistrationError::UnknownNonce)
        ));
        let upper = nonce_of(&gateway.created.lock()[0]).to_uppercase();
        assert!(matches!(svc.confirm_payment(&upper), Err(RegistrationError::UnknownNonce)));

        assert_eq!(svc.state_of("did:web:example.com:alice").unwrap(), RegistrationState::InvoicePending);
        let nonce = nonce_of(&gateway.created.lock()[0]);
        assert!(svc.confirm_payment(&nonce).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_confirms_for_one_did_register_once() {
        let gateway = Arc::new(FakeGateway::default());
        let svc = service(gateway.clone());
        svc.request_registration("example.com:alice", vec![key("key-1", &["assertionMethod"])], vec![])
            .await
            .unwrap();
        svc.request_registration("example.com:alice", vec![key("key-2", &["assertionMethod"])], vec![])
            .await
            .unwrap();
        let nonces: Vec<String> = gateway.created.lock().iter().map(nonce_of).collect();

        let handles: Vec<_> = nonces
            .into_iter()
            .map(|nonce| {
                let svc = svc.clone();
                tokio::task::spawn_blocking(move || svc.confirm_payment(&nonce))
            })
            .collect();

        let mut winners = Vec::new();
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(doc) => winners.push(doc),
                Err(RegistrationError::DuplicateIdentifier(_)) => duplicates += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(winners.len(), 1);
        assert_eq!(duplicates, 1);
        assert_eq!(svc.dids().resolve("example.com:alice").unwrap(), Some(winners.remove(0)));
    }

    #[tokio::test]
    async fn registered_identifier_is_duplicate() {
        let gateway = Arc::new(FakeGateway::default());
        let svc = service(gateway.clone());
        svc.request_registration("example.com:alice", vec![key("key-1", &["assertionMethod"])], vec![])
            .await
            .unwrap();
        let nonce = nonce_of(&gateway.created.lock()[0]);
        svc.confirm_payment(&nonce).unwrap();

        let again = svc
            .request_registration("example.com:alice", vec![key("key-1", &["assertionMethod"])], vec![])
            .await;
        assert!(matches!(again, Err(RegistrationError::DuplicateIdentifier(_))));
    }

    #[tokio::test]
    async fn second_paid_document_never_overwrites_first() {
        let gateway = Arc::new(FakeGateway::default());
        let svc = service(gateway.clone());
        svc.request_registration("example.com:alice", vec![key("key-1", &["assertionMethod"])], vec![])
            .await
            .unwrap();
        svc.request_registration("example.com:alice", vec![key("key-2", &["assertionMethod"])], vec![])
            .await
            .unwrap();
        let (first, second) = {
            let created = gateway.created.lock();
            (nonce_of(&created[0]), nonce_of(&created[1]))
        };

        let doc = svc.confirm_payment(&second).unwrap();
        assert!(matches!(
            svc.confirm_payment(&first),
            Err(RegistrationError::DuplicateIdentifier(_))
        ));
        assert_eq!(svc.dids().resolve("example.com:alice").unwrap(), Some(doc));
    }

    #[test]
    fn nonce_prefix_is_short() {
        assert_eq!(nonce_prefix("0123456789abcdef"), "01234567");
        assert_eq!(nonce_prefix("abc"), "abc");
    }
}
