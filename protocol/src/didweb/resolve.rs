//! Fetch a `did:web` document from its HTTPS location.
//!
//! One GET, no retries. The caller decides whether a failure is worth
//! another attempt.

use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

use super::{DidWebError, DidWebUrl};
use crate::config::RESOLVE_TIMEOUT;
use crate::document::DidDocument;

/// Errors that can occur while resolving a remote identifier.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The identifier could not be parsed or mapped to a URL.
    #[error("could not parse did url: {0}")]
    InvalidIdentifier(#[from] DidWebError),

    /// The host answered 404.
    #[error("did not found")]
    DidNotFound,

    /// The host answered with a status other than 200 or 404.
    #[error("unexpected status from did host: {status}")]
    Upstream {
        /// HTTP status returned by the host.
        status: u16,
    },

    /// The body was not a DID document.
    #[error("could not decode document body: {0}")]
    InvalidDocument(String),

    /// The document describes a different identifier.
    #[error("mismatched document id: requested {requested}, got {got}")]
    DocumentIdentifierMismatch {
        /// The identifier that was resolved.
        requested: String,
        /// The `id` found in the returned document.
        got: String,
    },

    /// The request could not be sent or the body could not be read.
    #[error("could not get did json: {0}")]
    Http(#[from] reqwest::Error),
}

/// Resolves `did:web` identifiers over HTTP.
///
/// Cheap to clone; the inner [`Client`] is reference-counted.
#[derive(Debug, Clone)]
pub struct Resolver {
    client: Client,
    scheme: &'static str,
}

impl Resolver {
    /// A resolver that fetches documents over HTTPS.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            scheme: "https",
        }
    }

    /// Switch to plain HTTP. Only meant for local hosts without TLS.
    pub fn insecure(mut self) -> Self {
        self.scheme = "http";
        self
    }

    /// Fetch the document for `did` and check that it describes `did`.
    ///
    /// The document id is compared case-insensitively.
    pub async fn resolve(&self, did: &str) -> Result<DidDocument, ResolveError> {
        let parsed = DidWebUrl::parse(did)?;
        let url = parsed.url_with_scheme(self.scheme)?;
        debug!(did, %url, "fetching did document");

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/did+json, application/json")
            .timeout(RESOLVE_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(ResolveError::DidNotFound),
            status => {
                return Err(ResolveError::Upstream {
                    status: status.as_u16(),
                })
            }
        }

        let body = response.bytes().await?;
        let doc: DidDocument = serde_json::from_slice(&body)
            .map_err(|e| ResolveError::InvalidDocument(e.to_string()))?;

        if !doc.id.eq_ignore_ascii_case(did) {
            return Err(ResolveError::DocumentIdentifierMismatch {
                requested: did.to_string(),
                got: doc.id,
            });
        }

        Ok(doc)
    }
}

/// Resolve `did` over HTTPS with the given client.
pub async fn resolve(did: &str, client: &Client) -> Result<DidDocument, ResolveError> {
    Resolver::new(client.clone()).resolve(did).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
