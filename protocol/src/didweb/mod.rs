//! # did:web Identifiers
//!
//! The `did:web` method maps an identifier onto an HTTPS location under a
//! DNS name. This module owns that mapping in both directions and the
//! fetch-and-check step that turns an identifier into its document.
//!
//! ## Format
//!
//! ```text
//! did:web:<host>[:<segment>[:<segment>...]]
//! ```
//!
//! - `host` may carry a port as a percent-encoded colon (`localhost%3A8443`).
//! - Each segment is percent-escaped on its own; a literal `:` or `+`
//!   inside a segment is always escaped so the identifier stays splittable.
//!
//! ## Resolution URL
//!
//! | Identifier                              | Document URL                                    |
//! |-----------------------------------------|-------------------------------------------------|
//! | `did:web:example.com`                   | `https://example.com/.well-known/did.json`      |
//! | `did:web:example.com:user:alice`        | `https://example.com/user/alice/did.json`       |
//! | `did:web:localhost%3A8443`              | `https://localhost:8443/.well-known/did.json`   |
//!
//! ```text
//! url.rs      — DidWebUrl: parse, canonical id/DID, resolution URL, inbound path mapping
//! resolve.rs  — Resolver: fetch over HTTPS and verify the document id
//! ```

pub mod resolve;
pub mod url;

pub use self::resolve::{resolve, ResolveError, Resolver};
pub use self::url::DidWebUrl;

use thiserror::Error;

/// Errors produced while converting between identifiers, URLs, and paths.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DidWebError {
    /// Fewer than three `:`-delimited tokens, a prefix other than
    /// `did:web`, or an empty host.
    #[error("invalid did, must be in format did:web:example.org:john (got '{0}')")]
    MalformedIdentifier(String),

    /// A path segment is not valid percent-encoding.
    #[error("invalid percent-encoding in identifier segment '{0}'")]
    EncodingError(String),

    /// An inbound request path does not end in `did.json`.
    #[error("not a did document path: '{0}'")]
    NotAWellKnownPath(String),

    /// The decoded host and path cannot form a URL.
    #[error("identifier does not map to a valid url: {0}")]
    InvalidUrl(String),
}
