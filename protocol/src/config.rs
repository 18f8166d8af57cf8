//! # Protocol Configuration & Constants
//!
//! Every fixed value the server relies on lives here: the method prefix,
//! the well-known path names, nonce sizing, invoice defaults, broker
//! buffering, and HTTP timeouts.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Identifier Format
// ---------------------------------------------------------------------------

/// Scheme token every DID starts with.
pub const DID_SCHEME: &str = "did";

/// The only DID method this crate speaks.
pub const DID_METHOD: &str = "web";

/// Full prefix of a `did:web` identifier, including the trailing colon.
pub const DID_WEB_PREFIX: &str = "did:web:";

/// Directory segment used when an identifier has no path.
pub const WELL_KNOWN_SEGMENT: &str = ".well-known";

/// File name of a DID document at its HTTPS location.
pub const DID_DOCUMENT_FILE: &str = "did.json";

/// JSON-LD context of DID Core v1.0.
pub const DID_CONTEXT: &str = "https://www.w3.org/ns/did/v1";

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Size of the random registration nonce in bytes. Hex-encoded it becomes a
/// 128-character store key and webhook path segment.
pub const NONCE_LENGTH: usize = 64;

/// Default invoice amount, in satoshis, charged for one registration.
pub const DEFAULT_INVOICE_AMOUNT: u64 = 69;

/// Default base URL of the LNbits-compatible payment gateway.
pub const DEFAULT_GATEWAY_URL: &str = "https://legend.lnbits.com";

/// Path of the gateway's payments endpoint, relative to its base URL.
pub const GATEWAY_PAYMENTS_PATH: &str = "/api/v1/payments";

/// Header carrying the gateway API key.
pub const GATEWAY_API_KEY_HEADER: &str = "X-Api-Key";

/// Timeout for a single call to the payment gateway.
pub const GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Timeout for fetching a remote DID document.
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Notification Broker
// ---------------------------------------------------------------------------

/// Payload published to subscribers once a registration is paid.
pub const PAID_EVENT: &str = "paid";

/// Per-subscriber delivery buffer. A subscriber that falls this far behind
/// loses further events instead of stalling the dispatcher.
pub const SUBSCRIBER_BUFFER: usize = 8;

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// sled tree holding finalized DID documents.
pub const DID_TREE: &str = "did";

/// sled tree holding pending registrations, keyed by hex nonce.
pub const REGISTRATION_TREE: &str = "reg";

/// sled tree holding the invoice last issued for each DID.
pub const INVOICE_TREE: &str = "inv";

/// Crate version, reported by the node binary.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");
