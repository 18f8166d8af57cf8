//! # REST + SSE API
//!
//! Builds the axum router that exposes the server's HTTP interface.
//! All endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                      | Description                              |
//! |--------|---------------------------|------------------------------------------|
//! | GET    | `/health`                 | Liveness probe                           |
//! | POST   | `/register`               | Request an identity, returns an invoice  |
//! | POST   | `/paid/:nonce`            | Payment webhook from the gateway         |
//! | GET    | `/payment/:id`            | SSE stream, emits `paid` once            |
//! | GET    | `/resolve/:id`            | Resolve a DID, local or remote           |
//! | DELETE | `/delete/:id`             | Remove an identity (admin key)           |
//! | GET    | `/.well-known/nostr.json` | NIP-05 name lookup                       |
//! | GET    | anything else             | `did.json` paths of issued identities    |
//!
//! Errors are always `{"error": "<message>"}`. Internal failures get a
//! generic message; the detail goes to the log.

use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use didsrv_protocol::broker::{PaymentBroker, Subscription};
use didsrv_protocol::config::{GATEWAY_API_KEY_HEADER, PAID_EVENT};
use didsrv_protocol::didweb::{DidWebUrl, ResolveError, Resolver};
use didsrv_protocol::document::{DidDocument, Service};
use didsrv_protocol::registration::{
    nonce_prefix, KeyInput, RegistrationError, RegistrationService, RegistrationState,
};
use didsrv_protocol::storage::DbError;

use crate::metrics::SharedMetrics;

/// Key type a NIP-05 lookup accepts.
const NOSTR_KEY_TYPE: &str = "SchnorrSecp256k1VerificationKey2019";

/// Interval between SSE keep-alive comments.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone; everything is behind `Arc` or already reference-counted.
#[derive(Clone)]
pub struct AppState {
    /// Domain identities are issued under.
    pub domain: String,
    /// Registration state machine and the stores behind it.
    pub registration: RegistrationService,
    /// Resolver for identities hosted elsewhere.
    pub resolver: Resolver,
    /// Payment notifications for waiting clients.
    pub broker: PaymentBroker,
    /// Reference to Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
    /// Key that authorizes deletes. `None` disables them.
    pub admin_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/register", post(register_handler))
        .route("/paid/:nonce", post(paid_handler))
        .route("/payment/:id", get(payment_stream_handler))
        .route("/resolve/:id", get(resolve_handler))
        .route("/delete/:id", delete(delete_handler))
        .route("/.well-known/nostr.json", get(nostr_handler))
        .fallback(document_handler)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Body of `POST /register`.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub id: String,
    #[serde(default)]
    pub keys: Vec<KeyInput>,
    #[serde(default)]
    pub services: Vec<Service>,
}

/// Body the gateway posts to the webhook. Every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct PayInfo {
    pub payment_hash: Option<String>,
    pub amount: Option<u64>,
}

/// Response payload for `GET /.well-known/nostr.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NostrWellKnown {
    pub names: BTreeMap<String, String>,
}

/// Generic error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A failed request, already classified by status.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound,
    /// Logged in full, reported to the client generically.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            ApiError::Internal(detail) => {
                error!(error = %detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<RegistrationError> for ApiError {
    fn from(err: RegistrationError) -> Self {
        match err {
            RegistrationError::InvalidIdentifier(_)
            | RegistrationError::InvalidDomain { .. }
            | RegistrationError::DuplicateIdentifier(_)
            | RegistrationError::NoAssertionMethod
            | RegistrationError::Document(_) => ApiError::BadRequest(err.to_string()),
            RegistrationError::UnknownNonce => ApiError::Unauthorized,
            RegistrationError::Gateway(_) | RegistrationError::Store(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: returns 200 if the server is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `POST /register`: request an identity.
///
/// Answers with the payment request string the client must pay. Asking
/// again for the same document before paying returns the same string.
async fn register_handler(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<String>> {
    state.metrics.registrations_requested_total.inc();

    let input: RegisterRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("invalid request".to_string()))?;

    let invoice = state
        .registration
        .request_registration(&input.id, input.keys, input.services)
        .await?;

    if invoice.reused {
        state.metrics.invoices_reused_total.inc();
    } else {
        state.metrics.invoices_issued_total.inc();
    }
    Ok(Json(invoice.payment_request))
}

/// `POST /paid/:nonce`: the gateway's payment webhook.
///
/// Finalizes the registration and wakes every client streaming
/// `/payment/:id` for it. Unknown or spent nonces get 401.
async fn paid_handler(
    State(state): State<AppState>,
    Path(nonce): Path<String>,
    body: Bytes,
) -> ApiResult<Json<&'static str>> {
    let info: PayInfo = serde_json::from_slice(&body).unwrap_or_default();

    let doc = match state.registration.confirm_payment(&nonce) {
        Ok(doc) => doc,
        Err(RegistrationError::UnknownNonce) => {
            state.metrics.webhook_rejections_total.inc();
            warn!(nonce = nonce_prefix(&nonce), "webhook for unknown nonce");
            return Err(ApiError::Unauthorized);
        }
        Err(e) => return Err(e.into()),
    };

    state.metrics.payments_confirmed_total.inc();
    info!(
        did = %doc.id,
        payment_hash = info.payment_hash.as_deref().unwrap_or("-"),
        amount = info.amount.unwrap_or_default(),
        "payment received"
    );
    state.broker.broadcast_payment(&doc.id);

    Ok(Json("ok"))
}

/// `GET /payment/:id`: server-sent events for one identity.
///
/// Emits `paid` once the identity is finalized, then closes. If it is
/// already finalized when the client connects, `paid` is sent at once.
async fn payment_stream_handler(State(state): State<AppState>, uri: Uri) -> ApiResult<impl IntoResponse> {
    let id = path_tail(&uri, "/payment/")?;
    let did = DidWebUrl::parse_id(id)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
        .did();

    // Subscribe before checking, so a payment landing in between is not lost.
    let subscription = state.broker.subscribe(&did);
    let already_paid = matches!(
        state.registration.state_of(&did),
        Ok(RegistrationState::Finalized)
    );
    debug!(did = %did, already_paid, "client waiting for payment");

    let stream = payment_events(
        subscription,
        StreamGauge::new(state.metrics.clone()),
        already_paid,
    );
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}

/// `GET /resolve/:id`: resolve a DID.
///
/// Identities under the served domain come from the local store; anything
/// else is fetched from its host. The raw request path is used so an
/// encoded port (`%3A`) reaches the codec intact.
async fn resolve_handler(State(state): State<AppState>, uri: Uri) -> ApiResult<Json<DidDocument>> {
    let id = path_tail(&uri, "/resolve/")?;
    let url = DidWebUrl::parse_id(id).map_err(|_| ApiError::BadRequest("invalid id".to_string()))?;
    let _timer = state.metrics.resolve_latency_seconds.start_timer();

    if url.raw_host().eq_ignore_ascii_case(&state.domain) {
        state.metrics.resolutions_total.with_label_values(&["local"]).inc();
        return state
            .registration
            .dids()
            .resolve(&url.id())?
            .map(Json)
            .ok_or(ApiError::NotFound);
    }

    state.metrics.resolutions_total.with_label_values(&["remote"]).inc();
    match state.resolver.resolve(&url.did()).await {
        Ok(doc) => Ok(Json(doc)),
        Err(ResolveError::DidNotFound) => Err(ApiError::NotFound),
        Err(e) => {
            warn!(did = %url.did(), error = %e, "remote resolution failed");
            Err(ApiError::NotFound)
        }
    }
}

/// `DELETE /delete/:id`: remove an identity. Requires the admin key.
async fn delete_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
) -> ApiResult<Json<&'static str>> {
    let provided = headers
        .get(GATEWAY_API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    match (state.admin_key.as_deref(), provided) {
        (Some(expected), Some(provided)) if expected == provided => {}
        _ => return Err(ApiError::Unauthorized),
    }

    let id = path_tail(&uri, "/delete/")?;
    let url = DidWebUrl::parse_id(id).map_err(|_| ApiError::BadRequest("invalid id".to_string()))?;
    let dids = state.registration.dids();
    if !dids.contains(&url.id())? {
        return Err(ApiError::NotFound);
    }
    dids.delete(&url.id())?;

    info!(did = %url.did(), "identity deleted");
    Ok(Json("ok"))
}

/// `GET /.well-known/nostr.json?name=<name>`: NIP-05 lookup.
///
/// Answers with the hex public key of the first nostr key in the
/// document for `<domain>:<name>`. Never fails; anything unexpected is an
/// empty `names` map.
async fn nostr_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<NostrWellKnown> {
    let Some(name) = params.get("name").filter(|n| !n.is_empty()) else {
        return Json(NostrWellKnown::default());
    };

    let doc = match state.registration.dids().resolve(&format!("{}:{}", state.domain, name)) {
        Ok(Some(doc)) => doc,
        Ok(None) => return Json(NostrWellKnown::default()),
        Err(e) => {
            warn!(name = %name, error = %e, "nostr lookup failed");
            return Json(NostrWellKnown::default());
        }
    };

    let mut names = BTreeMap::new();
    if let Some(key) = nostr_public_key(&doc) {
        names.insert(name.clone(), key);
    }
    Json(NostrWellKnown { names })
}

/// Fallback: serve `did.json` paths of issued identities.
///
/// The request's `Host` header plus its path are mapped back to an
/// identifier, e.g. `GET /alice/did.json` on `example.com` serves
/// `did:web:example.com:alice`.
async fn document_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
) -> ApiResult<Json<DidDocument>> {
    if method != Method::GET {
        return Err(ApiError::NotFound);
    }
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(&state.domain);

    let path = format!(
        "{}/{}",
        urlencoding::encode(host),
        uri.path().trim_start_matches('/')
    );
    let url = DidWebUrl::parse_path(&path).map_err(|_| ApiError::NotFound)?;

    state.metrics.resolutions_total.with_label_values(&["local"]).inc();
    state
        .registration
        .dids()
        .resolve(&url.id())?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// The still-encoded remainder of the request path after `prefix`.
fn path_tail<'a>(uri: &'a Uri, prefix: &str) -> ApiResult<&'a str> {
    uri.path()
        .strip_prefix(prefix)
        .filter(|tail| !tail.is_empty())
        .ok_or_else(|| ApiError::BadRequest("invalid id".to_string()))
}

/// Hex public key of the first nostr Schnorr key, if it is base16
/// multibase.
fn nostr_public_key(doc: &DidDocument) -> Option<String> {
    let method = doc.verification_method.iter().find(|vm| {
        vm.type_.eq_ignore_ascii_case(NOSTR_KEY_TYPE) && vm.id.to_lowercase().contains("nostr")
    })?;
    let encoded = method.public_key_multibase.as_deref()?;
    match multibase::decode(encoded) {
        Ok((multibase::Base::Base16Lower, bytes)) => Some(hex::encode(bytes)),
        _ => None,
    }
}

/// Keeps the active-stream gauge accurate for as long as a stream lives.
struct StreamGauge(SharedMetrics);

impl StreamGauge {
    fn new(metrics: SharedMetrics) -> Self {
        metrics.payment_streams_active.inc();
        Self(metrics)
    }
}

impl Drop for StreamGauge {
    fn drop(&mut self) {
        self.0.payment_streams_active.dec();
    }
}

/// The SSE event sequence for one subscription. Ends after `paid`.
///
/// Dropping the stream (client went away) drops the subscription, which
/// unsubscribes it.
fn payment_events(
    subscription: Subscription,
    gauge: StreamGauge,
    already_paid: bool,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(
        Some((subscription, gauge, already_paid)),
        |slot| async move {
            let (mut subscription, gauge, paid) = slot?;
            if paid {
                return Some((Ok(Event::default().data(PAID_EVENT)), None));
            }
            let payload = subscription.recv().await?;
            let done = payload == PAID_EVENT;
            let event = Event::default().data(payload);
            let next = (!done).then_some((subscription, gauge, false));
            Some((Ok(event), next))
        },
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
