//! # Storage Module
//!
//! Persistent records for issued identities and in-flight registrations.
//!
//! ## Architecture
//!
//! ```text
//! db.rs         — sled Database, the KvStore trait, and its tree impl
//! did_store.rs  — DidStore: finalized documents keyed by method-specific id
//! pending.rs    — PendingStore: nonce → pending document, DID → open invoice
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! register ──► PendingStore (reg) ──► paid ──► DidStore (did) ──► resolve
//! ```
//!
//! Records are stored as JSON. Documents are served verbatim as JSON, so
//! keeping them in that form on disk means a read is a decode and nothing
//! else.

pub mod db;
pub mod did_store;
pub mod pending;

pub use db::{Database, DbError, DbResult, KvStore, SledTree};
pub use did_store::DidStore;
pub use pending::{InvoiceRecord, PendingRegistration, PendingStore};
