// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # didsrv — Core Library
//!
//! Issue and resolve `did:web` identities, with issuance gated behind a
//! Lightning payment.
//!
//! ## Architecture
//!
//! - **didweb** — Identifier codec (`did:web:…` ⇄ HTTPS URL ⇄ request path)
//!   and the remote resolver.
//! - **document** — DID Core document types and builder.
//! - **storage** — sled-backed stores for finalized documents and pending
//!   registrations.
//! - **payment** — Payment gateway trait and the LNbits client.
//! - **registration** — The request → invoice → paid → finalized state
//!   machine.
//! - **broker** — In-process pub/sub that tells waiting clients a payment
//!   cleared.
//! - **config** — Constants and defaults.
//!
//! This crate performs outbound HTTP (resolver, gateway) but serves none;
//! the HTTP surface lives in the `didsrv` binary.

pub mod broker;
pub mod config;
pub mod didweb;
pub mod document;
pub mod payment;
pub mod registration;
pub mod storage;
