//! # DID Documents
//!
//! W3C DID Core document types and the builder used when issuing a new
//! `did:web` identity.
//!
//! A document is a list of verification methods plus five relationship
//! lists (authentication, assertion, key agreement, capability delegation,
//! capability invocation) that point back into it by `#fragment`. The
//! builder methods refuse references to methods that are not in the list,
//! so a document built here never carries a dangling relationship.
//!
//! ## Standards References
//!
//! - [DID Core v1.0](https://www.w3.org/TR/did-core/)
//! - [did:web Method Specification](https://w3c-ccg.github.io/did-method-web/)

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{DID_CONTEXT, DID_WEB_PREFIX};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while building or (de)serializing a document.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// A verification method or service has an empty `id`.
    #[error("{0} id must not be empty")]
    EmptyId(&'static str),

    /// A verification method with this id is already present.
    #[error("verification method already exists: {0}")]
    DuplicateVerificationMethod(String),

    /// A relationship references a verification method that is not present.
    #[error("unknown verification method reference: {0}")]
    UnknownVerificationMethod(String),

    /// A service with this id is already present.
    #[error("service already exists: {0}")]
    DuplicateService(String),

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// DID Document Types
// ---------------------------------------------------------------------------

/// A W3C DID Document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidDocument {
    /// JSON-LD context URIs.
    #[serde(rename = "@context", default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,

    /// The DID this document describes.
    pub id: String,

    /// Verification methods (keys) associated with this DID.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verification_method: Vec<VerificationMethod>,

    /// References usable for authentication.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authentication: Vec<String>,

    /// References usable for issuing assertions (credentials, claims).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertion_method: Vec<String>,

    /// References usable for key agreement (encryption).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_agreement: Vec<String>,

    /// References usable for delegating capabilities.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capability_delegation: Vec<String>,

    /// References usable for invoking capabilities.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capability_invocation: Vec<String>,

    /// Service endpoints.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service: Vec<Service>,
}

/// A verification method entry.
///
/// Key material is carried in whichever of the three public key
/// properties the submitter used; the server never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMethod {
    /// Identifier, usually a bare fragment such as `key-1`.
    pub id: String,

    /// Key type, e.g. `JsonWebKey2020` or `SchnorrSecp256k1VerificationKey2019`.
    #[serde(rename = "type")]
    pub type_: String,

    /// DID of the controlling identity. Overwritten on registration.
    #[serde(default)]
    pub controller: String,

    /// Multibase-encoded public key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_multibase: Option<String>,

    /// Base58-encoded public key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_base58: Option<String>,

    /// Public key as a JWK.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_jwk: Option<serde_json::Value>,
}

/// A service endpoint entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Identifier, usually a fragment.
    pub id: String,

    /// Service type.
    #[serde(rename = "type")]
    pub type_: String,

    /// A URI, a map, or a list of either.
    pub service_endpoint: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Verification Relationships
// ---------------------------------------------------------------------------

/// The five relationships a verification method can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerificationRelationship {
    Authentication,
    AssertionMethod,
    KeyAgreement,
    CapabilityDelegation,
    CapabilityInvocation,
}

impl VerificationRelationship {
    /// Every relationship, in document order.
    pub const ALL: [Self; 5] = [
        Self::Authentication,
        Self::AssertionMethod,
        Self::KeyAgreement,
        Self::CapabilityDelegation,
        Self::CapabilityInvocation,
    ];

    /// The property name used in the document JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::AssertionMethod => "assertionMethod",
            Self::KeyAgreement => "keyAgreement",
            Self::CapabilityDelegation => "capabilityDelegation",
            Self::CapabilityInvocation => "capabilityInvocation",
        }
    }
}

impl FromStr for VerificationRelationship {
    type Err = String;

    /// Case-insensitive match on the JSON property name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|rel| rel.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown verification relationship: {s}"))
    }
}

// ---------------------------------------------------------------------------
// Builder Operations
// ---------------------------------------------------------------------------

impl DidDocument {
    /// An empty document for `did:web:<id>`.
    ///
    /// `id` is the method-specific part; pass `example.com:alice`, not the
    /// full DID.
    pub fn new(id: &str) -> Self {
        Self {
            context: vec![DID_CONTEXT.to_string()],
            id: format!("{DID_WEB_PREFIX}{id}"),
            verification_method: Vec::new(),
            authentication: Vec::new(),
            assertion_method: Vec::new(),
            key_agreement: Vec::new(),
            capability_delegation: Vec::new(),
            capability_invocation: Vec::new(),
            service: Vec::new(),
        }
    }

    /// Append a verification method.
    pub fn add_verification_method(&mut self, method: VerificationMethod) -> Result<(), DocumentError> {
        if method.id.is_empty() {
            return Err(DocumentError::EmptyId("verification method"));
        }
        if self.verification_method.iter().any(|vm| vm.id == method.id) {
            return Err(DocumentError::DuplicateVerificationMethod(method.id));
        }
        self.verification_method.push(method);
        Ok(())
    }

    /// Bind `reference` (`#fragment`) to the authentication relationship.
    pub fn add_authentication_method(&mut self, reference: &str) -> Result<(), DocumentError> {
        self.add_relationship(VerificationRelationship::Authentication, reference)
    }

    /// Bind `reference` to the assertion relationship.
    pub fn add_assertion_method(&mut self, reference: &str) -> Result<(), DocumentError> {
        self.add_relationship(VerificationRelationship::AssertionMethod, reference)
    }

    /// Bind `reference` to the capability delegation relationship.
    pub fn add_capability_delegation(&mut self, reference: &str) -> Result<(), DocumentError> {
        self.add_relationship(VerificationRelationship::CapabilityDelegation, reference)
    }

    /// Bind `reference` to the capability invocation relationship.
    pub fn add_capability_invocation(&mut self, reference: &str) -> Result<(), DocumentError> {
        self.add_relationship(VerificationRelationship::CapabilityInvocation, reference)
    }

    /// Bind `reference` to the key agreement relationship.
    pub fn add_key_agreement(&mut self, reference: &str) -> Result<(), DocumentError> {
        self.add_relationship(VerificationRelationship::KeyAgreement, reference)
    }

    /// Bind `reference` to `relationship`. Binding the same reference twice
    /// is a no-op.
    pub fn add_relationship(
        &mut self,
        relationship: VerificationRelationship,
        reference: &str,
    ) -> Result<(), DocumentError> {
        if !self.has_verification_method(reference) {
            return Err(DocumentError::UnknownVerificationMethod(reference.to_string()));
        }
        let list = self.relationship_mut(relationship);
        if !list.iter().any(|r| r == reference) {
            list.push(reference.to_string());
        }
        Ok(())
    }

    /// Append a service endpoint.
    pub fn add_service(&mut self, service: Service) -> Result<(), DocumentError> {
        if service.id.is_empty() {
            return Err(DocumentError::EmptyId("service"));
        }
        if self.service.iter().any(|s| s.id == service.id) {
            return Err(DocumentError::DuplicateService(service.id));
        }
        self.service.push(service);
        Ok(())
    }

    /// The references bound to `relationship`.
    pub fn relationship(&self, relationship: VerificationRelationship) -> &[String] {
        match relationship {
            VerificationRelationship::Authentication => &self.authentication,
            VerificationRelationship::AssertionMethod => &self.assertion_method,
            VerificationRelationship::KeyAgreement => &self.key_agreement,
            VerificationRelationship::CapabilityDelegation => &self.capability_delegation,
            VerificationRelationship::CapabilityInvocation => &self.capability_invocation,
        }
    }

    fn relationship_mut(&mut self, relationship: VerificationRelationship) -> &mut Vec<String> {
        match relationship {
            VerificationRelationship::Authentication => &mut self.authentication,
            VerificationRelationship::AssertionMethod => &mut self.assertion_method,
            VerificationRelationship::KeyAgreement => &mut self.key_agreement,
            VerificationRelationship::CapabilityDelegation => &mut self.capability_delegation,
            VerificationRelationship::CapabilityInvocation => &mut self.capability_invocation,
        }
    }

    /// Whether `reference` points at a method in this document. Accepts
    /// `#key-1`, `key-1`, and `did:web:...#key-1`.
    pub fn has_verification_method(&self, reference: &str) -> bool {
        let fragment = reference
            .strip_prefix(self.id.as_str())
            .unwrap_or(reference)
            .trim_start_matches('#');
        if fragment.is_empty() {
            return false;
        }
        self.verification_method.iter().any(|vm| {
            let vm_fragment = vm
                .id
                .strip_prefix(self.id.as_str())
                .unwrap_or(&vm.id)
                .trim_start_matches('#');
            vm_fragment == fragment
        })
    }

    /// Whether at least one assertion method is bound. Documents without
    /// one are not accepted for registration.
    pub fn has_assertion_method(&self) -> bool {
        !self.assertion_method.is_empty()
    }

    /// Serialize this document to compact JSON.
    pub fn to_json(&self) -> Result<String, DocumentError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a document from JSON.
    pub fn from_json(json: &str) -> Result<Self, DocumentError> {
        Ok(serde_json::from_str(json)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
