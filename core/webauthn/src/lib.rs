//! WebAuthn ceremony handling for seedlock.
//!
//! This module provides:
//! - Registration and authentication ceremony state machines
//! - Attestation object, client data and authenticator data parsing
//! - COSE public key decoding and assertion signature verification
//! - A credential registry with clone-detecting counter enforcement
//! - A software authenticator for tests and demos
//!
//! # Security Guarantees
//! - Ceremony ids are single-use tokens; replay fails deterministically
//! - Signature counters must strictly advance (both-zero means unsupported)
//! - All verification failures are typed; nothing is partially trusted

pub mod attestation;
pub mod authenticator;
pub mod ceremony;
pub mod cose;
pub mod registry;
pub mod secret;
pub mod softtoken;

pub use attestation::{AttestationObject, ClientData};
pub use authenticator::{AuthenticatorData, AttestedCredential};
pub use ceremony::{
    AssertionResponse, AttestationResponse, AuthenticationChallenge, CeremonyOrchestrator,
    CeremonySettings, RegistrationChallenge, RelyingParty, UserVerification,
};
pub use cose::CoseKey;
pub use registry::{Credential, CredentialRegistry};
pub use softtoken::{SoftAuthenticator, SoftKeyType};
