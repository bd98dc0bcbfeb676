//! Age token codec, signing and verification.
//!
//! A token is `base64(JSON(claim)) + "." + hex(signature)`, signed with
//! RSA-PSS over SHA-256 with a 32-byte salt. The signature covers the exact
//! bytes of the base64 payload segment, not the decoded JSON.

pub mod claims;
pub mod codec;
pub mod issuer;
pub mod keys;
pub mod signer;
pub mod subject;
pub mod verifier;

/// RSA-PSS salt length in bytes.
pub const PSS_SALT_LEN: usize = 32;

pub use claims::{ClaimPayload, TimestampMs, now_ms};
pub use issuer::TokenIssuer;
pub use keys::{PublicKeyJwk, default_public_key, key_id, load_public_key, parse_public_key};
pub use signer::{LocalSigner, RemoteSigner, TokenSigner};
pub use subject::{SubjectContext, simple_hash};
pub use verifier::{ClaimVerifier, TokenVerifier};
