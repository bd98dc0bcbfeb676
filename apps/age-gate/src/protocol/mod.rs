//! Cross-context handshake between the relying context and the verifier
//! context.
//!
//! ```text
//! relying                                   verifier
//!    | open(verifier_url)                       |
//!    |----------------------------------------->|
//!    |          check-parent-commandeer         |
//!    |<-----------------------------------------|
//!    | confirm-parent-commandeer {nonce, ...}   |
//!    |----------------------------------------->|
//!    |                          estimate, sign  |
//!    | age-estimation-result {nonce, token}     |
//!    |<-----------------------------------------|
//!    | verify, cache, close                     |
//! ```
//!
//! Every message after the handshake echoes the nonce; anything else is
//! dropped without a reply.

pub mod channel;
pub mod handshake;
pub mod messages;
pub mod verifier;

pub use channel::{ContextId, ContextOpener, InboundMessage, OpenerHandle, VerifierHandle};
pub use handshake::{Handshake, HandshakeConfig, HandshakeState, Settlement};
pub use messages::{ErrorCode, ProtocolMessage, classify_error};
pub use verifier::VerifierContext;
