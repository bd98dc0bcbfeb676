//! Subject binding for tokens.
//!
//! A token is bound to `hash(device_identity + relying_origin)` so a token
//! issued for one page/device pair cannot validate another origin.
//!
//! The hash is a 32-bit string hash (`h = h * 31 + unit` over UTF-16 code
//! units, wrapping). It is an obfuscation, not a commitment: anyone holding a
//! candidate device string and origin can recompute it, and collisions are
//! cheap to find. Treat it as replay friction only. The signature is the
//! security boundary.

use serde::{Deserialize, Serialize};

/// 32-bit wrapping string hash over UTF-16 code units.
///
/// Compatible with the hash browsers compute for the same string, so tokens
/// issued by a web verifier validate here and vice versa.
pub fn simple_hash(input: &str) -> i32 {
    input.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit))
    })
}

/// Device and origin pair a token is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectContext {
    /// Coarse client identifier known to both contexts (e.g. a user-agent string).
    pub device_identity: String,
    /// Origin of the relying page.
    pub origin: String,
}

impl SubjectContext {
    pub fn new(device_identity: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            device_identity: device_identity.into(),
            origin: origin.into(),
        }
    }

    /// The `sub` value for this device/origin pair.
    pub fn fingerprint(&self) -> i32 {
        let mut input = String::with_capacity(self.device_identity.len() + self.origin.len());
        input.push_str(&self.device_identity);
        input.push_str(&self.origin);
        simple_hash(&input)
    }
}
