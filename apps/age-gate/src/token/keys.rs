//! RSA key loading for token signatures.
//!
//! The verifying side ships with an embedded public key (JWK form) and accepts
//! a replacement from configuration, either as a JWK document or an SPKI/PKCS#1
//! PEM, so keys can rotate without a code change.

use std::path::Path;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AgeGateError, AgeGateResult};

/// Modulus of the embedded verification key (base64url, big-endian).
const DEFAULT_MODULUS: &str = "oZcuAKQFI3jGMXr6hjGyshDYD-msQuvuMm6ytVYbKci9pwIpEAyErulo_KcYR3jQkX-BDkTF-3bxKuIRfIe1fAyOTDyQIvIpvJfymmSudL-Uu0eOTb3GEkewPRVBo1jyKu5q3HY0bAX8lPCsXJ0X3QJfb6COhm1rOJcMUmv18ryZgauvQ18w9ZmP4yPtqW4jh4jLuPoHaFex_zHO9T6a1fDDnx1rk1ircHkVii8DViAkFf9O65SasZOcXkWuVrjWIivGMHg_lVwxwksmNqPa6pBdmdfAhljF63hYeP7ska1RuDCwaWNNVcqq1LFyUEV7Hdf88lQeozCi6Z8Cv7l1qQ";

/// Exponent of the embedded verification key (65537).
const DEFAULT_EXPONENT: &str = "AQAB";

/// A single RSA JSON Web Key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyJwk {
    /// Key type, must be "RSA".
    pub kty: String,
    /// Modulus (base64url).
    pub n: String,
    /// Public exponent (base64url).
    pub e: String,
    /// Algorithm hint, "PS256" when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
}

impl PublicKeyJwk {
    /// The embedded verification key.
    pub fn embedded() -> Self {
        Self {
            kty: "RSA".to_string(),
            n: DEFAULT_MODULUS.to_string(),
            e: DEFAULT_EXPONENT.to_string(),
            alg: Some("PS256".to_string()),
            key_use: Some("sig".to_string()),
        }
    }

    /// Export an RSA public key as a JWK.
    pub fn from_public_key(key: &RsaPublicKey) -> Self {
        Self {
            kty: "RSA".to_string(),
            n: BASE64_URL.encode(key.n().to_bytes_be()),
            e: BASE64_URL.encode(key.e().to_bytes_be()),
            alg: Some("PS256".to_string()),
            key_use: Some("sig".to_string()),
        }
    }

    /// Convert into an RSA public key.
    pub fn to_public_key(&self) -> AgeGateResult<RsaPublicKey> {
        if self.kty != "RSA" {
            return Err(AgeGateError::Config(format!(
                "Unsupported key type '{}', expected RSA",
                self.kty
            )));
        }
        if let Some(alg) = self.alg.as_deref()
            && alg != "PS256"
        {
            return Err(AgeGateError::Config(format!(
                "Unsupported key algorithm '{alg}', expected PS256"
            )));
        }

        let n = decode_component("n", &self.n)?;
        let e = decode_component("e", &self.e)?;

        RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
            .map_err(|err| AgeGateError::Config(format!("Invalid RSA public key: {err}")))
    }
}

fn decode_component(name: &str, value: &str) -> AgeGateResult<Vec<u8>> {
    BASE64_URL
        .decode(value.trim_end_matches('='))
        .map_err(|e| AgeGateError::Config(format!("Invalid JWK '{name}' component: {e}")))
}

/// The embedded verification key.
pub fn default_public_key() -> AgeGateResult<RsaPublicKey> {
    PublicKeyJwk::embedded().to_public_key()
}

/// Short identifier for a key: first 8 bytes of SHA-256 over the modulus, hex.
pub fn key_id(key: &RsaPublicKey) -> String {
    let digest = Sha256::digest(key.n().to_bytes_be());
    hex::encode(&digest[..8])
}

/// Parse a public key from a JWK document or a PEM block.
pub fn parse_public_key(text: &str) -> AgeGateResult<RsaPublicKey> {
    let text = text.trim();

    if text.starts_with('{') {
        let jwk: PublicKeyJwk = serde_json::from_str(text)
            .map_err(|e| AgeGateError::Config(format!("Invalid public key JWK: {e}")))?;
        return jwk.to_public_key();
    }

    if text.contains("BEGIN RSA PUBLIC KEY") {
        return RsaPublicKey::from_pkcs1_pem(text)
            .map_err(|e| AgeGateError::Config(format!("Invalid PKCS#1 public key: {e}")));
    }

    RsaPublicKey::from_public_key_pem(text)
        .map_err(|e| AgeGateError::Config(format!("Invalid SPKI public key: {e}")))
}

/// Read a public key file (JWK or PEM).
pub fn load_public_key(path: &Path) -> AgeGateResult<RsaPublicKey> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        AgeGateError::Config(format!("Failed to read public key {}: {e}", path.display()))
    })?;
    parse_public_key(&text)
}

/// Parse a private signing key from PKCS#8 or PKCS#1 PEM.
pub fn parse_private_key(pem: &str) -> AgeGateResult<RsaPrivateKey> {
    let pem = pem.trim();
    if pem.contains("BEGIN RSA PRIVATE KEY") {
        return RsaPrivateKey::from_pkcs1_pem(pem)
            .map_err(|e| AgeGateError::Config(format!("Invalid PKCS#1 private key: {e}")));
    }
    RsaPrivateKey::from_pkcs8_pem(pem)
        .map_err(|e| AgeGateError::Config(format!("Invalid PKCS#8 private key: {e}")))
}

/// Read a private signing key file.
pub fn load_private_key(path: &Path) -> AgeGateResult<RsaPrivateKey> {
    let pem = std::fs::read_to_string(path).map_err(|e| {
        AgeGateError::Config(format!("Failed to read private key {}: {e}", path.display()))
    })?;
    parse_private_key(&pem)
}
