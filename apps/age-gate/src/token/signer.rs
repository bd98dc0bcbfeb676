//! Signing capability for token payloads.
//!
//! The verifier context never holds the private key itself; it asks a
//! [`TokenSigner`] for a signature over the payload segment. Two
//! implementations exist:
//!
//! - [`LocalSigner`]: holds the key in-process (the signing service and tests).
//! - [`RemoteSigner`]: calls the signing service over HTTP.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use rsa::rand_core::OsRng;
use rsa::{Pss, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AgeGateError, AgeGateResult};
use crate::token::PSS_SALT_LEN;
use crate::token::keys::parse_private_key;

/// HTTP client timeout for signing requests.
const SIGNER_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Produces a hex signature over an opaque payload.
pub trait TokenSigner: Send + Sync {
    /// Sign `payload`, returning the hex-encoded signature.
    fn sign(&self, payload: &[u8]) -> impl Future<Output = AgeGateResult<String>> + Send;
}

/// Body of `POST /sign`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRequest {
    /// Payload segment to sign (base64 text of the claim).
    pub payload: String,
}

/// Response of `POST /sign`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignResponse {
    /// Hex-encoded RSA-PSS signature.
    pub signature: String,
}

/// In-process RSA-PSS signer.
#[derive(Clone)]
pub struct LocalSigner {
    key: RsaPrivateKey,
}

impl LocalSigner {
    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    /// Build from a PKCS#8 or PKCS#1 PEM.
    pub fn from_pem(pem: &str) -> AgeGateResult<Self> {
        Ok(Self::new(parse_private_key(pem)?))
    }

    /// Public half of the signing key.
    pub fn public_key(&self) -> RsaPublicKey {
        self.key.to_public_key()
    }

    /// Sign synchronously.
    pub fn sign_payload(&self, payload: &[u8]) -> AgeGateResult<String> {
        let digest = Sha256::digest(payload);
        let signature = self
            .key
            .sign_with_rng(
                &mut OsRng,
                Pss::new_with_salt::<Sha256>(PSS_SALT_LEN),
                &digest,
            )
            .map_err(|e| AgeGateError::SigningFailed(e.to_string()))?;
        Ok(hex::encode(signature))
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner").finish_non_exhaustive()
    }
}

impl TokenSigner for LocalSigner {
    async fn sign(&self, payload: &[u8]) -> AgeGateResult<String> {
        self.sign_payload(payload)
    }
}

/// Client for the signing service.
#[derive(Debug, Clone)]
pub struct RemoteSigner {
    endpoint: String,
    http_client: Client,
    internal_token: Option<String>,
}

impl RemoteSigner {
    /// Create a client for the service at `endpoint` (e.g. `http://localhost:5101`).
    pub fn new(endpoint: impl Into<String>, internal_token: Option<String>) -> AgeGateResult<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(SIGNER_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AgeGateError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            http_client,
            internal_token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl TokenSigner for RemoteSigner {
    async fn sign(&self, payload: &[u8]) -> AgeGateResult<String> {
        let payload = std::str::from_utf8(payload)
            .map_err(|e| AgeGateError::InvalidInput(format!("Payload is not UTF-8: {e}")))?;

        let mut request = self
            .http_client
            .post(format!("{}/sign", self.endpoint))
            .json(&SignRequest {
                payload: payload.to_string(),
            });
        if let Some(token) = self.internal_token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, "Signing service rejected request");
            return Err(AgeGateError::SigningFailed(format!(
                "Signing service returned {status}: {body}"
            )));
        }

        let body: SignResponse = response.json().await?;
        if hex::decode(&body.signature).is_err() {
            return Err(AgeGateError::SigningFailed(
                "Signing service returned a non-hex signature".to_string(),
            ));
        }

        tracing::debug!(endpoint = %self.endpoint, "Payload signed by signing service");
        Ok(body.signature)
    }
}
