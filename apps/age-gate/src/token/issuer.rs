//! Token issuance.

use chrono::Duration;

use crate::error::AgeGateResult;
use crate::token::claims::{ClaimPayload, now_ms};
use crate::token::codec::{assemble, encode_payload};
use crate::token::signer::TokenSigner;
use crate::token::subject::SubjectContext;

/// Builds signed tokens from claims using a [`TokenSigner`].
#[derive(Debug, Clone)]
pub struct TokenIssuer<S> {
    signer: S,
}

impl<S: TokenSigner> TokenIssuer<S> {
    pub fn new(signer: S) -> Self {
        Self { signer }
    }

    pub fn signer(&self) -> &S {
        &self.signer
    }

    /// Encode and sign `claim`.
    pub async fn issue(&self, claim: &ClaimPayload) -> AgeGateResult<String> {
        let payload = encode_payload(claim)?;
        let signature = self.signer.sign(payload.as_bytes()).await?;
        tracing::debug!(age = claim.age, exp = claim.exp, "Token issued");
        Ok(assemble(&payload, &signature))
    }

    /// Issue a claim for `age` bound to `subject`, valid for `lifetime` from now.
    pub async fn issue_claim(
        &self,
        age: u32,
        subject: &SubjectContext,
        lifetime: Duration,
    ) -> AgeGateResult<String> {
        let claim = ClaimPayload::new(age, now_ms(), lifetime, subject.fingerprint());
        self.issue(&claim).await
    }
}
