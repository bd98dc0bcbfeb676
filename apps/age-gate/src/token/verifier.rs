//! Token verification.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. exactly two segments (`MALFORMED`)
//! 2. payload decodes to a claim (`MALFORMED`)
//! 3. `exp >= now` (`EXPIRED`)
//! 4. `sub` matches this verifier's device/origin (`INVALID_SUBJECT`)
//! 5. RSA-PSS signature over the payload segment (`INVALID_SIGNATURE`)
//!
//! Steps 3 and 4 run before the signature check, so a forged token can still
//! report `EXPIRED` or `INVALID_SUBJECT`. Callers must treat every error as
//! "unverified"; only an `Ok` carries a trusted claim.

use rsa::{Pss, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::{AgeGateError, AgeGateResult};
use crate::token::PSS_SALT_LEN;
use crate::token::claims::{ClaimPayload, TimestampMs, now_ms};
use crate::token::codec::{decode_payload, split_token};
use crate::token::subject::SubjectContext;

/// Anything that can turn a token string into a trusted claim.
pub trait ClaimVerifier: Send + Sync {
    fn verify(&self, token: &str) -> AgeGateResult<ClaimPayload>;
}

/// Verifies tokens against a fixed public key and subject context.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    public_key: RsaPublicKey,
    subject: SubjectContext,
}

impl TokenVerifier {
    pub fn new(public_key: RsaPublicKey, subject: SubjectContext) -> Self {
        Self {
            public_key,
            subject,
        }
    }

    pub fn subject(&self) -> &SubjectContext {
        &self.subject
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Verify `token` at an explicit instant.
    pub fn verify_at(&self, token: &str, now: TimestampMs) -> AgeGateResult<ClaimPayload> {
        self.verify_for(token, &self.subject, now)
    }

    /// Verify `token` for an explicit subject context.
    pub fn verify_for(
        &self,
        token: &str,
        subject: &SubjectContext,
        now: TimestampMs,
    ) -> AgeGateResult<ClaimPayload> {
        let (payload_segment, signature_hex) = split_token(token)?;
        let claim = decode_payload(payload_segment)?;

        if claim.is_expired_at(now) {
            return Err(AgeGateError::Expired {
                exp: claim.exp,
                now,
            });
        }

        let expected = subject.fingerprint();
        if claim.sub != expected {
            return Err(AgeGateError::InvalidSubject {
                expected,
                actual: claim.sub,
            });
        }

        self.verify_signature(payload_segment.as_bytes(), signature_hex)?;

        tracing::debug!(age = claim.age, exp = claim.exp, "Token verified");
        Ok(claim)
    }

    fn verify_signature(&self, payload: &[u8], signature_hex: &str) -> AgeGateResult<()> {
        let signature = hex::decode(signature_hex)
            .map_err(|e| AgeGateError::InvalidSignature(format!("signature is not hex: {e}")))?;
        let digest = Sha256::digest(payload);

        self.public_key
            .verify(
                Pss::new_with_salt::<Sha256>(PSS_SALT_LEN),
                &digest,
                &signature,
            )
            .map_err(|e| AgeGateError::InvalidSignature(e.to_string()))
    }
}

impl ClaimVerifier for TokenVerifier {
    fn verify(&self, token: &str) -> AgeGateResult<ClaimPayload> {
        self.verify_at(token, now_ms())
    }
}
