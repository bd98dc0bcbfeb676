//! Session cache for the relying context.
//!
//! Holds at most one token under [`CACHE_KEY`]. Reads are never trusted: every
//! [`SessionCache::get`] re-verifies the stored token and deletes it when a
//! token check fails. There is no separate TTL; the token's `exp` is the lifetime.

use crate::error::{AgeGateError, AgeGateResult};
use crate::storage::Storage;
use crate::token::claims::ClaimPayload;
use crate::token::verifier::ClaimVerifier;

/// Storage key of the cached token.
pub const CACHE_KEY: &str = "uvae-token";

/// A token that passed verification, paired with its trusted claim.
///
/// Only [`SessionCache::verify`] constructs this, so [`SessionCache::put`]
/// cannot persist an unverified string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    token: String,
    claim: ClaimPayload,
}

impl VerifiedToken {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn claim(&self) -> &ClaimPayload {
        &self.claim
    }

    pub fn age(&self) -> u32 {
        self.claim.age
    }
}

/// Verified single-token cache.
#[derive(Debug, Clone)]
pub struct SessionCache<V> {
    storage: Storage,
    verifier: V,
}

impl<V: ClaimVerifier> SessionCache<V> {
    pub fn new(storage: Storage, verifier: V) -> Self {
        Self { storage, verifier }
    }

    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    /// Verify `token` without touching storage.
    pub fn verify(&self, token: &str) -> AgeGateResult<VerifiedToken> {
        let claim = self.verifier.verify(token)?;
        Ok(VerifiedToken {
            token: token.to_string(),
            claim,
        })
    }

    /// Return the cached token if it still verifies.
    ///
    /// A stored token that fails a token check is deleted and reported as
    /// absent. Other verifier failures propagate and leave storage alone.
    pub fn get(&self) -> AgeGateResult<Option<VerifiedToken>> {
        let Some(token) = self.cached_token()? else {
            return Ok(None);
        };

        match self.verify(&token) {
            Ok(verified) => Ok(Some(verified)),
            Err(err) if err.is_token_rejection() => {
                tracing::warn!(code = err.error_code(), error = %err, "Dropping cached token");
                self.clear()?;
                Ok(None)
            }
            Err(err) => {
                tracing::error!(error = %err, "Cached token could not be checked");
                Err(err)
            }
        }
    }

    /// Persist a freshly verified token, replacing any previous one.
    pub fn put(&self, token: &VerifiedToken) -> AgeGateResult<()> {
        self.storage.put(CACHE_KEY, token.token.as_bytes())?;
        tracing::debug!(age = token.claim.age, exp = token.claim.exp, "Cached token");
        Ok(())
    }

    /// Remove the cached token.
    pub fn clear(&self) -> AgeGateResult<()> {
        self.storage.delete(CACHE_KEY)?;
        Ok(())
    }

    /// Raw stored token, without verification.
    pub fn cached_token(&self) -> AgeGateResult<Option<String>> {
        self.storage
            .get(CACHE_KEY)?
            .map(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|e| AgeGateError::Storage(format!("Cached token is not UTF-8: {e}")))
            })
            .transpose()
            .or_else(|err| {
                // Unreadable bytes can never verify; drop them
                tracing::warn!(error = %err, "Dropping unreadable cached token");
                self.clear()?;
                Ok(None)
            })
    }

    /// Age from the cached token, if it still verifies.
    pub fn cached_age(&self) -> AgeGateResult<Option<u32>> {
        Ok(self.get()?.map(|verified| verified.age()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Duration;

    use super::*;
    use crate::test_support::{signed_token, test_signer, test_subject};
    use crate::token::claims::now_ms;
    use crate::token::verifier::TokenVerifier;

    fn cache() -> SessionCache<TokenVerifier> {
        SessionCache::new(
            Storage::open_memory().unwrap(),
            TokenVerifier::new(test_signer().public_key(), test_subject()),
        )
    }

    fn fresh_token(age: u32) -> String {
        signed_token(&ClaimPayload::new(
            age,
            now_ms(),
            Duration::hours(1),
            test_subject().fingerprint(),
        ))
    }

    struct CountingVerifier {
        calls: AtomicUsize,
    }

    impl ClaimVerifier for CountingVerifier {
        fn verify(&self, _token: &str) -> AgeGateResult<ClaimPayload> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ClaimPayload {
                age: 30,
                created_at: 0,
                exp: i64::MAX,
                sub: 0,
            })
        }
    }

    struct UnavailableVerifier;

    impl ClaimVerifier for UnavailableVerifier {
        fn verify(&self, _token: &str) -> AgeGateResult<ClaimPayload> {
            Err(AgeGateError::Internal("key store offline".to_string()))
        }
    }

    #[test]
    fn test_verifier_failure_keeps_entry() {
        let cache = SessionCache::new(Storage::open_memory().unwrap(), UnavailableVerifier);
        cache.storage.put(CACHE_KEY, b"stored.token").unwrap();

        assert_eq!(
            cache.get(),
            Err(AgeGateError::Internal("key store offline".to_string()))
        );
        assert_eq!(cache.cached_token().unwrap().as_deref(), Some("stored.token"));
    }

    #[test]
    fn test_put_then_get() {
        let cache = cache();
        let verified = cache.verify(&fresh_token(25)).unwrap();
        cache.put(&verified).unwrap();

        assert_eq!(cache.get().unwrap(), Some(verified));
        assert_eq!(cache.cached_age().unwrap(), Some(25));
    }

    #[test]
    fn test_invalid_entry_is_deleted_on_read() {
        let cache = cache();
        cache.storage.put(CACHE_KEY, b"garbage").unwrap();

        assert_eq!(cache.get().unwrap(), None);
        assert_eq!(cache.cached_token().unwrap(), None);
    }

    #[test]
    fn test_expired_entry_is_deleted_on_read() {
        let cache = cache();
        let expired = signed_token(&ClaimPayload {
            age: 40,
            created_at: 0,
            exp: 1,
            sub: test_subject().fingerprint(),
        });
        cache.storage.put(CACHE_KEY, expired.as_bytes()).unwrap();

        assert_eq!(cache.cached_age().unwrap(), None);
        assert!(cache.storage.get(CACHE_KEY).unwrap().is_none());
    }

    #[test]
    fn test_cached_token_skips_verification() {
        let cache = cache();
        cache.storage.put(CACHE_KEY, b"not.verified").unwrap();
        assert_eq!(cache.cached_token().unwrap().as_deref(), Some("not.verified"));
    }

    #[test]
    fn test_clear_then_get_does_not_verify() {
        let cache = SessionCache::new(
            Storage::open_memory().unwrap(),
            CountingVerifier {
                calls: AtomicUsize::new(0),
            },
        );
        let verified = cache.verify("any.token").unwrap();
        cache.put(&verified).unwrap();
        assert_eq!(cache.verifier().calls.load(Ordering::SeqCst), 1);

        cache.clear().unwrap();
        assert_eq!(cache.get().unwrap(), None);
        assert_eq!(cache.verifier().calls.load(Ordering::SeqCst), 1);
    }
}
