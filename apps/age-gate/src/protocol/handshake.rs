//! Relying-side handshake.
//!
//! ```text
//! Idle -> AwaitingOpen -> AwaitingResult -> Resolved | Rejected
//!              \
//!               +-> Rejected(POPUP_BLOCKED)
//! ```
//!
//! One task drives the attempt: it multiplexes inbound messages, the closure
//! poll and the attempt deadline. Whichever settles first wins; the
//! [`Settlement`] guard makes later events no-ops and runs cleanup once.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::cache::SessionCache;
use crate::error::{AgeGateError, AgeGateResult};
use crate::protocol::channel::{ContextOpener, InboundMessage, VerifierHandle};
use crate::protocol::messages::{
    CommandeerConfirm, EstimationFailure, EstimationResult, ProtocolMessage, classify_error,
};
use crate::token::verifier::ClaimVerifier;

/// How often the verifier context is checked for closure.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default token lifetime requested from the verifier.
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    pub verifier_url: String,
    /// Only messages from this origin are accepted.
    pub verifier_origin: String,
    /// Origin of this (relying) context, sent to the verifier for subject binding.
    pub relying_origin: String,
    pub liveness_check: bool,
    /// Token lifetime requested from the verifier.
    pub cache_duration: Duration,
    /// Persist the verified token.
    pub enable_cache: bool,
    pub poll_interval: Duration,
    pub attempt_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    AwaitingOpen,
    AwaitingResult,
    Resolved(u32),
    Rejected(AgeGateError),
}

/// First-wins settlement guard with run-once cleanup.
#[derive(Debug, Default)]
pub struct Settlement {
    outcome: Option<AgeGateResult<u32>>,
    cleaned_up: bool,
}

impl Settlement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `outcome` unless already settled. Returns whether it was recorded.
    pub fn settle(&mut self, outcome: AgeGateResult<u32>) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(outcome);
        true
    }

    pub fn is_settled(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn outcome(&self) -> Option<&AgeGateResult<u32>> {
        self.outcome.as_ref()
    }

    /// True exactly once: on the first call.
    pub fn begin_cleanup(&mut self) -> bool {
        !std::mem::replace(&mut self.cleaned_up, true)
    }
}

/// One relying-side attempt.
pub struct Handshake<'a, O, V> {
    opener: &'a O,
    cache: &'a SessionCache<V>,
    inbox: &'a mut UnboundedReceiver<InboundMessage>,
    config: HandshakeConfig,
    attempt_id: Uuid,
    nonce: String,
    state: HandshakeState,
    settlement: Settlement,
    commandeer_replied: bool,
}

impl<'a, O: ContextOpener, V: ClaimVerifier> Handshake<'a, O, V> {
    pub fn new(
        opener: &'a O,
        cache: &'a SessionCache<V>,
        inbox: &'a mut UnboundedReceiver<InboundMessage>,
        config: HandshakeConfig,
    ) -> Self {
        Self {
            opener,
            cache,
            inbox,
            config,
            attempt_id: Uuid::new_v4(),
            nonce: Uuid::new_v4().simple().to_string(),
            state: HandshakeState::Idle,
            settlement: Settlement::new(),
            commandeer_replied: false,
        }
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    /// Drive the attempt to a settled outcome.
    pub async fn run(&mut self) -> AgeGateResult<u32> {
        if self.state != HandshakeState::Idle {
            return Err(AgeGateError::Internal("Handshake already ran".to_string()));
        }

        tracing::info!(
            attempt_id = %self.attempt_id,
            verifier = %self.config.verifier_url,
            liveness = self.config.liveness_check,
            "Starting age estimation attempt"
        );

        self.state = HandshakeState::AwaitingOpen;
        let Some(handle) = self.opener.open(&self.config.verifier_url) else {
            self.settlement.settle(Err(AgeGateError::PopupBlocked));
            return self.finish();
        };
        self.state = HandshakeState::AwaitingResult;

        let poll_interval = self.config.poll_interval;
        let mut poll = tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let deadline = tokio::time::sleep(self.config.attempt_timeout);
        tokio::pin!(deadline);

        while !self.settlement.is_settled() {
            // Queued messages win over a close seen in the same wakeup
            tokio::select! {
                biased;

                message = self.inbox.recv() => match message {
                    Some(message) => self.on_message(&handle, message),
                    None => {
                        self.settlement.settle(Err(AgeGateError::Internal(
                            "Message channel closed".to_string(),
                        )));
                    }
                },
                _ = poll.tick() => {
                    if handle.is_closed() && self.settlement.settle(Err(AgeGateError::Cancelled)) {
                        tracing::info!(attempt_id = %self.attempt_id, "Verifier context closed by user");
                    }
                }
                () = &mut deadline => {
                    let ms = u64::try_from(self.config.attempt_timeout.as_millis()).unwrap_or(u64::MAX);
                    if self.settlement.settle(Err(AgeGateError::Timeout(ms))) {
                        handle.close();
                    }
                }
            }
        }

        self.finish()
    }

    fn on_message(&mut self, handle: &O::Handle, message: InboundMessage) {
        if self.settlement.is_settled() {
            return;
        }
        if message.source != handle.id() || message.origin != self.config.verifier_origin {
            tracing::trace!(origin = %message.origin, "Ignoring message from unexpected sender");
            return;
        }
        let Some(parsed) = ProtocolMessage::parse(&message.data) else {
            return;
        };
        if let Some(nonce) = parsed.nonce()
            && nonce != self.nonce
        {
            tracing::trace!(kind = parsed.kind(), "Ignoring message with foreign nonce");
            return;
        }

        match parsed {
            ProtocolMessage::CheckParentCommandeer => self.reply_commandeer(handle),
            ProtocolMessage::AgeEstimationResult(result) => {
                let outcome = self.accept_result(&result);
                self.settlement.settle(outcome);
                handle.close();
            }
            ProtocolMessage::AgeEstimationError(failure) => {
                let err = self.accept_failure(&failure);
                self.settlement.settle(Err(err));
                handle.close();
            }
            ProtocolMessage::ConfirmParentCommandeer(_) => {
                tracing::trace!("Ignoring confirm sent to the relying side");
            }
        }
    }

    fn reply_commandeer(&mut self, handle: &O::Handle) {
        if self.commandeer_replied {
            tracing::debug!(attempt_id = %self.attempt_id, "Ignoring repeated commandeer request");
            return;
        }
        self.commandeer_replied = true;

        let confirm = ProtocolMessage::ConfirmParentCommandeer(CommandeerConfirm {
            nonce: self.nonce.clone(),
            liveness_check: self.config.liveness_check,
            cache_duration: u64::try_from(self.config.cache_duration.as_millis())
                .unwrap_or(u64::MAX),
            origin: self.config.relying_origin.clone(),
        });
        handle.post(&confirm, &self.config.verifier_origin);
        tracing::debug!(attempt_id = %self.attempt_id, "Commandeer confirmed");
    }

    fn accept_result(&self, result: &EstimationResult) -> AgeGateResult<u32> {
        let verified = match self.cache.verify(&result.token) {
            Ok(verified) => verified,
            Err(err) => {
                tracing::warn!(
                    attempt_id = %self.attempt_id,
                    code = err.error_code(),
                    error = %err,
                    "Rejected token from verifier"
                );
                return Err(AgeGateError::InvalidSignature(err.to_string()));
            }
        };

        if result.age != verified.age() {
            tracing::warn!(
                attempt_id = %self.attempt_id,
                reported = result.age,
                signed = verified.age(),
                "Reported age differs from signed claim"
            );
        }

        if self.config.enable_cache
            && let Err(err) = self.cache.put(&verified)
        {
            tracing::error!(attempt_id = %self.attempt_id, error = %err, "Failed to cache token");
        }

        Ok(verified.age())
    }

    fn accept_failure(&self, failure: &EstimationFailure) -> AgeGateError {
        let err = classify_error(failure);
        tracing::info!(
            attempt_id = %self.attempt_id,
            code = err.error_code(),
            reported = %failure.error,
            "Verifier reported failure"
        );
        err
    }

    fn finish(&mut self) -> AgeGateResult<u32> {
        if self.settlement.begin_cleanup() {
            // Tear down the listener: anything still queued belongs to this attempt
            while self.inbox.try_recv().is_ok() {}
        }

        let outcome = self
            .settlement
            .outcome()
            .cloned()
            .unwrap_or_else(|| Err(AgeGateError::Internal("Attempt never settled".to_string())));

        self.state = match &outcome {
            Ok(age) => HandshakeState::Resolved(*age),
            Err(err) => HandshakeState::Rejected(err.clone()),
        };

        match &outcome {
            Ok(age) => tracing::info!(attempt_id = %self.attempt_id, age, "Attempt resolved"),
            Err(err) => {
                tracing::info!(attempt_id = %self.attempt_id, code = err.error_code(), "Attempt rejected");
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    use super::*;
    use crate::protocol::channel::{ANY_ORIGIN, OpenerHandle};
    use crate::protocol::channel::local::{LocalOpener, LocalWindow, VerifierEnd};
    use crate::protocol::messages::ErrorCode;
    use crate::storage::Storage;
    use crate::test_support::{signed_token, test_signer, test_subject};
    use crate::token::claims::{ClaimPayload, now_ms};
    use crate::token::verifier::TokenVerifier;

    const VERIFIER_ORIGIN: &str = "https://verify.example";

    fn config() -> HandshakeConfig {
        HandshakeConfig {
            verifier_url: format!("{VERIFIER_ORIGIN}/age-estimator/"),
            verifier_origin: VERIFIER_ORIGIN.to_string(),
            relying_origin: test_subject().origin,
            liveness_check: true,
            cache_duration: Duration::from_secs(3600),
            enable_cache: true,
            poll_interval: Duration::from_millis(10),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    fn cache() -> SessionCache<TokenVerifier> {
        SessionCache::new(
            Storage::open_memory().unwrap(),
            TokenVerifier::new(test_signer().public_key(), test_subject()),
        )
    }

    fn token(age: u32) -> String {
        signed_token(&ClaimPayload::new(
            age,
            now_ms(),
            ChronoDuration::hours(1),
            test_subject().fingerprint(),
        ))
    }

    /// Ask for control and wait for the confirm.
    async fn commandeer(end: &mut VerifierEnd) -> CommandeerConfirm {
        end.opener.post(&ProtocolMessage::CheckParentCommandeer, ANY_ORIGIN);
        loop {
            let inbound = end.inbox.recv().await.unwrap();
            if let Some(ProtocolMessage::ConfirmParentCommandeer(confirm)) =
                ProtocolMessage::parse(&inbound.data)
            {
                return confirm;
            }
        }
    }

    fn result(nonce: &str, age: u32, token: String) -> ProtocolMessage {
        ProtocolMessage::AgeEstimationResult(EstimationResult {
            nonce: nonce.to_string(),
            age,
            token,
        })
    }

    #[tokio::test]
    async fn test_popup_blocked() {
        let (relying, mut inbox) = LocalWindow::new(test_subject().origin);
        let opener = LocalOpener::blocked(relying);
        let cache = cache();
        let mut handshake = Handshake::new(&opener, &cache, &mut inbox, config());

        assert_eq!(handshake.run().await, Err(AgeGateError::PopupBlocked));
        assert_eq!(
            handshake.state(),
            &HandshakeState::Rejected(AgeGateError::PopupBlocked)
        );
    }

    #[tokio::test]
    async fn test_result_verified_and_cached() {
        let (relying, mut inbox) = LocalWindow::new(test_subject().origin);
        let (opener, mut launches) = LocalOpener::new(relying, VERIFIER_ORIGIN);
        let cache = cache();

        let verifier = tokio::spawn(async move {
            let mut end = launches.recv().await.unwrap();
            let confirm = commandeer(&mut end).await;
            assert!(confirm.liveness_check);
            assert_eq!(confirm.cache_duration, 3_600_000);
            assert_eq!(confirm.origin, test_subject().origin);
            end.opener
                .post(&result(&confirm.nonce, 33, token(33)), &confirm.origin);
            end
        });

        let mut handshake = Handshake::new(&opener, &cache, &mut inbox, config());
        assert_eq!(handshake.run().await, Ok(33));
        assert_eq!(handshake.state(), &HandshakeState::Resolved(33));

        let end = verifier.await.unwrap();
        assert!(end.window.is_closed());
        assert_eq!(cache.cached_age().unwrap(), Some(33));
    }

    #[tokio::test]
    async fn test_commandeer_answered_once() {
        let (relying, mut inbox) = LocalWindow::new(test_subject().origin);
        let (opener, mut launches) = LocalOpener::new(relying, VERIFIER_ORIGIN);
        let cache = cache();

        let verifier = tokio::spawn(async move {
            let mut end = launches.recv().await.unwrap();
            let confirm = commandeer(&mut end).await;
            end.opener
                .post(&ProtocolMessage::CheckParentCommandeer, ANY_ORIGIN);
            end.opener.post(&result("other", 1, token(1)), ANY_ORIGIN);
            tokio::time::sleep(Duration::from_millis(30)).await;
            let mut extra = 0;
            while end.inbox.try_recv().is_ok() {
                extra += 1;
            }
            end.opener
                .post(&result(&confirm.nonce, 40, token(40)), ANY_ORIGIN);
            extra
        });

        let mut handshake = Handshake::new(&opener, &cache, &mut inbox, config());
        assert_eq!(handshake.run().await, Ok(40));
        assert_eq!(verifier.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_spoofed_and_foreign_messages_ignored() {
        let (relying, mut inbox) = LocalWindow::new(test_subject().origin);
        let (opener, mut launches) = LocalOpener::new(relying.clone(), VERIFIER_ORIGIN);
        let (intruder, _intruder_inbox) = LocalWindow::new(VERIFIER_ORIGIN);
        let (wrong_origin, _wrong_inbox) = LocalWindow::new("https://evil.example");
        let cache = cache();

        tokio::spawn(async move {
            let mut end = launches.recv().await.unwrap();
            let confirm = commandeer(&mut end).await;
            let nonce = confirm.nonce.clone();

            // Right origin, wrong context
            relying.deliver(&intruder, &result(&nonce, 99, token(99)), ANY_ORIGIN);
            // Right nonce, wrong origin
            relying.deliver(&wrong_origin, &result(&nonce, 98, token(98)), ANY_ORIGIN);
            // Unknown type and wrong nonce from the real verifier
            end.opener.post(&result("stale", 97, token(97)), ANY_ORIGIN);
            relying.deliver_raw(&end.window, json!({"type": "age-estimation-bonus", "nonce": nonce}), ANY_ORIGIN);

            end.opener.post(&result(&nonce, 25, token(25)), ANY_ORIGIN);
        });

        let mut handshake = Handshake::new(&opener, &cache, &mut inbox, config());
        assert_eq!(handshake.run().await, Ok(25));
    }

    #[tokio::test]
    async fn test_bad_token_rejected_and_not_cached() {
        let (relying, mut inbox) = LocalWindow::new(test_subject().origin);
        let (opener, mut launches) = LocalOpener::new(relying, VERIFIER_ORIGIN);
        let cache = cache();

        tokio::spawn(async move {
            let mut end = launches.recv().await.unwrap();
            let confirm = commandeer(&mut end).await;
            end.opener
                .post(&result(&confirm.nonce, 30, "forged.00".to_string()), ANY_ORIGIN);
        });

        let mut handshake = Handshake::new(&opener, &cache, &mut inbox, config());
        let outcome = handshake.run().await;
        assert!(matches!(outcome, Err(AgeGateError::InvalidSignature(_))));
        assert_eq!(cache.cached_token().unwrap(), None);
    }

    #[tokio::test]
    async fn test_error_message_mapped() {
        let (relying, mut inbox) = LocalWindow::new(test_subject().origin);
        let (opener, mut launches) = LocalOpener::new(relying, VERIFIER_ORIGIN);
        let cache = cache();

        tokio::spawn(async move {
            let mut end = launches.recv().await.unwrap();
            let confirm = commandeer(&mut end).await;
            let failure = ProtocolMessage::AgeEstimationError(EstimationFailure {
                nonce: confirm.nonce,
                error: "Error accessing webcam".to_string(),
                code: None,
            });
            end.opener.post(&failure, ANY_ORIGIN);
        });

        let mut handshake = Handshake::new(&opener, &cache, &mut inbox, config());
        let outcome = handshake.run().await;
        assert_eq!(outcome.unwrap_err().error_code(), "WEBCAM_ERROR");
    }

    #[tokio::test]
    async fn test_typed_error_code() {
        let (relying, mut inbox) = LocalWindow::new(test_subject().origin);
        let (opener, mut launches) = LocalOpener::new(relying, VERIFIER_ORIGIN);
        let cache = cache();

        tokio::spawn(async move {
            let mut end = launches.recv().await.unwrap();
            let confirm = commandeer(&mut end).await;
            let failure = ProtocolMessage::AgeEstimationError(EstimationFailure {
                nonce: confirm.nonce,
                error: "step 'left' failed".to_string(),
                code: Some(ErrorCode::WrongPoseExceededRetries),
            });
            end.opener.post(&failure, ANY_ORIGIN);
        });

        let mut handshake = Handshake::new(&opener, &cache, &mut inbox, config());
        let outcome = handshake.run().await;
        assert_eq!(outcome.unwrap_err().error_code(), "WRONG_POSE_EXCEEDED_RETRIES");
    }

    #[tokio::test]
    async fn test_closed_verifier_cancels() {
        let (relying, mut inbox) = LocalWindow::new(test_subject().origin);
        let (opener, mut launches) = LocalOpener::new(relying, VERIFIER_ORIGIN);
        let cache = cache();

        tokio::spawn(async move {
            let end = launches.recv().await.unwrap();
            end.window.close();
        });

        let mut handshake = Handshake::new(&opener, &cache, &mut inbox, config());
        assert_eq!(handshake.run().await, Err(AgeGateError::Cancelled));
    }

    #[tokio::test]
    async fn test_result_then_close_stays_resolved() {
        let (relying, mut inbox) = LocalWindow::new(test_subject().origin);
        let (opener, mut launches) = LocalOpener::new(relying, VERIFIER_ORIGIN);
        let cache = cache();

        tokio::spawn(async move {
            let mut end = launches.recv().await.unwrap();
            let confirm = commandeer(&mut end).await;
            end.opener
                .post(&result(&confirm.nonce, 50, token(50)), ANY_ORIGIN);
            end.window.close();
        });

        let mut handshake = Handshake::new(&opener, &cache, &mut inbox, config());
        assert_eq!(handshake.run().await, Ok(50));
        // Running again does not re-settle
        assert!(handshake.run().await.is_err());
        assert_eq!(handshake.state(), &HandshakeState::Resolved(50));
    }

    #[tokio::test]
    async fn test_queued_result_beats_close_in_same_wakeup() {
        for _ in 0..10 {
            let (relying, mut inbox) = LocalWindow::new(test_subject().origin);
            let (opener, mut launches) = LocalOpener::new(relying, VERIFIER_ORIGIN);
            let cache = cache();

            tokio::spawn(async move {
                let mut end = launches.recv().await.unwrap();
                let confirm = commandeer(&mut end).await;
                end.opener
                    .post(&result(&confirm.nonce, 31, token(31)), ANY_ORIGIN);
                end.window.close();
                // Block the runtime past the next poll tick so both branches are ready
                std::thread::sleep(Duration::from_millis(30));
            });

            let mut handshake = Handshake::new(&opener, &cache, &mut inbox, config());
            assert_eq!(handshake.run().await, Ok(31));
        }
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        let (relying, mut inbox) = LocalWindow::new(test_subject().origin);
        let (opener, mut launches) = LocalOpener::new(relying, VERIFIER_ORIGIN);
        let cache = cache();

        let verifier = tokio::spawn(async move {
            let end = launches.recv().await.unwrap();
            // Keep the context open and silent
            tokio::time::sleep(Duration::from_millis(200)).await;
            end.window.is_closed()
        });

        let mut cfg = config();
        cfg.attempt_timeout = Duration::from_millis(50);
        let mut handshake = Handshake::new(&opener, &cache, &mut inbox, cfg);
        assert_eq!(handshake.run().await, Err(AgeGateError::Timeout(50)));
        assert!(verifier.await.unwrap());
    }

    #[test]
    fn test_settlement_first_wins() {
        let mut settlement = Settlement::new();
        assert!(settlement.settle(Ok(21)));
        assert!(!settlement.settle(Err(AgeGateError::Cancelled)));
        assert_eq!(settlement.outcome(), Some(&Ok(21)));

        assert!(settlement.begin_cleanup());
        assert!(!settlement.begin_cleanup());
    }
}
