//! Verifier-side driver.
//!
//! Announces itself to the opener, waits for the opener to take control, runs
//! one estimation session, then reports exactly one result or error to the
//! origin named in the confirm.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::{AgeGateError, AgeGateResult};
use crate::estimation::detection::{CameraSource, FaceDetector};
use crate::protocol::channel::{ANY_ORIGIN, InboundMessage, OpenerHandle};
use crate::protocol::messages::{
    CommandeerConfirm, EstimationFailure, EstimationResult, ProtocolMessage,
};
use crate::session::{EstimationSession, SessionSettings};
use crate::token::issuer::TokenIssuer;
use crate::token::signer::TokenSigner;
use crate::token::subject::SubjectContext;

/// How long to wait for the opener to confirm control.
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);

pub struct VerifierContext<O, C, D, S> {
    opener: O,
    inbox: UnboundedReceiver<InboundMessage>,
    cameras: C,
    detector: D,
    issuer: TokenIssuer<S>,
    device_identity: String,
    settings: SessionSettings,
    confirm_timeout: Duration,
}

impl<O, C, D, S> VerifierContext<O, C, D, S>
where
    O: OpenerHandle,
    C: CameraSource,
    D: FaceDetector,
    S: TokenSigner,
{
    pub fn new(
        opener: O,
        inbox: UnboundedReceiver<InboundMessage>,
        cameras: C,
        detector: D,
        issuer: TokenIssuer<S>,
        device_identity: impl Into<String>,
    ) -> Self {
        Self {
            opener,
            inbox,
            cameras,
            detector,
            issuer,
            device_identity: device_identity.into(),
            settings: SessionSettings::default(),
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
        }
    }

    /// Session settings. `liveness_check` is overridden by the opener's confirm.
    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    /// Run the verifier side of one attempt.
    ///
    /// Returns the estimated age on success. Failures after the opener took
    /// control are reported to it before being returned.
    pub async fn run(mut self) -> AgeGateResult<u32> {
        self.opener
            .post(&ProtocolMessage::CheckParentCommandeer, ANY_ORIGIN);

        let confirm = self.await_confirm().await?;
        tracing::info!(
            origin = %confirm.origin,
            liveness = confirm.liveness_check,
            "Opener took control"
        );

        let settings = SessionSettings {
            liveness_check: confirm.liveness_check,
            ..self.settings
        };
        let session = EstimationSession::new(self.cameras, self.detector, settings);
        let subject = SubjectContext::new(self.device_identity, confirm.origin.clone());
        let outcome = estimate_and_issue(session, &self.issuer, &subject, &confirm).await;
        let message = match &outcome {
            Ok((age, token)) => ProtocolMessage::AgeEstimationResult(EstimationResult {
                nonce: confirm.nonce.clone(),
                age: *age,
                token: token.clone(),
            }),
            Err(err) => {
                tracing::warn!(code = err.error_code(), error = %err, "Estimation failed");
                ProtocolMessage::AgeEstimationError(EstimationFailure::from_error(
                    confirm.nonce.clone(),
                    err,
                ))
            }
        };
        self.opener.post(&message, &confirm.origin);

        outcome.map(|(age, _)| age)
    }

    async fn await_confirm(&mut self) -> AgeGateResult<CommandeerConfirm> {
        let opener_id = self.opener.id();
        let wait = async {
            while let Some(inbound) = self.inbox.recv().await {
                if inbound.source != opener_id {
                    continue;
                }
                if let Some(ProtocolMessage::ConfirmParentCommandeer(confirm)) =
                    ProtocolMessage::parse(&inbound.data)
                {
                    return Some(confirm);
                }
            }
            None
        };

        match tokio::time::timeout(self.confirm_timeout, wait).await {
            Ok(Some(confirm)) => Ok(confirm),
            Ok(None) => Err(AgeGateError::Cancelled),
            Err(_) => Err(AgeGateError::Internal(
                "Opener did not take control".to_string(),
            )),
        }
    }
}

/// Run the session and sign a claim for its age.
async fn estimate_and_issue<C, D, S>(
    mut session: EstimationSession<C, D>,
    issuer: &TokenIssuer<S>,
    subject: &SubjectContext,
    confirm: &CommandeerConfirm,
) -> AgeGateResult<(u32, String)>
where
    C: CameraSource,
    D: FaceDetector,
    S: TokenSigner,
{
    let outcome = session.run().await?;

    let lifetime =
        chrono::Duration::milliseconds(i64::try_from(confirm.cache_duration).unwrap_or(i64::MAX));
    let token = issuer.issue_claim(outcome.age, subject, lifetime).await?;

    Ok((outcome.age, token))
}
