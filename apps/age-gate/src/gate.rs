//! Minimum-age gate.
//!
//! A pure transition function over [`GateEvent`]s. The embedding surface
//! renders the returned [`GateAction`]s; [`AgeGate::dispatch`] runs the
//! estimator-facing actions itself and returns only what needs rendering.
//!
//! Removing or restyling the gate is reported as [`GateEvent::GateTampered`],
//! which re-checks the cached claim instead of trusting the page state.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use crate::config::Settings;
use crate::error::{AgeGateError, AgeGateResult};
use crate::estimator::{AgeEstimator, EstimateParams};
use crate::protocol::channel::ContextOpener;
use crate::protocol::handshake::DEFAULT_CACHE_DURATION;
use crate::token::verifier::ClaimVerifier;

pub const DEFAULT_MIN_AGE: u32 = 18;

/// How long the success overlay stays up.
pub const SUCCESS_DISPLAY: Duration = Duration::from_secs(3);

/// User-facing text shown on the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateNotice {
    Prompt,
    BelowMinimum,
    DifferentFace,
    Webcam,
    PopupBlocked,
    Cancelled,
    Generic,
}

impl GateNotice {
    pub fn for_error(err: &AgeGateError) -> Self {
        match err {
            AgeGateError::DifferentFace(_) => Self::DifferentFace,
            AgeGateError::Webcam(_) => Self::Webcam,
            AgeGateError::PopupBlocked => Self::PopupBlocked,
            AgeGateError::Cancelled => Self::Cancelled,
            _ => Self::Generic,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Prompt => "Please verify your age using our age estimator.",
            Self::BelowMinimum => "Your age estimate did not meet the minimum age requirement.",
            Self::DifferentFace => {
                "Different face detected during liveness check. Please try again."
            }
            Self::Webcam => {
                "Unable to access your webcam. Please ensure you have granted camera permissions."
            }
            Self::PopupBlocked => {
                "Popup was blocked. Please allow popups for this site and try again."
            }
            Self::Cancelled => "Age verification was cancelled. Please try again.",
            Self::Generic => "An error occurred while verifying your age. Please try again.",
        }
    }
}

impl fmt::Display for GateNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
    pub min_age: u32,
    pub cache_duration: Duration,
    pub liveness_check: bool,
    pub local_testing: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_age: DEFAULT_MIN_AGE,
            cache_duration: DEFAULT_CACHE_DURATION,
            liveness_check: true,
            local_testing: false,
        }
    }
}

impl GateConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            min_age: settings.min_age(),
            cache_duration: settings.cache_duration(),
            liveness_check: settings.liveness_check(),
            local_testing: settings.relying_origin().contains("localhost"),
        }
    }

    fn estimate_params(&self) -> EstimateParams {
        EstimateParams {
            liveness_check: self.liveness_check,
            enable_cache: true,
            cache_duration: self.cache_duration,
            local_testing: self.local_testing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Waiting for the cached claim check.
    Checking,
    Locked(GateNotice),
    Verifying,
    /// Success overlay showing.
    Verified,
    Open,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    /// Result of `has_valid_claim(min_age)`.
    ClaimChecked(bool),
    VerifyRequested,
    EstimateSettled(AgeGateResult<u32>),
    SuccessElapsed,
    /// The gate was removed or restyled from outside.
    GateTampered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateAction {
    ShowGate(GateNotice),
    HideGate,
    StartEstimate(EstimateParams),
    ClearCache,
    RecheckClaim,
    ShowSuccess,
    /// Deliver [`GateEvent::SuccessElapsed`] after this long.
    ScheduleSuccessDismiss(Duration),
    HideSuccess,
}

#[derive(Debug, Clone)]
pub struct AgeGate {
    config: GateConfig,
    state: GateState,
}

impl AgeGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            state: GateState::Checking,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Apply `event` and return the actions it triggers.
    pub fn handle(&mut self, event: GateEvent) -> Vec<GateAction> {
        use GateAction as A;
        use GateState as S;

        let (next, actions) = match (self.state, event) {
            (S::Checking, GateEvent::ClaimChecked(true)) => (S::Open, vec![A::HideGate]),
            (S::Checking, GateEvent::ClaimChecked(false)) => (
                S::Locked(GateNotice::Prompt),
                vec![A::ShowGate(GateNotice::Prompt)],
            ),

            (S::Locked(_), GateEvent::VerifyRequested) => (
                S::Verifying,
                vec![A::StartEstimate(self.config.estimate_params())],
            ),
            (S::Locked(_), GateEvent::GateTampered) => (S::Checking, vec![A::RecheckClaim]),

            (S::Verifying, GateEvent::EstimateSettled(Ok(age))) if age >= self.config.min_age => {
                tracing::info!(age, min_age = self.config.min_age, "Age gate passed");
                (
                    S::Verified,
                    vec![
                        A::HideGate,
                        A::ShowSuccess,
                        A::ScheduleSuccessDismiss(SUCCESS_DISPLAY),
                    ],
                )
            }
            (S::Verifying, GateEvent::EstimateSettled(Ok(age))) => {
                tracing::info!(age, min_age = self.config.min_age, "Age below gate minimum");
                (
                    S::Locked(GateNotice::BelowMinimum),
                    vec![A::ClearCache, A::ShowGate(GateNotice::BelowMinimum)],
                )
            }
            (S::Verifying, GateEvent::EstimateSettled(Err(err))) => {
                let notice = GateNotice::for_error(&err);
                tracing::info!(code = err.error_code(), "Age gate attempt failed");
                (S::Locked(notice), vec![A::ShowGate(notice)])
            }
            // The gate stays up while an attempt runs; re-assert it
            (S::Verifying, GateEvent::GateTampered) => {
                (S::Verifying, vec![A::ShowGate(GateNotice::Prompt)])
            }

            (S::Verified, GateEvent::SuccessElapsed) => (S::Open, vec![A::HideSuccess]),

            (state, event) => {
                tracing::trace!(?state, ?event, "Ignoring gate event");
                (state, Vec::new())
            }
        };

        self.state = next;
        actions
    }

    /// Apply `event`, running estimator-facing actions until only visual
    /// actions remain.
    pub async fn dispatch<O, V>(
        &mut self,
        estimator: &AgeEstimator<O, V>,
        event: GateEvent,
    ) -> AgeGateResult<Vec<GateAction>>
    where
        O: ContextOpener,
        V: ClaimVerifier,
    {
        let mut pending = VecDeque::from([event]);
        let mut visual = Vec::new();

        while let Some(event) = pending.pop_front() {
            for action in self.handle(event) {
                match action {
                    GateAction::ClearCache => estimator.clear_cache()?,
                    GateAction::RecheckClaim => {
                        let valid = estimator.has_valid_claim(self.config.min_age)?;
                        pending.push_back(GateEvent::ClaimChecked(valid));
                    }
                    GateAction::StartEstimate(params) => {
                        let outcome = estimator.estimate_age(&params).await;
                        pending.push_back(GateEvent::EstimateSettled(outcome));
                    }
                    other => visual.push(other),
                }
            }
        }

        Ok(visual)
    }

    /// Initial claim check; shows or hides the gate.
    pub async fn start<O, V>(
        &mut self,
        estimator: &AgeEstimator<O, V>,
    ) -> AgeGateResult<Vec<GateAction>>
    where
        O: ContextOpener,
        V: ClaimVerifier,
    {
        let valid = estimator.has_valid_claim(self.config.min_age)?;
        self.dispatch(estimator, GateEvent::ClaimChecked(valid)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locked() -> AgeGate {
        let mut gate = AgeGate::new(GateConfig::default());
        gate.handle(GateEvent::ClaimChecked(false));
        gate
    }

    #[test]
    fn test_valid_claim_opens_immediately() {
        let mut gate = AgeGate::new(GateConfig::default());
        assert_eq!(
            gate.handle(GateEvent::ClaimChecked(true)),
            vec![GateAction::HideGate]
        );
        assert_eq!(gate.state(), GateState::Open);
    }

    #[test]
    fn test_success_path() {
        let mut gate = locked();
        assert_eq!(gate.state(), GateState::Locked(GateNotice::Prompt));

        let actions = gate.handle(GateEvent::VerifyRequested);
        let [GateAction::StartEstimate(params)] = actions.as_slice() else {
            panic!("expected one estimate, got {actions:?}");
        };
        assert!(params.enable_cache);
        assert!(params.liveness_check);

        // Double click while running does nothing
        assert!(gate.handle(GateEvent::VerifyRequested).is_empty());

        let actions = gate.handle(GateEvent::EstimateSettled(Ok(18)));
        assert!(actions.contains(&GateAction::ScheduleSuccessDismiss(SUCCESS_DISPLAY)));
        assert_eq!(gate.state(), GateState::Verified);

        assert_eq!(
            gate.handle(GateEvent::SuccessElapsed),
            vec![GateAction::HideSuccess]
        );
        assert_eq!(gate.state(), GateState::Open);
    }

    #[test]
    fn test_below_minimum_clears_cache() {
        let mut gate = locked();
        gate.handle(GateEvent::VerifyRequested);

        let actions = gate.handle(GateEvent::EstimateSettled(Ok(17)));
        assert_eq!(
            actions,
            vec![
                GateAction::ClearCache,
                GateAction::ShowGate(GateNotice::BelowMinimum)
            ]
        );
        assert_eq!(
            GateNotice::BelowMinimum.message(),
            "Your age estimate did not meet the minimum age requirement."
        );
    }

    #[test]
    fn test_error_notices() {
        let cases = [
            (AgeGateError::DifferentFace("x".into()), GateNotice::DifferentFace),
            (AgeGateError::Webcam("x".into()), GateNotice::Webcam),
            (AgeGateError::PopupBlocked, GateNotice::PopupBlocked),
            (AgeGateError::Cancelled, GateNotice::Cancelled),
            (AgeGateError::InvalidSignature("x".into()), GateNotice::Generic),
            (AgeGateError::Timeout(1), GateNotice::Generic),
        ];
        for (err, notice) in cases {
            let mut gate = locked();
            gate.handle(GateEvent::VerifyRequested);
            assert_eq!(
                gate.handle(GateEvent::EstimateSettled(Err(err))),
                vec![GateAction::ShowGate(notice)]
            );
            assert_eq!(gate.state(), GateState::Locked(notice));
        }
    }

    #[test]
    fn test_tampering_rechecks_claim() {
        let mut gate = locked();
        assert_eq!(
            gate.handle(GateEvent::GateTampered),
            vec![GateAction::RecheckClaim]
        );
        assert_eq!(gate.state(), GateState::Checking);
        assert_eq!(
            gate.handle(GateEvent::ClaimChecked(false)),
            vec![GateAction::ShowGate(GateNotice::Prompt)]
        );

        // Once open, tampering is irrelevant
        let mut open = AgeGate::new(GateConfig::default());
        open.handle(GateEvent::ClaimChecked(true));
        assert!(open.handle(GateEvent::GateTampered).is_empty());
    }

    #[test]
    fn test_custom_min_age() {
        let mut gate = AgeGate::new(GateConfig {
            min_age: 21,
            ..GateConfig::default()
        });
        gate.handle(GateEvent::ClaimChecked(false));
        gate.handle(GateEvent::VerifyRequested);
        gate.handle(GateEvent::EstimateSettled(Ok(20)));
        assert_eq!(gate.state(), GateState::Locked(GateNotice::BelowMinimum));
    }
}
