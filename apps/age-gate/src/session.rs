//! Verifier-side estimation session.
//!
//! Opens a physical camera, feeds frames through the consensus estimator at a
//! fixed cadence and, when requested, runs the liveness challenge bound to the
//! identity seen during estimation. The camera is stopped on every exit path,
//! including the attempt timeout.

use std::time::Duration;

use crate::config::Settings;
use crate::error::{AgeGateError, AgeGateResult};
use crate::estimation::consensus::{ConsensusEstimator, ConsensusOutcome, Decision, Sample};
use crate::estimation::detection::{
    Camera, CameraSource, DetectOptions, FaceDetection, FaceDetector, select_camera,
};
use crate::estimation::liveness::{LivenessChallenge, LivenessOutcome, LivenessPolicy, Reading};

/// Recommended delay between frames.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// Upper bound on a whole attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Detector score floor while checking head pose. Turned faces score lower.
const LIVENESS_SCORE_THRESHOLD: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    pub liveness_check: bool,
    pub sample_interval: Duration,
    pub attempt_timeout: Duration,
    pub policy: LivenessPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            liveness_check: false,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            policy: LivenessPolicy::default(),
        }
    }
}

impl SessionSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            liveness_check: settings.liveness_check(),
            sample_interval: settings.sample_interval(),
            attempt_timeout: settings.attempt_timeout(),
            policy: LivenessPolicy::default()
                .with_identity_threshold(settings.identity_threshold()),
        }
    }
}

/// Result of a successful session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub age: u32,
    /// Identity the liveness challenge was bound to, when it ran.
    pub reference: Option<Vec<f32>>,
}

/// One estimation attempt over a camera source and a face model.
#[derive(Debug)]
pub struct EstimationSession<C, D> {
    cameras: C,
    detector: D,
    settings: SessionSettings,
}

impl<C: CameraSource, D: FaceDetector> EstimationSession<C, D> {
    pub fn new(cameras: C, detector: D, settings: SessionSettings) -> Self {
        Self {
            cameras,
            detector,
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Run the attempt to completion.
    #[tracing::instrument(skip(self), fields(liveness = self.settings.liveness_check))]
    pub async fn run(&mut self) -> AgeGateResult<SessionOutcome> {
        let mut camera = self.open_camera().await?;

        let timeout = self.settings.attempt_timeout;
        let result = match tokio::time::timeout(
            timeout,
            estimate(&mut self.detector, &mut camera, &self.settings),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(timeout_ms = ms, "Estimation attempt timed out");
                Err(AgeGateError::Timeout(ms))
            }
        };

        camera.stop();
        result
    }

    async fn open_camera(&self) -> AgeGateResult<C::Camera> {
        let devices = self
            .cameras
            .devices()
            .await
            .map_err(|e| AgeGateError::Webcam(format!("Error accessing webcam: {e}")))?;

        let device = select_camera(&devices)
            .ok_or_else(|| AgeGateError::Webcam("No webcam found".to_string()))?;
        tracing::debug!(device = %device.label, "Selected camera");

        self.cameras
            .open(device)
            .await
            .map_err(|e| AgeGateError::Webcam(format!("Error accessing webcam: {e}")))
    }
}

async fn estimate<K: Camera, D: FaceDetector>(
    detector: &mut D,
    camera: &mut K,
    settings: &SessionSettings,
) -> AgeGateResult<SessionOutcome> {
    let options = DetectOptions {
        with_age: true,
        with_descriptor: settings.liveness_check,
        score_threshold: None,
    };

    let mut consensus = ConsensusEstimator::new();
    let mut last_descriptor: Option<Vec<f32>> = None;

    let decision: Decision = loop {
        if let Some(detection) = next_detection(detector, camera, &options).await? {
            if let Some(descriptor) = &detection.descriptor {
                last_descriptor = Some(descriptor.clone());
            }
            if let Some(sample) = Sample::from_detection(&detection)
                && let ConsensusOutcome::Decided(decision) = consensus.observe(sample)
            {
                break decision;
            }
        }
        tokio::time::sleep(settings.sample_interval).await;
    };

    tracing::info!(age = decision.age, pool = ?decision.pool, "Age estimated");

    if !settings.liveness_check {
        return Ok(SessionOutcome {
            age: decision.age,
            reference: None,
        });
    }

    let mut challenge = LivenessChallenge::new(settings.policy);
    if let Some(reference) = last_descriptor {
        challenge = challenge.with_reference(reference);
    }

    let options = DetectOptions {
        with_age: false,
        with_descriptor: true,
        score_threshold: Some(LIVENESS_SCORE_THRESHOLD),
    };

    loop {
        tokio::time::sleep(settings.sample_interval).await;
        let detection = next_detection(detector, camera, &options).await?;
        match challenge.observe(Reading::from_detection(detection.as_ref())) {
            LivenessOutcome::Pending { step, expected } => {
                tracing::debug!(step = step.name(), %expected, "Awaiting pose");
            }
            LivenessOutcome::Passed(reference) => {
                return Ok(SessionOutcome {
                    age: decision.age,
                    reference: Some(reference),
                });
            }
            LivenessOutcome::Failed(err) => return Err(err),
        }
    }
}

/// Capture one frame and run the detector on it.
///
/// A failed capture ends the session; a failed detection only skips the frame.
async fn next_detection<K: Camera, D: FaceDetector>(
    detector: &mut D,
    camera: &mut K,
    options: &DetectOptions,
) -> AgeGateResult<Option<FaceDetection>> {
    let frame = camera
        .capture()
        .await
        .map_err(|e| AgeGateError::Webcam(format!("Error reading webcam: {e}")))?;

    match detector.detect(&frame, options).await {
        Ok(detection) => Ok(detection),
        Err(err) => {
            tracing::warn!(error = %err, "Error processing frame");
            Ok(None)
        }
    }
}
