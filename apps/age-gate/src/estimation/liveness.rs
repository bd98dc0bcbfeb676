//! Sequential liveness challenge.
//!
//! ```text
//! AwaitStraight -> AwaitLeft -> AwaitRight -> AwaitStraightFinal -> Passed
//!        \              \             \                \
//!         +--------------+-------------+----------------+--> Failed
//! ```
//!
//! Each step needs [`LivenessPolicy::required_correct`] matching poses within
//! [`LivenessPolicy::max_attempts`] readings. A step that runs out of attempts
//! is retried in place up to [`LivenessPolicy::max_retries`] times. Too many
//! readings without a face abort the run.
//!
//! Users often turn right first, and mirrored cameras flip the image anyway.
//! The first turn seen during the left step therefore decides the order: a
//! right turn swaps the left/right expectations for the rest of the run.
//!
//! Every reading is compared against a reference identity descriptor. The
//! reference is either seeded by the caller or taken from the first face.

use crate::error::AgeGateError;
use crate::estimation::detection::FaceDetection;
use crate::estimation::geometry::{HeadPose, euclidean_distance};

pub const DEFAULT_IDENTITY_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessPolicy {
    pub required_correct: u32,
    pub max_attempts: u32,
    /// The step fails once no-face readings exceed this.
    pub max_no_face: u32,
    pub max_retries: u32,
    /// Maximum descriptor distance still considered the same face.
    pub identity_threshold: f64,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            required_correct: 2,
            max_attempts: 6,
            max_no_face: 3,
            max_retries: 1,
            identity_threshold: DEFAULT_IDENTITY_THRESHOLD,
        }
    }
}

impl LivenessPolicy {
    pub fn with_identity_threshold(mut self, threshold: f64) -> Self {
        self.identity_threshold = threshold;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessStep {
    AwaitStraight,
    AwaitLeft,
    AwaitRight,
    AwaitStraightFinal,
}

impl LivenessStep {
    pub fn name(self) -> &'static str {
        match self {
            Self::AwaitStraight => "straight",
            Self::AwaitLeft => "left",
            Self::AwaitRight => "right",
            Self::AwaitStraightFinal => "straight-final",
        }
    }

    fn next(self) -> Option<Self> {
        match self {
            Self::AwaitStraight => Some(Self::AwaitLeft),
            Self::AwaitLeft => Some(Self::AwaitRight),
            Self::AwaitRight => Some(Self::AwaitStraightFinal),
            Self::AwaitStraightFinal => None,
        }
    }

    fn nominal_pose(self) -> HeadPose {
        match self {
            Self::AwaitStraight | Self::AwaitStraightFinal => HeadPose::Straight,
            Self::AwaitLeft => HeadPose::Left,
            Self::AwaitRight => HeadPose::Right,
        }
    }
}

/// One detector reading as seen by the challenge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading<'a> {
    NoFace,
    Face {
        pose: HeadPose,
        descriptor: &'a [f32],
    },
}

impl<'a> Reading<'a> {
    /// A detection without a descriptor cannot be identity-checked and
    /// counts as no face.
    pub fn from_detection(detection: Option<&'a FaceDetection>) -> Self {
        match detection {
            Some(detection) => match detection.descriptor.as_deref() {
                Some(descriptor) => Self::Face {
                    pose: detection.landmarks.head_pose(),
                    descriptor,
                },
                None => Self::NoFace,
            },
            None => Self::NoFace,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LivenessOutcome {
    /// Waiting for more readings; carries the pose currently expected.
    Pending {
        step: LivenessStep,
        expected: HeadPose,
    },
    /// Challenge passed; carries the reference descriptor.
    Passed(Vec<f32>),
    Failed(AgeGateError),
}

#[derive(Debug, Clone, Default)]
struct StepProgress {
    attempts: u32,
    correct: u32,
    no_face: u32,
    retries: u32,
}

/// Liveness state machine. Feed it one [`Reading`] per frame.
#[derive(Debug, Clone)]
pub struct LivenessChallenge {
    policy: LivenessPolicy,
    step: LivenessStep,
    progress: StepProgress,
    flipped: Option<bool>,
    reference: Option<Vec<f32>>,
    failure: Option<AgeGateError>,
}

impl LivenessChallenge {
    pub fn new(policy: LivenessPolicy) -> Self {
        Self {
            policy,
            step: LivenessStep::AwaitStraight,
            progress: StepProgress::default(),
            flipped: None,
            reference: None,
            failure: None,
        }
    }

    /// Bind the run to an identity captured earlier in the same session.
    pub fn with_reference(mut self, descriptor: Vec<f32>) -> Self {
        self.reference = Some(descriptor);
        self
    }

    pub fn step(&self) -> LivenessStep {
        self.step
    }

    pub fn is_flipped(&self) -> bool {
        self.flipped.unwrap_or(false)
    }

    /// Pose expected for the current step, after any flip.
    pub fn expected_pose(&self) -> HeadPose {
        let pose = self.step.nominal_pose();
        if self.is_flipped() {
            pose.mirrored()
        } else {
            pose
        }
    }

    pub fn observe(&mut self, reading: Reading<'_>) -> LivenessOutcome {
        if let Some(failure) = &self.failure {
            return LivenessOutcome::Failed(failure.clone());
        }

        self.progress.attempts += 1;

        match reading {
            Reading::NoFace => {
                self.progress.no_face += 1;
                if self.progress.no_face > self.policy.max_no_face {
                    return self.fail(AgeGateError::NoFace(format!(
                        "face lost during liveness step '{}'",
                        self.step.name()
                    )));
                }
            }
            Reading::Face { pose, descriptor } => {
                if let Some(failure) = self.check_identity(descriptor) {
                    return self.fail(failure);
                }

                if self.step == LivenessStep::AwaitLeft
                    && self.flipped.is_none()
                    && pose != HeadPose::Straight
                {
                    let flipped = pose == HeadPose::Right;
                    tracing::debug!(flipped, "Turn order decided");
                    self.flipped = Some(flipped);
                }

                if pose == self.expected_pose() {
                    self.progress.correct += 1;
                }
            }
        }

        if self.progress.correct >= self.policy.required_correct {
            return self.advance();
        }

        if self.progress.attempts >= self.policy.max_attempts {
            if self.progress.retries >= self.policy.max_retries {
                return self.fail(AgeGateError::WrongPoseExceededRetries(
                    self.step.name().to_string(),
                ));
            }
            let retries = self.progress.retries + 1;
            tracing::debug!(step = self.step.name(), retries, "Retrying liveness step");
            self.progress = StepProgress {
                retries,
                ..StepProgress::default()
            };
        }

        self.pending()
    }

    /// Return to the initial state, dropping the reference descriptor.
    pub fn reset(&mut self) {
        *self = Self::new(self.policy);
    }

    fn check_identity(&mut self, descriptor: &[f32]) -> Option<AgeGateError> {
        match &self.reference {
            None => {
                self.reference = Some(descriptor.to_vec());
                None
            }
            Some(reference) => {
                let distance = euclidean_distance(reference, descriptor);
                (distance > self.policy.identity_threshold).then(|| {
                    AgeGateError::DifferentFace(format!(
                        "distance {distance:.3} exceeds {:.3}",
                        self.policy.identity_threshold
                    ))
                })
            }
        }
    }

    fn advance(&mut self) -> LivenessOutcome {
        match self.step.next() {
            Some(next) => {
                tracing::debug!(from = self.step.name(), to = next.name(), "Liveness step passed");
                self.step = next;
                self.progress = StepProgress::default();
                self.pending()
            }
            None => {
                let reference = self.reference.take().unwrap_or_default();
                self.reset();
                tracing::info!("Liveness challenge passed");
                LivenessOutcome::Passed(reference)
            }
        }
    }

    fn fail(&mut self, error: AgeGateError) -> LivenessOutcome {
        tracing::info!(step = self.step.name(), code = error.error_code(), "Liveness challenge failed");
        self.failure = Some(error.clone());
        LivenessOutcome::Failed(error)
    }

    fn pending(&self) -> LivenessOutcome {
        LivenessOutcome::Pending {
            step: self.step,
            expected: self.expected_pose(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use HeadPose::{Left, Right, Straight};

    const ME: &[f32] = &[0.1, 0.2, 0.3];
    const SOMEONE_ELSE: &[f32] = &[0.9, 0.9, 0.9];

    fn face(pose: HeadPose) -> Reading<'static> {
        Reading::Face {
            pose,
            descriptor: ME,
        }
    }

    fn run(challenge: &mut LivenessChallenge, poses: &[HeadPose]) -> LivenessOutcome {
        let mut last = challenge.pending();
        for pose in poses {
            last = challenge.observe(face(*pose));
        }
        last
    }


    #[test]
    fn test_nominal_order_passes() {
        let mut challenge = LivenessChallenge::new(LivenessPolicy::default());
        let outcome = run(
            &mut challenge,
            &[Straight, Straight, Left, Left, Right, Right, Straight, Straight],
        );
        assert_eq!(outcome, LivenessOutcome::Passed(ME.to_vec()));
        // Machine is cleared after passing
        assert_eq!(challenge.step(), LivenessStep::AwaitStraight);
        assert!(challenge.reference.is_none());
    }

    #[test]
    fn test_flipped_order_passes() {
        let mut challenge = LivenessChallenge::new(LivenessPolicy::default());
        run(&mut challenge, &[Straight, Straight]);
        assert_eq!(challenge.expected_pose(), Left);

        run(&mut challenge, &[Right]);
        assert!(challenge.is_flipped());
        assert_eq!(challenge.expected_pose(), Left.mirrored());

        let outcome = run(&mut challenge, &[Right, Left, Left, Straight, Straight]);
        assert_eq!(outcome, LivenessOutcome::Passed(ME.to_vec()));
    }

    #[test]
    fn test_flip_is_decided_once() {
        let mut challenge = LivenessChallenge::new(LivenessPolicy::default());
        run(&mut challenge, &[Straight, Straight, Left]);
        assert!(!challenge.is_flipped());
        // A later right turn in the left step does not flip
        run(&mut challenge, &[Right]);
        assert!(!challenge.is_flipped());
    }

    #[test]
    fn test_different_face_fails_immediately() {
        let mut challenge =
            LivenessChallenge::new(LivenessPolicy::default()).with_reference(ME.to_vec());
        let outcome = challenge.observe(Reading::Face {
            pose: Straight,
            descriptor: SOMEONE_ELSE,
        });
        match outcome {
            LivenessOutcome::Failed(err) => assert_eq!(err.error_code(), "DIFFERENT_FACE_ERROR"),
            other => panic!("expected failure, got {other:?}"),
        }
        // Terminal until reset
        assert!(matches!(
            challenge.observe(face(Straight)),
            LivenessOutcome::Failed(AgeGateError::DifferentFace(_))
        ));
    }

    #[test]
    fn test_first_face_becomes_reference() {
        let mut challenge = LivenessChallenge::new(LivenessPolicy::default());
        challenge.observe(Reading::Face {
            pose: Straight,
            descriptor: SOMEONE_ELSE,
        });
        assert!(matches!(
            challenge.observe(face(Straight)),
            LivenessOutcome::Failed(AgeGateError::DifferentFace(_))
        ));
    }

    #[test]
    fn test_too_many_no_face_readings() {
        let mut challenge = LivenessChallenge::new(LivenessPolicy::default());
        for _ in 0..3 {
            assert!(matches!(
                challenge.observe(Reading::NoFace),
                LivenessOutcome::Pending { .. }
            ));
        }
        assert!(matches!(
            challenge.observe(Reading::NoFace),
            LivenessOutcome::Failed(AgeGateError::NoFace(_))
        ));
    }

    #[test]
    fn test_step_retried_once_then_fails() {
        let mut challenge = LivenessChallenge::new(LivenessPolicy::default());
        run(&mut challenge, &[Straight, Straight]);

        // Six readings without a turn: first exhaustion retries in place
        let outcome = run(&mut challenge, &[Straight; 6]);
        assert_eq!(
            outcome,
            LivenessOutcome::Pending {
                step: LivenessStep::AwaitLeft,
                expected: Left
            }
        );

        let outcome = run(&mut challenge, &[Straight; 6]);
        assert_eq!(
            outcome,
            LivenessOutcome::Failed(AgeGateError::WrongPoseExceededRetries("left".to_string()))
        );
    }

    #[test]
    fn test_retry_then_success() {
        let mut challenge = LivenessChallenge::new(LivenessPolicy::default());
        run(&mut challenge, &[Straight, Straight]);
        run(&mut challenge, &[Straight; 6]);
        let outcome = run(&mut challenge, &[Left, Left]);
        assert_eq!(
            outcome,
            LivenessOutcome::Pending {
                step: LivenessStep::AwaitRight,
                expected: Right
            }
        );
    }

    #[test]
    fn test_detection_without_descriptor_is_no_face() {
        assert_eq!(Reading::from_detection(None), Reading::NoFace);
    }
}
