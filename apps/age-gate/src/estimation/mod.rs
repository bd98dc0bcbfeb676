//! Client-side estimation: per-frame geometry, the consensus estimator and the
//! liveness challenge.
//!
//! Nothing here touches a real camera or model. Detection results come in
//! through the [`detection::FaceDetector`] trait, so every decision is a pure
//! function of the readings fed to it.

pub mod consensus;
pub mod detection;
pub mod geometry;
pub mod liveness;

pub use consensus::{ConsensusEstimator, ConsensusOutcome, Decision, Sample};
pub use detection::{
    BoundingBox, Camera, CameraDevice, CameraSource, DetectOptions, FaceDetection, FaceDetector,
    Frame, select_camera,
};
pub use geometry::{FaceLandmarks, HeadPose, Point, euclidean_distance};
pub use liveness::{LivenessChallenge, LivenessOutcome, LivenessPolicy, LivenessStep, Reading};
