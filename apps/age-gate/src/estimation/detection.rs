//! Interfaces to the camera and the face model.
//!
//! Both are external collaborators. The model is a black box that, given a
//! frame, returns at most one face with a confidence score, landmarks, and
//! optionally an age estimate and an identity descriptor.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::AgeGateResult;
use crate::estimation::geometry::FaceLandmarks;

/// Device labels that belong to virtual or screen-capture cameras.
pub const VIRTUAL_CAMERA_MARKERS: &[&str] = &[
    "obs",
    "snap",
    "manycam",
    "virtual",
    "v4l2",
    "camtwist",
    "splitcam",
    "webcammax",
    "youcam",
];

/// A captured video frame. Opaque to everything but the detector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One face found in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    /// Detector confidence in `[0, 1]`.
    pub score: f64,
    pub bbox: BoundingBox,
    pub landmarks: FaceLandmarks,
    /// Estimated age in years, when requested.
    pub age: Option<f64>,
    /// Identity descriptor, when requested.
    pub descriptor: Option<Vec<f32>>,
}

impl FaceDetection {
    /// Age rounded to whole years. Negative or non-finite estimates yield `None`.
    pub fn rounded_age(&self) -> Option<u32> {
        let age = self.age?.round();
        if !age.is_finite() || age < 0.0 || age > f64::from(u32::MAX) {
            return None;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some(age as u32)
    }
}

/// What the detector should compute for a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectOptions {
    pub with_age: bool,
    pub with_descriptor: bool,
    /// Minimum detector score; `None` uses the model default.
    pub score_threshold: Option<f64>,
}

/// Face model.
pub trait FaceDetector: Send {
    fn detect(
        &mut self,
        frame: &Frame,
        options: &DetectOptions,
    ) -> impl Future<Output = AgeGateResult<Option<FaceDetection>>> + Send;
}

/// An open camera stream.
pub trait Camera: Send {
    fn capture(&mut self) -> impl Future<Output = AgeGateResult<Frame>> + Send;

    /// Release the device. Must be safe to call more than once.
    fn stop(&mut self);
}

/// A video input as reported by device enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDevice {
    pub id: String,
    pub label: String,
}

impl CameraDevice {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }

    /// Whether the label names a virtual or screen-capture camera.
    pub fn is_virtual(&self) -> bool {
        let label = self.label.to_lowercase();
        VIRTUAL_CAMERA_MARKERS
            .iter()
            .any(|marker| label.contains(marker))
    }
}

/// Enumerates and opens cameras.
pub trait CameraSource: Send + Sync {
    type Camera: Camera;

    fn devices(&self) -> impl Future<Output = AgeGateResult<Vec<CameraDevice>>> + Send;

    fn open(&self, device: &CameraDevice)
    -> impl Future<Output = AgeGateResult<Self::Camera>> + Send;
}

/// First physical camera in enumeration order.
pub fn select_camera(devices: &[CameraDevice]) -> Option<&CameraDevice> {
    devices.iter().find(|device| !device.is_virtual())
}
