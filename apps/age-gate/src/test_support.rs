//! Test helpers shared by unit and integration tests: a cached signing key
//! and scripted stand-ins for the camera and face model.
//!
//! RSA key generation is slow in debug builds, so the signing key is generated
//! once per test binary and cached in a `OnceLock`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use rsa::RsaPrivateKey;
use rsa::rand_core::OsRng;

use crate::error::{AgeGateError, AgeGateResult};
use crate::estimation::detection::{
    BoundingBox, Camera, CameraDevice, CameraSource, DetectOptions, FaceDetection, FaceDetector,
    Frame,
};
use crate::estimation::geometry::{FaceLandmarks, HeadPose, Point};
use crate::token::claims::ClaimPayload;
use crate::token::codec::{assemble, encode_payload};
use crate::token::signer::LocalSigner;
use crate::token::subject::SubjectContext;

/// Small key for fast tests. Still large enough for PSS with a 32-byte salt.
const TEST_KEY_BITS: usize = 1024;

static TEST_SIGNER: OnceLock<LocalSigner> = OnceLock::new();

/// Shared in-process signer with a throwaway key.
pub fn test_signer() -> LocalSigner {
    TEST_SIGNER
        .get_or_init(|| {
            let key = RsaPrivateKey::new(&mut OsRng, TEST_KEY_BITS)
                .expect("Failed to generate test RSA key");
            LocalSigner::new(key)
        })
        .clone()
}

/// Device/origin pair used by most tests.
pub fn test_subject() -> SubjectContext {
    SubjectContext::new(
        "Mozilla/5.0 (X11; Linux x86_64) TestAgent/1.0",
        "https://relying.example",
    )
}

/// Sign `claim` with the shared test key.
pub fn signed_token(claim: &ClaimPayload) -> String {
    let payload = encode_payload(claim).expect("claim encodes");
    let signature = test_signer()
        .sign_payload(payload.as_bytes())
        .expect("test key signs");
    assemble(&payload, &signature)
}

/// Detection of a face spanning x in [0, 100] with the nose placed for `pose`.
pub fn face(age: f64, score: f64, pose: HeadPose, descriptor: Option<Vec<f32>>) -> FaceDetection {
    let nose_x = match pose {
        HeadPose::Straight => 50.0,
        HeadPose::Left => 10.0,
        HeadPose::Right => 90.0,
    };
    FaceDetection {
        score,
        bbox: BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 120.0,
        },
        landmarks: FaceLandmarks {
            left_eye: Point::new(30.0, 40.0),
            right_eye: Point::new(70.0, 40.0),
            nose_tip: Point::new(nose_x, 60.0),
            nose_lower: Point::new(nose_x, 65.0),
            jaw_left: Point::new(0.0, 50.0),
            jaw_right: Point::new(100.0, 50.0),
        },
        age: Some(age),
        descriptor,
    }
}

/// Detector that replays a fixed script, then keeps returning `fallback`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDetector {
    script: VecDeque<Option<FaceDetection>>,
    fallback: Option<FaceDetection>,
}

impl ScriptedDetector {
    /// Replay `faces`, then report no face.
    pub fn new(faces: Vec<FaceDetection>) -> Self {
        Self::from_readings(faces.into_iter().map(Some).collect())
    }

    /// Replay readings where `None` is a frame without a face.
    pub fn from_readings(readings: Vec<Option<FaceDetection>>) -> Self {
        Self {
            script: readings.into(),
            fallback: None,
        }
    }

    /// Return the same detection forever.
    pub fn repeating(detection: FaceDetection) -> Self {
        Self {
            script: VecDeque::new(),
            fallback: Some(detection),
        }
    }
}

impl FaceDetector for ScriptedDetector {
    async fn detect(
        &mut self,
        _frame: &Frame,
        _options: &DetectOptions,
    ) -> AgeGateResult<Option<FaceDetection>> {
        Ok(self
            .script
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Camera source backed by blank frames. Counts `stop()` calls.
#[derive(Debug, Clone)]
pub struct FakeCameras {
    pub devices: Vec<CameraDevice>,
    pub stops: Arc<AtomicUsize>,
    pub fail_open: bool,
}

impl FakeCameras {
    pub fn working() -> Self {
        Self::with_labels(&["OBS Virtual Camera", "Integrated Webcam"])
    }

    pub fn with_labels(labels: &[&str]) -> Self {
        Self {
            devices: labels
                .iter()
                .enumerate()
                .map(|(i, label)| CameraDevice::new(i.to_string(), *label))
                .collect(),
            stops: Arc::new(AtomicUsize::new(0)),
            fail_open: false,
        }
    }

    /// Enumeration works but opening the device is refused.
    pub fn denied() -> Self {
        Self {
            fail_open: true,
            ..Self::working()
        }
    }
}

#[derive(Debug)]
pub struct FakeCamera {
    stops: Arc<AtomicUsize>,
}

impl Camera for FakeCamera {
    async fn capture(&mut self) -> AgeGateResult<Frame> {
        Ok(Frame::default())
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

impl CameraSource for FakeCameras {
    type Camera = FakeCamera;

    async fn devices(&self) -> AgeGateResult<Vec<CameraDevice>> {
        Ok(self.devices.clone())
    }

    async fn open(&self, _device: &CameraDevice) -> AgeGateResult<FakeCamera> {
        if self.fail_open {
            return Err(AgeGateError::Webcam("Permission denied".to_string()));
        }
        Ok(FakeCamera {
            stops: Arc::clone(&self.stops),
        })
    }
}
