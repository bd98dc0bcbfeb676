//! Landmark geometry: gaze, head pose and descriptor distance.

use serde::{Deserialize, Serialize};

/// Gaze is straight when the nose sits within this fraction of the
/// inter-eye distance from the eye midpoint.
pub const STRAIGHT_GAZE_TOLERANCE: f64 = 0.125;

/// A nose closer than this fraction of the face width to a jaw edge marks a turn.
pub const TURN_RATIO: f64 = 0.2;

// Indices into the 68-point landmark layout
const JAW_LEFT: usize = 0;
const JAW_RIGHT: usize = 16;
const NOSE_TIP: usize = 30;
const NOSE_LOWER: usize = 31;
const LEFT_EYE_OUTER: usize = 36;
const RIGHT_EYE_INNER: usize = 42;
const LANDMARK_COUNT: usize = 68;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Landmarks the estimators read out of a detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub left_eye: Point,
    pub right_eye: Point,
    /// Tip of the nose, used for head pose.
    pub nose_tip: Point,
    /// First point of the lower nose line, used for gaze.
    pub nose_lower: Point,
    pub jaw_left: Point,
    pub jaw_right: Point,
}

/// Coarse head orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadPose {
    Left,
    Right,
    Straight,
}

impl HeadPose {
    /// The opposite turn. `Straight` stays `Straight`.
    pub fn mirrored(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
            Self::Straight => Self::Straight,
        }
    }
}

impl std::fmt::Display for HeadPose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
            Self::Straight => write!(f, "straight"),
        }
    }
}

impl FaceLandmarks {
    /// Pick the landmarks out of a standard 68-point layout.
    ///
    /// Returns `None` when fewer than 68 points are given.
    pub fn from_points68(points: &[Point]) -> Option<Self> {
        if points.len() < LANDMARK_COUNT {
            return None;
        }
        Some(Self {
            left_eye: points[LEFT_EYE_OUTER],
            right_eye: points[RIGHT_EYE_INNER],
            nose_tip: points[NOSE_TIP],
            nose_lower: points[NOSE_LOWER],
            jaw_left: points[JAW_LEFT],
            jaw_right: points[JAW_RIGHT],
        })
    }

    /// Whether the subject looks straight at the camera.
    pub fn is_looking_straight(&self) -> bool {
        let eye_distance = (self.right_eye.x - self.left_eye.x).abs();
        let eye_center = (self.left_eye.x + self.right_eye.x) / 2.0;
        (self.nose_lower.x - eye_center).abs() < eye_distance * STRAIGHT_GAZE_TOLERANCE
    }

    /// Head orientation from the nose position between the jaw edges.
    ///
    /// A degenerate face (zero or negative width) reads as `Straight`.
    pub fn head_pose(&self) -> HeadPose {
        let face_width = self.jaw_right.x - self.jaw_left.x;
        if face_width <= 0.0 {
            return HeadPose::Straight;
        }

        let left_ratio = (self.nose_tip.x - self.jaw_left.x) / face_width;
        let right_ratio = (self.jaw_right.x - self.nose_tip.x) / face_width;

        if left_ratio < TURN_RATIO {
            HeadPose::Left
        } else if right_ratio < TURN_RATIO {
            HeadPose::Right
        } else {
            HeadPose::Straight
        }
    }
}

/// Euclidean distance between two identity descriptors.
///
/// Descriptors of different lengths come from different models and are
/// reported as infinitely far apart.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return f64::INFINITY;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}
