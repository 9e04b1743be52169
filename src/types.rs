use serde::{Deserialize, Serialize};

use crate::error::{PalmError, Result};

/// Number of landmarks the hand tracker reports per hand.
pub const LANDMARK_COUNT: usize = 21;

/// Index of the wrist landmark.
pub const WRIST: usize = 0;

/// Represents a single 3D point in normalized video coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Point3D {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Distance in the image plane. Depth is ignored on purpose: stored
    /// galleries were built from the 2-D projection.
    pub fn planar_distance(&self, other: &Point3D) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Raw, unvalidated landmarks for one hand as reported by the tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Landmarks {
    pub points: Vec<Point3D>,
}

impl Landmarks {
    pub fn new(points: Vec<Point3D>) -> Self {
        Self { points }
    }
}

/// The five fingers, thumb first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Finger {
    Thumb,
    Index,
    Middle,
    Ring,
    Pinky,
}

impl Finger {
    pub const ALL: [Finger; 5] = [
        Finger::Thumb,
        Finger::Index,
        Finger::Middle,
        Finger::Ring,
        Finger::Pinky,
    ];

    /// Landmark index of the finger's base joint.
    pub fn base(self) -> usize {
        1 + 4 * self as usize
    }

    /// Landmark index used as the curl pivot (third joint from the base).
    pub fn mid(self) -> usize {
        self.base() + 2
    }

    /// Landmark index of the fingertip.
    pub fn tip(self) -> usize {
        self.base() + 3
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thumb => "thumb",
            Self::Index => "index",
            Self::Middle => "middle",
            Self::Ring => "ring",
            Self::Pinky => "pinky",
        }
    }
}

/// One tracked hand: exactly 21 finite landmarks in the fixed anatomical order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point3D>", into = "Vec<Point3D>")]
pub struct HandPose {
    points: [Point3D; LANDMARK_COUNT],
}

impl HandPose {
    pub fn from_points(points: &[Point3D]) -> Result<Self> {
        if points.len() != LANDMARK_COUNT {
            return Err(PalmError::InvalidLandmarkCount {
                expected: LANDMARK_COUNT,
                actual: points.len(),
            });
        }
        if let Some(index) = points.iter().position(|p| !p.is_finite()) {
            return Err(PalmError::NonFinite { index });
        }
        let mut fixed = [Point3D::default(); LANDMARK_COUNT];
        fixed.copy_from_slice(points);
        Ok(Self { points: fixed })
    }

    /// Build from a fixed array produced inside the crate.
    pub(crate) fn from_array(points: [Point3D; LANDMARK_COUNT]) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Point3D; LANDMARK_COUNT] {
        &self.points
    }

    pub fn wrist(&self) -> &Point3D {
        &self.points[WRIST]
    }

    pub fn point(&self, index: usize) -> &Point3D {
        &self.points[index]
    }
}

impl TryFrom<Vec<Point3D>> for HandPose {
    type Error = PalmError;

    fn try_from(points: Vec<Point3D>) -> Result<Self> {
        Self::from_points(&points)
    }
}

impl TryFrom<&Landmarks> for HandPose {
    type Error = PalmError;

    fn try_from(landmarks: &Landmarks) -> Result<Self> {
        Self::from_points(&landmarks.points)
    }
}

impl From<&HandPose> for Landmarks {
    fn from(pose: &HandPose) -> Self {
        Self::new(pose.points.to_vec())
    }
}

impl From<HandPose> for Vec<Point3D> {
    fn from(pose: HandPose) -> Self {
        pose.points.to_vec()
    }
}
