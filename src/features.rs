//! Palm geometry embedding.
//!
//! Turns one [`HandPose`] into a fixed 32-value vector of scale-sensitive
//! shape measurements. Galleries are compared position by position, so the
//! order of the blocks below is part of the stored format.
//!
//! | offset | count | block                                   |
//! |--------|-------|-----------------------------------------|
//! | 0      | 2     | wrist → index base, wrist → middle base |
//! | 2      | 5     | finger span, base → tip                 |
//! | 7      | 5     | curl ratio, base→mid / mid→tip          |
//! | 12     | 10    | fingertip pair distances                |
//! | 22     | 5     | finger base angle around the wrist      |
//! | 27     | 5     | fingertip → wrist distance              |

use serde::{Deserialize, Serialize};

use crate::error::{PalmError, Result};
use crate::types::{Finger, HandPose, Landmarks};

/// Number of values in every embedding.
pub const EMBEDDING_LEN: usize = 32;

/// Identifier written next to stored galleries.
pub const EXTRACTION_SCHEME: &str = "palm-geometry-v1";

/// Shortest mid→tip segment accepted as a curl denominator.
const MIN_SEGMENT: f64 = 1e-6;

/// Fixed-length palm feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Embedding(Vec<f64>);

impl Embedding {
    /// Validate a raw vector coming from storage or the wire.
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        if values.len() != EMBEDDING_LEN {
            return Err(PalmError::InvalidEmbeddingLength {
                expected: EMBEDDING_LEN,
                actual: values.len(),
            });
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(PalmError::NonFinite { index });
        }
        Ok(Self(values.to_vec()))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn norm(&self) -> f64 {
        self.0.iter().map(|v| v * v).sum::<f64>().sqrt()
    }
}

impl TryFrom<Vec<f64>> for Embedding {
    type Error = PalmError;

    fn try_from(values: Vec<f64>) -> Result<Self> {
        Self::from_slice(&values)
    }
}

impl From<Embedding> for Vec<f64> {
    fn from(embedding: Embedding) -> Self {
        embedding.0
    }
}

/// Compute the embedding for one hand.
///
/// Fails with [`PalmError::DegenerateFrame`] when a finger's mid→tip segment
/// collapses, so a glitched frame never leaks NaN or infinity into the
/// similarity math.
pub fn extract(pose: &HandPose) -> Result<Embedding> {
    let wrist = pose.wrist();
    let mut values = Vec::with_capacity(EMBEDDING_LEN);

    values.push(wrist.planar_distance(pose.point(Finger::Index.base())));
    values.push(wrist.planar_distance(pose.point(Finger::Middle.base())));

    for finger in Finger::ALL {
        values.push(pose.point(finger.base()).planar_distance(pose.point(finger.tip())));
    }

    for finger in Finger::ALL {
        let base = pose.point(finger.base());
        let mid = pose.point(finger.mid());
        let tip = pose.point(finger.tip());
        let denominator = mid.planar_distance(tip);
        if denominator < MIN_SEGMENT {
            return Err(PalmError::DegenerateFrame(format!(
                "{} mid-tip segment has zero length",
                finger.as_str()
            )));
        }
        values.push(base.planar_distance(mid) / denominator);
    }

    for (i, a) in Finger::ALL.iter().enumerate() {
        for b in &Finger::ALL[i + 1..] {
            values.push(pose.point(a.tip()).planar_distance(pose.point(b.tip())));
        }
    }

    for finger in Finger::ALL {
        let base = pose.point(finger.base());
        values.push((base.y - wrist.y).atan2(base.x - wrist.x));
    }

    for finger in Finger::ALL {
        values.push(pose.point(finger.tip()).planar_distance(wrist));
    }

    debug_assert_eq!(values.len(), EMBEDDING_LEN);
    Embedding::try_from(values)
}

/// Validate raw tracker output and extract in one step.
pub fn extract_landmarks(landmarks: &Landmarks) -> Result<Embedding> {
    let pose = HandPose::try_from(landmarks)?;
    extract(&pose)
}
