//! Synthetic hand generator.
//!
//! Produces anatomically ordered 21-point hands for demos and tests without a
//! camera. Fingers fan out from the wrist in the image plane; `curl` flexes
//! every joint toward the camera by the same angle, which foreshortens each
//! phalanx in the 2-D projection and folds it back past 90 degrees.

use crate::types::{Finger, HandPose, Point3D, LANDMARK_COUNT, WRIST};

/// Direction of each finger base around the wrist, in degrees (image y points down).
const BASE_ANGLES_DEG: [f64; 5] = [-140.0, -105.0, -90.0, -75.0, -60.0];

/// Wrist → finger base distance.
const BASE_DISTANCES: [f64; 5] = [0.06, 0.12, 0.12, 0.115, 0.105];

/// Phalanx lengths, base → tip.
const SEGMENTS: [[f64; 3]; 5] = [
    [0.04, 0.035, 0.03],
    [0.05, 0.03, 0.025],
    [0.055, 0.035, 0.027],
    [0.05, 0.032, 0.025],
    [0.04, 0.025, 0.022],
];

/// Parameters describing one synthetic hand.
#[derive(Debug, Clone, PartialEq)]
pub struct HandShape {
    pub wrist: Point3D,
    pub scale: f64,
    /// Multiplier on the fan angles around the middle finger.
    pub spread: f64,
    /// Flexion per joint, in radians.
    pub curl: f64,
    /// Per-finger length multipliers, thumb first.
    pub finger_lengths: [f64; 5],
}

impl Default for HandShape {
    fn default() -> Self {
        Self {
            wrist: Point3D::new(0.5, 0.8, 0.0),
            scale: 1.0,
            spread: 1.0,
            curl: 0.0,
            finger_lengths: [1.0; 5],
        }
    }
}

impl HandShape {
    pub fn curled(curl: f64) -> Self {
        Self {
            curl,
            ..Self::default()
        }
    }

    pub fn pose(&self) -> HandPose {
        self.jittered(0, 0.0)
    }

    /// Pose with a small deterministic per-landmark wobble for frame `frame`.
    pub fn jittered(&self, frame: u32, amplitude: f64) -> HandPose {
        let mut points = [Point3D::default(); LANDMARK_COUNT];
        points[WRIST] = self.wrist;

        for (f, finger) in Finger::ALL.iter().enumerate() {
            let theta = (-90.0 + (BASE_ANGLES_DEG[f] + 90.0) * self.spread).to_radians();
            let (dir_x, dir_y) = (theta.cos(), theta.sin());
            let reach = BASE_DISTANCES[f] * self.scale;

            let mut pos = Point3D::new(
                self.wrist.x + reach * dir_x,
                self.wrist.y + reach * dir_y,
                self.wrist.z,
            );
            points[finger.base()] = pos;

            for (j, segment) in SEGMENTS[f].iter().enumerate() {
                let phi = self.curl * (j + 1) as f64;
                let length = segment * self.finger_lengths[f] * self.scale;
                pos = Point3D::new(
                    pos.x + length * phi.cos() * dir_x,
                    pos.y + length * phi.cos() * dir_y,
                    pos.z - length * phi.sin(),
                );
                points[finger.base() + j + 1] = pos;
            }
        }

        if amplitude != 0.0 {
            let t = frame as f64;
            for (i, p) in points.iter_mut().enumerate() {
                let k = i as f64;
                p.x += amplitude * (t * 1.3 + k * 0.7).sin();
                p.y += amplitude * (t * 0.9 + k * 1.1).cos();
            }
        }

        HandPose::from_array(points)
    }
}
