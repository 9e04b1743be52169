use crate::types::{HandPose, Point3D, LANDMARK_COUNT};

// Exponential moving average over every landmark.
// Off by default: it lowers frame-to-frame noise but also delays stability.
#[derive(Debug, Clone)]
pub struct LandmarkSmoother {
    alpha: f64,
    state: Option<[Point3D; LANDMARK_COUNT]>,
}

impl LandmarkSmoother {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            state: None,
        }
    }

    pub fn filter(&mut self, pose: &HandPose) -> HandPose {
        let Some(state) = self.state.as_mut() else {
            self.state = Some(*pose.points());
            return pose.clone();
        };
        let a = self.alpha;
        for (s, p) in state.iter_mut().zip(pose.points()) {
            s.x = a * p.x + (1.0 - a) * s.x;
            s.y = a * p.y + (1.0 - a) * s.y;
            s.z = a * p.z + (1.0 - a) * s.z;
        }
        HandPose::from_array(*state)
    }

    pub fn reset(&mut self) {
        self.state = None;
    }
}
