//! Scan stability detection.
//!
//! A scan attempt is an explicit [`StabilitySession`] value advanced one poll
//! at a time by [`StabilityDetector::step`]. The hand counts as settled once
//! `required_stable_frames` consecutive frame pairs have cosine similarity
//! above the threshold. Similarity is always measured against the previous
//! frame, never a fixed reference.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::features::Embedding;
use crate::similarity::cosine_similarity;

/// Tuning for one scan attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityPolicy {
    pub required_stable_frames: u32,
    pub similarity_threshold: f64,
    pub max_polls: u32,
    pub poll_interval_ms: u64,
}

impl StabilityPolicy {
    /// 15 consecutive stable frames polled every 100 ms, about 1.5 s of stillness.
    pub fn reference() -> Self {
        Self {
            required_stable_frames: 15,
            similarity_threshold: 0.95,
            max_polls: 100,
            poll_interval_ms: 100,
        }
    }

    /// 30 frames at 50 ms: same hold time, finer sampling.
    pub fn fast_sampling() -> Self {
        Self {
            required_stable_frames: 30,
            poll_interval_ms: 50,
            ..Self::reference()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for StabilityPolicy {
    fn default() -> Self {
        Self::reference()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanState {
    WaitingForHand,
    Accumulating,
    Stable,
    TimedOut,
    Cancelled,
}

impl ScanState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stable | Self::TimedOut | Self::Cancelled)
    }
}

/// What one poll of the landmark source produced.
#[derive(Debug, Clone)]
pub enum Observation {
    NoHand,
    /// A usable hand. `hands` is how many the tracker reported; the first one was embedded.
    Hand { embedding: Embedding, hands: usize },
    /// Tracker glitch or degenerate geometry. The frame is not trusted.
    Unusable(String),
}

/// User-facing progress for a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScanStatus {
    Starting,
    NoHand,
    MultipleHands,
    HoldSteady { count: u32, required: u32 },
    TrackerGlitch,
    Captured,
    TimedOut,
    Cancelled,
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "Starting scan..."),
            Self::NoHand => write!(f, "Show your palm to the camera"),
            Self::MultipleHands => write!(f, "Multiple hands detected"),
            Self::HoldSteady { count, required } => {
                write!(f, "Hold steady... ({}/{})", count, required)
            }
            Self::TrackerGlitch => write!(f, "Hand tracking lost, retrying"),
            Self::Captured => write!(f, "Scan captured"),
            Self::TimedOut => write!(f, "Scan timeout. Please try again."),
            Self::Cancelled => write!(f, "Scan cancelled"),
        }
    }
}

/// Per-attempt mutable state. Create one per scan and drop it when the scan resolves.
#[derive(Debug, Clone)]
pub struct StabilitySession {
    state: ScanState,
    last_embedding: Option<Embedding>,
    stable_frame_count: u32,
    attempts_elapsed: u32,
}

impl StabilitySession {
    pub fn new() -> Self {
        Self {
            state: ScanState::WaitingForHand,
            last_embedding: None,
            stable_frame_count: 0,
            attempts_elapsed: 0,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn stable_frame_count(&self) -> u32 {
        self.stable_frame_count
    }

    pub fn attempts_elapsed(&self) -> u32 {
        self.attempts_elapsed
    }

    pub fn last_embedding(&self) -> Option<&Embedding> {
        self.last_embedding.as_ref()
    }

    /// Abort the attempt. All accumulated state is released.
    pub fn cancel(mut self) -> Self {
        self.state = ScanState::Cancelled;
        self.last_embedding = None;
        self.stable_frame_count = 0;
        self
    }
}

impl Default for StabilitySession {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of [`StabilityDetector::begin_poll`].
#[derive(Debug, Clone)]
pub enum PollStart {
    /// The session resolved without a frame.
    Resolved(StabilitySession, Transition),
    /// The poll was counted; a frame is needed to finish it.
    NeedsFrame(StabilitySession),
}

/// Result of advancing a session by one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Pending(ScanStatus),
    Stable(Embedding),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct StabilityDetector {
    policy: StabilityPolicy,
}

impl StabilityDetector {
    pub fn new(policy: StabilityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &StabilityPolicy {
        &self.policy
    }

    /// Start a poll. Resolves terminal sessions and spent poll budgets without
    /// needing a frame, so callers can skip reading one.
    pub fn begin_poll(&self, mut session: StabilitySession) -> PollStart {
        match session.state {
            ScanState::Stable => {
                let transition = match &session.last_embedding {
                    Some(e) => Transition::Stable(e.clone()),
                    None => Transition::Cancelled,
                };
                return PollStart::Resolved(session, transition);
            }
            ScanState::TimedOut => return PollStart::Resolved(session, Transition::TimedOut),
            ScanState::Cancelled => return PollStart::Resolved(session, Transition::Cancelled),
            ScanState::WaitingForHand | ScanState::Accumulating => {}
        }

        session.attempts_elapsed += 1;
        if session.attempts_elapsed > self.policy.max_polls {
            warn!(
                polls = self.policy.max_polls,
                stable = session.stable_frame_count,
                "scan timed out before the hand settled"
            );
            session.state = ScanState::TimedOut;
            session.last_embedding = None;
            session.stable_frame_count = 0;
            return PollStart::Resolved(session, Transition::TimedOut);
        }
        PollStart::NeedsFrame(session)
    }

    /// Advance `session` by one poll. Terminal sessions are returned unchanged.
    pub fn step(
        &self,
        session: StabilitySession,
        observation: Observation,
    ) -> (StabilitySession, Transition) {
        match self.begin_poll(session) {
            PollStart::Resolved(session, transition) => (session, transition),
            PollStart::NeedsFrame(session) => self.apply(session, observation),
        }
    }

    /// Feed the frame for a poll already started with [`Self::begin_poll`].
    pub fn apply(
        &self,
        mut session: StabilitySession,
        observation: Observation,
    ) -> (StabilitySession, Transition) {
        let (embedding, hands) = match observation {
            Observation::NoHand => {
                if session.state == ScanState::Accumulating {
                    debug!("hand lost, waiting");
                }
                session.state = ScanState::WaitingForHand;
                return (session, Transition::Pending(ScanStatus::NoHand));
            }
            // The poll counts but the accumulated run is kept.
            Observation::Unusable(reason) => {
                debug!(%reason, count = session.stable_frame_count, "skipping unusable frame");
                return (session, Transition::Pending(ScanStatus::TrackerGlitch));
            }
            Observation::Hand { embedding, hands } => (embedding, hands),
        };

        match session.state {
            ScanState::WaitingForHand => {
                session.state = ScanState::Accumulating;
                session.stable_frame_count = 0;
            }
            _ => {
                if let Some(last) = &session.last_embedding {
                    let similarity = cosine_similarity(&embedding, last);
                    if similarity > self.policy.similarity_threshold {
                        session.stable_frame_count += 1;
                    } else {
                        session.stable_frame_count = 0;
                    }
                    debug!(similarity, count = session.stable_frame_count, "frame compared");
                }
            }
        }
        session.last_embedding = Some(embedding);

        if session.stable_frame_count >= self.policy.required_stable_frames {
            info!(
                polls = session.attempts_elapsed,
                frames = session.stable_frame_count,
                "hand settled"
            );
            session.state = ScanState::Stable;
            let stable = session.last_embedding.clone();
            return match stable {
                Some(e) => (session, Transition::Stable(e)),
                None => (session, Transition::Cancelled),
            };
        }

        let status = if hands > 1 {
            ScanStatus::MultipleHands
        } else {
            ScanStatus::HoldSteady {
                count: session.stable_frame_count,
                required: self.policy.required_stable_frames,
            }
        };
        (session, Transition::Pending(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::extract;
    use crate::synthetic::HandShape;

    fn hand(shape: &HandShape, frame: u32) -> Observation {
        Observation::Hand {
            embedding: extract(&shape.jittered(frame, 0.0005)).unwrap(),
            hands: 1,
        }
    }

    fn run(detector: &StabilityDetector, frames: impl IntoIterator<Item = Observation>) -> (StabilitySession, Transition) {
        let mut session = StabilitySession::new();
        let mut last = Transition::Pending(ScanStatus::Starting);
        for obs in frames {
            let (next, transition) = detector.step(session, obs);
            session = next;
            last = transition;
            if session.state().is_terminal() {
                break;
            }
        }
        (session, last)
    }

    #[test]
    fn first_hand_starts_accumulating() {
        let detector = StabilityDetector::default();
        let shape = HandShape::default();
        let (session, transition) = detector.step(StabilitySession::new(), hand(&shape, 0));
        assert_eq!(session.state(), ScanState::Accumulating);
        assert_eq!(session.stable_frame_count(), 0);
        assert!(session.last_embedding().is_some());
        assert_eq!(
            transition,
            Transition::Pending(ScanStatus::HoldSteady { count: 0, required: 15 })
        );
    }

    #[test]
    fn steady_hand_reaches_stable() {
        let detector = StabilityDetector::default();
        let shape = HandShape::default();
        let (session, transition) = run(&detector, (0..40).map(|i| hand(&shape, i)));
        assert_eq!(session.state(), ScanState::Stable);
        // One frame to initialize, fifteen stable comparisons after it.
        assert_eq!(session.attempts_elapsed(), 16);
        match transition {
            Transition::Stable(e) => assert_eq!(Some(&e), session.last_embedding()),
            other => panic!("expected stable, got {:?}", other),
        }
    }

    #[test]
    fn alternating_hand_times_out() {
        let detector = StabilityDetector::default();
        let open = HandShape::default();
        let curled = HandShape::curled(1.05);
        let frames = (0..200).map(|i| if i % 2 == 0 { hand(&open, i) } else { hand(&curled, i) });
        let (session, transition) = run(&detector, frames);
        assert_eq!(transition, Transition::TimedOut);
        assert_eq!(session.state(), ScanState::TimedOut);
        assert_eq!(session.attempts_elapsed(), 101);
    }

    #[test]
    fn dissimilar_frame_resets_counter_but_updates_reference() {
        let detector = StabilityDetector::default();
        let open = HandShape::default();
        let curled = HandShape::curled(1.05);

        let mut session = StabilitySession::new();
        for i in 0..5 {
            session = detector.step(session, hand(&open, i)).0;
        }
        assert_eq!(session.stable_frame_count(), 4);

        session = detector.step(session, hand(&curled, 5)).0;
        assert_eq!(session.stable_frame_count(), 0);

        // Next curled frame is compared with the previous curled frame, not the open hand.
        session = detector.step(session, hand(&curled, 6)).0;
        assert_eq!(session.stable_frame_count(), 1);
    }

    #[test]
    fn losing_the_hand_restarts_accumulation() {
        let detector = StabilityDetector::default();
        let shape = HandShape::default();
        let mut session = StabilitySession::new();
        for i in 0..6 {
            session = detector.step(session, hand(&shape, i)).0;
        }
        let (next, transition) = detector.step(session, Observation::NoHand);
        session = next;
        assert_eq!(transition, Transition::Pending(ScanStatus::NoHand));
        assert_eq!(session.state(), ScanState::WaitingForHand);

        session = detector.step(session, hand(&shape, 7)).0;
        assert_eq!(session.state(), ScanState::Accumulating);
        assert_eq!(session.stable_frame_count(), 0);
    }

    #[test]
    fn tracker_glitches_are_retried() {
        let detector = StabilityDetector::default();
        let shape = HandShape::default();
        let mut frames: Vec<Observation> = vec![Observation::Unusable("roi".into()); 3];
        frames.extend((0..20).map(|i| hand(&shape, i)));
        let (session, transition) = run(&detector, frames);
        assert!(matches!(transition, Transition::Stable(_)));
        assert_eq!(session.attempts_elapsed(), 19);
    }

    #[test]
    fn glitch_mid_accumulation_keeps_the_run() {
        let detector = StabilityDetector::default();
        let shape = HandShape::default();
        let mut session = StabilitySession::new();
        for i in 0..15 {
            session = detector.step(session, hand(&shape, i)).0;
        }
        assert_eq!(session.stable_frame_count(), 14);

        let (next, transition) = detector.step(
            session,
            Observation::Unusable("ROI width and height must be > 0".into()),
        );
        session = next;
        assert_eq!(transition, Transition::Pending(ScanStatus::TrackerGlitch));
        assert_eq!(session.state(), ScanState::Accumulating);
        assert_eq!(session.stable_frame_count(), 14);
        assert!(session.last_embedding().is_some());

        let (session, transition) = detector.step(session, hand(&shape, 15));
        assert!(matches!(transition, Transition::Stable(_)));
        assert_eq!(session.attempts_elapsed(), 17);
    }

    #[test]
    fn spent_budget_resolves_without_a_frame() {
        let detector = StabilityDetector::new(StabilityPolicy {
            max_polls: 2,
            ..StabilityPolicy::reference()
        });
        let mut session = StabilitySession::new();
        for _ in 0..2 {
            match detector.begin_poll(session) {
                PollStart::NeedsFrame(s) => session = detector.apply(s, Observation::NoHand).0,
                PollStart::Resolved(..) => panic!("budget spent too early"),
            }
        }
        match detector.begin_poll(session) {
            PollStart::Resolved(s, transition) => {
                assert_eq!(transition, Transition::TimedOut);
                assert_eq!(s.attempts_elapsed(), 3);
            }
            PollStart::NeedsFrame(_) => panic!("expected timeout"),
        }
    }

    #[test]
    fn no_hand_forever_times_out() {
        let detector = StabilityDetector::default();
        let (_, transition) = run(&detector, std::iter::repeat(Observation::NoHand).take(150));
        assert_eq!(transition, Transition::TimedOut);
    }

    #[test]
    fn cancel_clears_state() {
        let detector = StabilityDetector::default();
        let shape = HandShape::default();
        let (session, _) = detector.step(StabilitySession::new(), hand(&shape, 0));
        let session = session.cancel();
        assert_eq!(session.state(), ScanState::Cancelled);
        assert!(session.last_embedding().is_none());

        let (session, transition) = detector.step(session, hand(&shape, 1));
        assert_eq!(transition, Transition::Cancelled);
        assert_eq!(session.attempts_elapsed(), 1);
    }

    #[test]
    fn multiple_hands_reported() {
        let detector = StabilityDetector::default();
        let shape = HandShape::default();
        let obs = Observation::Hand {
            embedding: extract(&shape.pose()).unwrap(),
            hands: 2,
        };
        let (_, transition) = detector.step(StabilitySession::new(), obs);
        assert_eq!(transition, Transition::Pending(ScanStatus::MultipleHands));
    }

    #[test]
    fn fast_sampling_keeps_hold_time() {
        let reference = StabilityPolicy::reference();
        let fast = StabilityPolicy::fast_sampling();
        assert_eq!(
            reference.required_stable_frames as u64 * reference.poll_interval_ms,
            fast.required_stable_frames as u64 * fast.poll_interval_ms
        );
    }
}
