//! Poll-driven scan loop.
//!
//! [`Scanner::capture`] polls a [`LandmarkSource`] on a fixed interval and
//! feeds each frame through the stability detector until the hand settles,
//! the poll budget runs out, or the caller cancels. Every poll completes
//! before the next tick is awaited, so frames are handled in arrival order.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{PalmError, Result};
use crate::features::{extract, Embedding};
use crate::latency::LatencyMonitor;
use crate::smoothing::LandmarkSmoother;
use crate::source::{LandmarkSource, SourceError};
use crate::stability::{
    Observation, PollStart, ScanStatus, StabilityDetector, StabilityPolicy, StabilitySession,
    Transition,
};
use crate::types::HandPose;

#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Stable(Embedding),
    TimedOut,
    Cancelled,
}

/// Requests cancellation of a pending scan.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Observed by the scan loop.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelHandle {
    pub fn new() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, CancelSignal { rx })
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if every
    /// handle is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scanner {
    detector: StabilityDetector,
    smoothing_alpha: Option<f64>,
    monitor: Option<Arc<LatencyMonitor>>,
}

impl Scanner {
    pub fn new(policy: StabilityPolicy) -> Self {
        Self {
            detector: StabilityDetector::new(policy),
            smoothing_alpha: None,
            monitor: None,
        }
    }

    /// Smooth landmarks with an exponential moving average before extraction.
    pub fn with_smoothing(mut self, alpha: f64) -> Self {
        self.smoothing_alpha = Some(alpha);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<LatencyMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn policy(&self) -> &StabilityPolicy {
        self.detector.policy()
    }

    /// Poll the source once and classify the frame.
    pub fn observe<S: LandmarkSource + ?Sized>(
        &self,
        source: &mut S,
        smoother: Option<&mut LandmarkSmoother>,
    ) -> std::result::Result<Observation, SourceError> {
        let hands = match source.detect() {
            Ok(hands) => hands,
            Err(SourceError::Transient(reason)) => return Ok(Observation::Unusable(reason)),
            Err(SourceError::Stopped) => return Err(SourceError::Stopped),
        };
        let Some(first) = hands.first() else {
            return Ok(Observation::NoHand);
        };

        let pose = match HandPose::try_from(first) {
            Ok(pose) => pose,
            Err(e) => return Ok(Observation::Unusable(e.to_string())),
        };
        let pose = match smoother {
            Some(smoother) => smoother.filter(&pose),
            None => pose,
        };

        let started = Instant::now();
        let extracted = extract(&pose);
        if let Some(monitor) = &self.monitor {
            monitor.record("extract", started.elapsed());
        }
        Ok(match extracted {
            Ok(embedding) => Observation::Hand {
                embedding,
                hands: hands.len(),
            },
            Err(e) => Observation::Unusable(e.to_string()),
        })
    }

    /// Run one scan attempt to completion.
    pub async fn capture<S: LandmarkSource + ?Sized>(
        &self,
        source: &mut S,
        cancel: &mut CancelSignal,
        status: &watch::Sender<ScanStatus>,
    ) -> ScanOutcome {
        let policy = self.detector.policy();
        let mut session = StabilitySession::new();
        let mut smoother = self.smoothing_alpha.map(LandmarkSmoother::new);
        let mut ticker = tokio::time::interval(policy.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let started = Instant::now();

        info!(
            source = %source.name(),
            required = policy.required_stable_frames,
            max_polls = policy.max_polls,
            "scan started"
        );
        status.send_replace(ScanStatus::Starting);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    session = session.cancel();
                    break ScanOutcome::Cancelled;
                }
                _ = ticker.tick() => {}
            }

            // A spent budget resolves before the source is read.
            let started_poll = match self.detector.begin_poll(session) {
                PollStart::Resolved(next, transition) => {
                    session = next;
                    break match transition {
                        Transition::Stable(embedding) => ScanOutcome::Stable(embedding),
                        Transition::Cancelled => ScanOutcome::Cancelled,
                        Transition::TimedOut | Transition::Pending(_) => ScanOutcome::TimedOut,
                    };
                }
                PollStart::NeedsFrame(next) => next,
            };

            let observation = match self.observe(source, smoother.as_mut()) {
                Ok(observation) => observation,
                Err(SourceError::Stopped) => {
                    warn!("landmark source stopped mid-scan");
                    session = started_poll.cancel();
                    break ScanOutcome::Cancelled;
                }
                Err(SourceError::Transient(reason)) => Observation::Unusable(reason),
            };
            if matches!(observation, Observation::NoHand) {
                if let Some(smoother) = smoother.as_mut() {
                    smoother.reset();
                }
            }

            let (next, transition) = self.detector.apply(started_poll, observation);
            session = next;
            match transition {
                Transition::Pending(update) => {
                    debug!(status = %update, poll = session.attempts_elapsed(), "scan pending");
                    status.send_replace(update);
                }
                Transition::Stable(embedding) => break ScanOutcome::Stable(embedding),
                Transition::TimedOut => break ScanOutcome::TimedOut,
                Transition::Cancelled => break ScanOutcome::Cancelled,
            }
        };

        if let Some(monitor) = &self.monitor {
            monitor.record("scan", started.elapsed());
        }
        let final_status = match &outcome {
            ScanOutcome::Stable(_) => ScanStatus::Captured,
            ScanOutcome::TimedOut => ScanStatus::TimedOut,
            ScanOutcome::Cancelled => ScanStatus::Cancelled,
        };
        info!(
            status = %final_status,
            polls = session.attempts_elapsed(),
            "scan finished"
        );
        status.send_replace(final_status);
        outcome
    }

    /// Run a scan on its own task. The source is handed back when it finishes.
    pub fn spawn<S>(&self, mut source: S) -> ScanHandle<S>
    where
        S: LandmarkSource + 'static,
    {
        let scanner = self.clone();
        let (cancel, mut signal) = CancelHandle::new();
        let (status_tx, status_rx) = watch::channel(ScanStatus::Starting);
        let task = tokio::spawn(async move {
            let outcome = scanner.capture(&mut source, &mut signal, &status_tx).await;
            (source, outcome)
        });
        ScanHandle {
            task,
            cancel,
            status: status_rx,
        }
    }
}

/// Pending result of a spawned scan.
pub struct ScanHandle<S> {
    task: JoinHandle<(S, ScanOutcome)>,
    cancel: CancelHandle,
    status: watch::Receiver<ScanStatus>,
}

impl<S> ScanHandle<S> {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn canceller(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn status(&self) -> watch::Receiver<ScanStatus> {
        self.status.clone()
    }

    pub async fn join(self) -> Result<(S, ScanOutcome)> {
        self.task
            .await
            .map_err(|e| PalmError::ScanAborted(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ReplaySource, SimulatedSource};
    use crate::synthetic::HandShape;
    use crate::types::Landmarks;
    use std::time::Duration;

    fn status_channel() -> (watch::Sender<ScanStatus>, watch::Receiver<ScanStatus>) {
        watch::channel(ScanStatus::Starting)
    }

    #[tokio::test(start_paused = true)]
    async fn steady_hand_is_captured() {
        let scanner = Scanner::default();
        let mut source = SimulatedSource::new(HandShape::default());
        let (_handle, mut signal) = CancelHandle::new();
        let (tx, rx) = status_channel();

        let outcome = scanner.capture(&mut source, &mut signal, &tx).await;
        assert!(matches!(outcome, ScanOutcome::Stable(_)));
        assert_eq!(*rx.borrow(), ScanStatus::Captured);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_stream_times_out() {
        let scanner = Scanner::default();
        let mut source = ReplaySource::from_frames("empty", vec![]);
        let (_handle, mut signal) = CancelHandle::new();
        let (tx, rx) = status_channel();

        let started = tokio::time::Instant::now();
        let outcome = scanner.capture(&mut source, &mut signal, &tx).await;
        assert_eq!(outcome, ScanOutcome::TimedOut);
        assert_eq!(*rx.borrow(), ScanStatus::TimedOut);
        // 101 ticks, the first one immediate.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(10_000));
        assert!(elapsed < Duration::from_millis(10_100));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_poll_reads_no_frame() {
        let scanner = Scanner::new(StabilityPolicy {
            max_polls: 5,
            ..StabilityPolicy::reference()
        });
        let mut source = ReplaySource::from_frames("idle", (0..10).map(|_| Ok(vec![])).collect());
        let (_handle, mut signal) = CancelHandle::new();
        let (tx, _rx) = status_channel();

        let outcome = scanner.capture(&mut source, &mut signal, &tx).await;
        assert_eq!(outcome, ScanOutcome::TimedOut);
        assert_eq!(source.remaining(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_do_not_abort() {
        let shape = HandShape::default();
        let mut frames: Vec<_> = (0..5)
            .map(|_| Err(SourceError::Transient("ROI width and height must be > 0".into())))
            .collect();
        frames.extend((0..30).map(|i| Ok(vec![Landmarks::from(&shape.jittered(i, 0.0005))])));
        let mut source = ReplaySource::from_frames("glitchy", frames);
        let (_handle, mut signal) = CancelHandle::new();
        let (tx, _rx) = status_channel();

        let outcome = Scanner::default().capture(&mut source, &mut signal, &tx).await;
        assert!(matches!(outcome, ScanOutcome::Stable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_hand_is_skipped() {
        let shape = HandShape::default();
        let mut frames = vec![Ok(vec![Landmarks::new(vec![Default::default(); 12])])];
        frames.extend((0..30).map(|i| Ok(vec![Landmarks::from(&shape.jittered(i, 0.0005))])));
        let mut source = ReplaySource::from_frames("short", frames);
        let (_handle, mut signal) = CancelHandle::new();
        let (tx, _rx) = status_channel();

        let outcome = Scanner::default().capture(&mut source, &mut signal, &tx).await;
        assert!(matches!(outcome, ScanOutcome::Stable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_source_resolves_as_cancelled() {
        let mut source = ReplaySource::from_frames("cut", vec![Ok(vec![])]).stop_when_exhausted(true);
        let (_handle, mut signal) = CancelHandle::new();
        let (tx, _rx) = status_channel();

        let outcome = Scanner::default().capture(&mut source, &mut signal, &tx).await;
        assert_eq!(outcome, ScanOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_unblocks_pending_scan() {
        let scanner = Scanner::default();
        let handle = scanner.spawn(ReplaySource::from_frames("idle", vec![]));
        let status = handle.status();

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(*status.borrow(), ScanStatus::NoHand);
        handle.cancel();

        let (_source, outcome) = handle.join().await.unwrap();
        assert_eq!(outcome, ScanOutcome::Cancelled);
        assert_eq!(*status.borrow(), ScanStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_start_never_polls() {
        let (handle, mut signal) = CancelHandle::new();
        handle.cancel();
        let mut source = SimulatedSource::new(HandShape::default());
        let (tx, _rx) = status_channel();

        let outcome = Scanner::default().capture(&mut source, &mut signal, &tx).await;
        assert_eq!(outcome, ScanOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_does_not_cancel() {
        let (handle, mut signal) = CancelHandle::new();
        drop(handle);
        let mut source = SimulatedSource::new(HandShape::default());
        let (tx, _rx) = status_channel();

        let outcome = Scanner::default().capture(&mut source, &mut signal, &tx).await;
        assert!(matches!(outcome, ScanOutcome::Stable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn smoothing_still_converges() {
        let monitor = Arc::new(LatencyMonitor::default());
        let scanner = Scanner::default()
            .with_smoothing(0.3)
            .with_monitor(monitor.clone());
        let mut source = SimulatedSource::new(HandShape::default());
        let (_handle, mut signal) = CancelHandle::new();
        let (tx, _rx) = status_channel();

        let outcome = scanner.capture(&mut source, &mut signal, &tx).await;
        assert!(matches!(outcome, ScanOutcome::Stable(_)));
        assert_eq!(monitor.stats("scan").count, 1);
        assert!(monitor.stats("extract").count >= 16);
    }
}
