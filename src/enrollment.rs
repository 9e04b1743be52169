//! Multi-round enrollment.
//!
//! Samples are collected into an [`EnrollmentSession`] and only reach the
//! gallery through [`EnrollmentSession::finalize`], which refuses to commit
//! until every round has produced a sample.

use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{PalmError, Result};
use crate::features::Embedding;
use crate::gallery::{Gallery, GalleryEntry, UserId};
use crate::scanner::{CancelSignal, ScanOutcome, Scanner};
use crate::source::LandmarkSource;
use crate::stability::ScanStatus;

/// Reference number of enrollment rounds.
pub const DEFAULT_ROUNDS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    Captured { captured: usize, required: usize },
    TimedOut,
    Cancelled,
    AlreadyComplete,
}

#[derive(Debug, Clone)]
pub struct EnrollmentSession {
    identity: UserId,
    required: usize,
    samples: Vec<Embedding>,
}

impl EnrollmentSession {
    pub fn begin(identity: UserId, rounds: usize) -> Self {
        info!(%identity, rounds, "enrollment started");
        Self {
            identity,
            required: rounds.max(1),
            samples: Vec::with_capacity(rounds),
        }
    }

    pub fn identity(&self) -> &UserId {
        &self.identity
    }

    pub fn required(&self) -> usize {
        self.required
    }

    pub fn captured(&self) -> usize {
        self.samples.len()
    }

    pub fn remaining(&self) -> usize {
        self.required.saturating_sub(self.samples.len())
    }

    pub fn is_complete(&self) -> bool {
        self.samples.len() >= self.required
    }

    /// Record a sample captured elsewhere. Extra samples past the last round are ignored.
    pub fn add_sample(&mut self, embedding: Embedding) -> usize {
        if !self.is_complete() {
            self.samples.push(embedding);
        }
        self.samples.len()
    }

    /// Run one fresh scan and keep its embedding if it settles.
    pub async fn capture_one_sample<S: LandmarkSource + ?Sized>(
        &mut self,
        scanner: &Scanner,
        source: &mut S,
        cancel: &mut CancelSignal,
        status: &watch::Sender<ScanStatus>,
    ) -> RoundOutcome {
        if self.is_complete() {
            return RoundOutcome::AlreadyComplete;
        }
        let round = self.samples.len() + 1;
        match scanner.capture(source, cancel, status).await {
            ScanOutcome::Stable(embedding) => {
                let captured = self.add_sample(embedding);
                info!(identity = %self.identity, round, required = self.required, "enrollment round captured");
                RoundOutcome::Captured {
                    captured,
                    required: self.required,
                }
            }
            ScanOutcome::TimedOut => {
                warn!(identity = %self.identity, round, "enrollment round timed out");
                RoundOutcome::TimedOut
            }
            ScanOutcome::Cancelled => RoundOutcome::Cancelled,
        }
    }

    /// Build the gallery entry without committing it.
    pub fn into_entry(self) -> Result<GalleryEntry> {
        if !self.is_complete() {
            return Err(PalmError::IncompleteEnrollment {
                identity: self.identity.to_string(),
                captured: self.samples.len(),
                required: self.required,
            });
        }
        GalleryEntry::new(self.identity, self.samples)
    }

    /// Commit every sample at once, replacing any prior entry for the identity.
    pub fn finalize(self, gallery: &Gallery) -> Result<GalleryEntry> {
        let entry = self.into_entry()?;
        gallery.replace(entry.clone());
        Ok(entry)
    }
}
