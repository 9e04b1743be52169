//! Typed register/verify surface over the shared gallery.
//!
//! Request and response bodies are plain serde structs so they can be carried
//! by whatever transport hosts the service. Every gallery write is saved
//! before it becomes visible, so a failed save leaves the shared gallery as it
//! was.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::enrollment::{EnrollmentSession, RoundOutcome, DEFAULT_ROUNDS};
use crate::error::{PalmError, Result};
use crate::features::Embedding;
use crate::gallery::{upsert, Gallery, GalleryEntry, UserId};
use crate::latency::LatencyMonitor;
use crate::matcher::{self, MatchResult, DEFAULT_MIN_CONFIDENCE};
use crate::scanner::{CancelSignal, ScanOutcome, Scanner};
use crate::source::LandmarkSource;
use crate::stability::ScanStatus;
use crate::store::{GallerySink, GalleryStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub embeddings: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
    pub has_biometrics: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub embedding: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub matched: bool,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<MatchResult> for VerifyResponse {
    fn from(result: MatchResult) -> Self {
        let message = (!result.matched).then(|| "No matching biometric found".to_string());
        Self {
            matched: result.matched,
            confidence: result.confidence,
            identity: result.identity,
            message,
        }
    }
}

/// Result of a scan followed by a gallery lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    Decided(MatchResult),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnrollOutcome {
    Enrolled(GalleryEntry),
    /// `round` is 1-based.
    TimedOut { round: usize },
    Cancelled { round: usize },
}

pub struct BiometricService {
    gallery: Gallery,
    store: Option<Arc<dyn GallerySink>>,
    scanner: Scanner,
    monitor: Arc<LatencyMonitor>,
    min_confidence: f64,
    rounds: usize,
    // Serializes commit + persist so saves land in commit order.
    writes: Mutex<()>,
}

impl BiometricService {
    /// In-memory service with reference settings.
    pub fn new(gallery: Gallery) -> Self {
        let monitor = Arc::new(LatencyMonitor::default());
        Self {
            gallery,
            store: None,
            scanner: Scanner::default().with_monitor(monitor.clone()),
            monitor,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            rounds: DEFAULT_ROUNDS,
            writes: Mutex::new(()),
        }
    }

    /// Open the configured data directory and load its gallery.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let store = GalleryStore::open(&config.storage.data_dir)?;
        let gallery = store.load()?;
        let monitor = Arc::new(LatencyMonitor::new(
            config.monitoring.max_samples,
            config.monitoring.latency_threshold_ms,
        ));
        let mut scanner = Scanner::new(config.stability.clone()).with_monitor(monitor.clone());
        if let Some(alpha) = config.smoothing_alpha() {
            scanner = scanner.with_smoothing(alpha);
        }
        Ok(Self {
            gallery,
            store: Some(Arc::new(store)),
            scanner,
            monitor,
            min_confidence: config.matcher.min_confidence,
            rounds: config.enrollment.rounds.max(1),
            writes: Mutex::new(()),
        })
    }

    pub fn with_store(mut self, store: impl GallerySink + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn with_scanner(mut self, scanner: Scanner) -> Self {
        self.scanner = scanner.with_monitor(self.monitor.clone());
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_rounds(mut self, rounds: usize) -> Self {
        self.rounds = rounds.max(1);
        self
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn monitor(&self) -> &LatencyMonitor {
        &self.monitor
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Store a full set of enrollment samples for `identity`.
    pub fn register(&self, identity: &UserId, request: RegisterRequest) -> Result<RegisterResponse> {
        if request.embeddings.len() != self.rounds {
            return Err(PalmError::SampleCount {
                expected: self.rounds,
                actual: request.embeddings.len(),
            });
        }
        let embeddings = request
            .embeddings
            .iter()
            .map(|e| Embedding::from_slice(e))
            .collect::<Result<Vec<_>>>()?;

        let mut session = EnrollmentSession::begin(identity.clone(), self.rounds);
        for embedding in embeddings {
            session.add_sample(embedding);
        }
        self.commit(session.into_entry()?)?;

        Ok(RegisterResponse {
            success: true,
            message: "Biometric data registered successfully".to_string(),
            has_biometrics: true,
        })
    }

    /// Identify the owner of an embedding.
    pub fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse> {
        let started = Instant::now();
        let snapshot = self.gallery.snapshot();
        let result = matcher::best_match_raw(
            &request.embedding,
            snapshot.iter().map(|e| e.as_ref()),
            self.min_confidence,
        );
        self.monitor.record("verify", started.elapsed());
        let result = result?;
        info!(
            matched = result.matched,
            confidence = result.confidence,
            identity = ?result.identity,
            "verification decided"
        );
        Ok(result.into())
    }

    /// Check an embedding against one claimed identity only.
    pub fn verify_claimed(&self, identity: &UserId, request: &VerifyRequest) -> Result<VerifyResponse> {
        let candidate = Embedding::from_slice(&request.embedding)?;
        let entry = self
            .gallery
            .get(identity)
            .ok_or_else(|| PalmError::UnknownIdentity(identity.to_string()))?;
        let result = self.monitor.measure("verify_claimed", || {
            matcher::verify_claimed(&candidate, [entry.as_ref()], identity, self.min_confidence)
        });
        Ok(result.into())
    }

    pub async fn scan<S: LandmarkSource + ?Sized>(
        &self,
        source: &mut S,
        cancel: &mut CancelSignal,
        status: &watch::Sender<ScanStatus>,
    ) -> ScanOutcome {
        self.scanner.capture(source, cancel, status).await
    }

    /// Scan until stable, then identify against the gallery.
    pub async fn scan_and_verify<S: LandmarkSource + ?Sized>(
        &self,
        source: &mut S,
        cancel: &mut CancelSignal,
        status: &watch::Sender<ScanStatus>,
    ) -> VerifyOutcome {
        match self.scan(source, cancel, status).await {
            ScanOutcome::Stable(embedding) => {
                let snapshot = self.gallery.snapshot();
                let result = self.monitor.measure("verify", || {
                    matcher::best_match(
                        &embedding,
                        snapshot.iter().map(|e| e.as_ref()),
                        self.min_confidence,
                    )
                });
                VerifyOutcome::Decided(result)
            }
            ScanOutcome::TimedOut => VerifyOutcome::TimedOut,
            ScanOutcome::Cancelled => VerifyOutcome::Cancelled,
        }
    }

    /// Capture every round from `source` and commit them as one entry.
    pub async fn enroll<S: LandmarkSource + ?Sized>(
        &self,
        identity: &UserId,
        source: &mut S,
        cancel: &mut CancelSignal,
        status: &watch::Sender<ScanStatus>,
    ) -> Result<EnrollOutcome> {
        let mut session = EnrollmentSession::begin(identity.clone(), self.rounds);
        while !session.is_complete() {
            let round = session.captured() + 1;
            match session
                .capture_one_sample(&self.scanner, source, cancel, status)
                .await
            {
                RoundOutcome::Captured { .. } | RoundOutcome::AlreadyComplete => {}
                RoundOutcome::TimedOut => return Ok(EnrollOutcome::TimedOut { round }),
                RoundOutcome::Cancelled => return Ok(EnrollOutcome::Cancelled { round }),
            }
        }
        let entry = session.into_entry()?;
        self.commit(entry.clone())?;
        Ok(EnrollOutcome::Enrolled(entry))
    }

    pub fn remove(&self, identity: &UserId) -> Result<()> {
        let _guard = self.writes.lock();
        let mut next = self.gallery.snapshot();
        let index = next
            .iter()
            .position(|e| e.identity() == identity)
            .ok_or_else(|| PalmError::UnknownIdentity(identity.to_string()))?;
        next.remove(index);
        if let Err(e) = self.persist(&next) {
            error!(%identity, error = %e, "failed to persist removal, gallery unchanged");
            return Err(e);
        }
        self.gallery.remove(identity);
        info!(%identity, "identity removed");
        Ok(())
    }

    // Save the gallery as it will look after the write, then publish it.
    fn commit(&self, entry: GalleryEntry) -> Result<()> {
        let _guard = self.writes.lock();
        let entry = Arc::new(entry);
        let mut next = self.gallery.snapshot();
        upsert(&mut next, entry.clone());
        if let Err(e) = self.persist(&next) {
            warn!(
                identity = %entry.identity(),
                error = %e,
                "failed to persist gallery, nothing committed"
            );
            return Err(e);
        }
        self.gallery.replace(entry);
        Ok(())
    }

    fn persist(&self, entries: &[Arc<GalleryEntry>]) -> Result<()> {
        match &self.store {
            Some(store) => store.save_entries(entries),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{extract, EMBEDDING_LEN};
    use crate::scanner::CancelHandle;
    use crate::source::SimulatedSource;
    use crate::synthetic::HandShape;
    use std::fs;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    fn sample(curl: f64) -> Vec<f64> {
        extract(&HandShape::curled(curl).pose())
            .unwrap()
            .as_slice()
            .to_vec()
    }

    #[test]
    fn register_then_verify() {
        let service = BiometricService::new(Gallery::new());
        let response = service
            .register(&"alice".into(), RegisterRequest { embeddings: vec![sample(0.0); 3] })
            .unwrap();
        assert!(response.success);

        let close = service.verify(&VerifyRequest { embedding: sample(0.2) }).unwrap();
        assert!(close.matched);
        assert_eq!(close.identity, Some("alice".into()));
        assert!(close.message.is_none());

        let far = service.verify(&VerifyRequest { embedding: sample(1.05) }).unwrap();
        assert!(!far.matched);
        assert!(far.confidence < DEFAULT_MIN_CONFIDENCE);
        assert_eq!(far.message.as_deref(), Some("No matching biometric found"));
        assert_eq!(service.monitor().stats("verify").count, 2);
    }

    #[test]
    fn register_rejects_wrong_sample_count() {
        let service = BiometricService::new(Gallery::new());
        let err = service
            .register(&"alice".into(), RegisterRequest { embeddings: vec![sample(0.0); 2] })
            .unwrap_err();
        assert!(matches!(err, PalmError::SampleCount { expected: 3, actual: 2 }));
        assert!(service.gallery().is_empty());
    }

    #[test]
    fn register_rejects_bad_vector_without_side_effects() {
        let service = BiometricService::new(Gallery::new());
        let mut embeddings = vec![sample(0.0); 3];
        embeddings[2] = vec![1.0; EMBEDDING_LEN - 1];
        assert!(service
            .register(&"alice".into(), RegisterRequest { embeddings })
            .is_err());
        assert!(service.gallery().is_empty());
    }

    #[test]
    fn verify_rejects_wrong_length() {
        let service = BiometricService::new(Gallery::new());
        let err = service.verify(&VerifyRequest { embedding: vec![0.5; 8] }).unwrap_err();
        assert!(matches!(err, PalmError::InvalidEmbeddingLength { actual: 8, .. }));
    }

    #[test]
    fn claimed_identity_must_exist() {
        let service = BiometricService::new(Gallery::new());
        service
            .register(&"alice".into(), RegisterRequest { embeddings: vec![sample(0.0); 3] })
            .unwrap();
        let ok = service
            .verify_claimed(&"alice".into(), &VerifyRequest { embedding: sample(0.0) })
            .unwrap();
        assert!(ok.matched);
        assert!(matches!(
            service.verify_claimed(&"bob".into(), &VerifyRequest { embedding: sample(0.0) }),
            Err(PalmError::UnknownIdentity(_))
        ));
    }

    #[test]
    fn register_persists_and_reloads() {
        let dir = tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();
        let service = BiometricService::new(Gallery::new()).with_store(store.clone());
        service
            .register(&"alice".into(), RegisterRequest { embeddings: vec![sample(0.0); 3] })
            .unwrap();

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.identities(), vec![UserId::from("alice")]);
    }

    #[test]
    fn failed_save_leaves_gallery_untouched() {
        let dir = tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();
        let service = BiometricService::new(Gallery::new()).with_store(store.clone());
        for id in ["alice", "bob"] {
            service
                .register(&id.into(), RegisterRequest { embeddings: vec![sample(0.0); 3] })
                .unwrap();
        }
        let before = service.gallery().snapshot();

        // A directory where the temp file should go makes the next save fail.
        fs::create_dir(store.path().with_extension("json.tmp")).unwrap();
        assert!(service
            .register(&"alice".into(), RegisterRequest { embeddings: vec![sample(0.5); 3] })
            .is_err());
        assert!(service
            .register(&"carol".into(), RegisterRequest { embeddings: vec![sample(0.5); 3] })
            .is_err());
        assert_eq!(service.gallery().snapshot(), before);

        assert!(service.remove(&"alice".into()).is_err());
        assert_eq!(
            service.gallery().identities(),
            vec![UserId::from("alice"), UserId::from("bob")]
        );
        // Identical samples tie, and the first enrolled identity keeps winning.
        let tie = service.verify(&VerifyRequest { embedding: sample(0.0) }).unwrap();
        assert_eq!(tie.identity, Some("alice".into()));
    }

    // Records what readers could see while each save was in flight.
    #[derive(Clone)]
    struct WatchedSink {
        gallery: Gallery,
        fail: Arc<AtomicBool>,
        saves: Arc<Mutex<Vec<(Vec<UserId>, Vec<UserId>)>>>,
    }

    impl GallerySink for WatchedSink {
        fn save_entries(&self, entries: &[Arc<GalleryEntry>]) -> Result<()> {
            let written = entries.iter().map(|e| e.identity().clone()).collect();
            self.saves.lock().push((self.gallery.identities(), written));
            if self.fail.load(Ordering::SeqCst) {
                return Err(PalmError::Io(io::Error::new(io::ErrorKind::Other, "disk full")));
            }
            Ok(())
        }
    }

    #[test]
    fn entry_is_visible_only_after_save() {
        let gallery = Gallery::new();
        let sink = WatchedSink {
            gallery: gallery.clone(),
            fail: Arc::new(AtomicBool::new(false)),
            saves: Arc::new(Mutex::new(Vec::new())),
        };
        let service = BiometricService::new(gallery).with_store(sink.clone());

        service
            .register(&"alice".into(), RegisterRequest { embeddings: vec![sample(0.0); 3] })
            .unwrap();
        sink.fail.store(true, Ordering::SeqCst);
        assert!(service
            .register(&"bob".into(), RegisterRequest { embeddings: vec![sample(0.0); 3] })
            .is_err());
        assert!(service.remove(&"alice".into()).is_err());

        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        let saves = sink.saves.lock().clone();
        assert_eq!(
            saves,
            vec![
                (vec![], vec![alice.clone()]),
                (vec![alice.clone()], vec![alice.clone(), bob.clone()]),
                (vec![alice.clone()], vec![]),
            ]
        );
        assert_eq!(service.gallery().identities(), vec![alice]);
    }

    #[tokio::test(start_paused = true)]
    async fn enroll_and_scan_with_simulated_hand() {
        let service = BiometricService::new(Gallery::new());
        let (_handle, mut signal) = CancelHandle::new();
        let (tx, _rx) = watch::channel(ScanStatus::Starting);

        let mut source = SimulatedSource::new(HandShape::default());
        let outcome = service
            .enroll(&"alice".into(), &mut source, &mut signal, &tx)
            .await
            .unwrap();
        assert!(matches!(outcome, EnrollOutcome::Enrolled(ref e) if e.embeddings().len() == 3));

        let mut probe = SimulatedSource::new(HandShape::curled(0.2));
        match service.scan_and_verify(&mut probe, &mut signal, &tx).await {
            VerifyOutcome::Decided(result) => {
                assert!(result.matched);
                assert_eq!(result.identity, Some("alice".into()));
            }
            other => panic!("expected a decision, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_enrollment_commits_nothing() {
        let service = BiometricService::new(Gallery::new());
        let (handle, mut signal) = CancelHandle::new();
        handle.cancel();
        let (tx, _rx) = watch::channel(ScanStatus::Starting);

        let mut source = SimulatedSource::new(HandShape::default());
        let outcome = service
            .enroll(&"alice".into(), &mut source, &mut signal, &tx)
            .await
            .unwrap();
        assert_eq!(outcome, EnrollOutcome::Cancelled { round: 1 });
        assert!(service.gallery().is_empty());
    }
}
