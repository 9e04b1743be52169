//! Gallery matching.
//!
//! Each identity is scored by the mean cosine similarity between the
//! candidate and every one of its enrollment samples. The scan is linear over
//! the gallery and the first entry wins ties.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::features::Embedding;
use crate::gallery::{GalleryEntry, UserId};
use crate::similarity::cosine_similarity;

/// Default acceptance threshold for a match.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.75;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub matched: bool,
    pub confidence: f64,
    pub identity: Option<UserId>,
}

impl MatchResult {
    pub fn no_match(confidence: f64) -> Self {
        Self {
            matched: false,
            confidence,
            identity: None,
        }
    }
}

/// Mean similarity of `candidate` against every sample of `entry`.
pub fn identity_score(candidate: &Embedding, entry: &GalleryEntry) -> Option<f64> {
    let samples = entry.embeddings();
    if samples.is_empty() {
        return None;
    }
    let total: f64 = samples.iter().map(|s| cosine_similarity(candidate, s)).sum();
    Some(total / samples.len() as f64)
}

/// Identify `candidate` against the whole gallery.
///
/// When nothing clears `min_confidence` the result still carries the best
/// score seen, for diagnostics.
pub fn best_match<'a, I>(candidate: &Embedding, gallery: I, min_confidence: f64) -> MatchResult
where
    I: IntoIterator<Item = &'a GalleryEntry>,
{
    let mut best: Option<&UserId> = None;
    let mut best_score = 0.0_f64;
    let mut best_seen = 0.0_f64;

    for entry in gallery {
        let Some(score) = identity_score(candidate, entry) else {
            continue;
        };
        debug!(identity = %entry.identity(), score, "scored identity");
        best_seen = best_seen.max(score);
        if score > best_score && score >= min_confidence {
            best_score = score;
            best = Some(entry.identity());
        }
    }

    match best {
        Some(identity) => MatchResult {
            matched: true,
            confidence: best_score,
            identity: Some(identity.clone()),
        },
        None => MatchResult::no_match(best_seen),
    }
}

/// Validate a raw candidate vector before matching.
pub fn best_match_raw<'a, I>(candidate: &[f64], gallery: I, min_confidence: f64) -> Result<MatchResult>
where
    I: IntoIterator<Item = &'a GalleryEntry>,
{
    let candidate = Embedding::from_slice(candidate)?;
    Ok(best_match(&candidate, gallery, min_confidence))
}

/// One-to-one check against a claimed identity.
pub fn verify_claimed<'a, I>(
    candidate: &Embedding,
    gallery: I,
    claimed: &UserId,
    min_confidence: f64,
) -> MatchResult
where
    I: IntoIterator<Item = &'a GalleryEntry>,
{
    let entry = gallery.into_iter().find(|e| e.identity() == claimed);
    match entry.and_then(|e| identity_score(candidate, e)) {
        Some(score) if score >= min_confidence => MatchResult {
            matched: true,
            confidence: score,
            identity: Some(claimed.clone()),
        },
        Some(score) => MatchResult::no_match(score.max(0.0)),
        None => MatchResult::no_match(0.0),
    }
}
