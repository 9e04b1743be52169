//! Offline accuracy figures for a gallery and a labeled probe set.
//!
//! Probes carry the identity they really belong to, or `None` for someone who
//! was never enrolled. A genuine probe that is rejected or identified as the
//! wrong person counts against FRR; an impostor probe that is accepted counts
//! against FAR.

use serde::{Deserialize, Serialize};

use crate::features::Embedding;
use crate::gallery::{GalleryEntry, UserId};
use crate::matcher::{best_match, identity_score};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    pub identity: Option<UserId>,
    pub embedding: Embedding,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl ScoreSummary {
    fn from_scores(scores: &[f64]) -> Self {
        if scores.is_empty() {
            return Self::default();
        }
        let sum: f64 = scores.iter().sum();
        Self {
            count: scores.len(),
            mean: sum / scores.len() as f64,
            min: scores.iter().copied().fold(f64::INFINITY, f64::min),
            max: scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub threshold: f64,
    pub genuine_attempts: usize,
    pub impostor_attempts: usize,
    pub false_rejects: usize,
    pub false_accepts: usize,
    /// Genuine probes accepted as somebody else.
    pub misidentified: usize,
    pub frr: f64,
    pub far: f64,
    /// Score of each probe against the identity it claims to be.
    pub genuine_scores: ScoreSummary,
    /// Score of each probe against every identity it is not.
    pub impostor_scores: ScoreSummary,
}

fn rate(errors: usize, attempts: usize) -> f64 {
    if attempts == 0 {
        0.0
    } else {
        errors as f64 / attempts as f64
    }
}

pub fn evaluate(gallery: &[&GalleryEntry], probes: &[Probe], threshold: f64) -> EvaluationReport {
    let mut genuine_attempts = 0;
    let mut impostor_attempts = 0;
    let mut false_rejects = 0;
    let mut false_accepts = 0;
    let mut misidentified = 0;
    let mut genuine = Vec::new();
    let mut impostor = Vec::new();

    for probe in probes {
        for entry in gallery {
            if let Some(score) = identity_score(&probe.embedding, entry) {
                if probe.identity.as_ref() == Some(entry.identity()) {
                    genuine.push(score);
                } else {
                    impostor.push(score);
                }
            }
        }

        let enrolled = probe
            .identity
            .as_ref()
            .filter(|id| gallery.iter().any(|e| e.identity() == *id));
        let result = best_match(&probe.embedding, gallery.iter().copied(), threshold);

        match enrolled {
            Some(id) => {
                genuine_attempts += 1;
                match &result.identity {
                    Some(found) if found == id => {}
                    Some(_) => {
                        misidentified += 1;
                        false_rejects += 1;
                    }
                    None => false_rejects += 1,
                }
            }
            None => {
                impostor_attempts += 1;
                if result.matched {
                    false_accepts += 1;
                }
            }
        }
    }

    EvaluationReport {
        threshold,
        genuine_attempts,
        impostor_attempts,
        false_rejects,
        false_accepts,
        misidentified,
        frr: rate(false_rejects, genuine_attempts),
        far: rate(false_accepts, impostor_attempts),
        genuine_scores: ScoreSummary::from_scores(&genuine),
        impostor_scores: ScoreSummary::from_scores(&impostor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::extract;
    use crate::synthetic::HandShape;
    use approx::assert_relative_eq;

    fn embed(curl: f64) -> Embedding {
        extract(&HandShape::curled(curl).pose()).unwrap()
    }

    #[test]
    fn separated_population_has_no_errors() {
        let alice = GalleryEntry::new("alice".into(), vec![embed(0.0); 3]).unwrap();
        let gallery = vec![&alice];
        let probes = vec![
            Probe { identity: Some("alice".into()), embedding: embed(0.2) },
            Probe { identity: None, embedding: embed(1.05) },
        ];

        let report = evaluate(&gallery, &probes, 0.75);
        assert_eq!(report.genuine_attempts, 1);
        assert_eq!(report.impostor_attempts, 1);
        assert_eq!(report.frr, 0.0);
        assert_eq!(report.far, 0.0);
        assert_eq!(report.genuine_scores.count, 1);
        assert!(report.genuine_scores.min > report.impostor_scores.max);
    }

    #[test]
    fn loose_threshold_accepts_impostor() {
        let alice = GalleryEntry::new("alice".into(), vec![embed(0.0)]).unwrap();
        let gallery = vec![&alice];
        let probes = vec![
            Probe { identity: None, embedding: embed(1.05) },
            Probe { identity: None, embedding: embed(0.9) },
        ];

        let report = evaluate(&gallery, &probes, 0.5);
        assert_eq!(report.false_accepts, 2);
        assert_relative_eq!(report.far, 1.0);
    }

    #[test]
    fn wrong_identity_counts_as_misidentified() {
        let open = GalleryEntry::new("open".into(), vec![embed(0.0)]).unwrap();
        let fist = GalleryEntry::new("fist".into(), vec![embed(1.05)]).unwrap();
        let gallery = vec![&open, &fist];
        // Labeled as "fist" but geometrically the open hand.
        let probes = vec![Probe { identity: Some("fist".into()), embedding: embed(0.1) }];

        let report = evaluate(&gallery, &probes, 0.75);
        assert_eq!(report.misidentified, 1);
        assert_eq!(report.false_rejects, 1);
        assert_relative_eq!(report.frr, 1.0);
    }

    #[test]
    fn empty_probe_set_reports_zero_rates() {
        let report = evaluate(&[], &[], 0.75);
        assert_eq!(report.far, 0.0);
        assert_eq!(report.frr, 0.0);
        assert_eq!(report.genuine_scores, ScoreSummary::default());
    }
}
