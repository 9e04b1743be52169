//! Palm biometrics on top of a hand-landmark tracker.
//!
//! A [`scanner::Scanner`] polls a [`source::LandmarkSource`] until the hand
//! has held still, [`features::extract`] turns the settled pose into a
//! 32-value palm-geometry embedding, and [`matcher`] scores it against the
//! enrolled [`gallery::Gallery`]. [`service::BiometricService`] ties these
//! together with enrollment and persistence.

pub mod config;
pub mod enrollment;
pub mod error;
pub mod evaluation;
pub mod features;
pub mod gallery;
pub mod latency;
pub mod matcher;
pub mod scanner;
pub mod service;
pub mod similarity;
pub mod smoothing;
pub mod source;
pub mod stability;
pub mod store;
pub mod synthetic;
pub mod types;

pub use error::{PalmError, Result};
pub use features::{extract, Embedding, EMBEDDING_LEN};
pub use gallery::{Gallery, GalleryEntry, UserId};
pub use matcher::{best_match, MatchResult};
pub use types::{HandPose, Landmarks, Point3D};
