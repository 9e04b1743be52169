use thiserror::Error;

/// Errors produced by the matching core and the gallery store.
#[derive(Debug, Error)]
pub enum PalmError {
    #[error("hand pose must have exactly {expected} landmarks, got {actual}")]
    InvalidLandmarkCount { expected: usize, actual: usize },

    #[error("embedding must have exactly {expected} values, got {actual}")]
    InvalidEmbeddingLength { expected: usize, actual: usize },

    #[error("non-finite value at position {index}")]
    NonFinite { index: usize },

    #[error("degenerate frame: {0}")]
    DegenerateFrame(String),

    #[error("enrollment for {identity} has no samples")]
    EmptyEnrollment { identity: String },

    #[error("enrollment for {identity} is incomplete: {captured} of {required} samples")]
    IncompleteEnrollment {
        identity: String,
        captured: usize,
        required: usize,
    },

    #[error("expected {expected} enrollment samples, got {actual}")]
    SampleCount { expected: usize, actual: usize },

    #[error("scan task aborted: {0}")]
    ScanAborted(String),

    #[error("identity {0} is not enrolled")]
    UnknownIdentity(String),

    #[error("gallery was written by scheme {found}, expected {expected}")]
    IncompatibleScheme { expected: String, found: String },

    #[error("replay parse error on line {line}: {source}")]
    Replay {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PalmError>;
