use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{PalmError, Result};
use crate::synthetic::HandShape;
use crate::types::Landmarks;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    /// The tracker failed on this frame only (e.g. an invalid region of interest).
    #[error("transient tracker error: {0}")]
    Transient(String),
    /// The camera or stream is gone; no further frames will arrive.
    #[error("landmark source stopped")]
    Stopped,
}

/// Anything that can report the hands visible in the current frame.
pub trait LandmarkSource: Send {
    fn name(&self) -> String;
    fn detect(&mut self) -> std::result::Result<Vec<Landmarks>, SourceError>;
}

impl<S: LandmarkSource + ?Sized> LandmarkSource for Box<S> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn detect(&mut self) -> std::result::Result<Vec<Landmarks>, SourceError> {
        (**self).detect()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplayLine {
    Hands(Vec<Landmarks>),
    Glitch { error: String },
}

pub type ReplayFrame = std::result::Result<Vec<Landmarks>, SourceError>;

/// Plays back recorded tracker output, one frame per poll.
///
/// Recording format is JSON lines. Each line is either an array of hands
/// (each an array of `{x, y, z}` points, `[]` for no hand) or
/// `{"error": "..."}` for a frame where the tracker failed.
pub struct ReplaySource {
    name: String,
    frames: VecDeque<ReplayFrame>,
    stop_when_exhausted: bool,
    exhausted_logged: bool,
}

impl ReplaySource {
    pub fn from_frames(name: &str, frames: Vec<ReplayFrame>) -> Self {
        Self {
            name: name.to_string(),
            frames: frames.into(),
            stop_when_exhausted: false,
            exhausted_logged: false,
        }
    }

    pub fn from_reader<R: BufRead>(name: &str, reader: R) -> Result<Self> {
        let mut frames = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let parsed: ReplayLine = serde_json::from_str(trimmed)
                .map_err(|source| PalmError::Replay { line: i + 1, source })?;
            frames.push(match parsed {
                ReplayLine::Hands(hands) => Ok(hands),
                ReplayLine::Glitch { error } => Err(SourceError::Transient(error)),
            });
        }
        Ok(Self::from_frames(name, frames))
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let source = Self::from_reader(&path.display().to_string(), BufReader::new(file))?;
        info!(path = %path.display(), frames = source.remaining(), "loaded landmark recording");
        Ok(source)
    }

    /// Report [`SourceError::Stopped`] once the recording runs out instead of empty frames.
    pub fn stop_when_exhausted(mut self, stop: bool) -> Self {
        self.stop_when_exhausted = stop;
        self
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl LandmarkSource for ReplaySource {
    fn name(&self) -> String {
        format!("Replay ({})", self.name)
    }

    fn detect(&mut self) -> std::result::Result<Vec<Landmarks>, SourceError> {
        match self.frames.pop_front() {
            Some(frame) => frame,
            None if self.stop_when_exhausted => Err(SourceError::Stopped),
            None => {
                if !self.exhausted_logged {
                    debug!(source = %self.name, "recording exhausted, reporting empty frames");
                    self.exhausted_logged = true;
                }
                Ok(Vec::new())
            }
        }
    }
}

/// Source that needs no camera: a synthetic hand with a slight tremor.
pub struct SimulatedSource {
    shape: HandShape,
    frame_count: u32,
    jitter: f64,
    hands: usize,
}

impl SimulatedSource {
    pub fn new(shape: HandShape) -> Self {
        Self {
            shape,
            frame_count: 0,
            jitter: 0.0005,
            hands: 1,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Report the same hand `hands` times per frame.
    pub fn with_hands(mut self, hands: usize) -> Self {
        self.hands = hands;
        self
    }
}

impl LandmarkSource for SimulatedSource {
    fn name(&self) -> String {
        "Simulated Hand".to_string()
    }

    fn detect(&mut self) -> std::result::Result<Vec<Landmarks>, SourceError> {
        self.frame_count += 1;
        let pose = self.shape.jittered(self.frame_count, self.jitter);
        Ok(vec![Landmarks::from(&pose); self.hands])
    }
}
