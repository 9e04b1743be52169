use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::enrollment::DEFAULT_ROUNDS;
use crate::matcher::DEFAULT_MIN_CONFIDENCE;
use crate::stability::StabilityPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stability: StabilityPolicy,
    pub matcher: MatcherConfig,
    pub enrollment: EnrollmentConfig,
    pub storage: StorageConfig,
    pub monitoring: MonitoringConfig,
    pub smoothing: SmoothingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub min_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollmentConfig {
    pub rounds: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub latency_threshold_ms: f64,
    pub max_samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub enabled: bool,
    pub alpha: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            rounds: DEFAULT_ROUNDS,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("palm_data"),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            latency_threshold_ms: 100.0,
            max_samples: 100,
        }
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            alpha: 0.3,
        }
    }
}

impl AppConfig {
    pub const PATH: &'static str = "config.json";

    pub fn load() -> Result<Self> {
        Self::load_from(Self::PATH)
    }

    /// Read `path`, falling back to defaults when it is missing or unreadable.
    /// The result is always written back so new fields show up in the file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            match serde_json::from_str::<AppConfig>(&content) {
                Ok(c) => {
                    info!(path = %path.display(), "loaded configuration");
                    c
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "error parsing config, loading defaults");
                    Self::default()
                }
            }
        } else {
            info!(path = %path.display(), "configuration file not found, creating default");
            Self::default()
        };

        config.save_to(path)?;
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn smoothing_alpha(&self) -> Option<f64> {
        self.smoothing.enabled.then_some(self.smoothing.alpha)
    }
}
