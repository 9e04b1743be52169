//! On-disk gallery persistence.
//!
//! The whole gallery lives in one JSON document under the data directory.
//! Saves go to a temporary file that is renamed over the old one, so a crash
//! mid-write leaves the previous gallery intact.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PalmError, Result};
use crate::features::{EMBEDDING_LEN, EXTRACTION_SCHEME};
use crate::gallery::{Gallery, GalleryEntry};

const GALLERY_FILE: &str = "gallery.json";

#[derive(Serialize)]
struct GalleryDocRef<'a> {
    scheme: &'a str,
    embedding_len: usize,
    entries: Vec<&'a GalleryEntry>,
}

#[derive(Deserialize)]
struct GalleryDoc {
    scheme: String,
    embedding_len: usize,
    entries: Vec<GalleryEntry>,
}

#[derive(Debug, Clone)]
pub struct GalleryStore {
    data_dir: PathBuf,
}

impl GalleryStore {
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn path(&self) -> PathBuf {
        self.data_dir.join(GALLERY_FILE)
    }

    /// Load the stored gallery. A missing file is an empty gallery.
    pub fn load(&self) -> Result<Gallery> {
        let path = self.path();
        if !path.exists() {
            debug!(path = %path.display(), "no stored gallery, starting empty");
            return Ok(Gallery::new());
        }
        let doc: GalleryDoc = serde_json::from_reader(BufReader::new(File::open(&path)?))?;
        if doc.scheme != EXTRACTION_SCHEME || doc.embedding_len != EMBEDDING_LEN {
            return Err(PalmError::IncompatibleScheme {
                expected: format!("{}/{}", EXTRACTION_SCHEME, EMBEDDING_LEN),
                found: format!("{}/{}", doc.scheme, doc.embedding_len),
            });
        }
        info!(path = %path.display(), identities = doc.entries.len(), "gallery loaded");
        Ok(Gallery::from_entries(doc.entries))
    }

    pub fn save(&self, gallery: &Gallery) -> Result<()> {
        self.save_entries(&gallery.snapshot())
    }

    /// Write `entries` as the whole stored gallery.
    pub fn save_entries(&self, entries: &[Arc<GalleryEntry>]) -> Result<()> {
        let doc = GalleryDocRef {
            scheme: EXTRACTION_SCHEME,
            embedding_len: EMBEDDING_LEN,
            entries: entries.iter().map(|e| e.as_ref()).collect(),
        };

        let path = self.path();
        let tmp = path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, &doc)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        info!(path = %path.display(), identities = entries.len(), "gallery saved");
        Ok(())
    }
}

/// Where committed gallery contents are written before they become visible.
pub trait GallerySink: Send + Sync {
    fn save_entries(&self, entries: &[Arc<GalleryEntry>]) -> Result<()>;
}

impl GallerySink for GalleryStore {
    fn save_entries(&self, entries: &[Arc<GalleryEntry>]) -> Result<()> {
        GalleryStore::save_entries(self, entries)
    }
}
