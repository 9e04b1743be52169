//! Enrolled identities and their stored embeddings.
//!
//! The gallery is shared by every verification and enrollment. Entries are
//! immutable `Arc`s swapped in whole under a write lock, so a reader holding a
//! [`Gallery::snapshot`] never observes a half-replaced entry.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PalmError, Result};
use crate::features::Embedding;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Deserialize)]
struct RawEntry {
    identity: UserId,
    embeddings: Vec<Embedding>,
    enrolled_at: DateTime<Utc>,
}

/// One identity and its enrollment samples. Never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEntry")]
pub struct GalleryEntry {
    identity: UserId,
    embeddings: Vec<Embedding>,
    enrolled_at: DateTime<Utc>,
}

impl GalleryEntry {
    pub fn new(identity: UserId, embeddings: Vec<Embedding>) -> Result<Self> {
        Self::with_timestamp(identity, embeddings, Utc::now())
    }

    pub fn with_timestamp(
        identity: UserId,
        embeddings: Vec<Embedding>,
        enrolled_at: DateTime<Utc>,
    ) -> Result<Self> {
        if embeddings.is_empty() {
            return Err(PalmError::EmptyEnrollment {
                identity: identity.to_string(),
            });
        }
        Ok(Self {
            identity,
            embeddings,
            enrolled_at,
        })
    }

    pub fn identity(&self) -> &UserId {
        &self.identity
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    pub fn enrolled_at(&self) -> DateTime<Utc> {
        self.enrolled_at
    }
}

impl TryFrom<RawEntry> for GalleryEntry {
    type Error = PalmError;

    fn try_from(raw: RawEntry) -> Result<Self> {
        Self::with_timestamp(raw.identity, raw.embeddings, raw.enrolled_at)
    }
}

/// Thread-safe, ordered collection of gallery entries. Cloning shares the same store.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Arc<RwLock<Vec<Arc<GalleryEntry>>>>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a gallery from loaded entries. A repeated identity replaces the
    /// earlier entry in place.
    pub fn from_entries(entries: Vec<GalleryEntry>) -> Self {
        let mut built: Vec<Arc<GalleryEntry>> = Vec::with_capacity(entries.len());
        for entry in entries {
            upsert(&mut built, Arc::new(entry));
        }
        Self {
            entries: Arc::new(RwLock::new(built)),
        }
    }

    /// Consistent view of every entry, in enrollment order.
    pub fn snapshot(&self) -> Vec<Arc<GalleryEntry>> {
        self.entries.read().clone()
    }

    /// Insert or replace the entry for its identity. A replaced entry keeps its
    /// position so matching order stays stable. Returns the previous entry.
    pub fn replace(&self, entry: impl Into<Arc<GalleryEntry>>) -> Option<Arc<GalleryEntry>> {
        let entry = entry.into();
        let mut entries = self.entries.write();
        let previous = upsert(&mut entries, entry.clone());
        info!(
            identity = %entry.identity,
            samples = entry.embeddings.len(),
            replaced = previous.is_some(),
            "gallery entry committed"
        );
        previous
    }

    pub fn remove(&self, identity: &UserId) -> Option<Arc<GalleryEntry>> {
        let mut entries = self.entries.write();
        let index = entries.iter().position(|e| &e.identity == identity)?;
        Some(entries.remove(index))
    }

    pub fn get(&self, identity: &UserId) -> Option<Arc<GalleryEntry>> {
        self.entries
            .read()
            .iter()
            .find(|e| &e.identity == identity)
            .cloned()
    }

    pub fn identities(&self) -> Vec<UserId> {
        self.entries.read().iter().map(|e| e.identity.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Put `entry` in the slot of its identity, or at the end. Returns the displaced entry.
pub(crate) fn upsert(
    entries: &mut Vec<Arc<GalleryEntry>>,
    entry: Arc<GalleryEntry>,
) -> Option<Arc<GalleryEntry>> {
    match entries.iter().position(|e| e.identity == entry.identity) {
        Some(i) => Some(std::mem::replace(&mut entries[i], entry)),
        None => {
            entries.push(entry);
            None
        }
    }
}
