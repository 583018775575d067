//! The in-memory blob index.
//!
//! Maps plaintext ids to their stored blob descriptors. One instance lives
//! inside the repository as the dedup and resolution authority; plain
//! [`BlobMap`]s also ride inside every tree so a reader can resolve child
//! references without re-listing the backend.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::id::Id;

/// Errors raised by index operations
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// A second descriptor for an id disagreed with the stored one. The
    /// index and the backend no longer describe the same repository; this is
    /// fatal and must reach the top-level caller.
    #[error("index entry for {id} disagrees with an existing descriptor")]
    Inconsistent { id: Id },
}

/// Descriptor of one stored object.
///
/// `id` names the pre-encryption bytes and is the dedup key; `storage_id`
/// names the ciphertext and doubles as the backend object name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub id: Id,
    pub storage_id: Id,
    pub size: u64,
}

/// A set of blob descriptors ordered by plaintext id.
///
/// Serialises as a JSON list. Inserting a descriptor that is already present
/// is a no-op; inserting a conflicting descriptor for a known id fails with
/// [`IndexError::Inconsistent`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Blob>", into = "Vec<Blob>")]
pub struct BlobMap {
    blobs: Vec<Blob>,
}

impl BlobMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, blob: Blob) -> Result<(), IndexError> {
        match self.blobs.binary_search_by(|have| have.id.cmp(&blob.id)) {
            Ok(i) if self.blobs[i] == blob => Ok(()),
            Ok(_) => Err(IndexError::Inconsistent { id: blob.id }),
            Err(i) => {
                self.blobs.insert(i, blob);
                Ok(())
            }
        }
    }

    pub fn find(&self, id: &Id) -> Option<&Blob> {
        self.blobs
            .binary_search_by(|have| have.id.cmp(id))
            .ok()
            .map(|i| &self.blobs[i])
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.find(id).is_some()
    }

    /// Fold every descriptor of `other` into this map
    pub fn merge(&mut self, other: &BlobMap) -> Result<(), IndexError> {
        for blob in &other.blobs {
            self.insert(*blob)?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Blob> {
        self.blobs.iter()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl From<Vec<Blob>> for BlobMap {
    fn from(mut blobs: Vec<Blob>) -> Self {
        blobs.sort_by(|a, b| a.id.cmp(&b.id));
        BlobMap { blobs }
    }
}

impl From<BlobMap> for Vec<Blob> {
    fn from(map: BlobMap) -> Self {
        map.blobs
    }
}

/// The repository's shared index: a [`BlobMap`] behind a read-mostly lock.
///
/// Lookups take the shared lock, inserts the exclusive one. Racing inserts
/// of the same descriptor are harmless; a conflicting insert surfaces
/// [`IndexError::Inconsistent`] exactly as in the unsynchronised map.
#[derive(Debug, Default)]
pub struct Index {
    inner: RwLock<BlobMap>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, blob: Blob) -> Result<(), IndexError> {
        self.inner.write().expect("index lock poisoned").insert(blob)
    }

    pub fn find(&self, id: &Id) -> Option<Blob> {
        self.inner
            .read()
            .expect("index lock poisoned")
            .find(id)
            .copied()
    }

    pub fn merge(&self, other: &BlobMap) -> Result<(), IndexError> {
        self.inner.write().expect("index lock poisoned").merge(other)
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("index lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().expect("index lock poisoned").is_empty()
    }
}
