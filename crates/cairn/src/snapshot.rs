//! Snapshot root pointers.
//!
//! A snapshot is the immutable entry point of one backup run: a timestamp,
//! the backed-up paths, and the id of the root tree. Snapshots are addressed
//! by their storage name, which is what listings and prefix resolution
//! operate on.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::backend::ObjectKind;
use crate::host;
use crate::id::Id;
use crate::index::{Blob, BlobMap};
use crate::repo::{Repository, RepositoryError};
use crate::tree::Tree;

/// The root pointer of one backup.
///
/// `tree` is the plaintext id of the root [`Tree`]; the accompanying `map`
/// carries that tree's blob descriptor so a fresh session can resolve the
/// root without any prior index state. `parent` is the storage name of the
/// snapshot this one superseded, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Id>,
    pub tree: Id,
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "BlobMap::is_empty")]
    pub map: BlobMap,
}

impl Snapshot {
    /// A snapshot of `paths` rooted at the tree described by `root`,
    /// stamped with the current time and host identity
    pub fn new(paths: Vec<String>, root: &Blob) -> Self {
        Snapshot {
            time: OffsetDateTime::now_utc(),
            parent: None,
            tree: root.id,
            paths,
            hostname: host::hostname(),
            username: host::username(),
            map: BlobMap::from(vec![*root]),
        }
    }

    pub fn with_parent(mut self, parent: Id) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Store the snapshot, returning its storage name
    pub async fn save(&self, repo: &Repository) -> Result<Id, RepositoryError> {
        let blob = repo.save_json(ObjectKind::Snapshot, self).await?;
        debug!(snapshot = %blob.storage_id, tree = %self.tree, "saved snapshot");
        Ok(blob.storage_id)
    }

    /// Load a snapshot by its storage name, merging its blob map into the
    /// repository index so the root tree resolves
    pub async fn load(repo: &Repository, name: &str) -> Result<Snapshot, RepositoryError> {
        let snapshot: Snapshot = repo.load_json_name(ObjectKind::Snapshot, name).await?;
        repo.index().merge(&snapshot.map)?;
        Ok(snapshot)
    }

    /// Load the root tree this snapshot points at
    pub async fn tree(&self, repo: &Repository) -> Result<Tree, RepositoryError> {
        let blob = self
            .map
            .find(&self.tree)
            .copied()
            .or_else(|| repo.index().find(&self.tree))
            .ok_or(RepositoryError::BlobNotFound { id: self.tree })?;
        Tree::load(repo, &blob).await
    }
}
