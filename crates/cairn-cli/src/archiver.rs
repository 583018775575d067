//! The archiver: walks filesystem trees and writes them into a repository.
//!
//! Directories become trees, files are chunked into data blobs, and a run
//! ends with one snapshot object naming the root. Every tree carries the
//! blob descriptors its nodes reference, so readers can traverse without
//! backend listings.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tracing::{debug, info, warn};

use cairn::id::Id;
use cairn::index::{Blob, IndexError};
use cairn::prelude::*;
use cairn::repo::RepositoryError;
use cairn::tree::TreeError;

/// Errors raised while archiving a filesystem tree
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("tree error: {0}")]
    Tree(#[from] TreeError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot derive an entry name from {0:?}")]
    NoFileName(PathBuf),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Walks paths into a repository, producing one snapshot per run
pub struct Archiver<'a> {
    repo: &'a Repository,
}

impl<'a> Archiver<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Archiver { repo }
    }

    /// Archive `paths` and store a snapshot referencing them.
    ///
    /// Returns the new snapshot's storage name. Each given path becomes one
    /// entry of the snapshot's root tree.
    pub async fn snapshot(
        &self,
        paths: &[PathBuf],
        parent: Option<Id>,
    ) -> Result<Id, ArchiveError> {
        let mut root = Tree::new();

        for path in paths {
            let name = entry_name(path)?;
            let meta = std::fs::symlink_metadata(path).map_err(io_err(path))?;
            let node = self.archive_entry(&name, path, &meta, &mut root).await?;
            root.insert(node)?;
            info!(path = %path.display(), "archived");
        }

        let root_blob = root.save(self.repo).await?;
        let path_strings = paths.iter().map(|p| p.display().to_string()).collect();
        let mut snapshot = Snapshot::new(path_strings, &root_blob);
        if let Some(parent) = parent {
            snapshot = snapshot.with_parent(parent);
        }
        Ok(snapshot.save(self.repo).await?)
    }

    /// Build the node for one directory entry, storing whatever it
    /// references into the repository and recording the blobs in `tree`
    async fn archive_entry(
        &self,
        name: &str,
        path: &Path,
        meta: &std::fs::Metadata,
        tree: &mut Tree,
    ) -> Result<Node, ArchiveError> {
        let mut node = Node::from_metadata(name, meta);
        match node.kind {
            NodeKind::Dir { .. } => {
                let blob = self.archive_dir(path).await?;
                node.kind = NodeKind::Dir { subtree: blob.id };
                tree.map.insert(blob)?;
            }
            NodeKind::File { .. } => {
                let content = self.save_file(path, tree).await?;
                node.kind = NodeKind::File { content };
            }
            NodeKind::Symlink { .. } => {
                let target = std::fs::read_link(path).map_err(io_err(path))?;
                node.kind = NodeKind::Symlink {
                    linktarget: target.to_string_lossy().into_owned(),
                };
            }
            // device numbers and the like come straight from the metadata
            _ => {}
        }
        Ok(node)
    }

    /// Recursively archive a directory, returning the blob of its tree
    fn archive_dir<'b>(
        &'b self,
        path: &'b Path,
    ) -> Pin<Box<dyn Future<Output = Result<Blob, ArchiveError>> + Send + 'b>> {
        Box::pin(async move {
            let mut tree = Tree::new();

            let mut entries = Vec::new();
            let dir = std::fs::read_dir(path).map_err(io_err(path))?;
            for entry in dir {
                let entry = entry.map_err(io_err(path))?;
                entries.push(entry.path());
            }
            entries.sort();

            for entry_path in &entries {
                let name = entry_name(entry_path)?;
                let meta = match std::fs::symlink_metadata(entry_path) {
                    Ok(meta) => meta,
                    Err(err) => {
                        // record the failure in the snapshot and move on
                        warn!(path = %entry_path.display(), error = %err, "skipping unreadable entry");
                        let mut node = Node::new(
                            name,
                            NodeKind::File {
                                content: Vec::new(),
                            },
                        );
                        node.error = err.to_string();
                        tree.insert(node)?;
                        continue;
                    }
                };
                let node = self.archive_entry(&name, entry_path, &meta, &mut tree).await?;
                tree.insert(node)?;
            }

            let blob = tree.save(self.repo).await?;
            debug!(path = %path.display(), tree = %blob.id, entries = entries.len(), "archived directory");
            Ok(blob)
        })
    }

    /// Chunk a file's bytes and save every chunk, returning the ordered
    /// content ids
    async fn save_file(&self, path: &Path, tree: &mut Tree) -> Result<Vec<Id>, ArchiveError> {
        let file = std::fs::File::open(path).map_err(io_err(path))?;
        let mut chunker = Chunker::new(self.repo.chunker_params(), file);

        let mut content = Vec::new();
        while let Some(chunk) = chunker.next_chunk().map_err(io_err(path))? {
            let blob = self.repo.save(ObjectKind::Data, &chunk.data).await?;
            content.push(blob.id);
            tree.map.insert(blob)?;
        }
        Ok(content)
    }
}

/// The file name of a path, lossily decoded for the node name
fn entry_name(path: &Path) -> Result<String, ArchiveError> {
    let name = path
        .file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy();
    if name.is_empty() {
        return Err(ArchiveError::NoFileName(path.to_path_buf()));
    }
    Ok(name.into_owned())
}
