//! The restorer: materialises a snapshot back into a directory tree.
//!
//! Directories, regular files and symlinks are recreated with mode,
//! ownership and timestamps applied best-effort. Device nodes and fifos
//! need privileged platform calls and are reported and skipped; sockets
//! are never recreated.

use std::fs::{self, FileTimes, Permissions};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::SystemTime;

use tracing::{debug, warn};

use cairn::id::Id;
use cairn::prelude::*;
use cairn::repo::RepositoryError;

/// Errors raised while restoring a snapshot
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("no blob for id {0} while restoring")]
    MissingBlob(Id),
    #[error("writing {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> RestoreError + '_ {
    move |source| RestoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Writes the contents of a snapshot into a target directory
pub struct Restorer<'a> {
    repo: &'a Repository,
}

impl<'a> Restorer<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Restorer { repo }
    }

    /// Recreate the snapshot's tree underneath `target`
    pub async fn restore(&self, snapshot: &Snapshot, target: &Path) -> Result<(), RestoreError> {
        fs::create_dir_all(target).map_err(io_err(target))?;
        let root = snapshot.tree(self.repo).await?;
        self.restore_tree(&root, target).await
    }

    fn restore_tree<'b>(
        &'b self,
        tree: &'b Tree,
        target: &'b Path,
    ) -> Pin<Box<dyn Future<Output = Result<(), RestoreError>> + Send + 'b>> {
        Box::pin(async move {
            for node in &tree.nodes {
                let path = target.join(&node.name);
                match &node.kind {
                    NodeKind::Dir { subtree } => {
                        fs::create_dir_all(&path).map_err(io_err(&path))?;
                        let blob = self
                            .repo
                            .index()
                            .find(subtree)
                            .ok_or(RestoreError::MissingBlob(*subtree))?;
                        let sub = Tree::load(self.repo, &blob).await?;
                        self.restore_tree(&sub, &path).await?;
                        // children first, then the directory's own metadata
                        apply_metadata(node, &path);
                    }
                    NodeKind::File { content } => {
                        self.restore_file(content, &path).await?;
                        apply_metadata(node, &path);
                    }
                    NodeKind::Symlink { linktarget } => {
                        #[cfg(unix)]
                        std::os::unix::fs::symlink(linktarget, &path).map_err(io_err(&path))?;
                        #[cfg(unix)]
                        if let Err(err) =
                            std::os::unix::fs::lchown(&path, Some(node.uid), Some(node.gid))
                        {
                            debug!(path = %path.display(), error = %err, "keeping current symlink ownership");
                        }
                    }
                    NodeKind::Dev { .. } | NodeKind::Chardev { .. } | NodeKind::Fifo => {
                        warn!(path = %path.display(), "skipping device or fifo entry");
                    }
                    NodeKind::Socket => {
                        // sockets only make sense while their process lives
                    }
                }
            }
            Ok(())
        })
    }

    /// Concatenate a file's content blobs, in order, into `path`
    async fn restore_file(&self, content: &[Id], path: &Path) -> Result<(), RestoreError> {
        let mut file = fs::File::create(path).map_err(io_err(path))?;
        for id in content {
            let blob = self
                .repo
                .index()
                .find(id)
                .ok_or(RestoreError::MissingBlob(*id))?;
            let data = self.repo.load(ObjectKind::Data, &blob).await?;
            file.write_all(&data).map_err(io_err(path))?;
        }
        Ok(())
    }
}

/// Apply mode, ownership and timestamps; failures downgrade to log lines
/// because restores commonly run unprivileged
fn apply_metadata(node: &Node, path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if node.mode != 0 {
            if let Err(err) = fs::set_permissions(path, Permissions::from_mode(node.mode)) {
                warn!(path = %path.display(), error = %err, "failed to set mode");
            }
        }
        if let Err(err) = std::os::unix::fs::chown(path, Some(node.uid), Some(node.gid)) {
            debug!(path = %path.display(), error = %err, "keeping current ownership");
        }
    }

    let mut times = FileTimes::new();
    let mut have_times = false;
    if let Some(accessed) = node.access_time {
        times = times.set_accessed(SystemTime::from(accessed));
        have_times = true;
    }
    if let Some(modified) = node.mod_time {
        times = times.set_modified(SystemTime::from(modified));
        have_times = true;
    }
    if have_times {
        match fs::File::options().read(true).open(path) {
            Ok(file) => {
                if let Err(err) = file.set_times(times) {
                    warn!(path = %path.display(), error = %err, "failed to set timestamps");
                }
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to reopen for timestamps");
            }
        }
    }
}
