use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{Backend, BackendError, ObjectInfo, ObjectKind, ObjectWriter};

/// Default deadline for a single backend operation
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the listing channel; bounds how far a listing runs ahead of
/// its consumer
const LIST_BUFFER: usize = 128;

/// Directory holding in-flight writes before finalise renames them
const TMP_DIR: &str = "tmp";

/// An object store rooted in a local directory.
///
/// Layout:
///
/// ```text
/// <root>/
///   keys/<hex>
///   data/<xx>/<hex>
///   trees/<xx>/<hex>
///   snapshots/<hex>
///   locks/<hex>
///   tmp/<unique>
/// ```
///
/// Writes land in `tmp/` under a unique name and are renamed into place on
/// finalise; a crash mid-write leaves only the temporary file, never a
/// partial named object.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    timeout: Duration,
}

impl LocalBackend {
    /// Create the repository layout at `root` and open it
    pub async fn create(root: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let root = root.into();
        for kind in ObjectKind::ALL {
            fs::create_dir_all(root.join(kind.dirname())).await?;
        }
        fs::create_dir_all(root.join(TMP_DIR)).await?;
        debug!(root = %root.display(), "created backend layout");
        Ok(LocalBackend {
            root,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Open an existing repository directory
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let root = root.into();
        for kind in ObjectKind::ALL {
            let dir = root.join(kind.dirname());
            if !fs::try_exists(&dir).await? {
                return Err(BackendError::Io(std::io::Error::new(
                    ErrorKind::NotFound,
                    format!("not a repository: missing {}", dir.display()),
                )));
            }
        }
        Ok(LocalBackend {
            root,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Override the per-operation deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn object_path(&self, kind: ObjectKind, name: &str) -> PathBuf {
        let dir = self.root.join(kind.dirname());
        if kind.sharded() && name.len() >= 2 {
            dir.join(&name[..2]).join(name)
        } else {
            dir.join(name)
        }
    }

    async fn deadline<F, T>(&self, op: &'static str, fut: F) -> Result<T, BackendError>
    where
        F: Future<Output = std::io::Result<T>>,
    {
        deadline(self.timeout, op, fut).await
    }
}

async fn deadline<F, T>(timeout: Duration, op: &'static str, fut: F) -> Result<T, BackendError>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(BackendError::Timeout { op }),
    }
}

fn not_found(err: std::io::Error, kind: ObjectKind, name: &str) -> BackendError {
    if err.kind() == ErrorKind::NotFound {
        BackendError::NotFound {
            kind,
            name: name.to_string(),
        }
    } else {
        BackendError::Io(err)
    }
}

/// True for file names that look like object names (64 hex chars)
fn is_object_name(name: &str) -> bool {
    name.len() == 64 && name.chars().all(|c| c.is_ascii_hexdigit())
}

#[async_trait]
impl Backend for LocalBackend {
    async fn create(&self) -> Result<Box<dyn ObjectWriter>, BackendError> {
        let tmp = self
            .root
            .join(TMP_DIR)
            .join(Uuid::new_v4().simple().to_string());
        let file = self.deadline("create", fs::File::create(&tmp)).await?;
        Ok(Box::new(LocalWriter {
            backend: self.clone(),
            tmp,
            file: Some(file),
        }))
    }

    async fn read(&self, kind: ObjectKind, name: &str) -> Result<Bytes, BackendError> {
        let path = self.object_path(kind, name);
        let data = self
            .deadline("read", fs::read(&path))
            .await
            .map_err(|err| match err {
                BackendError::Io(io) => not_found(io, kind, name),
                other => other,
            })?;
        Ok(Bytes::from(data))
    }

    async fn list(&self, kind: ObjectKind) -> Result<mpsc::Receiver<String>, BackendError> {
        let (tx, rx) = mpsc::channel(LIST_BUFFER);
        let dir = self.root.join(kind.dirname());
        let sharded = kind.sharded();

        tokio::spawn(async move {
            // a failed send means the consumer hung up; stop reading
            if sharded {
                let Ok(mut shards) = fs::read_dir(&dir).await else {
                    return;
                };
                while let Ok(Some(shard)) = shards.next_entry().await {
                    let Ok(mut entries) = fs::read_dir(shard.path()).await else {
                        continue;
                    };
                    while let Ok(Some(entry)) = entries.next_entry().await {
                        if let Some(name) = entry.file_name().to_str() {
                            if is_object_name(name)
                                && tx.send(name.to_string()).await.is_err()
                            {
                                return;
                            }
                        }
                    }
                }
            } else {
                let Ok(mut entries) = fs::read_dir(&dir).await else {
                    return;
                };
                while let Ok(Some(entry)) = entries.next_entry().await {
                    if let Some(name) = entry.file_name().to_str() {
                        if is_object_name(name) && tx.send(name.to_string()).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn stat(&self, kind: ObjectKind, name: &str) -> Result<ObjectInfo, BackendError> {
        let path = self.object_path(kind, name);
        let meta = self
            .deadline("stat", fs::metadata(&path))
            .await
            .map_err(|err| match err {
                BackendError::Io(io) => not_found(io, kind, name),
                other => other,
            })?;
        Ok(ObjectInfo { size: meta.len() })
    }

    async fn contains(&self, kind: ObjectKind, name: &str) -> Result<bool, BackendError> {
        let path = self.object_path(kind, name);
        self.deadline("stat", fs::try_exists(&path)).await
    }

    async fn remove(&self, kind: ObjectKind, name: &str) -> Result<(), BackendError> {
        let path = self.object_path(kind, name);
        self.deadline("remove", fs::remove_file(&path))
            .await
            .map_err(|err| match err {
                BackendError::Io(io) => not_found(io, kind, name),
                other => other,
            })
    }
}

struct LocalWriter {
    backend: LocalBackend,
    tmp: PathBuf,
    file: Option<fs::File>,
}

impl LocalWriter {
    async fn cleanup(tmp: &Path) {
        if let Err(err) = fs::remove_file(tmp).await {
            if err.kind() != ErrorKind::NotFound {
                trace!(tmp = %tmp.display(), error = %err, "leaving temporary object behind");
            }
        }
    }
}

#[async_trait]
impl ObjectWriter for LocalWriter {
    async fn write(&mut self, buf: &[u8]) -> Result<(), BackendError> {
        let file = self.file.as_mut().ok_or(BackendError::WriterClosed)?;
        deadline(self.backend.timeout, "write", file.write_all(buf)).await
    }

    async fn finalize(
        mut self: Box<Self>,
        kind: ObjectKind,
        name: &str,
    ) -> Result<(), BackendError> {
        let timeout = self.backend.timeout;
        let result = async {
            let file = self.file.take().ok_or(BackendError::WriterClosed)?;
            deadline(timeout, "sync", file.sync_all()).await?;
            drop(file);

            let path = self.backend.object_path(kind, name);
            if let Some(parent) = path.parent() {
                deadline(timeout, "finalize", fs::create_dir_all(parent)).await?;
            }
            if deadline(timeout, "finalize", fs::try_exists(&path)).await? {
                // content-addressed: an existing object has identical bytes
                Self::cleanup(&self.tmp).await;
                return Ok(());
            }
            deadline(timeout, "finalize", fs::rename(&self.tmp, &path)).await
        }
        .await;

        if result.is_err() {
            Self::cleanup(&self.tmp).await;
        }
        result
    }

    async fn discard(mut self: Box<Self>) -> Result<(), BackendError> {
        self.file.take();
        Self::cleanup(&self.tmp).await;
        Ok(())
    }
}
