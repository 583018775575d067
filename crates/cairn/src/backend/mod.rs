//! Abstract object store underneath the repository.
//!
//! A backend stores opaque objects keyed by `(kind, hex name)`. Writes go
//! through a temporary object that is atomically finalised under its name;
//! nothing beyond that rename is assumed of the transport. Listings are
//! lazy: the consumer drops the receiver to cancel, and the producer stops
//! promptly.

mod local;
mod memory;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

pub use local::LocalBackend;
pub use memory::MemoryBackend;

/// The kinds of objects a repository stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Data,
    Tree,
    Snapshot,
    Key,
    Lock,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 5] = [
        ObjectKind::Data,
        ObjectKind::Tree,
        ObjectKind::Snapshot,
        ObjectKind::Key,
        ObjectKind::Lock,
    ];

    /// Directory name on disk-shaped backends
    pub fn dirname(&self) -> &'static str {
        match self {
            ObjectKind::Data => "data",
            ObjectKind::Tree => "trees",
            ObjectKind::Snapshot => "snapshots",
            ObjectKind::Key => "keys",
            ObjectKind::Lock => "locks",
        }
    }

    /// Whether objects of this kind are sharded by the first name byte.
    /// Data and tree directories grow without bound; the shard caps their
    /// fan-out.
    pub fn sharded(&self) -> bool {
        matches!(self, ObjectKind::Data | ObjectKind::Tree)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Data => "data",
            ObjectKind::Tree => "tree",
            ObjectKind::Snapshot => "snapshot",
            ObjectKind::Key => "key",
            ObjectKind::Lock => "lock",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by backend implementations
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{kind} object {name:?} not found")]
    NotFound { kind: ObjectKind, name: String },
    #[error("prefix {prefix:?} matches more than one object")]
    Ambiguous { prefix: String },
    #[error("backend operation {op:?} timed out")]
    Timeout { op: &'static str },
    #[error("writer already finalized")]
    WriterClosed,
}

/// Metadata about a stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    pub size: u64,
}

/// An in-flight object write.
///
/// Created by [`Backend::create`]; bytes are streamed with `write` and the
/// object appears under its final name only when `finalize` succeeds. Every
/// writer must end in exactly one of `finalize` or `discard`.
#[async_trait]
pub trait ObjectWriter: Send {
    async fn write(&mut self, buf: &[u8]) -> Result<(), BackendError>;

    /// Atomically publish the object under `(kind, name)`. Finalising a name
    /// that already exists is a no-op: content addressing guarantees the
    /// bytes are identical.
    async fn finalize(self: Box<Self>, kind: ObjectKind, name: &str) -> Result<(), BackendError>;

    /// Drop the temporary object without publishing it
    async fn discard(self: Box<Self>) -> Result<(), BackendError>;
}

/// An object store keyed by `(kind, hexadecimal name)`.
///
/// Implementations must support concurrent reads and concurrent writes to
/// distinct objects; concurrent finalise of the same name must converge on
/// one object. Operations observe the implementation's deadline and fail
/// with [`BackendError::Timeout`] on expiry; retry policy belongs to the
/// caller.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Open a temporary object for writing
    async fn create(&self) -> Result<Box<dyn ObjectWriter>, BackendError>;

    /// Read a whole object
    async fn read(&self, kind: ObjectKind, name: &str) -> Result<Bytes, BackendError>;

    /// List object names of a kind, lazily. Dropping the receiver cancels
    /// the listing and releases backend resources promptly.
    async fn list(&self, kind: ObjectKind) -> Result<mpsc::Receiver<String>, BackendError>;

    /// Metadata for a named object
    async fn stat(&self, kind: ObjectKind, name: &str) -> Result<ObjectInfo, BackendError>;

    /// Whether a named object exists
    async fn contains(&self, kind: ObjectKind, name: &str) -> Result<bool, BackendError>;

    /// Remove a named object
    async fn remove(&self, kind: ObjectKind, name: &str) -> Result<(), BackendError>;
}

/// Resolve a name prefix against the backend listing.
///
/// Returns the unique full name starting with `prefix`, or
/// [`BackendError::Ambiguous`] / [`BackendError::NotFound`] when the prefix
/// matches several or no objects.
pub async fn find_name(
    backend: &dyn Backend,
    kind: ObjectKind,
    prefix: &str,
) -> Result<String, BackendError> {
    let mut names = backend.list(kind).await?;
    let mut found: Option<String> = None;

    while let Some(name) = names.recv().await {
        if !name.starts_with(prefix) {
            continue;
        }
        if found.is_some() {
            return Err(BackendError::Ambiguous {
                prefix: prefix.to_string(),
            });
        }
        found = Some(name);
    }

    found.ok_or_else(|| BackendError::NotFound {
        kind,
        name: prefix.to_string(),
    })
}
