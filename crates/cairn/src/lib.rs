/**
 * Abstract object store underneath everything else.
 *  Objects are keyed by (kind, hex name); writes stream
 *  through a temp object and become visible atomically
 *  on finalise. Ships a local directory backend and an
 *  in-memory one.
 */
pub mod backend;
/**
 * Content-defined chunking: the rolling-hash splitter
 *  that turns file bytes into dedup-friendly chunks.
 */
pub mod chunker;
/**
 * Authenticated encryption of stored objects, plus the
 *  password-wrapped key files the master key lives in.
 */
pub mod crypto;
mod host;
/**
 * 32-byte content identifiers: hex text form, ordering,
 *  constant-time equality.
 */
pub mod id;
/**
 * The blob index mapping plaintext ids to stored blob
 *  descriptors. Shared form for the repository, plain
 *  form carried inside trees.
 */
pub mod index;
/**
 * The repository server: save/load with encryption and
 *  dedup over a backend, JSON object round-trips,
 *  listings, stats.
 */
pub mod repo;
/**
 * Snapshot root pointers into the tree DAG.
 */
pub mod snapshot;
/**
 * Trees and nodes: the serialised directory model.
 */
pub mod tree;

pub mod prelude {
    pub use crate::backend::{find_name, Backend, LocalBackend, MemoryBackend, ObjectKind};
    pub use crate::chunker::{Chunker, ChunkerParams};
    pub use crate::crypto::{KeyFile, MasterKey};
    pub use crate::id::Id;
    pub use crate::index::{Blob, BlobMap};
    pub use crate::repo::{Repository, RepositoryError};
    pub use crate::snapshot::Snapshot;
    pub use crate::tree::{Node, NodeKind, Tree};
}
