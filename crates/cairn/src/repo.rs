//! The repository server: orchestrates the backend, the master key, and the
//! blob index.
//!
//! One instance is shared by however many workers a consumer runs; the
//! repository is the synchronisation boundary. The backend handle and the
//! active key are owned exclusively here, and the index is the only shared
//! mutable state.

use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::backend::{Backend, BackendError, ObjectKind};
use crate::chunker::ChunkerParams;
use crate::crypto::{search_key, CryptoError, KdfParams, KeyError, KeyFile, MasterKey};
use crate::id::Id;
use crate::index::{Blob, Index, IndexError};

/// Errors surfaced by repository operations
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("no master key installed")]
    KeyNotSet,
    #[error("{kind} object {id} failed integrity verification after decryption")]
    Integrity { kind: ObjectKind, id: Id },
    #[error("streamed data digested to {actual}, expected {expected}")]
    DigestMismatch { expected: Id, actual: Id },
    #[error("no blob for id {id} in the index")]
    BlobNotFound { id: Id },
    #[error("encoding object: {0}")]
    Json(#[from] serde_json::Error),
    #[error("decoding {kind} object {id}: {source}")]
    Serialization {
        kind: ObjectKind,
        id: Id,
        source: serde_json::Error,
    },
}

/// Per-kind object counts and total stored bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub data_count: u64,
    pub tree_count: u64,
    pub snapshot_count: u64,
    pub key_count: u64,
    pub lock_count: u64,
    pub total_bytes: u64,
}

/// A content-addressed, encrypted object store over a backend.
///
/// All persisted payloads flow through here: [`save`](Repository::save)
/// encrypts and deduplicates, [`load`](Repository::load) decrypts and
/// verifies. The chunking parameters are fixed when the repository is
/// opened and stay read-only for its lifetime.
pub struct Repository {
    backend: Arc<dyn Backend>,
    key: RwLock<Option<Arc<MasterKey>>>,
    index: Index,
    chunker_params: ChunkerParams,
}

impl Repository {
    /// Wrap a backend; no key is installed yet
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_chunker_params(backend, ChunkerParams::default())
    }

    pub fn with_chunker_params(backend: Arc<dyn Backend>, params: ChunkerParams) -> Self {
        Repository {
            backend,
            key: RwLock::new(None),
            index: Index::new(),
            chunker_params: params,
        }
    }

    /// Initialise a fresh repository: create the first key file for
    /// `password` and install the new master key
    pub async fn init(backend: Arc<dyn Backend>, password: &str) -> Result<Self, RepositoryError> {
        Self::init_with_params(backend, password, KdfParams::default()).await
    }

    pub async fn init_with_params(
        backend: Arc<dyn Backend>,
        password: &str,
        params: KdfParams,
    ) -> Result<Self, RepositoryError> {
        let (key_file, master) = KeyFile::create_with_params(password, params)?;
        let key_id = key_file.save(backend.as_ref()).await?;
        info!(key = %key_id, "initialised repository");

        let repo = Self::new(backend);
        repo.set_key(master);
        Ok(repo)
    }

    /// Open an existing repository, trying `password` against every stored
    /// key file
    pub async fn open(backend: Arc<dyn Backend>, password: &str) -> Result<Self, RepositoryError> {
        let (master, key_id) = search_key(backend.as_ref(), password).await?;
        debug!(key = %key_id, "unlocked repository");

        let repo = Self::new(backend);
        repo.set_key(master);
        Ok(repo)
    }

    /// Install the master key used by all subsequent encrypted operations
    pub fn set_key(&self, key: MasterKey) {
        *self.key.write().expect("key lock poisoned") = Some(Arc::new(key));
    }

    fn key(&self) -> Result<Arc<MasterKey>, RepositoryError> {
        self.key
            .read()
            .expect("key lock poisoned")
            .clone()
            .ok_or(RepositoryError::KeyNotSet)
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn chunker_params(&self) -> &ChunkerParams {
        &self.chunker_params
    }

    /// Encrypt and store a payload, returning its blob descriptor.
    ///
    /// Data payloads whose plaintext id is already indexed are not stored
    /// again; the cached descriptor comes back without backend traffic.
    pub async fn save(&self, kind: ObjectKind, data: &[u8]) -> Result<Blob, RepositoryError> {
        let id = Id::digest(data);
        self.save_with_id(kind, id, data).await
    }

    /// Streaming variant of [`save`](Repository::save) for payloads whose
    /// digest the caller precomputed. The stream is digested while being
    /// drained and must match `id`, otherwise nothing is stored and
    /// [`RepositoryError::DigestMismatch`] is returned.
    pub async fn save_from<R>(
        &self,
        kind: ObjectKind,
        id: Id,
        size: u64,
        mut reader: R,
    ) -> Result<Blob, RepositoryError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut data = Vec::with_capacity(size as usize);
        reader
            .read_to_end(&mut data)
            .await
            .map_err(BackendError::Io)?;

        let actual = Id::digest(&data);
        if actual != id {
            return Err(RepositoryError::DigestMismatch {
                expected: id,
                actual,
            });
        }

        self.save_with_id(kind, id, &data).await
    }

    async fn save_with_id(
        &self,
        kind: ObjectKind,
        id: Id,
        data: &[u8],
    ) -> Result<Blob, RepositoryError> {
        if kind == ObjectKind::Data {
            if let Some(blob) = self.index.find(&id) {
                trace!(id = %id, "dedup hit");
                return Ok(blob);
            }
        }

        let key = self.key()?;
        // convergent sealing: the nonce is a function of key and plaintext
        // id, so concurrent saves of the same bytes produce one object
        let nonce = key.derive_nonce(id.as_bytes());
        let ciphertext = key.seal_with_nonce(data, b"", nonce)?;
        let storage_id = Id::digest(&ciphertext);
        let blob = Blob {
            id,
            storage_id,
            size: data.len() as u64,
        };

        self.store_object(kind, &storage_id, &ciphertext).await?;
        self.index.insert(blob)?;

        trace!(kind = %kind, id = %id, storage = %storage_id, size = blob.size, "saved object");
        Ok(blob)
    }

    /// Write ciphertext under its storage name, finalising or discarding the
    /// writer on every path
    async fn store_object(
        &self,
        kind: ObjectKind,
        storage_id: &Id,
        ciphertext: &[u8],
    ) -> Result<(), RepositoryError> {
        let name = storage_id.to_hex();

        if self.backend.contains(kind, &name).await? {
            trace!(kind = %kind, storage = %name, "object already stored");
            return Ok(());
        }

        let mut writer = self.backend.create().await?;
        if let Err(err) = writer.write(ciphertext).await {
            writer.discard().await.ok();
            return Err(err.into());
        }
        writer.finalize(kind, &name).await?;
        Ok(())
    }

    /// Serialise a value as JSON plus a trailing newline, then save it.
    ///
    /// The newline is part of the digested bytes; round-trips through
    /// [`load_json_id`](Repository::load_json_id) are byte-identical.
    pub async fn save_json<T: Serialize>(
        &self,
        kind: ObjectKind,
        value: &T,
    ) -> Result<Blob, RepositoryError> {
        let mut data = serde_json::to_vec(value)?;
        data.push(b'\n');
        self.save(kind, &data).await
    }

    /// Read and decrypt a stored object, verifying that the plaintext
    /// digests back to the blob's id
    pub async fn load(&self, kind: ObjectKind, blob: &Blob) -> Result<Vec<u8>, RepositoryError> {
        let key = self.key()?;
        let ciphertext = self.backend.read(kind, &blob.storage_id.to_hex()).await?;
        let plain = key.decrypt(&ciphertext)?;

        if Id::digest(&plain) != blob.id {
            return Err(RepositoryError::Integrity { kind, id: blob.id });
        }
        Ok(plain)
    }

    /// Resolve a plaintext id through the index, load the object, strip the
    /// trailing newline, and decode it
    pub async fn load_json_id<T: DeserializeOwned>(
        &self,
        kind: ObjectKind,
        id: &Id,
    ) -> Result<T, RepositoryError> {
        let blob = self
            .index
            .find(id)
            .ok_or(RepositoryError::BlobNotFound { id: *id })?;
        let mut data = self.load(kind, &blob).await?;
        if data.last() == Some(&b'\n') {
            data.pop();
        }
        serde_json::from_slice(&data).map_err(|source| RepositoryError::Serialization {
            kind,
            id: *id,
            source,
        })
    }

    /// Read and decrypt an object by its backend name and decode it as JSON.
    ///
    /// Used for objects addressed by listing rather than through the index
    /// (snapshots above all); authenticity comes from the AEAD tag, there is
    /// no plaintext id to verify against.
    pub async fn load_json_name<T: DeserializeOwned>(
        &self,
        kind: ObjectKind,
        name: &str,
    ) -> Result<T, RepositoryError> {
        let key = self.key()?;
        let ciphertext = self.backend.read(kind, name).await?;
        let mut data = key.decrypt(&ciphertext)?;
        if data.last() == Some(&b'\n') {
            data.pop();
        }
        let id = Id::from_hex(name).unwrap_or_default();
        serde_json::from_slice(&data).map_err(|source| RepositoryError::Serialization {
            kind,
            id,
            source,
        })
    }

    /// Lazily list storage names of a kind; drop the receiver to cancel
    pub async fn list(&self, kind: ObjectKind) -> Result<mpsc::Receiver<String>, RepositoryError> {
        Ok(self.backend.list(kind).await?)
    }

    /// Count stored objects per kind and sum their sizes
    pub async fn stats(&self) -> Result<Stats, RepositoryError> {
        let mut stats = Stats::default();
        for kind in ObjectKind::ALL {
            let mut names = self.backend.list(kind).await?;
            while let Some(name) = names.recv().await {
                let count = match kind {
                    ObjectKind::Data => &mut stats.data_count,
                    ObjectKind::Tree => &mut stats.tree_count,
                    ObjectKind::Snapshot => &mut stats.snapshot_count,
                    ObjectKind::Key => &mut stats.key_count,
                    ObjectKind::Lock => &mut stats.lock_count,
                };
                *count += 1;
                stats.total_bytes += self.backend.stat(kind, &name).await?.size;
            }
        }
        Ok(stats)
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("indexed_blobs", &self.index.len())
            .finish()
    }
}
