use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use super::{Backend, BackendError, ObjectInfo, ObjectKind, ObjectWriter};

type ObjectMap = HashMap<(ObjectKind, String), Bytes>;

/// An in-memory object store for tests and ephemeral repositories.
///
/// Clones share the same underlying map. All contents are lost on drop.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    objects: Arc<Mutex<ObjectMap>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects of a kind
    pub async fn len(&self, kind: ObjectKind) -> usize {
        self.objects
            .lock()
            .await
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }

    /// Replace an object's bytes in place. Test hook for corruption
    /// scenarios; a real backend has no such operation.
    pub async fn tamper(
        &self,
        kind: ObjectKind,
        name: &str,
        mutate: impl FnOnce(&mut Vec<u8>),
    ) -> Result<(), BackendError> {
        let mut objects = self.objects.lock().await;
        let key = (kind, name.to_string());
        let Some(data) = objects.get(&key) else {
            return Err(BackendError::NotFound {
                kind,
                name: name.to_string(),
            });
        };
        let mut bytes = data.to_vec();
        mutate(&mut bytes);
        objects.insert(key, Bytes::from(bytes));
        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn create(&self) -> Result<Box<dyn ObjectWriter>, BackendError> {
        Ok(Box::new(MemoryWriter {
            objects: Arc::clone(&self.objects),
            buf: Vec::new(),
        }))
    }

    async fn read(&self, kind: ObjectKind, name: &str) -> Result<Bytes, BackendError> {
        let objects = self.objects.lock().await;
        objects
            .get(&(kind, name.to_string()))
            .cloned()
            .ok_or_else(|| BackendError::NotFound {
                kind,
                name: name.to_string(),
            })
    }

    async fn list(&self, kind: ObjectKind) -> Result<mpsc::Receiver<String>, BackendError> {
        let names: Vec<String> = {
            let objects = self.objects.lock().await;
            objects
                .keys()
                .filter(|(k, _)| *k == kind)
                .map(|(_, name)| name.clone())
                .collect()
        };

        let (tx, rx) = mpsc::channel(names.len().max(1));
        for name in names {
            // capacity covers every name, and nobody else holds the sender
            tx.try_send(name).expect("listing channel has capacity");
        }
        Ok(rx)
    }

    async fn stat(&self, kind: ObjectKind, name: &str) -> Result<ObjectInfo, BackendError> {
        let objects = self.objects.lock().await;
        objects
            .get(&(kind, name.to_string()))
            .map(|data| ObjectInfo {
                size: data.len() as u64,
            })
            .ok_or_else(|| BackendError::NotFound {
                kind,
                name: name.to_string(),
            })
    }

    async fn contains(&self, kind: ObjectKind, name: &str) -> Result<bool, BackendError> {
        let objects = self.objects.lock().await;
        Ok(objects.contains_key(&(kind, name.to_string())))
    }

    async fn remove(&self, kind: ObjectKind, name: &str) -> Result<(), BackendError> {
        let mut objects = self.objects.lock().await;
        objects
            .remove(&(kind, name.to_string()))
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound {
                kind,
                name: name.to_string(),
            })
    }
}

struct MemoryWriter {
    objects: Arc<Mutex<ObjectMap>>,
    buf: Vec<u8>,
}

#[async_trait]
impl ObjectWriter for MemoryWriter {
    async fn write(&mut self, buf: &[u8]) -> Result<(), BackendError> {
        self.buf.extend_from_slice(buf);
        Ok(())
    }

    async fn finalize(self: Box<Self>, kind: ObjectKind, name: &str) -> Result<(), BackendError> {
        let buf = self.buf;
        let mut objects = self.objects.lock().await;
        // concurrent finalise of the same name stores identical bytes
        objects
            .entry((kind, name.to_string()))
            .or_insert_with(|| Bytes::from(buf));
        Ok(())
    }

    async fn discard(self: Box<Self>) -> Result<(), BackendError> {
        Ok(())
    }
}
