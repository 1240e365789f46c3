//! Volatile checkpoint storage

use super::{CheckpointStorage, MetadataStream};
use crate::checkpoint::{Checkpoint, CheckpointId, Metadata};
use crate::error::{CheckpointError, Result};
use crate::serializer::{JsonSerializer, SerializerProtocol};
use async_trait::async_trait;
use futures::stream;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Serialized checkpoint plus its metadata, kept decoded for listing
#[derive(Debug, Clone)]
struct StoredCheckpoint {
    metadata: Metadata,
    bytes: Vec<u8>,
}

type Store = Arc<RwLock<HashMap<CheckpointId, StoredCheckpoint>>>;

/// In-memory checkpoint storage
///
/// Checkpoints are kept serialized, so a retrieved checkpoint never aliases the live
/// snapshot it was stored from. Clones share the same store.
///
/// # Example
///
/// ```rust
/// use dataflow_checkpoint::InMemoryCheckpointStorage;
///
/// #[tokio::main]
/// async fn main() {
///     let storage = InMemoryCheckpointStorage::new();
///     assert_eq!(storage.count().await, 0);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryCheckpointStorage<S = JsonSerializer> {
    store: Store,
    serializer: S,
}

impl InMemoryCheckpointStorage {
    pub fn new() -> Self {
        Self::with_serializer(JsonSerializer)
    }
}

impl<S: SerializerProtocol> InMemoryCheckpointStorage<S> {
    pub fn with_serializer(serializer: S) -> Self {
        Self {
            store: Arc::new(RwLock::new(HashMap::new())),
            serializer,
        }
    }

    /// Number of stored checkpoints
    pub async fn count(&self) -> usize {
        self.store.read().await.len()
    }

    /// Total serialized size of every stored checkpoint
    pub async fn size_in_bytes(&self) -> usize {
        self.store
            .read()
            .await
            .values()
            .map(|stored| stored.bytes.len())
            .sum()
    }
}

impl Default for InMemoryCheckpointStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: SerializerProtocol> CheckpointStorage for InMemoryCheckpointStorage<S> {
    async fn store(&self, checkpoint: &Checkpoint) -> Result<()> {
        checkpoint.metadata().validate()?;
        let bytes = self.serializer.dumps(checkpoint)?;
        let mut store = self.store.write().await;
        if store.contains_key(&checkpoint.id()) {
            return Err(CheckpointError::AlreadyExists(checkpoint.id()));
        }
        store.insert(
            checkpoint.id(),
            StoredCheckpoint {
                metadata: checkpoint.metadata().clone(),
                bytes,
            },
        );
        Ok(())
    }

    async fn retrieve(&self, id: CheckpointId) -> Result<Option<Checkpoint>> {
        let store = self.store.read().await;
        match store.get(&id) {
            Some(stored) => Ok(Some(self.serializer.loads(&stored.bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: CheckpointId) -> Result<bool> {
        Ok(self.store.write().await.remove(&id).is_some())
    }

    async fn list_metadata(&self, instance: Option<&str>) -> Result<MetadataStream> {
        let store = self.store.read().await;
        let results: Vec<Result<Metadata>> = store
            .values()
            .filter(|stored| instance.map_or(true, |name| stored.metadata.instance_name == name))
            .map(|stored| Ok(stored.metadata.clone()))
            .collect();

        Ok(Box::pin(stream::iter(results)))
    }

    async fn clear(&self) -> Result<()> {
        self.store.write().await.clear();
        Ok(())
    }
}
