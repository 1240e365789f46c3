//! Directory-backed checkpoint storage
//!
//! Each checkpoint is written to `<dir>/<id>.<ext>`. Writes go to a temporary file first
//! and are renamed into place, so a reader never observes a half-written checkpoint.

use super::{CheckpointStorage, MetadataStream};
use crate::checkpoint::{Checkpoint, CheckpointId, Metadata};
use crate::error::{CheckpointError, Result};
use crate::serializer::{JsonSerializer, SerializerProtocol};
use async_trait::async_trait;
use futures::stream;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Only the metadata half of a stored checkpoint
#[derive(Deserialize)]
struct MetadataOnly {
    metadata: Metadata,
}

/// Checkpoint storage in a local or shared directory
#[derive(Debug, Clone)]
pub struct FileCheckpointStorage<S = JsonSerializer> {
    dir: PathBuf,
    serializer: S,
}

impl FileCheckpointStorage {
    /// Open (and create if needed) a checkpoint directory
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_serializer(dir, JsonSerializer).await
    }
}

impl<S: SerializerProtocol> FileCheckpointStorage<S> {
    pub async fn open_with_serializer(dir: impl Into<PathBuf>, serializer: S) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        debug!("Checkpoint directory: {}", dir.display());
        Ok(Self { dir, serializer })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: CheckpointId) -> PathBuf {
        self.dir.join(format!("{}.{}", id, self.serializer.extension()))
    }

    /// Paths of every stored checkpoint
    async fn checkpoint_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_checkpoint = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| ext == self.serializer.extension());
            if is_checkpoint {
                files.push(path);
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl<S: SerializerProtocol> CheckpointStorage for FileCheckpointStorage<S> {
    async fn store(&self, checkpoint: &Checkpoint) -> Result<()> {
        checkpoint.metadata().validate()?;
        let path = self.path_for(checkpoint.id());
        if fs::try_exists(&path).await? {
            return Err(CheckpointError::AlreadyExists(checkpoint.id()));
        }

        let bytes = self.serializer.dumps(checkpoint)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &path).await?;
        debug!("Stored checkpoint {} ({} bytes)", checkpoint.id(), bytes.len());
        Ok(())
    }

    async fn retrieve(&self, id: CheckpointId) -> Result<Option<Checkpoint>> {
        match fs::read(self.path_for(id)).await {
            Ok(bytes) => Ok(Some(self.serializer.loads(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: CheckpointId) -> Result<bool> {
        match fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_metadata(&self, instance: Option<&str>) -> Result<MetadataStream> {
        let mut results = Vec::new();
        for path in self.checkpoint_files().await? {
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                // Deleted concurrently
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match self.serializer.loads::<MetadataOnly>(&bytes) {
                Ok(MetadataOnly { metadata }) => {
                    if instance.map_or(true, |name| metadata.instance_name == name) {
                        results.push(Ok(metadata));
                    }
                }
                Err(e) => {
                    warn!("Unreadable checkpoint file {}: {}", path.display(), e);
                    results.push(Err(CheckpointError::Storage(format!(
                        "unreadable checkpoint file {}: {}",
                        path.display(),
                        e
                    ))));
                }
            }
        }
        Ok(Box::pin(stream::iter(results)))
    }

    async fn clear(&self) -> Result<()> {
        for path in self.checkpoint_files().await? {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
