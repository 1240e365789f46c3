//! Checkpoint persistence
//!
//! This module defines **[`CheckpointStorage`]**, the persistence provider contract, and
//! ships two providers:
//!
//! - [`InMemoryCheckpointStorage`] - volatile, for tests and single-process deployments
//! - [`FileCheckpointStorage`] - one document per checkpoint in a shared directory
//!
//! Storage is content-addressed by [`CheckpointId`] and write-once: storing an id twice is
//! an error rather than an overwrite. Recovery reads only metadata, so providers expose
//! a metadata listing that does not have to materialize snapshots.
//!
//! ```text
//! ┌──────────────────┐  store / delete   ┌───────────────────────────┐
//! │ CheckpointService│ ────────────────▶ │ impl CheckpointStorage     │
//! │  (one instance)  │ ◀──────────────── │  • InMemoryCheckpointStorage│
//! └──────────────────┘  retrieve         │  • FileCheckpointStorage   │
//!                                        └─────────────┬─────────────┘
//!                      list_metadata                   │
//! ┌──────────────────┐ ◀───────────────────────────────┘
//! │ RecoveryLine-     │
//! │ Calculator        │
//! └──────────────────┘
//! ```

mod file;
mod memory;

pub use file::FileCheckpointStorage;
pub use memory::InMemoryCheckpointStorage;

use crate::checkpoint::{Checkpoint, CheckpointId, Metadata};
use crate::error::{CheckpointError, Result};
use async_trait::async_trait;
use futures::stream::{Stream, TryStreamExt};
use std::pin::Pin;

/// Async stream of stored checkpoint metadata
pub type MetadataStream = Pin<Box<dyn Stream<Item = Result<Metadata>> + Send + 'static>>;

/// Persistence provider for checkpoints
///
/// Implementations must be thread-safe; the same provider is typically shared by every
/// instance of a deployment.
#[async_trait]
pub trait CheckpointStorage: Send + Sync {
    /// Persist a checkpoint
    ///
    /// Fails with [`CheckpointError::AlreadyExists`] if the id is already stored.
    async fn store(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Load a checkpoint by id
    async fn retrieve(&self, id: CheckpointId) -> Result<Option<Checkpoint>>;

    /// Load a checkpoint that must exist
    async fn get(&self, id: CheckpointId) -> Result<Checkpoint> {
        self.retrieve(id)
            .await?
            .ok_or(CheckpointError::NotFound(id))
    }

    /// Remove a checkpoint, returning whether it was present
    async fn delete(&self, id: CheckpointId) -> Result<bool>;

    /// Stream the metadata of stored checkpoints, optionally for one instance only
    async fn list_metadata(&self, instance: Option<&str>) -> Result<MetadataStream>;

    /// Collect the metadata of every stored checkpoint
    async fn all_metadata(&self) -> Result<Vec<Metadata>> {
        self.list_metadata(None).await?.try_collect().await
    }

    /// Remove every stored checkpoint
    async fn clear(&self) -> Result<()>;
}
