//! # dataflow-checkpoint
//!
//! Uncoordinated checkpointing and recovery for the stateful instances of a streaming
//! dataflow.
//!
//! Every instance checkpoints on its own schedule. Causality between checkpoints is
//! tracked in-band: each data message carries its sender's latest checkpoint id, and the
//! next checkpoint the receiver takes records it as a dependency. After failures, the
//! [`RecoveryLineCalculator`] walks those dependencies to find the newest combination of
//! checkpoints that is free of orphan messages, tolerating cyclic graphs and avoiding
//! unnecessary cascading rollback.
//!
//! # Components
//!
//! ```text
//! ┌──────────────────────────── one instance ─────────────────────────────┐
//! │                                                                        │
//! │  operators ──register──▶ StateRegistry ──snapshots──┐                  │
//! │                                                     ▼                  │
//! │  data msgs ──tags──▶ DependencyTracker ──deps──▶ Checkpoint+Metadata   │
//! │                                                     │                  │
//! │  ProcessingGate ◀──pause── CheckpointService ───────┤ store            │
//! │       ▲                          ▲                  ▼                  │
//! │  data loop (enter)        CheckpointHandle    CheckpointStorage ◀──┐   │
//! └──────────────────────────────────────────────────────────────────────┼─┘
//!                                                                        │
//!   coordinator:  all Metadata + InstanceGraph + failed names            │
//!                 ──▶ RecoveryLineCalculator ──▶ RecoveryLine ──restore──┘
//! ```
//!
//! - [`StateRegistry`] / [`Checkpointable`] / [`ObjectSnapshot`] - what gets captured
//! - [`Checkpoint`] / [`Metadata`] / [`CheckpointId`] - immutable checkpoint values
//! - [`DependencyTracker`] - newest known checkpoint per upstream peer
//! - [`RecoveryLineCalculator`] / [`RecoveryLine`] - consistent rollback targets
//! - [`CheckpointService`] - per-instance operations, driven through [`spawn_instance`]
//! - [`CheckpointStorage`] - persistence providers (memory, directory)
//! - [`messages`] - control-plane payloads
//!
//! # Quick Start
//!
//! ```rust
//! use dataflow_checkpoint::snapshot::{field, take_field};
//! use dataflow_checkpoint::registry::shared;
//! use dataflow_checkpoint::{
//!     CheckpointService, Checkpointable, FieldMap, InMemoryCheckpointStorage, InstanceGraph,
//!     Result,
//! };
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct Running {
//!     total: i64,
//! }
//!
//! impl Checkpointable for Running {
//!     fn field_names(&self) -> Vec<&'static str> {
//!         vec!["total"]
//!     }
//!
//!     fn snapshot_fields(&self) -> Result<FieldMap> {
//!         let mut fields = FieldMap::new();
//!         fields.insert("total".into(), field(&self.total)?);
//!         Ok(fields)
//!     }
//!
//!     fn restore_fields(&mut self, mut fields: FieldMap) -> Result<()> {
//!         self.total = take_field(&mut fields, "total")?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let storage = Arc::new(InMemoryCheckpointStorage::new());
//!     let mut service = CheckpointService::new("sum-0", storage);
//!
//!     let running = shared(Running::default());
//!     service.register_object("running", running.clone())?;
//!
//!     running.lock().total = 42;
//!     let id = service.take_checkpoint().await?;
//!     running.lock().total = -1;
//!
//!     let graph = InstanceGraph::new().with_instance("sum-0");
//!     let line = service.calculate_recovery_line(["sum-0"], &graph).await?;
//!     assert_eq!(line.checkpoint_for("sum-0"), Some(id));
//!
//!     service.restore_checkpoint(id).await?;
//!     assert_eq!(running.lock().total, 42);
//!     Ok(())
//! }
//! ```

pub mod actor;
pub mod checkpoint;
pub mod config;
pub mod dependency;
pub mod error;
pub mod gate;
pub mod messages;
pub mod recovery;
pub mod registry;
pub mod serializer;
pub mod service;
pub mod snapshot;
pub mod storage;
pub mod topology;

// Re-export main types
pub use actor::{spawn_instance, CheckpointHandle};
pub use checkpoint::{Checkpoint, CheckpointId, Dependencies, Metadata};
pub use config::{CheckpointingConfig, StorageBackend, DEFAULT_ENV_PREFIX};
pub use dependency::DependencyTracker;
pub use error::{CheckpointError, Result};
pub use gate::{GateToken, ProcessingGate};
pub use messages::{
    AddressedPruneRequest, CheckpointDependencyPayload, CheckpointRestoreCompletionPayload,
    CheckpointRestoreRequestPayload, CheckpointTakenPayload, ControlPayload,
    LogPruneRequestPayload, SequenceNumbers,
};
pub use recovery::{RecoveryLine, RecoveryLineCalculator};
pub use registry::{SharedObject, StateRegistry};
pub use serializer::{JsonSerializer, PrettyJsonSerializer, SerializerProtocol};
pub use service::CheckpointService;
pub use snapshot::{Checkpointable, FieldMap, ObjectSnapshot};
pub use storage::{
    CheckpointStorage, FileCheckpointStorage, InMemoryCheckpointStorage, MetadataStream,
};
pub use topology::{Connection, InstanceGraph, Topology};
