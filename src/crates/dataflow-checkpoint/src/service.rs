//! Per-instance checkpoint service
//!
//! [`CheckpointService`] ties one instance's [`StateRegistry`], [`DependencyTracker`] and
//! processing gate to a shared [`CheckpointStorage`] provider, and exposes every
//! checkpoint operation the data and control layers call.
//!
//! # Taking a checkpoint
//!
//! ```text
//!   pause gate ──▶ snapshot registry ──▶ build metadata ──▶ persist ──▶ advertise id
//!       │              (sync)          (tracker + previous)  (storage)   (last id,
//!       │                                                                dependency tag)
//!       └──────────────────────── gate released on return ─────────────────────┘
//! ```
//!
//! # Restoring
//!
//! Restore pauses the same gate, loads the checkpoint, overwrites the registered objects,
//! then rewinds the local checkpoint chain and the dependency tracker to what the
//! restored checkpoint recorded. The next checkpoint therefore chains onto the restored
//! one rather than onto the abandoned future.

use crate::checkpoint::{Checkpoint, CheckpointId, Metadata};
use crate::config::CheckpointingConfig;
use crate::dependency::DependencyTracker;
use crate::error::{CheckpointError, Result};
use crate::gate::{GateToken, ProcessingGate};
use crate::messages::{
    AddressedPruneRequest, CheckpointDependencyPayload, CheckpointRestoreCompletionPayload,
    CheckpointRestoreRequestPayload, CheckpointTakenPayload, LogPruneRequestPayload,
    SequenceNumbers,
};
use crate::recovery::{RecoveryLine, RecoveryLineCalculator};
use crate::registry::{SharedObject, StateRegistry};
use crate::storage::CheckpointStorage;
use crate::topology::Topology;
use chrono::{DateTime, Duration, Utc};
use futures::TryStreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Own checkpoint ids remembered locally when nothing else is configured
pub const DEFAULT_RETAINED_CHECKPOINTS: usize = 16;

/// Checkpointing entry point for one instance
pub struct CheckpointService {
    instance_name: String,
    registry: StateRegistry,
    tracker: DependencyTracker,
    storage: Arc<dyn CheckpointStorage>,
    gate: ProcessingGate,
    /// Own checkpoint chain, newest last
    history: VecDeque<CheckpointId>,
    retained: usize,
    last_created_at: Option<DateTime<Utc>>,
}

impl CheckpointService {
    pub fn new(instance_name: impl Into<String>, storage: Arc<dyn CheckpointStorage>) -> Self {
        Self {
            instance_name: instance_name.into(),
            registry: StateRegistry::new(),
            tracker: DependencyTracker::new(),
            storage,
            gate: ProcessingGate::new(),
            history: VecDeque::new(),
            retained: DEFAULT_RETAINED_CHECKPOINTS,
            last_created_at: None,
        }
    }

    /// Build a service and its storage provider from configuration
    pub async fn from_config(config: &CheckpointingConfig) -> Result<Self> {
        config.validate()?;
        let storage = config.storage.open().await?;
        Ok(Self::new(config.instance_name.clone(), storage)
            .with_retained_checkpoints(config.retained_checkpoints))
    }

    /// Share a gate with the instance's data-processing loop
    pub fn with_gate(mut self, gate: ProcessingGate) -> Self {
        self.gate = gate;
        self
    }

    /// Number of own checkpoint ids remembered locally (at least two)
    pub fn with_retained_checkpoints(mut self, retained: usize) -> Self {
        self.retained = retained.max(2);
        self
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn gate(&self) -> &ProcessingGate {
        &self.gate
    }

    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &DependencyTracker {
        &self.tracker
    }

    pub fn storage(&self) -> &Arc<dyn CheckpointStorage> {
        &self.storage
    }

    /// Opt an object into checkpointing
    pub fn register_object(&mut self, key: impl Into<String>, object: SharedObject) -> Result<()> {
        self.registry.add(key, object)
    }

    /// Record the latest checkpoint id seen from an upstream peer
    pub fn update_dependency(&mut self, origin: impl Into<String>, checkpoint_id: CheckpointId) {
        self.tracker.update_dependency(origin, checkpoint_id);
    }

    /// Feed a dependency tag that arrived on a data message from `origin`
    ///
    /// Tags carrying the nil id (sender has not checkpointed yet) are ignored.
    pub fn receive_dependency_tag(&mut self, origin: &str, tag: &CheckpointDependencyPayload) {
        if tag.checkpoint_id.is_nil() {
            return;
        }
        self.tracker.update_dependency(origin, tag.checkpoint_id);
    }

    /// Tag to attach to outgoing data messages, once a checkpoint exists
    pub fn dependency_tag(&self) -> Option<CheckpointDependencyPayload> {
        self.history
            .back()
            .map(|id| CheckpointDependencyPayload { checkpoint_id: *id })
    }

    /// Newest own checkpoint, nil if none
    pub fn last_checkpoint_id(&self) -> CheckpointId {
        self.history.back().copied().unwrap_or_default()
    }

    /// Own checkpoint before the newest, nil if none
    pub fn second_last_checkpoint_id(&self) -> CheckpointId {
        self.history
            .len()
            .checked_sub(2)
            .and_then(|i| self.history.get(i))
            .copied()
            .unwrap_or_default()
    }

    /// Take and persist a checkpoint of every registered object
    ///
    /// Waits for in-flight work holding the gate; must not be called while the caller
    /// itself holds it.
    pub async fn take_checkpoint(&mut self) -> Result<CheckpointId> {
        let paused = self.gate.pause().await;
        self.take_checkpoint_paused(&paused).await
    }

    /// [`take_checkpoint`](Self::take_checkpoint) for a caller that already paused the gate
    pub async fn take_checkpoint_paused(&mut self, paused: &GateToken) -> Result<CheckpointId> {
        self.check_paused(paused)?;

        let snapshots = self.registry.take_snapshots()?;
        let created_at = self.next_timestamp();
        let metadata = Metadata::new(
            CheckpointId::new(),
            self.instance_name.clone(),
            created_at,
            self.last_checkpoint_id(),
            self.tracker.dependencies(),
        )?;
        let checkpoint = Checkpoint::new(metadata, snapshots);
        let id = checkpoint.id();

        self.storage.store(&checkpoint).await?;
        self.last_created_at = Some(created_at);
        self.remember(id);

        info!(
            "Instance {} took checkpoint {} ({} objects, {} dependencies)",
            self.instance_name,
            id,
            checkpoint.len(),
            checkpoint.metadata().dependencies.len()
        );
        Ok(id)
    }

    /// Restore every registered object from a stored checkpoint
    ///
    /// Fails with [`CheckpointError::NotFound`] for an unknown id and with
    /// [`CheckpointError::Restoration`] if the checkpoint does not cover the registry.
    pub async fn restore_checkpoint(&mut self, checkpoint_id: CheckpointId) -> Result<()> {
        let paused = self.gate.pause().await;
        self.restore_checkpoint_paused(checkpoint_id, &paused).await
    }

    /// [`restore_checkpoint`](Self::restore_checkpoint) for a caller that already paused
    /// the gate
    pub async fn restore_checkpoint_paused(
        &mut self,
        checkpoint_id: CheckpointId,
        paused: &GateToken,
    ) -> Result<()> {
        self.check_paused(paused)?;

        let checkpoint = self.storage.get(checkpoint_id).await?;
        let metadata = checkpoint.metadata();
        if metadata.instance_name != self.instance_name {
            return Err(CheckpointError::Restoration(format!(
                "checkpoint {} belongs to {}, not {}",
                checkpoint_id, metadata.instance_name, self.instance_name
            )));
        }

        self.registry.restore(&checkpoint)?;

        let peers = metadata
            .peer_dependencies()
            .map(|(name, id)| (name.clone(), *id))
            .collect();
        self.tracker.overwrite_all(peers);

        match self.history.iter().position(|id| *id == checkpoint_id) {
            Some(position) => self.history.truncate(position + 1),
            None => {
                self.history.clear();
                let previous = metadata.previous();
                if !previous.is_nil() {
                    self.history.push_back(previous);
                }
                self.history.push_back(checkpoint_id);
            }
        }
        if self.last_created_at.map_or(true, |last| last < metadata.created_at) {
            self.last_created_at = Some(metadata.created_at);
        }

        info!(
            "Instance {} restored checkpoint {}",
            self.instance_name, checkpoint_id
        );
        Ok(())
    }

    /// Handle a coordinator's restore request and build the completion reply
    pub async fn handle_restore_request(
        &mut self,
        request: CheckpointRestoreRequestPayload,
    ) -> Result<CheckpointRestoreCompletionPayload> {
        let paused = self.gate.pause().await;
        self.handle_restore_request_paused(request, &paused).await
    }

    pub async fn handle_restore_request_paused(
        &mut self,
        request: CheckpointRestoreRequestPayload,
        paused: &GateToken,
    ) -> Result<CheckpointRestoreCompletionPayload> {
        self.restore_checkpoint_paused(request.checkpoint_id, paused)
            .await?;
        Ok(CheckpointRestoreCompletionPayload {
            instance_name: self.instance_name.clone(),
            checkpoint_id: request.checkpoint_id,
        })
    }

    /// Build the notice advertising a checkpoint this instance took
    pub async fn checkpoint_taken_notice(
        &self,
        checkpoint_id: CheckpointId,
        sequence_numbers: SequenceNumbers,
    ) -> Result<CheckpointTakenPayload> {
        let checkpoint = self.storage.get(checkpoint_id).await?;
        let metadata = checkpoint.metadata().clone();
        if metadata.instance_name != self.instance_name {
            return Err(CheckpointError::Precondition(format!(
                "checkpoint {} was taken by {}, not {}",
                checkpoint_id, metadata.instance_name, self.instance_name
            )));
        }
        Ok(CheckpointTakenPayload {
            checkpoint_id,
            origin_instance: self.instance_name.clone(),
            sequence_numbers,
            metadata,
        })
    }

    /// Compute the recovery line over every checkpoint in storage
    pub async fn calculate_recovery_line<I, S, T>(
        &self,
        failed: I,
        topology: &T,
    ) -> Result<RecoveryLine>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        T: Topology + ?Sized,
    {
        let metadata = self.storage.all_metadata().await?;
        debug!("Calculating recovery line over {} checkpoints", metadata.len());
        RecoveryLineCalculator::new(metadata, topology)?.calculate(failed)
    }

    /// Delete this instance's checkpoints that are older than its entry in `line`
    ///
    /// Returns the number of checkpoints deleted. Nothing is deleted when the line does
    /// not select a checkpoint for this instance.
    pub async fn collect_garbage_after_recovery_line(&mut self, line: &RecoveryLine) -> Result<usize> {
        let Some(keep) = line.checkpoint_for(&self.instance_name) else {
            return Ok(0);
        };

        let own: Vec<Metadata> = self
            .storage
            .list_metadata(Some(self.instance_name.as_str()))
            .await?
            .try_collect()
            .await?;
        let Some(kept) = own.iter().find(|m| m.id == keep) else {
            warn!(
                "Recovery line checkpoint {} of {} is not in storage, skipping garbage collection",
                keep, self.instance_name
            );
            return Ok(0);
        };
        let cutoff = (kept.created_at, kept.id);

        let mut deleted = 0;
        for m in own.iter().filter(|m| (m.created_at, m.id) < cutoff) {
            if self.storage.delete(m.id).await? {
                deleted += 1;
            }
            self.history.retain(|id| *id != m.id);
        }

        info!(
            "Instance {} collected {} checkpoints older than {}",
            self.instance_name, deleted, keep
        );
        Ok(deleted)
    }

    /// Turn a recovery line into log-prune requests
    ///
    /// `sequence_numbers` holds, per checkpoint, the sequence numbers its owner had sent
    /// to each downstream peer. Messages up to those numbers will never be replayed once
    /// the owner's checkpoint is on a worst-case recovery line, so each peer may prune its
    /// log of them.
    pub fn prune_requests(
        line: &RecoveryLine,
        sequence_numbers: &HashMap<CheckpointId, SequenceNumbers>,
    ) -> Vec<AddressedPruneRequest> {
        let mut requests = Vec::new();
        for (instance, checkpoint_id) in line.iter() {
            let Some(per_target) = sequence_numbers.get(checkpoint_id) else {
                continue;
            };
            for (target, sequence_number) in per_target {
                requests.push(AddressedPruneRequest {
                    target: target.clone(),
                    request: LogPruneRequestPayload {
                        instance_name: instance.clone(),
                        sequence_number: *sequence_number,
                    },
                });
            }
        }
        requests
    }

    /// Remove every checkpoint from storage and forget the local chain
    pub async fn clear_checkpoint_storage(&mut self) -> Result<()> {
        self.storage.clear().await?;
        self.history.clear();
        info!("Instance {} cleared checkpoint storage", self.instance_name);
        Ok(())
    }

    fn check_paused(&self, paused: &GateToken) -> Result<()> {
        if self.gate.issued(paused) {
            Ok(())
        } else {
            Err(CheckpointError::Precondition(format!(
                "gate token does not pause instance {}",
                self.instance_name
            )))
        }
    }

    /// Wall-clock time, bumped past the previous checkpoint if the clock has not advanced
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.last_created_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        }
    }

    fn remember(&mut self, id: CheckpointId) {
        self.history.push_back(id);
        while self.history.len() > self.retained {
            self.history.pop_front();
        }
    }
}

impl std::fmt::Debug for CheckpointService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointService")
            .field("instance_name", &self.instance_name)
            .field("registry", &self.registry)
            .field("last_checkpoint_id", &self.last_checkpoint_id())
            .finish()
    }
}
