//! Control-plane and in-band payloads
//!
//! Transport is out of scope; these are the serde shapes exchanged between instances and
//! the coordinator.

use crate::checkpoint::{CheckpointId, Metadata};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Message-log sequence number per peer instance
pub type SequenceNumbers = BTreeMap<String, u64>;

/// Sent by an instance after taking a checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointTakenPayload {
    pub checkpoint_id: CheckpointId,
    pub origin_instance: String,
    /// Last sequence number sent to each downstream peer when the checkpoint was taken
    #[serde(default)]
    pub sequence_numbers: SequenceNumbers,
    pub metadata: Metadata,
}

/// Coordinator asks an instance to roll back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRestoreRequestPayload {
    pub checkpoint_id: CheckpointId,
}

/// Instance reports a finished rollback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRestoreCompletionPayload {
    pub instance_name: String,
    pub checkpoint_id: CheckpointId,
}

/// Piggybacked on data messages: the sender's latest checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointDependencyPayload {
    pub checkpoint_id: CheckpointId,
}

/// Coordinator allows an instance to drop logged messages up to a sequence number
///
/// `instance_name` is the receiver whose checkpoint made the messages unnecessary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPruneRequestPayload {
    pub instance_name: String,
    pub sequence_number: u64,
}

/// A prune request and the instance that should act on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressedPruneRequest {
    pub target: String,
    pub request: LogPruneRequestPayload,
}

/// Any control-plane payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlPayload {
    CheckpointTaken(CheckpointTakenPayload),
    RestoreRequest(CheckpointRestoreRequestPayload),
    RestoreCompletion(CheckpointRestoreCompletionPayload),
    LogPrune(LogPruneRequestPayload),
}

impl From<CheckpointTakenPayload> for ControlPayload {
    fn from(payload: CheckpointTakenPayload) -> Self {
        ControlPayload::CheckpointTaken(payload)
    }
}

impl From<CheckpointRestoreRequestPayload> for ControlPayload {
    fn from(payload: CheckpointRestoreRequestPayload) -> Self {
        ControlPayload::RestoreRequest(payload)
    }
}

impl From<CheckpointRestoreCompletionPayload> for ControlPayload {
    fn from(payload: CheckpointRestoreCompletionPayload) -> Self {
        ControlPayload::RestoreCompletion(payload)
    }
}

impl From<LogPruneRequestPayload> for ControlPayload {
    fn from(payload: LogPruneRequestPayload) -> Self {
        ControlPayload::LogPrune(payload)
    }
}
