//! Core checkpoint data structures
//!
//! This module defines the three immutable values that flow through the checkpointing
//! subsystem: **[`CheckpointId`]**, **[`Metadata`]** and **[`Checkpoint`]**.
//!
//! # Overview
//!
//! - **Identity** - every checkpoint carries a random 128-bit id; the nil id is the
//!   "no prior checkpoint" sentinel
//! - **Causality** - [`Metadata::dependencies`] records, per peer instance, the newest
//!   checkpoint of that peer whose subsequent messages this checkpoint has consumed
//! - **Self chain** - the owning instance always appears in its own dependency map,
//!   pointing at its previous checkpoint
//! - **Snapshots** - a [`Checkpoint`] bundles the [`ObjectSnapshot`]s of every object
//!   registered at the time it was taken
//!
//! # Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Checkpoint                                           │
//! │  ┌────────────────────────────────────────────────┐  │
//! │  │  Metadata                                      │  │
//! │  │    id:            4f1c…                        │  │
//! │  │    instance_name: "map-1"                      │  │
//! │  │    created_at:    2026-10-18T09:00:00Z         │  │
//! │  │    dependencies:  { "map-1": 9ab2… (previous), │  │
//! │  │                     "source-0": 71de… }        │  │
//! │  └────────────────────────────────────────────────┘  │
//! │  snapshots: { "word-counts": ObjectSnapshot, … }     │
//! └──────────────────────────────────────────────────────┘
//! ```

use crate::error::{CheckpointError, Result};
use crate::snapshot::ObjectSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Globally unique checkpoint identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(Uuid);

impl CheckpointId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The "no checkpoint" sentinel
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CheckpointId {
    fn default() -> Self {
        Self::nil()
    }
}

impl From<Uuid> for CheckpointId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for CheckpointId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Peer instance name to the checkpoint id depended upon
pub type Dependencies = HashMap<String, CheckpointId>;

/// Identity and causal dependencies of one checkpoint
///
/// Fields are public so metadata can be gathered from storage and scenario files, which
/// bypass [`Metadata::new`]. [`Metadata::validate`] is therefore the guard: storage
/// providers check it on write and the recovery calculator on construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Unique checkpoint id
    pub id: CheckpointId,

    /// Name of the instance that took the checkpoint
    pub instance_name: String,

    /// Wall-clock time at which the snapshot was captured
    pub created_at: DateTime<Utc>,

    /// Peer checkpoints this checkpoint depends on, including the self-entry
    pub dependencies: Dependencies,
}

impl Metadata {
    /// Build metadata for a new checkpoint
    ///
    /// `previous` becomes the self-dependency (pass [`CheckpointId::nil`] for an
    /// instance's first checkpoint); any self-entry in `peer_dependencies` is replaced.
    pub fn new(
        id: CheckpointId,
        instance_name: impl Into<String>,
        created_at: DateTime<Utc>,
        previous: CheckpointId,
        peer_dependencies: Dependencies,
    ) -> Result<Self> {
        let instance_name = instance_name.into();
        let mut dependencies = peer_dependencies;
        dependencies.insert(instance_name.clone(), previous);

        let metadata = Self {
            id,
            instance_name,
            created_at,
            dependencies,
        };
        metadata.validate()?;
        Ok(metadata)
    }

    /// Check the invariants that deserialized metadata might violate
    pub fn validate(&self) -> Result<()> {
        if self.instance_name.is_empty() {
            return Err(CheckpointError::Precondition(format!(
                "checkpoint {} has an empty instance name",
                self.id
            )));
        }
        if self.created_at == DateTime::<Utc>::default() {
            return Err(CheckpointError::Precondition(format!(
                "checkpoint {} has a default creation timestamp",
                self.id
            )));
        }
        if !self.dependencies.contains_key(&self.instance_name) {
            return Err(CheckpointError::Precondition(format!(
                "checkpoint {} lacks a self-dependency for {}",
                self.id, self.instance_name
            )));
        }
        Ok(())
    }

    /// Id of the owning instance's previous checkpoint (nil for the first one)
    pub fn previous(&self) -> CheckpointId {
        self.dependencies
            .get(&self.instance_name)
            .copied()
            .unwrap_or_default()
    }

    /// Dependencies on other instances, excluding the self-entry
    pub fn peer_dependencies(&self) -> impl Iterator<Item = (&String, &CheckpointId)> {
        self.dependencies
            .iter()
            .filter(move |(name, _)| **name != self.instance_name)
    }
}

/// Immutable bundle of object snapshots for one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    metadata: Metadata,
    snapshots: BTreeMap<String, ObjectSnapshot>,
}

impl Checkpoint {
    pub fn new(metadata: Metadata, snapshots: BTreeMap<String, ObjectSnapshot>) -> Self {
        Self {
            metadata,
            snapshots,
        }
    }

    pub fn id(&self) -> CheckpointId {
        self.metadata.id
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Registry keys captured by this checkpoint, in order
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.snapshots.keys()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.snapshots.contains_key(key)
    }

    pub fn snapshot(&self, key: &str) -> Option<&ObjectSnapshot> {
        self.snapshots.get(key)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
