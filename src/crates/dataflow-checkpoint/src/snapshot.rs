//! Checkpointable objects and their field snapshots
//!
//! Operators opt state into checkpointing by implementing [`Checkpointable`]. The trait
//! exposes exactly the fields that must survive a rollback; everything else on the type
//! is considered reconstructible and is left untouched by a restore.
//!
//! ```rust
//! use dataflow_checkpoint::{Checkpointable, FieldMap, Result};
//! use dataflow_checkpoint::snapshot::{field, take_field};
//!
//! #[derive(Default)]
//! struct WordCounter {
//!     counts: std::collections::HashMap<String, u64>,
//!     emitted: u64,
//! }
//!
//! impl Checkpointable for WordCounter {
//!     fn field_names(&self) -> Vec<&'static str> {
//!         vec!["counts", "emitted"]
//!     }
//!
//!     fn snapshot_fields(&self) -> Result<FieldMap> {
//!         let mut fields = FieldMap::new();
//!         fields.insert("counts".into(), field(&self.counts)?);
//!         fields.insert("emitted".into(), field(&self.emitted)?);
//!         Ok(fields)
//!     }
//!
//!     fn restore_fields(&mut self, mut fields: FieldMap) -> Result<()> {
//!         self.counts = take_field(&mut fields, "counts")?;
//!         self.emitted = take_field(&mut fields, "emitted")?;
//!         Ok(())
//!     }
//! }
//! ```

use crate::error::{CheckpointError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field name to captured value, ordered by field name
pub type FieldMap = BTreeMap<String, serde_json::Value>;

/// State that can be captured into and restored from an [`ObjectSnapshot`]
///
/// Implementations must be fully reconstructible from the fields they report: any state
/// not covered by [`field_names`](Checkpointable::field_names) must either be derivable
/// or be re-acquired in [`after_restore`](Checkpointable::after_restore).
pub trait Checkpointable: Send {
    /// Names of the checkpointable fields, including those inherited from wrapped state
    fn field_names(&self) -> Vec<&'static str>;

    /// Capture the current value of every checkpointable field
    fn snapshot_fields(&self) -> Result<FieldMap>;

    /// Overwrite every checkpointable field with the given values
    fn restore_fields(&mut self, fields: FieldMap) -> Result<()>;

    /// Called immediately before the fields are overwritten
    fn before_restore(&mut self) {}

    /// Called immediately after the fields are overwritten
    fn after_restore(&mut self) {}
}

/// Serialize a field value for inclusion in a [`FieldMap`]
///
/// A value that cannot be represented is a precondition violation: the type opted a field
/// into checkpointing that can never be persisted.
pub fn field<T: Serialize + ?Sized>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| {
        CheckpointError::Precondition(format!("checkpointable field is not serializable: {}", e))
    })
}

/// Remove and deserialize a field from a [`FieldMap`]
pub fn take_field<T: DeserializeOwned>(fields: &mut FieldMap, name: &str) -> Result<T> {
    let value = fields.remove(name).ok_or_else(|| {
        CheckpointError::Restoration(format!("snapshot has no value for field '{}'", name))
    })?;
    Ok(serde_json::from_value(value)?)
}

/// Immutable capture of one object's checkpointable fields
///
/// Equality is value-based: two snapshots are equal when they hold the same field names
/// with equal values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    fields: FieldMap,
}

impl ObjectSnapshot {
    /// Wrap an already captured field map
    pub fn new(fields: FieldMap) -> Self {
        Self { fields }
    }

    /// Capture the checkpointable fields of a live object
    ///
    /// Fails when the captured keys differ from the names the object declares.
    pub fn take(key: &str, target: &dyn Checkpointable) -> Result<Self> {
        let fields = target.snapshot_fields()?;

        let mut expected: Vec<String> = target.field_names().iter().map(|s| s.to_string()).collect();
        expected.sort();
        expected.dedup();
        let actual: Vec<String> = fields.keys().cloned().collect();

        if expected != actual {
            return Err(CheckpointError::FieldMismatch {
                object: key.to_string(),
                expected,
                actual,
            });
        }

        Ok(Self { fields })
    }

    /// Overwrite the target's checkpointable fields, running its restore hooks around it
    pub fn restore_into(&self, target: &mut dyn Checkpointable) -> Result<()> {
        target.before_restore();
        target.restore_fields(self.fields.clone())?;
        target.after_restore();
        Ok(())
    }

    /// Captured field values
    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Captured value of a single field
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
