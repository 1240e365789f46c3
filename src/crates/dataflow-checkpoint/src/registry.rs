//! Registry of objects that opted into checkpointing
//!
//! The registry lives as long as the instance process. Operators register their state
//! once, keep their own handle to it, and keep mutating it between checkpoints; the
//! registry only ever touches the objects while the processing gate is held.

use crate::checkpoint::Checkpoint;
use crate::error::{CheckpointError, Result};
use crate::snapshot::{Checkpointable, ObjectSnapshot};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Handle to registered state, shared between the operator and the registry
pub type SharedObject = Arc<Mutex<dyn Checkpointable>>;

/// Wrap a value so it can be registered and still mutated by its owner
///
/// ```rust
/// use dataflow_checkpoint::registry::shared;
/// use dataflow_checkpoint::snapshot::{field, take_field};
/// use dataflow_checkpoint::{Checkpointable, FieldMap, Result, StateRegistry};
///
/// #[derive(Default)]
/// struct WordCounter {
///     emitted: u64,
/// }
///
/// impl Checkpointable for WordCounter {
///     fn field_names(&self) -> Vec<&'static str> {
///         vec!["emitted"]
///     }
///
///     fn snapshot_fields(&self) -> Result<FieldMap> {
///         let mut fields = FieldMap::new();
///         fields.insert("emitted".into(), field(&self.emitted)?);
///         Ok(fields)
///     }
///
///     fn restore_fields(&mut self, mut fields: FieldMap) -> Result<()> {
///         self.emitted = take_field(&mut fields, "emitted")?;
///         Ok(())
///     }
/// }
///
/// let mut registry = StateRegistry::new();
/// let counts = shared(WordCounter::default());
/// registry.add("word-counts", counts.clone())?;
/// counts.lock().emitted += 1;
///
/// let snapshots = registry.take_snapshots()?;
/// assert_eq!(snapshots["word-counts"].get("emitted"), Some(&serde_json::json!(1)));
/// # Ok::<(), dataflow_checkpoint::CheckpointError>(())
/// ```
pub fn shared<T: Checkpointable + 'static>(value: T) -> Arc<Mutex<T>> {
    Arc::new(Mutex::new(value))
}

/// Container for every checkpointable object of one instance
#[derive(Default)]
pub struct StateRegistry {
    objects: BTreeMap<String, SharedObject>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object under a unique key
    pub fn add(&mut self, key: impl Into<String>, object: SharedObject) -> Result<()> {
        let key = key.into();
        if self.objects.contains_key(&key) {
            return Err(CheckpointError::DuplicateRegistration(key));
        }
        debug!("Registered object for checkpointing: {}", key);
        self.objects.insert(key, object);
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    /// Registered keys, in order
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.objects.keys()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Snapshot every registered object
    pub fn take_snapshots(&self) -> Result<BTreeMap<String, ObjectSnapshot>> {
        let mut snapshots = BTreeMap::new();
        for (key, object) in &self.objects {
            let guard = object.lock();
            let snapshot = ObjectSnapshot::take(key, &*guard)?;
            snapshots.insert(key.clone(), snapshot);
        }
        Ok(snapshots)
    }

    /// Whether every registered key is present in the checkpoint
    pub fn can_restore(&self, checkpoint: &Checkpoint) -> bool {
        self.objects.keys().all(|key| checkpoint.contains_key(key))
    }

    /// Overwrite every registered object with its snapshot from the checkpoint
    ///
    /// A failure after the first object has been overwritten leaves the instance's state
    /// partially restored; the instance must be restarted.
    pub fn restore(&self, checkpoint: &Checkpoint) -> Result<()> {
        if !self.can_restore(checkpoint) {
            let missing: Vec<&str> = self
                .objects
                .keys()
                .filter(|key| !checkpoint.contains_key(key))
                .map(String::as_str)
                .collect();
            return Err(CheckpointError::Restoration(format!(
                "checkpoint {} is missing registered objects: {}",
                checkpoint.id(),
                missing.join(", ")
            )));
        }

        for (key, object) in &self.objects {
            let snapshot = checkpoint.snapshot(key).ok_or_else(|| {
                CheckpointError::Restoration(format!("snapshot vanished for key {}", key))
            })?;
            let mut guard = object.lock();
            if let Err(e) = snapshot.restore_into(&mut *guard) {
                error!(
                    "Restore of {} from checkpoint {} failed midway, instance state is corrupted: {}",
                    key,
                    checkpoint.id(),
                    e
                );
                return Err(CheckpointError::Restoration(format!(
                    "object {} could not be restored: {}",
                    key, e
                )));
            }
        }

        debug!(
            "Restored {} objects from checkpoint {}",
            self.objects.len(),
            checkpoint.id()
        );
        Ok(())
    }
}

impl std::fmt::Debug for StateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateRegistry")
            .field("keys", &self.objects.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointId, Dependencies, Metadata};
    use crate::snapshot::{field, take_field, FieldMap};
    use chrono::Utc;

    #[derive(Debug, Default)]
    struct Window {
        sum: i64,
        open: bool,
    }

    impl Checkpointable for Window {
        fn field_names(&self) -> Vec<&'static str> {
            vec!["sum"]
        }

        fn snapshot_fields(&self) -> Result<FieldMap> {
            let mut fields = FieldMap::new();
            fields.insert("sum".into(), field(&self.sum)?);
            Ok(fields)
        }

        fn restore_fields(&mut self, mut fields: FieldMap) -> Result<()> {
            self.sum = take_field(&mut fields, "sum")?;
            Ok(())
        }
    }

    fn checkpoint_of(registry: &StateRegistry) -> Checkpoint {
        let metadata = Metadata::new(
            CheckpointId::new(),
            "instance",
            Utc::now(),
            CheckpointId::nil(),
            Dependencies::new(),
        )
        .unwrap();
        Checkpoint::new(metadata, registry.take_snapshots().unwrap())
    }

    #[test]
    fn test_add_and_contains() {
        let mut registry = StateRegistry::new();
        registry.add("window", shared(Window::default())).unwrap();
        assert!(registry.contains("window"));
        assert!(!registry.contains("other"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = StateRegistry::new();
        registry.add("window", shared(Window::default())).unwrap();
        let err = registry.add("window", shared(Window::default())).unwrap_err();
        assert!(matches!(err, CheckpointError::DuplicateRegistration(ref k) if k == "window"));
        assert!(err.is_precondition());
    }

    #[test]
    fn test_snapshot_keys_match_registry() {
        let mut registry = StateRegistry::new();
        registry.add("a", shared(Window::default())).unwrap();
        registry.add("b", shared(Window::default())).unwrap();

        let snapshots = registry.take_snapshots().unwrap();
        assert_eq!(snapshots.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_round_trip_through_shared_handle() {
        let window = shared(Window { sum: 10, open: true });
        let mut registry = StateRegistry::new();
        registry.add("window", window.clone()).unwrap();

        let checkpoint = checkpoint_of(&registry);

        {
            let mut live = window.lock();
            live.sum = 500;
            live.open = false;
        }

        registry.restore(&checkpoint).unwrap();
        let live = window.lock();
        assert_eq!(live.sum, 10);
        assert!(!live.open);
    }

    #[test]
    fn test_restore_ignores_surplus_snapshots() {
        let mut old_registry = StateRegistry::new();
        old_registry.add("window", shared(Window { sum: 1, open: false })).unwrap();
        old_registry.add("retired", shared(Window::default())).unwrap();
        let checkpoint = checkpoint_of(&old_registry);

        let window = shared(Window::default());
        let mut registry = StateRegistry::new();
        registry.add("window", window.clone()).unwrap();

        assert!(registry.can_restore(&checkpoint));
        registry.restore(&checkpoint).unwrap();
        assert_eq!(window.lock().sum, 1);
    }

    #[test]
    fn test_restore_fails_when_registry_has_extra_key() {
        let mut registry = StateRegistry::new();
        registry.add("window", shared(Window::default())).unwrap();
        let checkpoint = checkpoint_of(&registry);

        registry.add("late", shared(Window::default())).unwrap();
        assert!(!registry.can_restore(&checkpoint));
        let err = registry.restore(&checkpoint).unwrap_err();
        assert!(matches!(err, CheckpointError::Restoration(ref msg) if msg.contains("late")));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeSet;

        fn registry_with(keys: &BTreeSet<String>) -> StateRegistry {
            let mut registry = StateRegistry::new();
            for key in keys {
                registry.add(key.clone(), shared(Window::default())).unwrap();
            }
            registry
        }

        proptest! {
            #[test]
            fn can_restore_iff_registry_keys_are_covered(
                registered in prop::collection::btree_set("[a-e]", 0..5),
                captured in prop::collection::btree_set("[a-e]", 0..5),
            ) {
                let checkpoint = checkpoint_of(&registry_with(&captured));
                let registry = registry_with(&registered);

                prop_assert_eq!(
                    registry.can_restore(&checkpoint),
                    registered.is_subset(&captured)
                );
                prop_assert_eq!(
                    registry.restore(&checkpoint).is_ok(),
                    registered.is_subset(&captured)
                );
            }
        }
    }
}
