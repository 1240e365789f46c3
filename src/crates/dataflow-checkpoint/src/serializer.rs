//! Serialization protocol for persisted checkpoints

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Protocol for serializing and deserializing checkpoint data
///
/// Snapshot field values are `serde_json::Value`s, so a format must be self-describing
/// to round-trip them.
pub trait SerializerProtocol: Send + Sync {
    /// Serialize a value to bytes
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize a value from bytes
    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T>;

    /// File extension used by file-backed storage
    fn extension(&self) -> &'static str {
        "json"
    }
}

/// Compact JSON serializer (default)
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for JsonSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Indented JSON, for checkpoint directories inspected by hand
#[derive(Debug, Clone, Default)]
pub struct PrettyJsonSerializer;

impl SerializerProtocol for PrettyJsonSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CheckpointError;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Fields {
        name: String,
        value: serde_json::Value,
    }

    #[test]
    fn test_json_serializer_keeps_dynamic_values() {
        let serializer = JsonSerializer::new();
        let data = Fields {
            name: "counts".to_string(),
            value: json!({"the": 3, "a": [1, 2]}),
        };

        let bytes = serializer.dumps(&data).unwrap();
        let restored: Fields = serializer.loads(&bytes).unwrap();
        assert_eq!(data, restored);
    }

    #[test]
    fn test_pretty_output_is_indented() {
        let bytes = PrettyJsonSerializer.dumps(&json!({"a": 1})).unwrap();
        assert!(String::from_utf8(bytes).unwrap().contains('\n'));
    }

    #[test]
    fn test_loads_rejects_garbage() {
        let err = JsonSerializer::new().loads::<Fields>(b"not json").unwrap_err();
        assert!(matches!(err, CheckpointError::Serialization(_)));
    }
}
