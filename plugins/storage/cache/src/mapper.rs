use serde_json::Value;

use sink_api::{value_to_text, FieldPath, KeyValue, RecordConverter, SinkError, StreamMessage};

/// Message → cache key and value, converted separately.
pub trait KeyValueMapper: Send + Sync {
    type Key: Send + Sync;
    type Value: Send + Sync;

    fn convert_key(&self, message: &StreamMessage) -> Result<Self::Key, SinkError>;
    fn convert_value(&self, message: &StreamMessage) -> Result<Self::Value, SinkError>;
}

/// Adapts a [`KeyValueMapper`] to a record converter. The value is
/// converted only once the key has been.
#[derive(Debug, Clone)]
pub struct KeyValueConverter<M> {
    mapper: M,
}

impl<M: KeyValueMapper> KeyValueConverter<M> {
    pub fn new(mapper: M) -> Self {
        Self { mapper }
    }

    pub fn mapper(&self) -> &M {
        &self.mapper
    }
}

impl<M: KeyValueMapper> RecordConverter for KeyValueConverter<M> {
    type Record = KeyValue<M::Key, M::Value>;

    fn convert(&self, message: &StreamMessage) -> Result<Self::Record, SinkError> {
        let key = self
            .mapper
            .convert_key(message)
            .map_err(|e| e.with_context("key"))?;
        let value = self
            .mapper
            .convert_value(message)
            .map_err(|e| e.with_context("value"))?;
        Ok(KeyValue::new(key, value))
    }
}

// ═══════════════════════════════════════════════════════════════
//  JsonFieldMapper
// ═══════════════════════════════════════════════════════════════

/// Key taken from one field (as text), value from another (as JSON) or
/// the whole body when no value path is set.
#[derive(Debug, Clone)]
pub struct JsonFieldMapper {
    key: FieldPath,
    value: Option<FieldPath>,
}

impl JsonFieldMapper {
    pub fn new(key: FieldPath, value: Option<FieldPath>) -> Self {
        Self { key, value }
    }
}

impl KeyValueMapper for JsonFieldMapper {
    type Key = String;
    type Value = Value;

    fn convert_key(&self, message: &StreamMessage) -> Result<String, SinkError> {
        match self.key.resolve(message) {
            Some(Value::Null) | None => {
                Err(SinkError::format_err(format!("no key at '{}'", self.key)))
            }
            Some(value) => Ok(value_to_text(&value)),
        }
    }

    fn convert_value(&self, message: &StreamMessage) -> Result<Value, SinkError> {
        match &self.value {
            None => Ok(message.body().to_value()),
            Some(path) => path
                .resolve(message)
                .ok_or_else(|| SinkError::format_err(format!("no value at '{path}'"))),
        }
    }
}
