use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SinkError;

// ════════════════════════════════════════════════════════════════
//  StreamMessage
// ════════════════════════════════════════════════════════════════

/// Header of a streamed message: when and where it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    timestamp: String,
    source: String,
}

impl MessageHeader {
    pub fn new(timestamp: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            source: source.into(),
        }
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Payload of a streamed message.
///
/// In JSON an array becomes `Fields`, an object becomes `Map`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageBody {
    /// Ordered sequence of fields.
    Fields(Vec<Value>),
    /// Key-value payload.
    Map(serde_json::Map<String, Value>),
}

impl MessageBody {
    /// Number of top-level fields (array elements or map entries).
    pub fn len(&self) -> usize {
        match self {
            MessageBody::Fields(fields) => fields.len(),
            MessageBody::Map(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Body as a JSON value (array or object).
    pub fn to_value(&self) -> Value {
        match self {
            MessageBody::Fields(fields) => Value::Array(fields.clone()),
            MessageBody::Map(map) => Value::Object(map.clone()),
        }
    }
}

/// Immutable unit of input data, produced upstream and consumed exactly
/// once by a sink stage. There are no setters: a message never changes
/// after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    header: MessageHeader,
    body: MessageBody,
}

impl StreamMessage {
    pub fn new(
        timestamp: impl Into<String>,
        source: impl Into<String>,
        body: MessageBody,
    ) -> Self {
        Self {
            header: MessageHeader::new(timestamp, source),
            body,
        }
    }

    /// Message with an ordered list of fields.
    pub fn with_fields(
        timestamp: impl Into<String>,
        source: impl Into<String>,
        fields: impl IntoIterator<Item = impl Into<Value>>,
    ) -> Self {
        Self::new(
            timestamp,
            source,
            MessageBody::Fields(fields.into_iter().map(Into::into).collect()),
        )
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn timestamp(&self) -> &str {
        self.header.timestamp()
    }

    pub fn source(&self) -> &str {
        self.header.source()
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }
}

/// Compact JSON, as it appears in "dropping message" log lines.
impl fmt::Display for StreamMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(
                f,
                "StreamMessage(timestamp={}, source={}, body_len={})",
                self.timestamp(),
                self.source(),
                self.body.len()
            ),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  FieldPath
// ════════════════════════════════════════════════════════════════

/// Reference to a value inside a message.
///
/// - `"timestamp"` / `"source"` → header fields
/// - `"body"` → whole body
/// - `"body.2"` → third element of a `Fields` body
/// - `"body.quote.bid"` → nested lookup in a `Map` body
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum FieldPath {
    Timestamp,
    Source,
    Body(Vec<String>),
}

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self, SinkError> {
        let mut segments = path.split('.');
        let head = segments.next().unwrap_or_default();
        let rest: Vec<String> = segments.map(str::to_string).collect();
        if rest.iter().any(String::is_empty) {
            return Err(SinkError::config(format!("field path '{path}': empty segment")));
        }
        match head {
            "timestamp" if rest.is_empty() => Ok(FieldPath::Timestamp),
            "source" if rest.is_empty() => Ok(FieldPath::Source),
            "body" => Ok(FieldPath::Body(rest)),
            _ => Err(SinkError::config(format!(
                "field path '{path}': expected 'timestamp', 'source' or 'body[.<segment>...]'"
            ))),
        }
    }

    /// Resolve against a message. `None` if any segment is missing.
    pub fn resolve(&self, message: &StreamMessage) -> Option<Value> {
        match self {
            FieldPath::Timestamp => Some(Value::String(message.timestamp().to_string())),
            FieldPath::Source => Some(Value::String(message.source().to_string())),
            FieldPath::Body(segments) => {
                let (first, rest) = match segments.split_first() {
                    Some(split) => split,
                    None => return Some(message.body().to_value()),
                };
                let mut current = match message.body() {
                    MessageBody::Fields(fields) => fields.get(first.parse::<usize>().ok()?)?,
                    MessageBody::Map(map) => map.get(first.as_str())?,
                };
                for segment in rest {
                    current = step(current, segment)?;
                }
                Some(current.clone())
            }
        }
    }
}

fn step<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
        _ => value.get(segment),
    }
}

impl TryFrom<String> for FieldPath {
    type Error = SinkError;

    fn try_from(path: String) -> Result<Self, Self::Error> {
        FieldPath::parse(&path)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldPath::Timestamp => f.write_str("timestamp"),
            FieldPath::Source => f.write_str("source"),
            FieldPath::Body(segments) if segments.is_empty() => f.write_str("body"),
            FieldPath::Body(segments) => write!(f, "body.{}", segments.join(".")),
        }
    }
}

/// Render a JSON value as plain text: strings verbatim, everything else compact JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn body_shape_follows_json() {
        let msg: StreamMessage = serde_json::from_value(json!({
            "header": {"timestamp": "T1", "source": "S1"},
            "body": ["v1", 2]
        }))
        .unwrap();
        assert_eq!(msg.timestamp(), "T1");
        assert_eq!(msg.source(), "S1");
        assert_eq!(msg.body(), &MessageBody::Fields(vec![json!("v1"), json!(2)]));

        let msg: StreamMessage = serde_json::from_value(json!({
            "header": {"timestamp": "T2", "source": "S2"},
            "body": {"symbol": "EURUSD"}
        }))
        .unwrap();
        assert!(matches!(msg.body(), MessageBody::Map(m) if m.len() == 1));
    }

    #[test]
    fn display_is_compact_json() {
        let msg = StreamMessage::with_fields("T1", "S1", ["a"]);
        assert_eq!(
            msg.to_string(),
            r#"{"header":{"timestamp":"T1","source":"S1"},"body":["a"]}"#
        );
    }

    #[test]
    fn field_paths() {
        let fields = StreamMessage::with_fields("T1", "S1", [json!("a"), json!([1, 2])]);
        let map = StreamMessage::new(
            "T1",
            "S1",
            MessageBody::Map(
                json!({"quote": {"bid": 1.5}, "symbol": "EURUSD"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            ),
        );

        let p = |s: &str| FieldPath::parse(s).unwrap();
        assert_eq!(p("timestamp").resolve(&fields), Some(json!("T1")));
        assert_eq!(p("source").resolve(&fields), Some(json!("S1")));
        assert_eq!(p("body.0").resolve(&fields), Some(json!("a")));
        assert_eq!(p("body.1.1").resolve(&fields), Some(json!(2)));
        assert_eq!(p("body.5").resolve(&fields), None);
        assert_eq!(p("body.symbol").resolve(&fields), None);
        assert_eq!(p("body.quote.bid").resolve(&map), Some(json!(1.5)));
        assert_eq!(p("body").resolve(&map), Some(map.body().to_value()));
        assert_eq!(p("body.quote.bid").to_string(), "body.quote.bid");
    }

    #[test]
    fn bad_field_paths() {
        assert!(FieldPath::parse("header").is_err());
        assert!(FieldPath::parse("timestamp.x").is_err());
        assert!(FieldPath::parse("body..x").is_err());
    }
}
