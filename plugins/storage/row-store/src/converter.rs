use sink_api::{
    value_to_text, MessageBody, RecordConverter, RowRecord, SinkError, StreamMessage,
};

use crate::layout::{ConvertedRow, RowLayout};

/// Pluggable message → `ConvertedRow` step.
pub trait MessageConverter: Send + Sync {
    fn to_row(&self, message: &StreamMessage) -> Result<ConvertedRow, SinkError>;
}

/// Default converter: header fields as-is, body fields as text.
///
/// Only `Fields` bodies are accepted: a `Map` body has no field order
/// to align with the cell definitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldListConverter;

impl MessageConverter for FieldListConverter {
    fn to_row(&self, message: &StreamMessage) -> Result<ConvertedRow, SinkError> {
        let body = match message.body() {
            MessageBody::Fields(fields) => fields.iter().map(value_to_text).collect(),
            MessageBody::Map(_) => {
                return Err(SinkError::format_err("row store expects a field list body, got a map"));
            }
        };
        Ok(ConvertedRow {
            timestamp: message.timestamp().to_string(),
            source: message.source().to_string(),
            body,
        })
    }
}

/// `MessageConverter` + `RowLayout` = the row store's record converter.
#[derive(Debug, Clone)]
pub struct RowConverter<M> {
    converter: M,
    layout: RowLayout,
}

impl<M: MessageConverter> RowConverter<M> {
    pub fn new(converter: M, layout: RowLayout) -> Self {
        Self { converter, layout }
    }

    pub fn layout(&self) -> &RowLayout {
        &self.layout
    }
}

impl<M: MessageConverter> RecordConverter for RowConverter<M> {
    type Record = RowRecord;

    fn convert(&self, message: &StreamMessage) -> Result<RowRecord, SinkError> {
        let row = self.converter.to_row(message)?;
        self.layout.build(row)
    }
}
