use crate::error::SinkError;
use crate::message::StreamMessage;

/// Message → backend-native record conversion.
///
/// Pure: no I/O, no state carried between messages. Supplied at stage
/// construction time.
///
/// Error kinds are significant to the stage:
/// - `Format` / `Logic`: the message cannot be converted; it is dropped.
/// - `Layout`: the configured record shape cannot hold the message;
///   a configuration fault that stops the stage.
pub trait RecordConverter: Send + Sync {
    type Record: Send + Sync;

    fn convert(&self, message: &StreamMessage) -> Result<Self::Record, SinkError>;
}

/// Closures are converters too.
impl<R, F> RecordConverter for F
where
    R: Send + Sync,
    F: Fn(&StreamMessage) -> Result<R, SinkError> + Send + Sync,
{
    type Record = R;

    fn convert(&self, message: &StreamMessage) -> Result<R, SinkError> {
        self(message)
    }
}
