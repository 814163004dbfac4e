use std::future::Future;
use std::pin::Pin;

use crate::config::BackendConfig;
use crate::error::SinkError;

/// Open connection to a storage backend.
///
/// One writer per stage instance; writers are never shared between
/// stages. Timeouts are the writer's own business (transport / pool
/// configuration), the stage never wraps `write` in a timer.
pub trait BackendWriter: Send + Sync {
    type Record: Send + Sync;

    /// Durably persist one record.
    fn write<'a>(
        &'a self,
        record: &'a Self::Record,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

    /// Release the connection. Idempotent; writes after close fail.
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + '_>>;
}

/// Lifecycle side of a backend: builds and validates a connection.
///
/// Called once per stage instance, before any message is processed.
/// A failure here is fatal for the stage and is not retried.
pub trait BackendConnector: Send + Sync {
    type Writer: BackendWriter;

    fn open<'a>(
        &'a self,
        config: &'a BackendConfig,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Writer, SinkError>> + Send + 'a>>;
}
