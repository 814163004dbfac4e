pub mod config;
pub mod converter;
pub mod error;
pub mod hooks;
pub mod message;
pub mod record;
pub mod storage;

pub use config::{
    BackendConfig, ClientSettings, ConnectionPoolConfig, ParamValue, CONNECTION_TIMEOUT_KEY,
};
pub use converter::RecordConverter;
pub use error::{ErrorKind, SinkError};
pub use hooks::{FnHooks, NoopHooks, StoreHooks};
pub use message::{value_to_text, FieldPath, MessageBody, MessageHeader, StreamMessage};
pub use record::{BoundStatement, Cell, CellDefine, CqlValue, KeyValue, RowRecord};
pub use storage::{BackendConnector, BackendWriter};
