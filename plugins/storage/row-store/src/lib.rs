//! Row store sink: one message → one row keyed `<timestamp>_<source>`,
//! body fields mapped positionally onto `family:qualifier` cells.

mod converter;
mod hbase;
mod layout;
mod memory;

pub use converter::{FieldListConverter, MessageConverter, RowConverter};
pub use hbase::{HbaseRestConnector, HbaseRestWriter, ACCEPT_INVALID_CERTS_KEY, REQUEST_TIMEOUT_KEY};
pub use layout::{ConvertedRow, RowLayout};
pub use memory::{MemoryRowStore, MemoryRowWriter, StoredRow};
