//! Wide-column sink: messages mapped to bound CQL statements and executed
//! through a driver session.

mod driver;
mod memory;
mod session;
mod statement;

pub use driver::{ScyllaSession, ScyllaSessionFactory, PASSWORD_KEY, USERNAME_KEY};
pub use memory::{MemorySession, MemorySessionFactory};
pub use session::{CqlSession, SessionFactory, WideColumnConnector, WideColumnWriter};
pub use statement::{InsertMapper, PreparedStatement, StatementMapper};
