//! Cache sink: one message → one `(key, value)` put.

mod mapper;
mod memory;
mod rest;

pub use mapper::{JsonFieldMapper, KeyValueConverter, KeyValueMapper};
pub use memory::{MemoryCache, MemoryCacheWriter};
pub use rest::{RestCacheConnector, RestCacheWriter, PASSWORD_KEY, REQUEST_TIMEOUT_KEY, USERNAME_KEY};
