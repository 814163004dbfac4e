use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;

use sink_api::{BackendConfig, BackendConnector, BackendWriter, RowRecord, SinkError};

/// `column ("family:qualifier") → value`
pub type StoredRow = BTreeMap<String, String>;

// ═══════════════════════════════════════════════════════════════
//  MemoryRowStore
// ═══════════════════════════════════════════════════════════════

/// In-memory row store with put semantics: a write to an existing row
/// overwrites the written columns and keeps the rest.
///
/// Clones share the same table, so a test (or the `memory` backend of
/// the server) can read what a stage wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryRowStore {
    rows: Arc<RwLock<BTreeMap<String, StoredRow>>>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn row(&self, row_key: &str) -> Option<StoredRow> {
        self.rows.read().await.get(row_key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

impl BackendConnector for MemoryRowStore {
    type Writer = MemoryRowWriter;

    fn open<'a>(
        &'a self,
        _config: &'a BackendConfig,
    ) -> Pin<Box<dyn Future<Output = Result<MemoryRowWriter, SinkError>> + Send + 'a>> {
        let rows = self.rows.clone();
        Box::pin(async move { Ok(MemoryRowWriter { rows }) })
    }
}

pub struct MemoryRowWriter {
    rows: Arc<RwLock<BTreeMap<String, StoredRow>>>,
}

impl BackendWriter for MemoryRowWriter {
    type Record = RowRecord;

    fn write<'a>(
        &'a self,
        record: &'a RowRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async move {
            // A put without cells leaves no row behind.
            if record.cells.is_empty() {
                return Ok(());
            }
            let mut rows = self.rows.write().await;
            let row = rows.entry(record.row_key.clone()).or_default();
            for cell in &record.cells {
                row.insert(cell.column(), cell.value.clone());
            }
            Ok(())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}
