use std::sync::Arc;

use sink_api::{Cell, CellDefine, RowRecord, SinkError};

/// Converted form of a message, ready to be laid out as a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedRow {
    pub timestamp: String,
    pub source: String,
    pub body: Vec<String>,
}

/// Ordered cell definitions: body field *i* → `cells[i]`.
///
/// Fixed at stage configuration time and shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct RowLayout {
    cells: Arc<[CellDefine]>,
}

impl RowLayout {
    pub fn new(cells: impl Into<Arc<[CellDefine]>>) -> Self {
        Self { cells: cells.into() }
    }

    pub fn cells(&self) -> &[CellDefine] {
        &self.cells
    }

    /// Row key: `<timestamp>_<source>`.
    pub fn row_key(row: &ConvertedRow) -> String {
        format!("{}_{}", row.timestamp, row.source)
    }

    /// Lay out a converted message as a row.
    ///
    /// A body shorter than the layout uses only the leading definitions.
    /// A body longer than the layout is a `Layout` error: the extra field
    /// has nowhere to go and is never silently dropped.
    pub fn build(&self, row: ConvertedRow) -> Result<RowRecord, SinkError> {
        if row.body.len() > self.cells.len() {
            return Err(SinkError::layout(format!(
                "body field #{} has no cell definition ({} fields, {} cell definitions)",
                self.cells.len(),
                row.body.len(),
                self.cells.len()
            )));
        }

        let row_key = Self::row_key(&row);
        let cells = row
            .body
            .into_iter()
            .zip(self.cells.iter())
            .map(|(value, define)| Cell {
                family: define.family.clone(),
                qualifier: define.qualifier.clone(),
                value,
            })
            .collect();

        Ok(RowRecord { row_key, cells })
    }
}
