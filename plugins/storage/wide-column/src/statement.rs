use std::sync::Arc;

use sink_api::{BoundStatement, CqlValue, FieldPath, RecordConverter, SinkError, StreamMessage};

// ═══════════════════════════════════════════════════════════════
//  PreparedStatement
// ═══════════════════════════════════════════════════════════════

/// Statement text with `?` placeholders, prepared once per stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedStatement {
    cql: Arc<str>,
    arity: usize,
}

impl PreparedStatement {
    /// Arity is the number of `?` placeholders outside string literals.
    pub fn new(cql: impl Into<Arc<str>>) -> Self {
        let cql = cql.into();
        let arity = count_placeholders(&cql);
        Self { cql, arity }
    }

    pub fn cql(&self) -> &str {
        &self.cql
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Bind values positionally. A value count different from the
    /// placeholder count is a layout fault, not a bad message.
    pub fn bind(&self, values: Vec<CqlValue>) -> Result<BoundStatement, SinkError> {
        if values.len() != self.arity {
            return Err(SinkError::layout(format!(
                "statement expects {} values, got {}: {}",
                self.arity,
                values.len(),
                self.cql
            )));
        }
        Ok(BoundStatement { cql: self.cql.clone(), values })
    }
}

fn count_placeholders(cql: &str) -> usize {
    let mut in_literal = false;
    let mut count = 0;
    for ch in cql.chars() {
        match ch {
            '\'' => in_literal = !in_literal,
            '?' if !in_literal => count += 1,
            _ => {}
        }
    }
    count
}

// ═══════════════════════════════════════════════════════════════
//  StatementMapper
// ═══════════════════════════════════════════════════════════════

/// Message → statements executed in order for that message.
pub trait StatementMapper: RecordConverter<Record = Vec<BoundStatement>> {}

impl<T> StatementMapper for T where T: RecordConverter<Record = Vec<BoundStatement>> {}

/// `INSERT INTO <keyspace>.<table> (c1, …) VALUES (?, …)`, one column per
/// field path.
#[derive(Debug, Clone)]
pub struct InsertMapper {
    columns: Vec<(String, FieldPath)>,
    statement: PreparedStatement,
}

impl InsertMapper {
    pub fn new(
        keyspace: &str,
        table: &str,
        columns: Vec<(String, FieldPath)>,
    ) -> Result<Self, SinkError> {
        if columns.is_empty() {
            return Err(SinkError::config(format!("insert into {keyspace}.{table}: no columns")));
        }
        for name in [keyspace, table].into_iter().chain(columns.iter().map(|(c, _)| c.as_str())) {
            check_identifier(name)?;
        }

        let names: Vec<&str> = columns.iter().map(|(c, _)| c.as_str()).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let statement = PreparedStatement::new(format!(
            "INSERT INTO {keyspace}.{table} ({}) VALUES ({placeholders})",
            names.join(", ")
        ));
        Ok(Self { columns, statement })
    }

    pub fn statement(&self) -> &PreparedStatement {
        &self.statement
    }
}

fn check_identifier(name: &str) -> Result<(), SinkError> {
    let valid = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SinkError::config(format!("invalid CQL identifier '{name}'")))
    }
}

impl RecordConverter for InsertMapper {
    type Record = Vec<BoundStatement>;

    fn convert(&self, message: &StreamMessage) -> Result<Vec<BoundStatement>, SinkError> {
        let mut values = Vec::with_capacity(self.columns.len());
        for (column, path) in &self.columns {
            let value = path.resolve(message).ok_or_else(|| {
                SinkError::format_err(format!("column '{column}': no value at '{path}'"))
            })?;
            values.push(CqlValue::from(&value));
        }
        Ok(vec![self.statement.bind(values)?])
    }
}
