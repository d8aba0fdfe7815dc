//! In-memory record source.

use std::collections::VecDeque;

use super::RecordSource;
use crate::core::schema::{SourceColumn, SourceType};
use crate::core::value::Row;
use crate::error::{EtlError, Result};

/// A [`RecordSource`] backed by rows held in memory.
///
/// Useful for embedding the loader behind drivers that already buffer a result
/// set, and for tests.
#[derive(Debug, Clone)]
pub struct MemorySource {
    columns: Vec<SourceColumn>,
    rows: VecDeque<Row>,
    next_columns: Option<Vec<SourceColumn>>,
}

impl MemorySource {
    /// Create a source over `rows` with the given column metadata.
    pub fn new(columns: Vec<SourceColumn>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows: rows.into(),
            next_columns: None,
        }
    }

    /// Report different column metadata once the first row has been consumed.
    ///
    /// Mimics drivers whose field metadata drifts between fetches.
    pub fn change_columns_after_first_row(&mut self, columns: Vec<SourceColumn>) {
        self.next_columns = Some(columns);
    }
}

impl RecordSource for MemorySource {
    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_name(&self, idx: usize) -> String {
        self.columns[idx].name.clone()
    }

    fn column_type(&self, idx: usize) -> SourceType {
        self.columns[idx].source_type.clone()
    }

    fn has_more(&self) -> bool {
        !self.rows.is_empty()
    }

    fn current_values(&mut self) -> Result<Row> {
        self.rows
            .front()
            .cloned()
            .ok_or_else(|| EtlError::Config("cursor is past the last row".to_string()))
    }

    fn advance(&mut self) -> Result<()> {
        self.rows.pop_front();
        if let Some(columns) = self.next_columns.take() {
            self.columns = columns;
        }
        Ok(())
    }
}
