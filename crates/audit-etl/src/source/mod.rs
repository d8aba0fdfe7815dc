//! Source cursors and the lazily-typed record stream built on top of them.
//!
//! A [`RecordSource`] is the narrow boundary to whatever driver produces rows
//! (a remote query cursor, an in-memory fixture). The loader never talks to a
//! source directly; it reads through a [`RecordStream`], which captures the
//! column metadata exactly once, when the first row is materialized, and treats
//! every later fetch as data only.

mod memory;

pub use memory::MemorySource;

use crate::core::schema::{SourceColumn, SourceType, TableSchema, TargetType};
use crate::core::value::Row;
use crate::error::Result;
use crate::typemap::{classify_code, classify_name};
use tracing::debug;

/// Forward-only cursor over source rows.
pub trait RecordSource {
    /// Number of columns in the current result.
    fn column_count(&self) -> usize;

    /// Column name as reported by the driver.
    fn column_name(&self, idx: usize) -> String;

    /// Column type identifier as reported by the driver.
    fn column_type(&self, idx: usize) -> SourceType;

    /// Whether the cursor is positioned on a row.
    fn has_more(&self) -> bool;

    /// Values of the row the cursor is positioned on.
    fn current_values(&mut self) -> Result<Row>;

    /// Move to the next row.
    fn advance(&mut self) -> Result<()>;
}

/// Column metadata captured from the first row of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSchema {
    columns: Vec<SourceColumn>,
    types: Vec<TargetType>,
}

impl StreamSchema {
    fn capture<S: RecordSource + ?Sized>(source: &S) -> Self {
        let columns: Vec<SourceColumn> = (0..source.column_count())
            .map(|i| SourceColumn {
                name: source.column_name(i),
                source_type: source.column_type(i),
            })
            .collect();
        let types = columns
            .iter()
            .map(|c| match &c.source_type {
                SourceType::Code(code) => classify_code(*code),
                // cursor metadata never fails; unknown names load as text
                SourceType::Name(name) => classify_name(name).unwrap_or(TargetType::Text),
            })
            .collect();
        Self { columns, types }
    }

    /// Source columns in positional order.
    pub fn columns(&self) -> &[SourceColumn] {
        &self.columns
    }

    /// Target storage class per column.
    pub fn types(&self) -> &[TargetType] {
        &self.types
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True when the source reported no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Synthesize a target table schema from the captured columns.
    pub fn to_table_schema(&self, table_name: &str) -> Result<TableSchema> {
        TableSchema::from_source(table_name, &self.columns)
    }
}

/// Lazy, finite, non-restartable sequence of rows over a [`RecordSource`].
pub struct RecordStream<S: RecordSource> {
    source: S,
    schema: Option<StreamSchema>,
    current: Row,
    rows_read: u64,
}

impl<S: RecordSource> RecordStream<S> {
    /// Wrap a source cursor.
    pub fn new(source: S) -> Self {
        Self {
            source,
            schema: None,
            current: Vec::new(),
            rows_read: 0,
        }
    }

    /// Materialize the next row. Returns `false` at end of stream.
    ///
    /// The schema is captured on the first successful call and never
    /// refreshed afterwards.
    pub fn advance(&mut self) -> Result<bool> {
        if !self.source.has_more() {
            return Ok(false);
        }

        if self.schema.is_none() {
            let schema = StreamSchema::capture(&self.source);
            debug!("Captured stream schema with {} columns", schema.len());
            self.schema = Some(schema);
        }

        self.current = self.source.current_values()?;
        self.source.advance()?;
        self.rows_read += 1;
        Ok(true)
    }

    /// Captured schema; `None` until the first row has been read.
    pub fn schema(&self) -> Option<&StreamSchema> {
        self.schema.as_ref()
    }

    /// The row most recently materialized by [`advance`](Self::advance).
    pub fn row(&self) -> &Row {
        &self.current
    }

    /// Take ownership of the current row, leaving an empty one behind.
    pub fn take_row(&mut self) -> Row {
        std::mem::take(&mut self.current)
    }

    /// Rows materialized so far.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }
}
