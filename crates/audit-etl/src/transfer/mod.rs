//! Bulk loading from a record stream into the target store.
//!
//! Rows are written as literal `INSERT` statements inside explicit
//! transactions. SQLite is fast at this as long as the transaction does not
//! grow unbounded, so the loader commits after every batch of cells:
//!
//! - the cell counter grows by the row width after each row;
//! - once it exceeds the commit threshold the transaction is committed, a
//!   progress marker is emitted, the counter resets and a new transaction opens;
//! - when the stream ends the last (possibly partial) transaction is committed.
//!
//! A row the store rejects is logged with its statement and skipped. It is not
//! retried, and the table still ends up committed. A fatal error (a failed
//! read or commit) rolls back the open batch; earlier batches stay committed.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::LoadConfig;
use crate::core::identifier::validate_table_name;
use crate::core::schema::{TableSchema, TargetType};
use crate::core::value::CellValue;
use crate::error::{EtlError, Result};
use crate::source::{RecordSource, RecordStream};
use crate::target::StatementGateway;

/// Cells written between commits.
pub const DEFAULT_COMMIT_THRESHOLD: u64 = 250_000;

/// Text cells at least this long are always quoted.
pub const DEFAULT_NUMERIC_LITERAL_MAX_LEN: usize = 25;

/// Loader tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Commit once more than this many cells were written since the last commit.
    pub commit_threshold: u64,

    /// Upper bound (exclusive) on the length of text written as a bare number.
    pub numeric_literal_max_len: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            commit_threshold: DEFAULT_COMMIT_THRESHOLD,
            numeric_literal_max_len: DEFAULT_NUMERIC_LITERAL_MAX_LEN,
        }
    }
}

impl From<&LoadConfig> for TransferConfig {
    fn from(cfg: &LoadConfig) -> Self {
        Self {
            commit_threshold: cfg.commit_threshold,
            numeric_literal_max_len: cfg.numeric_literal_max_len,
        }
    }
}

/// Receives a marker for every batch committed mid-load.
pub trait ProgressSink {
    /// Called after each threshold commit.
    fn batch_committed(&mut self, table: &str, rows_so_far: u64);
}

/// Progress sink that writes markers to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn batch_committed(&mut self, table: &str, rows_so_far: u64) {
        info!("{}: batch committed ({} rows so far)", table, rows_so_far);
    }
}

/// A single row the target store rejected. Logged, never raised.
#[derive(Debug, Clone)]
pub struct RowInsertError {
    /// 1-based position of the row in the stream.
    pub row: u64,
    /// Statement that failed.
    pub sql: String,
    /// Backend diagnostic.
    pub message: String,
}

impl fmt::Display for RowInsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row {} rejected: {}\n  SQL: {}",
            self.row, self.message, self.sql
        )
    }
}

/// Outcome of one bulk load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadReport {
    /// Target table.
    pub table: String,
    /// Rows read from the stream.
    pub rows_read: u64,
    /// Rows the store accepted.
    pub rows_inserted: u64,
    /// Rows the store rejected.
    pub rows_failed: u64,
    /// Cells processed (sum of row widths).
    pub cells: u64,
    /// Commits issued, including the final one.
    pub commits: u64,
    /// Progress markers emitted (threshold commits).
    pub progress_marks: u64,
    /// Wall time.
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Transient batch counters.
#[derive(Debug)]
struct LoadBatch {
    cells_since_commit: u64,
    commit_threshold: u64,
}

impl LoadBatch {
    fn new(commit_threshold: u64) -> Self {
        Self {
            cells_since_commit: 0,
            commit_threshold,
        }
    }

    /// Account for one row; true when a commit is due (the counter is reset).
    fn record_row(&mut self, width: usize) -> bool {
        self.cells_since_commit += width as u64;
        if self.cells_since_commit > self.commit_threshold {
            self.cells_since_commit = 0;
            true
        } else {
            false
        }
    }
}

/// Render one cell as an SQL literal for a column of type `target`.
///
/// Text in a numeric column that is non-empty and shorter than `max_len` is
/// treated as a locale-formatted number: surrounding whitespace is trimmed,
/// every `.` (thousands separator) is removed and `,` becomes the decimal
/// point. The result is written unquoted, so `1.234,56` becomes `1234.56`.
/// Everything else is quoted.
///
/// Short text that is not a number at all still goes out unquoted, and the
/// store rejects the resulting row.
pub fn cell_literal(
    gateway: &StatementGateway,
    value: &CellValue,
    target: TargetType,
    max_len: usize,
) -> String {
    match value {
        CellValue::Null => "NULL".to_string(),
        CellValue::Integer(v) => v.to_string(),
        CellValue::Real(v) if v.is_finite() => v.to_string(),
        CellValue::Real(_) => "NULL".to_string(),
        CellValue::Blob(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
            format!("X'{}'", hex)
        }
        CellValue::Text(text) => {
            let escaped = gateway.escape(text);
            let len = escaped.chars().count();
            if len > 0 && len < max_len && target.is_numeric() {
                escaped.trim().replace('.', "").replace(',', ".")
            } else {
                format!("'{}'", escaped)
            }
        }
    }
}

/// Build the INSERT statement for one row.
pub fn insert_statement(
    gateway: &StatementGateway,
    table: &str,
    row: &[CellValue],
    types: &[TargetType],
    max_len: usize,
) -> String {
    let literals: Vec<String> = row
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            let target = types.get(i).copied().unwrap_or(TargetType::Text);
            cell_literal(gateway, cell, target, max_len)
        })
        .collect();
    format!("INSERT INTO {} VALUES ({})", table, literals.join(", "))
}

/// Drives a [`RecordStream`] into the target store.
pub struct BulkLoader<'g, P: ProgressSink = LogProgress> {
    gateway: &'g StatementGateway,
    config: TransferConfig,
    progress: P,
}

impl<'g> BulkLoader<'g, LogProgress> {
    /// Create a loader that reports progress to the log.
    pub fn new(gateway: &'g StatementGateway, config: TransferConfig) -> Self {
        Self {
            gateway,
            config,
            progress: LogProgress,
        }
    }
}

impl<'g, P: ProgressSink> BulkLoader<'g, P> {
    /// Replace the progress sink.
    pub fn with_progress<Q: ProgressSink>(self, progress: Q) -> BulkLoader<'g, Q> {
        BulkLoader {
            gateway: self.gateway,
            config: self.config,
            progress,
        }
    }

    /// Access the progress sink.
    pub fn progress(&self) -> &P {
        &self.progress
    }

    /// Load `stream` into `table`, typing cells by `schema`.
    pub fn load<S: RecordSource>(
        &mut self,
        table: &str,
        schema: &TableSchema,
        stream: &mut RecordStream<S>,
    ) -> Result<LoadReport> {
        self.run(table, Some(schema.types()), stream)
    }

    /// Load `stream` into `table`, typing cells by the stream's own metadata.
    pub fn load_stream<S: RecordSource>(
        &mut self,
        table: &str,
        stream: &mut RecordStream<S>,
    ) -> Result<LoadReport> {
        self.run(table, None, stream)
    }

    fn run<S: RecordSource>(
        &mut self,
        table: &str,
        explicit_types: Option<Vec<TargetType>>,
        stream: &mut RecordStream<S>,
    ) -> Result<LoadReport> {
        validate_table_name(table)?;
        let start = Instant::now();
        let mut report = LoadReport {
            table: table.to_string(),
            ..Default::default()
        };
        let gateway = self.gateway;

        info!("Loading {}", table);
        gateway.begin()?;
        self.write_rows(table, explicit_types, stream, &mut report)
            .map_err(|e| gateway.abort_with(e))?;
        report.duration = start.elapsed();

        info!(
            "Loaded {}: {} rows inserted, {} rejected, {} commits in {:.2}s",
            table,
            report.rows_inserted,
            report.rows_failed,
            report.commits,
            report.duration.as_secs_f64()
        );
        Ok(report)
    }

    /// Insert every row, committing in batches. Expects an open transaction
    /// and leaves none open on success.
    fn write_rows<S: RecordSource>(
        &mut self,
        table: &str,
        mut types: Option<Vec<TargetType>>,
        stream: &mut RecordStream<S>,
        report: &mut LoadReport,
    ) -> Result<()> {
        let mut batch = LoadBatch::new(self.config.commit_threshold);

        // the current row may already be materialized when export_table peeked
        let mut has_row = stream.schema().is_some() && !stream.row().is_empty();
        if !has_row {
            has_row = stream.advance()?;
        }

        while has_row {
            if types.is_none() {
                types = stream.schema().map(|s| s.types().to_vec());
            }
            let column_types = types.as_deref().unwrap_or(&[]);

            let row = stream.take_row();
            report.rows_read += 1;
            let sql = insert_statement(
                self.gateway,
                table,
                &row,
                column_types,
                self.config.numeric_literal_max_len,
            );

            match self.gateway.try_execute(&sql) {
                Ok(_) => report.rows_inserted += 1,
                Err(message) => {
                    let failure = RowInsertError {
                        row: report.rows_read,
                        sql,
                        message,
                    };
                    error!("{}", failure);
                    report.rows_failed += 1;
                }
            }

            report.cells += row.len() as u64;
            if batch.record_row(row.len()) {
                self.gateway.commit()?;
                report.commits += 1;
                report.progress_marks += 1;
                self.progress.batch_committed(table, report.rows_read);
                self.gateway.begin()?;
            }

            has_row = stream.advance()?;
        }

        self.gateway.commit()?;
        report.commits += 1;
        Ok(())
    }
}

/// Create `table` from the stream's first-row metadata and load every row.
///
/// Returns the synthesized schema alongside the load report. An empty stream
/// creates nothing.
pub fn export_table<S: RecordSource>(
    gateway: &StatementGateway,
    table: &str,
    stream: &mut RecordStream<S>,
    config: TransferConfig,
) -> Result<(Option<TableSchema>, LoadReport)> {
    validate_table_name(table)?;
    if !stream.advance()? {
        debug!("Source for {} is empty, nothing to create", table);
        return Ok((
            None,
            LoadReport {
                table: table.to_string(),
                ..Default::default()
            },
        ));
    }

    let schema = stream
        .schema()
        .ok_or_else(|| EtlError::Config(format!("no schema captured for {}", table)))?
        .to_table_schema(table)?;
    gateway.execute(&schema.create_table_sql(), true)?;

    let mut loader = BulkLoader::new(gateway, config);
    let report = loader.load(table, &schema, stream)?;
    Ok((Some(schema), report))
}
