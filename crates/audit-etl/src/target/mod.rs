//! SQLite target store access.
//!
//! [`StatementGateway`] is the only way the loaders and the auditor touch the
//! target connection. Every statement goes through one of three paths:
//!
//! - [`execute`](StatementGateway::execute) / [`query`](StatementGateway::query):
//!   logged (unless `echo` is false) and fatal on failure. The error carries the
//!   statement text and the backend diagnostic.
//! - [`try_execute`](StatementGateway::try_execute): unlogged, and a failure is
//!   handed back as plain text so the caller can log it and move on.
//! - [`escape`](StatementGateway::escape) / [`quote`](StatementGateway::quote):
//!   never fail.
//!
//! A unit of work that fails halfway through a transaction hands its error to
//! [`abort_with`](StatementGateway::abort_with), which rolls back so the
//! connection can be reused.

use std::path::{Path, PathBuf};

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::core::identifier::{escape_literal, validate_identifier, validate_table_name};
use crate::core::value::{CellValue, Row};
use crate::error::{EtlError, Result};

/// One entry of `PRAGMA database_list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedDatabase {
    /// Sequence number (0 = main, 1 = temp).
    pub seq: i64,
    /// Schema name used to qualify tables.
    pub name: String,
    /// Backing file, empty for in-memory and temp databases.
    pub file: String,
}

/// Guarded statement execution over a single SQLite connection.
pub struct StatementGateway {
    conn: Connection,
    path: Option<PathBuf>,
}

impl StatementGateway {
    /// Open (or create) the database file at `path`.
    ///
    /// New files are created with UTF-8 text encoding.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let is_new = !path.exists();
        if let Some(parent) = path.parent() {
            if is_new && !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let gateway = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        if is_new {
            gateway.execute("PRAGMA encoding = \"UTF-8\";", false)?;
            info!("Created target database {:?}", path);
        } else {
            info!("Opened target database {:?}", path);
        }
        Ok(gateway)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            path: None,
        })
    }

    /// Path of the main database file, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Execute one or more statements. Any failure is fatal.
    pub fn execute(&self, sql: &str, echo: bool) -> Result<()> {
        if echo {
            info!("exec: {}", sql);
        }
        self.conn
            .execute_batch(sql)
            .map_err(|e| EtlError::statement(sql, e.to_string()))
    }

    /// Execute a single statement, returning the backend message on failure.
    ///
    /// Nothing is logged here; per-row inserts would flood the log.
    pub fn try_execute(&self, sql: &str) -> std::result::Result<usize, String> {
        self.conn.execute(sql, []).map_err(|e| e.to_string())
    }

    /// Run a query and map every row. Any failure is fatal.
    pub fn query<T, F>(&self, sql: &str, echo: bool, mut map: F) -> Result<Vec<T>>
    where
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        if echo {
            info!("query: {}", sql);
        }
        let fail = |e: rusqlite::Error| EtlError::statement(sql, e.to_string());

        let mut stmt = self.conn.prepare(sql).map_err(fail)?;
        let rows = stmt.query_map([], |row| map(row)).map_err(fail)?;
        let values = rows.collect::<rusqlite::Result<Vec<T>>>();
        values.map_err(fail)
    }

    /// Column names a query returns, without running it.
    pub fn column_names(&self, sql: &str) -> Result<Vec<String>> {
        let stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| EtlError::statement(sql, e.to_string()))?;
        Ok(stmt.column_names().into_iter().map(String::from).collect())
    }

    /// Run a query and hand each row to `visit` as cells.
    ///
    /// Iteration stops early when `visit` returns `false`. Returns the number
    /// of rows visited.
    pub fn query_cells<F>(&self, sql: &str, echo: bool, mut visit: F) -> Result<u64>
    where
        F: FnMut(Row) -> Result<bool>,
    {
        if echo {
            info!("query: {}", sql);
        }
        let fail = |e: rusqlite::Error| EtlError::statement(sql, e.to_string());

        let mut stmt = self.conn.prepare(sql).map_err(fail)?;
        let width = stmt.column_count();
        let mut rows = stmt.query([]).map_err(fail)?;
        let mut visited = 0;
        while let Some(row) = rows.next().map_err(fail)? {
            let cells = (0..width)
                .map(|i| row.get_ref(i).map(cell_from_ref))
                .collect::<rusqlite::Result<Row>>()
                .map_err(fail)?;
            visited += 1;
            if !visit(cells)? {
                break;
            }
        }
        Ok(visited)
    }

    /// First column of the first row as an integer; `None` for NULL or no rows.
    pub fn query_i64(&self, sql: &str, echo: bool) -> Result<Option<i64>> {
        let values = self.query(sql, echo, |row| row.get::<_, Option<i64>>(0))?;
        Ok(values.into_iter().next().flatten())
    }

    /// Compile a statement without running it. Any failure is fatal.
    pub fn prepare_check(&self, sql: &str) -> Result<()> {
        self.conn
            .prepare(sql)
            .map(|_| ())
            .map_err(|e| EtlError::statement(sql, e.to_string()))
    }

    /// Escape a value for a single-quoted string literal.
    pub fn escape(&self, value: &str) -> String {
        escape_literal(value)
    }

    /// Escape and wrap a value in single quotes.
    pub fn quote(&self, value: &str) -> String {
        format!("'{}'", self.escape(value))
    }

    /// Open a transaction.
    pub fn begin(&self) -> Result<()> {
        self.execute("BEGIN;", false)
    }

    /// Commit the open transaction.
    pub fn commit(&self) -> Result<()> {
        self.execute("COMMIT;", false)
    }

    /// Roll back the open transaction. A no-op when none is open.
    pub fn rollback(&self) -> Result<()> {
        if !self.in_transaction() {
            return Ok(());
        }
        self.execute("ROLLBACK;", false)
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Roll back after a failed unit of work and return its error.
    pub fn abort_with(&self, cause: EtlError) -> EtlError {
        warn!("Rolling back: {}", cause);
        if let Err(e) = self.rollback() {
            error!("Rollback failed: {}", e);
        }
        cause
    }

    /// Rows changed by the most recent statement.
    pub fn changes(&self) -> u64 {
        self.conn.changes()
    }

    /// Attach another database file under `alias`.
    ///
    /// Its tables stay reachable as `alias.table` (and unqualified, when the
    /// name is unique) for the rest of this connection's life.
    pub fn attach(&self, path: impl AsRef<Path>, alias: &str) -> Result<()> {
        validate_identifier(alias)?;
        let path = path.as_ref().to_string_lossy();
        let sql = format!("ATTACH DATABASE {} AS {};", self.quote(&path), alias);
        self.execute(&sql, true)
    }

    /// Names of the tables in the main database.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        self.query(
            "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name;",
            false,
            |row| row.get(0),
        )
    }

    /// Column names of `table` (optionally `schema.table`), in order.
    pub fn list_columns(&self, table: &str) -> Result<Vec<String>> {
        validate_table_name(table)?;
        let sql = match table.split_once('.') {
            Some((schema, name)) => format!("PRAGMA {}.table_info({});", schema, name),
            None => format!("PRAGMA table_info({});", table),
        };
        self.query(&sql, false, |row| row.get::<_, String>("name"))
    }

    /// Databases visible on this connection, main first.
    pub fn list_databases(&self) -> Result<Vec<AttachedDatabase>> {
        self.query("PRAGMA database_list;", false, |row| {
            Ok(AttachedDatabase {
                seq: row.get("seq")?,
                name: row.get("name")?,
                file: row.get::<_, Option<String>>("file")?.unwrap_or_default(),
            })
        })
    }

    /// Drop `table` if present and recreate it from a query.
    pub fn create_table_from_sql(&self, table: &str, sql: &str) -> Result<()> {
        self.create_from_sql(table, sql, false)
    }

    /// Drop `table` if present and recreate it as a TEMP table from a query.
    pub fn create_temp_table_from_sql(&self, table: &str, sql: &str) -> Result<()> {
        self.create_from_sql(table, sql, true)
    }

    fn create_from_sql(&self, table: &str, sql: &str, temp: bool) -> Result<()> {
        validate_table_name(table)?;
        self.execute(&format!("DROP TABLE IF EXISTS {}", table), true)?;
        let temp = if temp { "TEMP " } else { "" };
        self.execute(&format!("CREATE {}TABLE {} AS\n{}", temp, table, sql), true)?;
        debug!("Created table {} from query", table);
        Ok(())
    }

    /// Drop `table`, run the explicit `create_sql`, then fill it from `sql`.
    pub fn insert_into_table_from_sql(&self, create_sql: &str, table: &str, sql: &str) -> Result<()> {
        validate_table_name(table)?;
        self.execute(&format!("DROP TABLE IF EXISTS {}", table), true)?;
        self.execute(create_sql, true)?;
        self.execute(&format!("INSERT INTO {}\n{}", table, sql), true)
    }
}

fn cell_from_ref(value: ValueRef<'_>) -> CellValue {
    match value {
        ValueRef::Null => CellValue::Null,
        ValueRef::Integer(v) => CellValue::Integer(v),
        ValueRef::Real(v) => CellValue::Real(v),
        ValueRef::Text(bytes) => CellValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => CellValue::Blob(bytes.to_vec()),
    }
}
