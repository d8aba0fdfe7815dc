//! Post-load key uniqueness audit.
//!
//! The audit works in two stages. It first creates a plain (non-unique)
//! supporting index so the table stays loadable even when duplicates exist.
//! It then measures the largest group of rows sharing the key.
//!
//! When a key repeats, the auditor applies the long-standing corrective action:
//! every row in the upper half of the table by rowid is deleted, with
//! `cut = max_rowid / 2 + 1`. This does not pick out the duplicated rows and can
//! discard valid data. A warning asking for a full reload is attached to the
//! result, so the operator re-runs the load instead of trusting the table.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::identifier::{validate_identifier, validate_table_name};
use crate::error::{EtlError, Result};
use crate::target::StatementGateway;

/// Outcome of a uniqueness audit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateAuditResult {
    pub table: String,
    pub key_columns: Vec<String>,
    /// Largest number of rows sharing one key; 0 for an empty table.
    pub max_group_size: i64,
    /// Rows removed by the corrective delete.
    pub corrective_rows_deleted: u64,
    pub min_rowid: Option<i64>,
    pub max_rowid: Option<i64>,
    pub check_sql: String,
    pub delete_sql: Option<String>,
    /// Operator-facing message, set only when duplicates were found.
    pub warning: Option<String>,
}

impl DuplicateAuditResult {
    /// True when no key repeats.
    pub fn is_clean(&self) -> bool {
        self.max_group_size <= 1
    }
}

fn validate_keys(keys: &[String]) -> Result<()> {
    if keys.is_empty() {
        return Err(EtlError::Config(
            "at least one key column is required".to_string(),
        ));
    }
    keys.iter().try_for_each(|k| validate_identifier(k))
}

/// `CREATE INDEX IF NOT EXISTS [schema.]table_k1_k2 ON table (k1 ASC, k2 ASC)`.
pub fn index_statement(schema: Option<&str>, table: &str, keys: &[String]) -> Result<String> {
    validate_identifier(table)?;
    if let Some(schema) = schema {
        validate_identifier(schema)?;
    }
    validate_keys(keys)?;

    let prefix = schema.map(|s| format!("{}.", s)).unwrap_or_default();
    let columns: Vec<String> = keys.iter().map(|k| format!("{} ASC", k)).collect();
    Ok(format!(
        "CREATE INDEX IF NOT EXISTS {}{}_{} ON {} ({});",
        prefix,
        table,
        keys.join("_"),
        table,
        columns.join(", ")
    ))
}

/// Query returning the largest key group size of `table`.
pub fn group_size_query(table: &str, keys: &[String]) -> String {
    format!(
        "SELECT max(qtd) AS rept FROM (SELECT count(*) AS qtd FROM {} GROUP BY {});",
        table,
        keys.join(", ")
    )
}

/// First rowid removed by the corrective delete.
pub fn corrective_cut(max_rowid: i64) -> i64 {
    max_rowid / 2 + 1
}

/// Creates supporting indexes and audits key uniqueness.
pub struct IndexAuditor<'g> {
    gateway: &'g StatementGateway,
}

impl<'g> IndexAuditor<'g> {
    pub fn new(gateway: &'g StatementGateway) -> Self {
        Self { gateway }
    }

    /// Create a supporting index on `table` (idempotent).
    pub fn create_index(&self, schema: Option<&str>, table: &str, keys: &[String]) -> Result<()> {
        let sql = index_statement(schema, table, keys)?;
        self.gateway.execute(&sql, true)
    }

    /// Index `table` on `keys` and check that no key repeats.
    ///
    /// `table` may be qualified with an attached database alias. Duplicates
    /// are reported through the result (and a warning), never as an error.
    pub fn audit_unique(&self, table: &str, keys: &[String]) -> Result<DuplicateAuditResult> {
        validate_table_name(table)?;
        validate_keys(keys)?;

        match table.split_once('.') {
            Some((schema, name)) => self.create_index(Some(schema), name, keys)?,
            None => self.create_index(None, table, keys)?,
        }

        let check_sql = group_size_query(table, keys);
        let max_group_size = self.gateway.query_i64(&check_sql, true)?.unwrap_or(0);
        let mut result = DuplicateAuditResult {
            table: table.to_string(),
            key_columns: keys.to_vec(),
            max_group_size,
            check_sql,
            ..Default::default()
        };

        if result.is_clean() {
            info!("{}: key ({}) is unique", table, keys.join(", "));
            return Ok(result);
        }

        let diagnostic = format!(
            "Duplicate key ({}) in {}: max group size {}",
            keys.join(", "),
            table,
            max_group_size
        );
        warn!("{}\n  SQL: {}", diagnostic, result.check_sql);

        result.min_rowid = self
            .gateway
            .query_i64(&format!("SELECT min(rowid) AS minrowid FROM {};", table), true)?;
        result.max_rowid = self
            .gateway
            .query_i64(&format!("SELECT max(rowid) AS maxrowid FROM {};", table), true)?;
        debug!(
            "{}: rowid range {:?}..{:?}",
            table, result.min_rowid, result.max_rowid
        );

        if let Some(max_rowid) = result.max_rowid {
            let delete_sql = format!(
                "DELETE FROM {} WHERE rowid >= {};",
                table,
                corrective_cut(max_rowid)
            );
            self.gateway.execute(&delete_sql, true)?;
            result.corrective_rows_deleted = self.gateway.changes();
            result.delete_sql = Some(delete_sql);
        }

        let warning = format!(
            "{}. Deleted {} rows from the upper half of the table; re-run the full load and review the log.",
            diagnostic, result.corrective_rows_deleted
        );
        warn!("{}", warning);
        result.warning = Some(warning);
        Ok(result)
    }
}
