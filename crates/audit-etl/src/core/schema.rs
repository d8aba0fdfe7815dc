//! Source column metadata, target schema types and DDL synthesis.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::identifier::{sanitize_column_name, validate_table_name};
use crate::error::Result;
use crate::typemap::classify;

/// Type identifier as reported by a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceType {
    /// Field type code from a live cursor.
    Code(i32),
    /// Type name from a catalog query.
    Name(String),
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Code(code) => write!(f, "{}", code),
            SourceType::Name(name) => f.write_str(name),
        }
    }
}

/// Column as reported by the source's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceColumn {
    /// Column name, unsanitized.
    pub name: String,

    /// Source type identifier.
    pub source_type: SourceType,
}

impl SourceColumn {
    /// Column with a cursor type code.
    pub fn with_code(name: impl Into<String>, code: i32) -> Self {
        Self {
            name: name.into(),
            source_type: SourceType::Code(code),
        }
    }

    /// Column with a catalog type name.
    pub fn with_name(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type: SourceType::Name(type_name.into()),
        }
    }
}

/// SQLite storage class every source type collapses into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Integer,
    Real,
    Text,
    BlobOrNull,
}

impl TargetType {
    /// Column type keyword used in `CREATE TABLE`.
    pub fn sql_keyword(self) -> &'static str {
        match self {
            TargetType::Integer => "INT",
            TargetType::Real => "REAL",
            TargetType::Text => "TEXT",
            TargetType::BlobOrNull => "BLOB",
        }
    }

    /// Whether text cells in this column are candidates for bare numeric literals.
    pub fn is_numeric(self) -> bool {
        matches!(self, TargetType::Integer | TargetType::Real)
    }
}

/// A column of the synthesized target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetColumn {
    /// Sanitized, deduplicated name.
    pub name: String,

    /// Storage class.
    pub target_type: TargetType,
}

/// Target table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Target table name.
    pub table_name: String,

    /// Ordered column definitions, names pairwise unique.
    pub columns: Vec<TargetColumn>,
}

impl TableSchema {
    /// Build a schema from source columns, sanitizing and deduplicating names.
    ///
    /// A sanitized name that already exists gets `_` appended until it is unique;
    /// the first column to claim a name keeps it.
    pub fn from_source(table_name: &str, source_columns: &[SourceColumn]) -> Result<Self> {
        let mut seen = HashSet::with_capacity(source_columns.len());
        let mut columns = Vec::with_capacity(source_columns.len());

        for col in source_columns {
            let mut name = sanitize_column_name(&col.name);
            while seen.contains(&name) {
                name.push('_');
            }
            seen.insert(name.clone());
            columns.push(TargetColumn {
                name,
                target_type: classify(&col.source_type)?,
            });
        }

        Ok(Self {
            table_name: table_name.to_string(),
            columns,
        })
    }

    /// Column storage classes in positional order.
    pub fn types(&self) -> Vec<TargetType> {
        self.columns.iter().map(|c| c.target_type).collect()
    }

    /// Column names in positional order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Generate the `CREATE TABLE IF NOT EXISTS` statement for this schema.
    pub fn create_table_sql(&self) -> String {
        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.target_type.sql_keyword()))
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({});",
            self.table_name,
            cols.join(", ")
        )
    }
}

/// Turn source metadata into a target schema and its DDL.
///
/// Nothing is executed; the caller runs the returned statement.
pub fn synthesize(table_name: &str, source_columns: &[SourceColumn]) -> Result<(TableSchema, String)> {
    validate_table_name(table_name)?;
    let schema = TableSchema::from_source(table_name, source_columns)?;
    let ddl = schema.create_table_sql();
    Ok((schema, ddl))
}

/// SQL Server catalog query listing `(system_type_name, name)` for every column
/// of `table` in `database`, in column order.
///
/// User-defined alias types are filtered out so each column appears once with
/// its base system type.
pub fn mssql_catalog_query(database: &str, table: &str) -> String {
    format!(
        r#"SELECT sTYP.name AS system_type_name, sCOL.name AS name FROM {database}.sys.columns AS sCOL
INNER JOIN {database}.sys.types AS sTYP ON sTYP.system_type_id = sCOL.system_type_id
WHERE object_id = OBJECT_ID('{qualified}') AND sTYP.system_type_id = sTYP.user_type_id
ORDER BY column_id"#,
        database = database,
        qualified = format!("{}.{}", database, table).replace('\'', "''"),
    )
}

/// Derive the local table name for a remote `database` + `table` pair.
///
/// The prefix is the first marker contained in the database name (empty when
/// none matches), then `_`, then the table name with brackets removed and dots
/// turned into underscores.
///
/// ```
/// use audit_etl::core::schema::derive_table_name;
/// let markers = ["DocAtrib".to_string(), "Dfe".to_string()];
/// assert_eq!(derive_table_name("[Osf_Dfe_1]", "[dbo].[Nota]", &markers), "Dfe_dbo_Nota");
/// assert_eq!(derive_table_name("[Main]", "dbo.Item", &markers), "_dbo_Item");
/// ```
pub fn derive_table_name(database: &str, table: &str, markers: &[String]) -> String {
    let prefix = markers
        .iter()
        .find(|m| database.contains(m.as_str()))
        .map(String::as_str)
        .unwrap_or("");
    let cleaned = table.replace(['[', ']'], "").replace('.', "_");
    format!("{}_{}", prefix, cleaned)
}
