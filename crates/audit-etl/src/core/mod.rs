//! Core types shared by the loaders and the auditor.
//!
//! - [`schema`]: source column metadata, target storage classes, DDL synthesis
//! - [`value`]: raw cell values read from a source
//! - [`identifier`]: column-name sanitization and literal escaping

pub mod identifier;
pub mod schema;
pub mod value;

pub use schema::{
    derive_table_name, mssql_catalog_query, synthesize, SourceColumn, SourceType, TableSchema,
    TargetColumn, TargetType,
};
pub use value::{CellValue, Row};
