//! Type mapping from source column types to SQLite storage classes.
//!
//! Two shapes of type identifier reach the loader: small integer codes from a
//! live cursor's field metadata (ADO `DataTypeEnum` values) and textual names
//! from the SQL Server catalog (`sys.types.name`). Both collapse into the four
//! [`TargetType`] classes.
//!
//! The two paths fail differently. Cursor codes never fail: a code missing
//! from the tables below is classified as [`TargetType::Text`]. Catalog names
//! are only accepted from the lists below, anything else is
//! [`EtlError::UnknownSourceTypeName`].

use crate::core::schema::{SourceType, TargetType};
use crate::error::{EtlError, Result};

const INTEGER_CODES: &[i32] = &[2, 3, 11, 16, 17, 18, 19, 20, 21, 128, 136, 204, 205];
const REAL_CODES: &[i32] = &[4, 5, 6, 14, 64, 131, 139];
const TEXT_CODES: &[i32] = &[
    7, 8, 72, 129, 130, 132, 133, 135, 138, 200, 201, 202, 203,
];
const BLOB_OR_NULL_CODES: &[i32] = &[0, 9, 10, 12, 13];

/// Classify either shape of source type.
pub fn classify(source_type: &SourceType) -> Result<TargetType> {
    match source_type {
        SourceType::Code(code) => Ok(classify_code(*code)),
        SourceType::Name(name) => classify_name(name),
    }
}

/// Classify a cursor field type code. Unlisted codes map to `Text`.
pub fn classify_code(code: i32) -> TargetType {
    if INTEGER_CODES.contains(&code) {
        TargetType::Integer
    } else if REAL_CODES.contains(&code) {
        TargetType::Real
    } else if TEXT_CODES.contains(&code) {
        TargetType::Text
    } else if BLOB_OR_NULL_CODES.contains(&code) {
        TargetType::BlobOrNull
    } else {
        TargetType::Text
    }
}

/// Classify a catalog type name (case-insensitive).
pub fn classify_name(name: &str) -> Result<TargetType> {
    match name.trim().to_lowercase().as_str() {
        // Integer types
        "tinyint" | "smallint" | "int" | "bit" | "bigint" => Ok(TargetType::Integer),

        // Decimal / floating point
        "real" | "money" | "float" | "decimal" | "numeric" | "smallmoney" => {
            Ok(TargetType::Real)
        }

        // Character, temporal, identifier and spatial types are all kept as text
        "text" | "uniqueidentifier" | "date" | "time" | "datetime2" | "datetimeoffset"
        | "smalldatetime" | "datetime" | "sql_variant" | "ntext" | "varbinary" | "binary"
        | "varchar" | "char" | "timestamp" | "sysname" | "nvarchar" | "nchar"
        | "geography" | "geometry" | "hierarchyid" | "xml" => Ok(TargetType::Text),

        "image" => Ok(TargetType::BlobOrNull),

        _ => Err(EtlError::UnknownSourceTypeName(name.to_string())),
    }
}
