//! Identifier sanitization and literal escaping for SQLite statements.
//!
//! Column names reported by source catalogs may contain spaces, slashes,
//! parentheses or even line breaks. None of those are quoted when the DDL is
//! emitted, so every name is rewritten into a bare SQLite identifier first.
//!
//! Table names and key columns passed in by callers (job files, CLI flags) are
//! validated instead of rewritten, because a silently renamed table would load
//! data somewhere nobody looks.

use crate::error::{EtlError, Result};

/// Maximum identifier length accepted from callers.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Characters replaced by `_` when sanitizing a source column name.
const REPLACED_CHARS: [char; 6] = ['\n', '/', ' ', '(', ')', '-'];

/// Rewrite a source column name into a bare identifier.
///
/// Carriage returns are dropped; line feeds, `/`, spaces, parentheses and
/// `-` become `_`.
///
/// ```
/// use audit_etl::core::identifier::sanitize_column_name;
/// assert_eq!(sanitize_column_name("Valor (R$)"), "Valor__R$_");
/// assert_eq!(sanitize_column_name("A-B"), "A_B");
/// ```
pub fn sanitize_column_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '\r')
        .map(|c| if REPLACED_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Escape a value for use inside a single-quoted SQLite string literal.
///
/// Only the quote character needs doubling; this cannot fail.
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Validate a caller-supplied table, column or schema name.
///
/// Rejects empty names, names with null bytes, names longer than 128 bytes
/// and anything that is not `[A-Za-z0-9_$]` (a leading digit is also rejected).
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(EtlError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(EtlError::Config(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(EtlError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    if name.starts_with(|c: char| c.is_ascii_digit())
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    {
        return Err(EtlError::Config(format!(
            "Identifier must be a bare SQLite name: {:?}",
            name
        )));
    }

    Ok(())
}

/// Validate a possibly schema-qualified table name (`alias.table` or `table`).
pub fn validate_table_name(name: &str) -> Result<()> {
    match name.split_once('.') {
        Some((schema, table)) => {
            validate_identifier(schema)?;
            validate_identifier(table)
        }
        None => validate_identifier(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_specials() {
        assert_eq!(sanitize_column_name("A B"), "A_B");
        assert_eq!(sanitize_column_name("A-B"), "A_B");
        assert_eq!(sanitize_column_name("ICMS/ST"), "ICMS_ST");
        assert_eq!(sanitize_column_name("f(x)"), "f_x_");
    }

    #[test]
    fn test_sanitize_drops_carriage_return() {
        assert_eq!(sanitize_column_name("Line\r\nBreak"), "Line_Break");
    }

    #[test]
    fn test_escape_literal_doubles_quotes() {
        assert_eq!(escape_literal("O'Brien"), "O''Brien");
        assert_eq!(escape_literal(""), "");
    }

    #[test]
    fn test_validate_identifier_normal() {
        assert!(validate_identifier("nfe_itens").is_ok());
        assert!(validate_identifier("Dfe_dbo_Nota").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_bad_names() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("a\0b").is_err());
        assert!(validate_identifier("x; DROP TABLE y").is_err());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_validate_identifier_accepts_max_length() {
        assert!(validate_identifier(&"a".repeat(128)).is_ok());
    }

    #[test]
    fn test_validate_table_name_qualified() {
        assert!(validate_table_name("osf.nota").is_ok());
        assert!(validate_table_name("osf.").is_err());
        assert!(validate_table_name("a.b.c").is_err());
    }
}
