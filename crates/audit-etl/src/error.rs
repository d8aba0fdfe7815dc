//! Error types for the ETL library.

use thiserror::Error;

/// Main error type for load and audit operations.
#[derive(Error, Debug)]
pub enum EtlError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A catalog type name outside the known mapping lists.
    #[error("Cannot map source type name '{0}' to a target storage class")]
    UnknownSourceTypeName(String),

    /// A DDL, transaction control or query statement was rejected by the target store.
    #[error("Statement failed: {message}\n  SQL: {sql}")]
    Statement { sql: String, message: String },

    /// Target store error outside a guarded statement (open, attach, row decoding)
    #[error("Target store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A job step that is not registered with the orchestrator
    #[error("Unknown step: {0}")]
    UnknownCommand(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EtlError {
    /// Create a Statement error from the attempted SQL and the backend diagnostic.
    pub fn statement(sql: impl Into<String>, message: impl Into<String>) -> Self {
        EtlError::Statement {
            sql: sql.into(),
            message: message.into(),
        }
    }

    /// Process exit code for the binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            EtlError::Config(_) | EtlError::Yaml(_) | EtlError::UnknownCommand(_) => 2,
            EtlError::UnknownSourceTypeName(_) => 3,
            EtlError::Statement { .. } | EtlError::Sqlite(_) => 4,
            EtlError::Io(_) | EtlError::Json(_) => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for ETL operations.
pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_error_carries_sql_and_message() {
        let err = EtlError::statement("CREATE TABLE x (", "incomplete input");
        let text = err.to_string();
        assert!(text.contains("CREATE TABLE x ("));
        assert!(text.contains("incomplete input"));
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(EtlError::Config("x".into()).exit_code(), 2);
        assert_eq!(
            EtlError::UnknownSourceTypeName("cursor".into()).exit_code(),
            3
        );
        assert_eq!(EtlError::UnknownCommand("nope".into()).exit_code(), 2);
    }

    #[test]
    fn test_format_detailed_includes_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.txt");
        let err = EtlError::from(io);
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: IO error"));
    }
}
