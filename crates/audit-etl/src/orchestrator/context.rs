//! Database file locations for one export run.

use std::path::PathBuf;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::target::StatementGateway;

/// File extension of every target database.
pub const DB_EXTENSION: &str = "db3";

/// File extension of query exports.
pub const TEXT_EXTENSION: &str = "txt";

/// Where the current run's databases live.
///
/// Passed explicitly to everything that opens or attaches a database file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportContext {
    result_dir: PathBuf,
    subject: Option<String>,
}

impl ExportContext {
    pub fn new(result_dir: impl Into<PathBuf>, subject: Option<String>) -> Self {
        Self {
            result_dir: result_dir.into(),
            subject,
        }
    }

    /// Context for the configured store.
    pub fn from_config(store: &StoreConfig) -> Self {
        Self::new(store.result_dir.clone(), store.subject.clone())
    }

    /// Subject being audited, if any.
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Directory holding this run's database files.
    pub fn dir(&self) -> PathBuf {
        match &self.subject {
            Some(subject) => self.result_dir.join(subject),
            None => self.result_dir.clone(),
        }
    }

    /// File backing database `name`.
    pub fn db_path(&self, name: &str) -> PathBuf {
        self.dir().join(format!("{}.{}", name, DB_EXTENSION))
    }

    /// File a query export named `name` is written to.
    pub fn text_path(&self, name: &str) -> PathBuf {
        self.dir().join(format!("{}.{}", name, TEXT_EXTENSION))
    }

    /// Open database `name`, creating it when missing.
    pub fn open(&self, name: &str) -> Result<StatementGateway> {
        StatementGateway::open(self.db_path(name))
    }

    /// Whether database `name` already exists.
    pub fn exists(&self, name: &str) -> bool {
        self.db_path(name).exists()
    }
}
