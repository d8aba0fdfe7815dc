//! Configuration type definitions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::pipeline::Step;
use crate::transfer::{DEFAULT_COMMIT_THRESHOLD, DEFAULT_NUMERIC_LITERAL_MAX_LEN};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target store layout.
    pub store: StoreConfig,

    /// Bulk load behavior.
    #[serde(default)]
    pub load: LoadConfig,

    /// Text file loading behavior.
    #[serde(default)]
    pub text: TextConfig,

    /// Job steps, run in order by `run`.
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Where database files live and which ones are attached on open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the database files (default: ".").
    #[serde(default = "default_result_dir")]
    pub result_dir: PathBuf,

    /// Main database name; the file is `<name>.db3`.
    pub database: String,

    /// Subject (audited company) subdirectory under `result_dir`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// Databases attached to every connection.
    #[serde(default)]
    pub attach: Vec<AttachConfig>,
}

/// A database attached under an alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachConfig {
    /// Database name; the file is `<name>.db3` next to the main one.
    pub database: String,

    /// Schema alias (default: the database name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl AttachConfig {
    /// Effective alias.
    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.database)
    }
}

/// Bulk load configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Cells written between commits (default: 250000).
    #[serde(default = "default_commit_threshold")]
    pub commit_threshold: u64,

    /// Text at least this long is never rewritten as a number (default: 25).
    #[serde(default = "default_numeric_literal_max_len")]
    pub numeric_literal_max_len: usize,

    /// Source database name markers used to prefix derived table names.
    #[serde(default = "default_table_markers")]
    pub table_markers: Vec<String>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            commit_threshold: default_commit_threshold(),
            numeric_literal_max_len: default_numeric_literal_max_len(),
            table_markers: default_table_markers(),
        }
    }
}

/// Text file loading configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextConfig {
    /// Whether files carry a header line, unless a step says otherwise (default: true).
    #[serde(default = "default_true")]
    pub has_header: bool,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self { has_header: true }
    }
}

fn default_result_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_commit_threshold() -> u64 {
    DEFAULT_COMMIT_THRESHOLD
}

fn default_numeric_literal_max_len() -> usize {
    DEFAULT_NUMERIC_LITERAL_MAX_LEN
}

fn default_table_markers() -> Vec<String> {
    vec!["DocAtrib".to_string(), "Dfe".to_string()]
}

fn default_true() -> bool {
    true
}
