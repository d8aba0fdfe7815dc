//! # audit-etl
//!
//! Heterogeneous-schema ETL engine for offline audit work.
//!
//! This library loads data from remote relational sources and tab-separated
//! text files into local SQLite databases, with support for:
//!
//! - **Schema synthesis** from source column metadata (cursor type codes or
//!   catalog type names)
//! - **Bulk loading** with chunked commits and locale-aware numeric coercion
//! - **Text loading** with per-line UTF-8 / Windows-1252 detection
//! - **Uniqueness audits** that index key columns and flag duplicates
//! - **Query exports** to tab-separated text
//! - **Job files** describing the steps of an audit export
//!
//! ## Example
//!
//! ```rust,no_run
//! use audit_etl::{Config, Orchestrator};
//!
//! fn main() -> audit_etl::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config)?;
//!     let result = orchestrator.run_all()?;
//!     println!("Ran {} steps", result.steps.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod export;
pub mod orchestrator;
pub mod pipeline;
pub mod source;
pub mod target;
pub mod text;
pub mod transfer;
pub mod typemap;
pub mod verify;

// Re-exports for convenient access
pub use config::{AttachConfig, Config, LoadConfig, StoreConfig, TextConfig};
pub use crate::core::{CellValue, Row, SourceColumn, SourceType, TableSchema, TargetType};
pub use error::{EtlError, Result};
pub use export::{query_to_tsv, QueryExportReport};
pub use orchestrator::{ExportContext, JobResult, Orchestrator, StepDetail, StepResult};
pub use pipeline::{Command, MenuEntry, Step};
pub use source::{MemorySource, RecordSource, RecordStream, StreamSchema};
pub use target::StatementGateway;
pub use text::{DelimitedTextLoader, TextLoadReport};
pub use transfer::{BulkLoader, LoadReport, ProgressSink, TransferConfig};
pub use verify::{DuplicateAuditResult, IndexAuditor};
