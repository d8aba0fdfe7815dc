//! Job orchestrator - step registry and workflow coordinator.
//!
//! Steps are registered by name and dispatched to a handler per command
//! kind. Each step runs on its own connection: the first database it uses is
//! opened as main, the configured databases and the rest of its `uses` list
//! are attached.

mod context;

pub use context::{ExportContext, DB_EXTENSION, TEXT_EXTENSION};

use crate::config::Config;
use crate::core::schema::{derive_table_name, synthesize};
use crate::error::{EtlError, Result};
use crate::export::{query_to_tsv, QueryExportReport};
use crate::pipeline::{Command, MenuEntry, Step};
use crate::source::{RecordSource, RecordStream};
use crate::target::StatementGateway;
use crate::text::{read_catalog, DelimitedTextLoader, TextLoadReport};
use crate::transfer::{export_table, LoadReport, TransferConfig};
use crate::verify::{DuplicateAuditResult, IndexAuditor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Handler for one command kind.
pub type Handler = fn(&Orchestrator, &StatementGateway, &Command) -> Result<StepDetail>;

/// What a step produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepDetail {
    /// A table was created with these columns.
    Created { columns: Vec<String> },
    /// A text file was loaded.
    TextLoaded(TextLoadReport),
    /// A uniqueness audit ran.
    Audited(DuplicateAuditResult),
    /// A query result was written to a file.
    Exported(QueryExportReport),
    /// A statement ran.
    Executed,
}

/// Result of one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Step name.
    pub name: String,

    /// Command kind.
    pub command: String,

    /// Duration in seconds.
    pub duration_seconds: f64,

    /// What the step produced.
    pub detail: StepDetail,
}

impl StepResult {
    /// Warning raised by the step, if any.
    pub fn warning(&self) -> Option<&str> {
        match &self.detail {
            StepDetail::Audited(audit) => audit.warning.as_deref(),
            _ => None,
        }
    }
}

/// Result of a job run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: String,

    /// Hash of the configuration the run used.
    pub config_hash: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Per-step results, in execution order.
    pub steps: Vec<StepResult>,

    /// Operator-facing warnings collected from the steps.
    pub warnings: Vec<String>,
}

impl JobResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Job orchestrator.
pub struct Orchestrator {
    config: Config,
    context: ExportContext,
    steps: Vec<Step>,
    handlers: HashMap<&'static str, Handler>,
}

impl Orchestrator {
    /// Create an orchestrator and register the configured steps.
    pub fn new(config: Config) -> Result<Self> {
        let context = ExportContext::from_config(&config.store);
        let steps = config.steps.clone();
        let mut orchestrator = Self {
            config,
            context,
            steps: Vec::new(),
            handlers: default_handlers(),
        };
        for step in steps {
            orchestrator.register(step)?;
        }
        Ok(orchestrator)
    }

    /// Use a different export context.
    pub fn with_context(mut self, context: ExportContext) -> Self {
        self.context = context;
        self
    }

    /// Export context in use.
    pub fn context(&self) -> &ExportContext {
        &self.context
    }

    /// Configuration in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register a step. Names must be unique.
    pub fn register(&mut self, step: Step) -> Result<()> {
        if self.steps.iter().any(|s| s.name == step.name) {
            return Err(EtlError::Config(format!(
                "step '{}' is already registered",
                step.name
            )));
        }
        debug!("Registered step {} ({})", step.name, step.command.kind());
        self.steps.push(step);
        Ok(())
    }

    /// Replace the handler for a command kind.
    pub fn set_handler(&mut self, kind: &'static str, handler: Handler) {
        self.handlers.insert(kind, handler);
    }

    /// Registered steps, in registration order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Menu entries for the registered steps.
    pub fn menu(&self) -> Vec<MenuEntry> {
        self.steps.iter().map(Step::menu_entry).collect()
    }

    /// Run one registered step by name.
    pub fn invoke(&self, name: &str) -> Result<StepResult> {
        let step = self
            .steps
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| EtlError::UnknownCommand(name.to_string()))?;
        self.run_step(step)
    }

    /// Run every registered step in order. The first fatal error stops the run.
    pub fn run_all(&self) -> Result<JobResult> {
        let started_at = Utc::now();
        let start = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(
            "Starting job run: {} ({} steps, subject {})",
            run_id,
            self.steps.len(),
            self.context.subject().unwrap_or("-")
        );

        let mut steps = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            steps.push(self.run_step(step)?);
        }

        let warnings: Vec<String> = steps
            .iter()
            .filter_map(|s| s.warning().map(str::to_string))
            .collect();
        let status = if warnings.is_empty() {
            "completed"
        } else {
            "completed_with_warnings"
        };

        let result = JobResult {
            run_id,
            status: status.to_string(),
            config_hash: self.config.hash(),
            started_at,
            completed_at: Utc::now(),
            duration_seconds: start.elapsed().as_secs_f64(),
            steps,
            warnings,
        };

        info!(
            "Job {}: {} steps in {:.1}s",
            result.status,
            result.steps.len(),
            result.duration_seconds
        );
        Ok(result)
    }

    /// Open the connection a step runs on.
    pub fn open_for(&self, step: &Step) -> Result<StatementGateway> {
        let main = step
            .uses
            .first()
            .map(String::as_str)
            .unwrap_or(&self.config.store.database);
        let gateway = self.context.open(main)?;

        let mut attached = HashSet::new();
        attached.insert(main.to_string());
        for attach in &self.config.store.attach {
            if attached.insert(attach.alias().to_string()) {
                gateway.attach(self.context.db_path(&attach.database), attach.alias())?;
            }
        }
        for db in step.uses.iter().skip(1) {
            if attached.insert(db.clone()) {
                gateway.attach(self.context.db_path(db), db)?;
            }
        }
        Ok(gateway)
    }

    fn run_step(&self, step: &Step) -> Result<StepResult> {
        let kind = step.command.kind();
        let handler = self
            .handlers
            .get(kind)
            .ok_or_else(|| EtlError::UnknownCommand(kind.to_string()))?;

        match step.command.table() {
            Some(table) => info!("Running step {} ({} on {})", step.name, kind, table),
            None => info!("Running step {} ({})", step.name, kind),
        }
        let start = Instant::now();
        let gateway = self.open_for(step)?;
        let detail = handler(self, &gateway, &step.command)?;

        let result = StepResult {
            name: step.name.clone(),
            command: kind.to_string(),
            duration_seconds: start.elapsed().as_secs_f64(),
            detail,
        };
        if let Some(warning) = result.warning() {
            warn!("Step {}: {}", step.name, warning);
        }
        Ok(result)
    }

    /// Export a remote table read through `source` into the main store.
    ///
    /// The local table name is derived from the source database and table
    /// names using the configured markers.
    pub fn export<S: RecordSource>(
        &self,
        source_database: &str,
        source_table: &str,
        source: S,
    ) -> Result<LoadReport> {
        let table = derive_table_name(
            source_database,
            source_table,
            &self.config.load.table_markers,
        );
        info!("Exporting {}.{} as {}", source_database, source_table, table);

        let gateway = self.context.open(&self.config.store.database)?;
        let mut stream = RecordStream::new(source);
        let (_, report) = export_table(
            &gateway,
            &table,
            &mut stream,
            TransferConfig::from(&self.config.load),
        )?;
        Ok(report)
    }
}

fn default_handlers() -> HashMap<&'static str, Handler> {
    let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
    handlers.insert("create_table", handle_create_table);
    handlers.insert("create_table_from_catalog", handle_create_table);
    handlers.insert("load_text", handle_load_text);
    handlers.insert("audit_unique", handle_audit);
    handlers.insert("create_index", handle_create_index);
    handlers.insert("attach", handle_attach);
    handlers.insert("sql", handle_sql);
    handlers.insert("create_table_as", handle_create_table_as);
    handlers.insert("query_to_text", handle_query_to_text);
    handlers
}

fn mismatch(expected: &str, command: &Command) -> EtlError {
    EtlError::UnknownCommand(format!(
        "{} handler cannot run {}",
        expected,
        command.kind()
    ))
}

fn handle_create_table(
    _orch: &Orchestrator,
    gateway: &StatementGateway,
    command: &Command,
) -> Result<StepDetail> {
    let (table, columns) = match command {
        Command::CreateTable { table, columns } => (table, columns.clone()),
        Command::CreateTableFromCatalog { table, catalog } => (table, read_catalog(catalog)?),
        other => return Err(mismatch("create_table", other)),
    };
    let (schema, ddl) = synthesize(table, &columns)?;
    gateway.execute(&ddl, true)?;
    Ok(StepDetail::Created {
        columns: schema.column_names().into_iter().map(str::to_string).collect(),
    })
}

fn handle_load_text(
    orch: &Orchestrator,
    gateway: &StatementGateway,
    command: &Command,
) -> Result<StepDetail> {
    let Command::LoadText {
        path,
        table,
        has_header,
    } = command
    else {
        return Err(mismatch("load_text", command));
    };
    let has_header = has_header.unwrap_or(orch.config.text.has_header);
    let report = DelimitedTextLoader::new(gateway).load_from_text(path, table, has_header)?;
    Ok(StepDetail::TextLoaded(report))
}

fn handle_audit(
    _orch: &Orchestrator,
    gateway: &StatementGateway,
    command: &Command,
) -> Result<StepDetail> {
    let Command::AuditUnique { table, keys } = command else {
        return Err(mismatch("audit_unique", command));
    };
    let result = IndexAuditor::new(gateway).audit_unique(table, keys)?;
    Ok(StepDetail::Audited(result))
}

fn handle_create_index(
    _orch: &Orchestrator,
    gateway: &StatementGateway,
    command: &Command,
) -> Result<StepDetail> {
    let Command::CreateIndex {
        table,
        keys,
        schema,
    } = command
    else {
        return Err(mismatch("create_index", command));
    };
    IndexAuditor::new(gateway).create_index(schema.as_deref(), table, keys)?;
    Ok(StepDetail::Executed)
}

fn handle_attach(
    orch: &Orchestrator,
    gateway: &StatementGateway,
    command: &Command,
) -> Result<StepDetail> {
    let Command::Attach { database, alias } = command else {
        return Err(mismatch("attach", command));
    };
    let alias = alias.as_deref().unwrap_or(database);
    gateway.attach(orch.context.db_path(database), alias)?;
    Ok(StepDetail::Executed)
}

fn handle_sql(
    _orch: &Orchestrator,
    gateway: &StatementGateway,
    command: &Command,
) -> Result<StepDetail> {
    let Command::Sql { sql } = command else {
        return Err(mismatch("sql", command));
    };
    gateway.execute(sql, true)?;
    Ok(StepDetail::Executed)
}

fn handle_create_table_as(
    _orch: &Orchestrator,
    gateway: &StatementGateway,
    command: &Command,
) -> Result<StepDetail> {
    let Command::CreateTableAs { table, sql, temp } = command else {
        return Err(mismatch("create_table_as", command));
    };
    if *temp {
        gateway.create_temp_table_from_sql(table, sql)?;
    } else {
        gateway.create_table_from_sql(table, sql)?;
    }
    Ok(StepDetail::Executed)
}

fn handle_query_to_text(
    orch: &Orchestrator,
    gateway: &StatementGateway,
    command: &Command,
) -> Result<StepDetail> {
    let Command::QueryToText {
        sql,
        output,
        max_cells,
    } = command
    else {
        return Err(mismatch("query_to_text", command));
    };
    let report = query_to_tsv(gateway, sql, orch.context.text_path(output), *max_cells)?;
    Ok(StepDetail::Exported(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AttachConfig, LoadConfig, StoreConfig, TextConfig};
    use crate::core::schema::SourceColumn;
    use crate::core::value::CellValue;
    use crate::source::MemorySource;
    use std::path::Path;

    fn config_in(dir: &Path, steps: Vec<Step>) -> Config {
        Config {
            store: StoreConfig {
                result_dir: dir.to_path_buf(),
                database: "osf".to_string(),
                subject: Some("acme".to_string()),
                attach: vec![],
            },
            load: LoadConfig::default(),
            text: TextConfig::default(),
            steps,
        }
    }

    fn create_items() -> Step {
        Step::new(
            "create-items",
            Command::CreateTable {
                table: "items".to_string(),
                columns: vec![
                    SourceColumn::with_name("chave", "int"),
                    SourceColumn::with_name("descricao", "varchar"),
                ],
            },
        )
    }

    #[test]
    fn test_run_all_loads_and_audits() {
        let dir = tempfile::tempdir().unwrap();
        let tsv = dir.path().join("items.tsv");
        std::fs::write(&tsv, "chave\tdescricao\n1\ta\n2\tb\n2\tc\n\n").unwrap();

        let steps = vec![
            create_items(),
            Step::new(
                "load-items",
                Command::LoadText {
                    path: tsv,
                    table: "items".to_string(),
                    has_header: None,
                },
            ),
            Step::new(
                "audit-items",
                Command::AuditUnique {
                    table: "items".to_string(),
                    keys: vec!["chave".to_string()],
                },
            ),
        ];
        let orch = Orchestrator::new(config_in(dir.path(), steps)).unwrap();
        let result = orch.run_all().unwrap();

        assert_eq!(result.steps.len(), 3);
        assert_eq!(result.status, "completed_with_warnings");
        assert_eq!(result.warnings.len(), 1);
        match &result.steps[1].detail {
            StepDetail::TextLoaded(report) => assert_eq!(report.rows_inserted, 3),
            other => panic!("unexpected detail {:?}", other),
        }

        // rowids 1..3, cut = 3 / 2 + 1 = 2
        let gw = orch.context().open("osf").unwrap();
        assert_eq!(gw.query_i64("SELECT count(*) FROM items", false).unwrap(), Some(1));
        assert!(result.to_json().unwrap().contains("\"run_id\""));
    }

    #[test]
    fn test_query_to_text_step_writes_under_subject() {
        let dir = tempfile::tempdir().unwrap();
        let steps = vec![
            create_items(),
            Step::new(
                "fill-items",
                Command::Sql {
                    sql: "INSERT INTO items VALUES (1, 'a'), (2, 'b');".to_string(),
                },
            ),
            Step::new(
                "report-items",
                Command::QueryToText {
                    sql: "SELECT chave, descricao FROM items ORDER BY chave".to_string(),
                    output: "relatorios/items".to_string(),
                    max_cells: None,
                },
            ),
        ];
        let orch = Orchestrator::new(config_in(dir.path(), steps)).unwrap();
        let result = orch.run_all().unwrap();

        let path = dir.path().join("acme").join("relatorios").join("items.txt");
        match &result.steps[2].detail {
            StepDetail::Exported(report) => {
                assert_eq!(report.rows_written, 2);
                assert_eq!(report.path, path);
            }
            other => panic!("unexpected detail {:?}", other),
        }
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "chave\tdescricao\n1\ta\n2\tb\n"
        );
    }

    #[test]
    fn test_invoke_unknown_step() {
        let dir = tempfile::tempdir().unwrap();
        let orch = Orchestrator::new(config_in(dir.path(), vec![])).unwrap();
        assert!(matches!(
            orch.invoke("missing"),
            Err(EtlError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_register_rejects_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = Orchestrator::new(config_in(dir.path(), vec![create_items()])).unwrap();
        assert!(orch.register(create_items()).is_err());
    }

    #[test]
    fn test_uses_attach_other_databases() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path(), vec![]);
        config.store.attach = vec![AttachConfig {
            database: "gia2024".to_string(),
            alias: Some("gia".to_string()),
        }];
        let mut orch = Orchestrator::new(config).unwrap();

        let nfe = orch.context().open("nfe").unwrap();
        nfe.execute("CREATE TABLE notas (id INT); INSERT INTO notas VALUES (7);", false)
            .unwrap();
        drop(nfe);

        orch.register(
            Step::new(
                "copy-notas",
                Command::CreateTableAs {
                    table: "notas_copia".to_string(),
                    sql: "SELECT id FROM nfe.notas".to_string(),
                    temp: false,
                },
            )
            .with_uses(["osf", "nfe"]),
        )
        .unwrap();
        orch.invoke("copy-notas").unwrap();

        let osf = orch.context().open("osf").unwrap();
        assert_eq!(
            osf.query_i64("SELECT id FROM notas_copia", false).unwrap(),
            Some(7)
        );
        let names: Vec<String> = orch
            .open_for(&orch.steps()[0])
            .unwrap()
            .list_databases()
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .filter(|name| name != "temp")
            .collect();
        assert_eq!(names, vec!["main", "gia", "nfe"]);
    }

    #[test]
    fn test_custom_handler() {
        fn noop(_: &Orchestrator, _: &StatementGateway, _: &Command) -> Result<StepDetail> {
            Ok(StepDetail::Executed)
        }

        let dir = tempfile::tempdir().unwrap();
        let mut orch = Orchestrator::new(config_in(
            dir.path(),
            vec![Step::new("broken", Command::Sql { sql: "NOT SQL".into() })],
        ))
        .unwrap();
        assert!(orch.invoke("broken").is_err());
        orch.set_handler("sql", noop);
        assert!(orch.invoke("broken").is_ok());
    }

    #[test]
    fn test_export_derives_table_name() {
        let dir = tempfile::tempdir().unwrap();
        let orch = Orchestrator::new(config_in(dir.path(), vec![])).unwrap();
        let source = MemorySource::new(
            vec![
                SourceColumn::with_code("Id Nota", 3),
                SourceColumn::with_code("Valor", 131),
            ],
            vec![vec![CellValue::Integer(1), "1.500,25".into()]],
        );
        let report = orch.export("[Osf_DocAtrib_1]", "[dbo].[Nota]", source).unwrap();
        assert_eq!(report.table, "DocAtrib_dbo_Nota");
        assert_eq!(report.rows_inserted, 1);

        let gw = orch.context().open("osf").unwrap();
        assert_eq!(
            gw.list_columns("DocAtrib_dbo_Nota").unwrap(),
            vec!["Id_Nota", "Valor"]
        );
    }
}
