//! audit-etl CLI - load audit exports into SQLite and check key uniqueness.

use audit_etl::core::schema::{mssql_catalog_query, synthesize};
use audit_etl::text::read_catalog;
use audit_etl::{
    query_to_tsv, Config, DelimitedTextLoader, EtlError, IndexAuditor, Orchestrator,
    StatementGateway, StepDetail, StepResult,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "audit-etl")]
#[command(about = "Load audit exports into SQLite and check key uniqueness")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every step of the job file
    Run,

    /// Run a single step by name
    Step {
        /// Step name
        name: String,
    },

    /// List the steps of the job file
    List,

    /// Load a tab-separated file into an existing table
    LoadText {
        /// Target database file
        #[arg(long)]
        db: PathBuf,

        /// Tab-separated input file
        #[arg(long)]
        file: PathBuf,

        /// Target table
        #[arg(long)]
        table: String,

        /// The first line is data, not a header
        #[arg(long)]
        no_header: bool,
    },

    /// Create a table from a catalog export (type name, column name per line)
    CreateTable {
        /// Target database file
        #[arg(long)]
        db: PathBuf,

        /// Table to create
        #[arg(long)]
        table: String,

        /// Catalog export file
        #[arg(long)]
        catalog: PathBuf,
    },

    /// Index key columns and check that no key repeats
    Audit {
        /// Target database file
        #[arg(long)]
        db: PathBuf,

        /// Table to audit
        #[arg(long)]
        table: String,

        /// Key column (repeat for composite keys)
        #[arg(long = "key", required = true)]
        keys: Vec<String>,
    },

    /// List the tables of a database file
    Tables {
        /// Database file
        #[arg(long)]
        db: PathBuf,
    },

    /// Write a query's result to a tab-separated file
    QueryToText {
        /// Database file
        #[arg(long)]
        db: PathBuf,

        /// Query to run
        #[arg(long)]
        sql: String,

        /// Output file
        #[arg(long)]
        output: PathBuf,

        /// Stop once this many cells were written
        #[arg(long)]
        max_cells: Option<u64>,
    },

    /// Print the SQL Server catalog query for a source table
    CatalogQuery {
        /// Source database name
        #[arg(long)]
        database: String,

        /// Source table name (e.g. dbo.Nota)
        #[arg(long)]
        table: String,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

fn run() -> Result<(), EtlError> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(&cli.verbosity, &cli.log_format).map_err(EtlError::Config)?;

    match cli.command {
        Commands::Run => {
            let orchestrator = load_orchestrator(&cli.config)?;
            let result = orchestrator.run_all()?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("Job {}: {}", result.run_id, result.status);
                for step in &result.steps {
                    print_step(step);
                }
                for warning in &result.warnings {
                    println!("WARNING: {}", warning);
                }
            }
        }

        Commands::Step { name } => {
            let orchestrator = load_orchestrator(&cli.config)?;
            let result = orchestrator.invoke(&name)?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_step(&result);
                if let Some(warning) = result.warning() {
                    println!("WARNING: {}", warning);
                }
            }
        }

        Commands::List => {
            let orchestrator = load_orchestrator(&cli.config)?;
            let menu = orchestrator.menu();

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&menu)?);
            } else {
                for entry in &menu {
                    println!("{:<24} {}", entry.name, entry.label());
                }
            }
        }

        Commands::LoadText {
            db,
            file,
            table,
            no_header,
        } => {
            let gateway = StatementGateway::open(&db)?;
            let report = DelimitedTextLoader::new(&gateway).load_from_text(&file, &table, !no_header)?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Loaded {} rows into {} ({} blank lines, {} legacy-encoded lines)",
                    report.rows_inserted, report.table, report.blank_lines_skipped, report.legacy_lines
                );
            }
        }

        Commands::CreateTable { db, table, catalog } => {
            let columns = read_catalog(&catalog)?;
            let (schema, ddl) = synthesize(&table, &columns)?;
            let gateway = StatementGateway::open(&db)?;
            gateway.execute(&ddl, true)?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&schema)?);
            } else {
                println!("{}", ddl);
            }
        }

        Commands::Audit { db, table, keys } => {
            let gateway = StatementGateway::open(&db)?;
            let result = IndexAuditor::new(&gateway).audit_unique(&table, &keys)?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if let Some(warning) = &result.warning {
                println!("WARNING: {}", warning);
            } else {
                println!(
                    "{}: key ({}) is unique",
                    result.table,
                    result.key_columns.join(", ")
                );
            }
        }

        Commands::Tables { db } => {
            if !db.exists() {
                return Err(EtlError::Config(format!("database {:?} does not exist", db)));
            }
            let gateway = StatementGateway::open(&db)?;
            let tables = gateway.list_tables()?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&tables)?);
            } else {
                for table in &tables {
                    println!("{}", table);
                }
            }
        }

        Commands::QueryToText {
            db,
            sql,
            output,
            max_cells,
        } => {
            if !db.exists() {
                return Err(EtlError::Config(format!("database {:?} does not exist", db)));
            }
            let gateway = StatementGateway::open(&db)?;
            let report = query_to_tsv(&gateway, &sql, &output, max_cells)?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Wrote {} rows ({} columns) to {}{}",
                    report.rows_written,
                    report.columns.len(),
                    report.path.display(),
                    if report.capped { ", stopped at the cell cap" } else { "" }
                );
            }
        }

        Commands::CatalogQuery { database, table } => {
            println!("{}", mssql_catalog_query(&database, &table));
        }
    }

    Ok(())
}

fn load_orchestrator(path: &Path) -> Result<Orchestrator, EtlError> {
    let config = Config::load(path)?;
    info!("Loaded configuration from {:?}", path);
    Orchestrator::new(config)
}

fn print_step(step: &StepResult) {
    let detail = match &step.detail {
        StepDetail::Created { columns } => format!("created with {} columns", columns.len()),
        StepDetail::TextLoaded(report) => format!("{} rows loaded", report.rows_inserted),
        StepDetail::Audited(audit) if audit.is_clean() => "key is unique".to_string(),
        StepDetail::Audited(audit) => format!(
            "{} rows deleted (max group size {})",
            audit.corrective_rows_deleted, audit.max_group_size
        ),
        StepDetail::Exported(report) => {
            format!("{} rows written to {}", report.rows_written, report.path.display())
        }
        StepDetail::Executed => "done".to_string(),
    };
    println!(
        "  {:<24} {:<26} {} ({:.2}s)",
        step.name, step.command, detail, step.duration_seconds
    );
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };

    // RUST_LOG takes precedence over --verbosity
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
