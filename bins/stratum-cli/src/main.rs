//! Command-line entry point: loads the catalog, resolves a schedule
//! and either runs it locally or submits it to a remote workflow
//! engine.
//!
//! Grounded on `original_source/src/blazel/cli.py` (the `run`, `test`,
//! `pipeline`, `tables`, `timestamps` and `file` commands) and on
//! `examples/lyteabovenyte-rde/bins/rde-cli/src/main.rs` for the
//! clap + tracing-subscriber CLI shape.

mod dispatcher;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stratum_core::{
    run_schedule_task, ExtractorRegistry, InMemoryTaskStore, Schedule, ScheduleTaskData, Task, TaskOptions,
    Warehouse,
};
use stratum_io::{InMemoryWatermarkStore, ObjectBucket, ObjectStoreBucket, WatermarkStore};
use stratum_sql::{create_table_stmt, CursorResult, Statement, WarehouseCursor};

use dispatcher::{LocalDispatcher, LoggingWorkflowEngine};

#[derive(Parser)]
#[command(name = "stratum", about = "Declarative extract-load orchestrator")]
struct Cli {
    /// Path to the catalog's YAML document; defaults to
    /// `TABLES_YAML_PATH` when unset.
    #[arg(long, global = true)]
    tables: Option<PathBuf>,

    /// Overrides `APP_ENV` (`dev` or `prod`) for this invocation.
    #[arg(long, global = true)]
    env: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan and run a schedule, either inline or via a remote workflow engine.
    Run {
        #[arg(long, value_delimiter = ',')]
        schema_names: Option<Vec<String>>,
        #[arg(long, value_delimiter = ',')]
        table_names: Option<Vec<String>>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long, default_value_t = 0)]
        limit: u32,
        #[arg(long)]
        remote: bool,
    },
    /// Exercise a single task kind against the loaded catalog without
    /// going through the planner.
    Test {
        #[command(subcommand)]
        target: TestTarget,
    },
    /// Submit the standing extract-load pipeline state machine.
    Pipeline,
    /// Materialize catalog DDL: emit (and, via the logging cursor,
    /// "execute") `CREATE TABLE` statements for the selected tables.
    Tables {
        #[arg(long, value_delimiter = ',')]
        schema_names: Option<Vec<String>>,
        #[arg(long, value_delimiter = ',')]
        table_names: Option<Vec<String>>,
        #[arg(long)]
        overwrite: bool,
    },
    /// Download and pretty-print one staged file.
    File {
        #[arg(long)]
        schema: String,
        #[arg(long)]
        table: String,
        #[arg(short = 'b', long, default_value_t = 0)]
        batch: u32,
        #[arg(short = 'f', long, default_value_t = 0)]
        file_number: u32,
        #[arg(short = 'l', long)]
        limit: Option<usize>,
        #[arg(short = 'n', long)]
        no_header: bool,
        #[arg(long, default_value = "raw")]
        style: FileStyle,
    },
    /// Print the current watermark for every table that tracks one.
    Timestamps {
        #[arg(long, value_delimiter = ',')]
        schema_names: Option<Vec<String>>,
        #[arg(long, value_delimiter = ',')]
        table_names: Option<Vec<String>>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum FileStyle {
    Raw,
    Csv,
    Json,
}

#[derive(Subcommand)]
enum TestTarget {
    Clean { schema: String, table: String },
    Extract {
        schema: String,
        table: String,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long, default_value_t = 0)]
        limit: u32,
    },
    Load { schema: String, table: String },
    Schedule {
        #[arg(long, value_delimiter = ',')]
        schema_names: Option<Vec<String>>,
        #[arg(long, value_delimiter = ',')]
        table_names: Option<Vec<String>>,
        #[arg(long)]
        test_error: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    if let Some(env) = &cli.env {
        use std::str::FromStr;
        stratum_core::config::Env::from_str(env)?.set();
    }
    let tables_path = cli
        .tables
        .or_else(|| stratum_core::config::tables_yaml_path().map(PathBuf::from))
        .ok_or_else(|| anyhow::anyhow!("no catalog path given; pass --tables or set TABLES_YAML_PATH"))?;
    let yaml = fs::read_to_string(&tables_path)?;
    let warehouse = Warehouse::from_yaml_str(&yaml)?;

    let extractors = ExtractorRegistry::new();
    let bucket = ObjectStoreBucket::new(Arc::new(object_store::memory::InMemory::new()));
    let cursor = LoggingCursor;
    let watermark_store = InMemoryWatermarkStore::new();
    let task_store = InMemoryTaskStore::new();
    let dispatcher = LocalDispatcher {
        warehouse: &warehouse,
        extractors: &extractors,
        bucket: &bucket,
        cursor: &cursor,
        watermark_store: &watermark_store,
        task_store: &task_store,
        stage_root: stratum_core::config::database_stage(),
        max_file_size: stratum_io::stage_encoder::DEFAULT_MAX_FILE_SIZE,
    };

    match cli.command {
        Command::Run { schema_names, table_names, start, end, limit, remote } => {
            let mut options = TaskOptions::default();
            options.start = start;
            options.end = end;
            options.limit = limit;
            if remote {
                let task = ScheduleTaskData::new(schema_names, table_names, options);
                let engine = LoggingWorkflowEngine;
                let execution_id = dispatcher::submit_remote(&engine, &task).await?;
                println!("submitted schedule task, execution id {execution_id}");
            } else {
                let task = ScheduleTaskData::new(schema_names, table_names, options);
                let schedule = run_schedule_task(&task, &warehouse, chrono::Utc::now())?;
                println!("planned {} job(s)", schedule.schedule.len());
                dispatcher.run_schedule(&schedule).await?;
            }
        }
        Command::Test { target } => run_test(&dispatcher, &warehouse, target).await?,
        Command::Pipeline => {
            let engine = LoggingWorkflowEngine;
            let task = ScheduleTaskData::new(None, None, TaskOptions::default());
            let execution_id = dispatcher::submit_remote(&engine, &task).await?;
            println!("submitted pipeline, execution id {execution_id}");
        }
        Command::Tables { schema_names, table_names, overwrite } => {
            let tables = warehouse.filter(schema_names.as_deref(), table_names.as_deref(), false);
            for table in tables {
                if overwrite {
                    let statement = stratum_sql::Statement {
                        kind: stratum_sql::SqlStatementKind::Create,
                        sql: create_table_stmt(table),
                    };
                    cursor.execute(&statement).await?;
                } else {
                    println!("{}", create_table_stmt(table));
                }
            }
        }
        Command::File { schema, table, batch, file_number, limit, no_header, style } => {
            let t = warehouse.get(&schema, &table)?;
            let suffix = t.meta.file_format.suffix();
            let key = stratum_io::stage_key(&schema, t.stage_basename(), batch, file_number, suffix);
            let bytes = bucket.get(&key).await?;
            print_staged_file(&bytes, t.meta.file_format, style, limit, no_header)?;
        }
        Command::Timestamps { schema_names, table_names } => {
            let tables = warehouse.filter(schema_names.as_deref(), table_names.as_deref(), false);
            for table in tables {
                if table.meta.timestamp_field.is_some() {
                    let latest = watermark_store.get_latest_timestamp(&table.table_uri()).await?;
                    println!("{}: {}", table.table_uri(), latest.as_deref().unwrap_or("<none>"));
                }
            }
        }
    }

    Ok(())
}

fn print_staged_file(
    bytes: &[u8],
    format: stratum_core::FileFormat,
    style: FileStyle,
    limit: Option<usize>,
    no_header: bool,
) -> anyhow::Result<()> {
    match (format, style) {
        (_, FileStyle::Raw) => {
            println!("{} bytes", bytes.len());
        }
        (stratum_core::FileFormat::Csv, FileStyle::Csv) | (stratum_core::FileFormat::Csv, FileStyle::Json) => {
            use std::io::Read;
            let mut decoder = flate2::read::GzDecoder::new(bytes);
            let mut text = String::new();
            decoder.read_to_string(&mut text)?;
            let mut reader = csv::ReaderBuilder::new()
                .delimiter(b';')
                .has_headers(!no_header)
                .from_reader(text.as_bytes());
            for (i, record) in reader.records().enumerate() {
                if let Some(limit) = limit {
                    if i >= limit {
                        break;
                    }
                }
                let record = record?;
                match style {
                    FileStyle::Json => {
                        let fields: Vec<&str> = record.iter().collect();
                        println!("{}", serde_json::to_string(&fields)?);
                    }
                    _ => println!("{}", record.iter().collect::<Vec<_>>().join(";")),
                }
            }
        }
        (stratum_core::FileFormat::Parquet, _) => {
            let style_name = match style {
                FileStyle::Raw => "raw",
                FileStyle::Csv => "csv",
                FileStyle::Json => "json",
            };
            println!("{} bytes of parquet-encoded data (style {} unsupported for parquet)", bytes.len(), style_name);
        }
    }
    Ok(())
}

async fn run_test(
    dispatcher: &LocalDispatcher<'_>,
    warehouse: &Warehouse,
    target: TestTarget,
) -> anyhow::Result<()> {
    match target {
        TestTarget::Clean { schema, table } => {
            let t = warehouse.get(&schema, &table)?;
            let task = Task::CleanTask(stratum_core::TableTaskData::for_table("test-job", t));
            dispatcher.run_task(&task).await?;
        }
        TestTarget::Extract { schema, table, start, end, limit } => {
            let t = warehouse.get(&schema, &table)?;
            let mut options = TaskOptions::default();
            options.start = start;
            options.end = end;
            options.limit = limit;
            let task = Task::ExtractTask(stratum_core::ExtractTaskData {
                table: stratum_core::TableTaskData::for_table("test-job", t),
                task_number: 0,
                options,
            });
            dispatcher.run_task(&task).await?;
        }
        TestTarget::Load { schema, table } => {
            let t = warehouse.get(&schema, &table)?;
            let task = Task::LoadTask(stratum_core::LoadTaskData {
                table: stratum_core::TableTaskData::for_table("test-job", t),
                truncate: t.meta.truncate,
            });
            dispatcher.run_task(&task).await?;
        }
        TestTarget::Schedule { schema_names, table_names, test_error } => {
            let mut options = TaskOptions::default();
            options.test_error = test_error;
            let task = ScheduleTaskData::new(schema_names, table_names, options);
            let schedule: Schedule = run_schedule_task(&task, warehouse, chrono::Utc::now())?;
            println!("{}", serde_json::to_string_pretty(&schedule)?);
        }
    }
    Ok(())
}

/// Logs generated statements instead of executing them against a real
/// warehouse driver — connecting a concrete database client is an
/// integration concern outside this crate's scope (see the load
/// engine's `WarehouseCursor` trait for the seam a real driver
/// implements).
struct LoggingCursor;

#[async_trait::async_trait]
impl WarehouseCursor for LoggingCursor {
    async fn execute(&self, statement: &Statement) -> stratum_core::Result<CursorResult> {
        tracing::info!(kind = ?statement.kind, sql = %statement.sql, "would execute statement");
        Ok(CursorResult::Status("logged".to_string()))
    }

    async fn query_scalar(&self, sql: &str) -> stratum_core::Result<Option<String>> {
        tracing::info!(sql = %sql, "would query scalar");
        Ok(None)
    }
}
