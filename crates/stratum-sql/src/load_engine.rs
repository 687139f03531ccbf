//! Generates and executes the SQL statement sequence that loads a
//! table's staged files into the warehouse, choosing between a
//! truncate-and-copy overwrite and a delete-and-insert upsert based on
//! the table's policy.
//!
//! Grounded on `original_source/src/blazel/tables.py`
//! (`SnowflakeTable`, `SnowflakeTableUpsert`, `SnowflakeWarehouse.table_class`,
//! `load_from_stage`).

use async_trait::async_trait;

use stratum_core::{Column, OrchestratorError, Result, Table};
use stratum_io::WatermarkStore;

/// Mirrors the original's `SQL` enum: the statement kinds a cursor
/// result is classified by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlStatementKind {
    Drop,
    Create,
    Truncate,
    Delete,
    Copy,
    Update,
    Insert,
}

/// One generated statement paired with the kind its result should be
/// classified as.
#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: SqlStatementKind,
    pub sql: String,
}

#[derive(Debug, Clone)]
pub struct CopyFileResult {
    pub file: String,
    pub rows_loaded: Option<u64>,
    pub error: Option<String>,
}

/// A cursor's classified response to one executed statement, matching
/// `load_from_stage`'s per-`SQL` branch logging.
#[derive(Debug, Clone)]
pub enum CursorResult {
    Status(String),
    RowCount(u64),
    CopyResults(Vec<CopyFileResult>),
}

#[async_trait]
pub trait WarehouseCursor: Send + Sync {
    async fn execute(&self, statement: &Statement) -> Result<CursorResult>;
    /// Used only for the post-load `SELECT MAX(timestamp_key)`
    /// watermark refresh.
    async fn query_scalar(&self, sql: &str) -> Result<Option<String>>;
}

fn sql_type_for(dtype: &str) -> String {
    match dtype {
        "datetime" | "timestamp" => "TIMESTAMP_NTZ".to_string(),
        "int" | "integer" => "NUMBER".to_string(),
        "bigint" => "NUMBER(38,0)".to_string(),
        "float" | "double" => "FLOAT".to_string(),
        "bool" | "boolean" => "BOOLEAN".to_string(),
        other => other.to_uppercase(),
    }
}

fn column_ddl(columns: &[&Column]) -> String {
    columns
        .iter()
        .map(|c| format!("  {} {}", c.name, sql_type_for(&c.dtype)))
        .collect::<Vec<_>>()
        .join(",\n")
}

fn validate_suffix(suffix: &str) -> Result<()> {
    if suffix.is_empty() || suffix == "_stage" {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidSuffix(suffix.to_string()))
    }
}

fn file_format_clause(table: &Table) -> String {
    if let Some(stage_format) = &table.meta.stage_file_format {
        return format!("FORMAT_NAME = '{}.public.{}'", table.database_name(), stage_format);
    }
    match table.meta.file_format {
        stratum_core::FileFormat::Csv => {
            "TYPE = CSV FIELD_DELIMITER = ';' SKIP_BLANK_LINES = TRUE TRIM_SPACE = TRUE FIELD_OPTIONALLY_ENCLOSED_BY = '\"'".to_string()
        }
        stratum_core::FileFormat::Parquet => "TYPE = PARQUET".to_string(),
    }
}

/// Generates the full, ordered statement plan for loading one table's
/// staged files, choosing the upsert sequence when `primary_key` or
/// `timestamp_key` is set, the plain overwrite sequence otherwise (or
/// when `meta.truncate` explicitly requests it even on an
/// upsert-capable table).
pub fn build_load_plan(table: &Table, stage_root: &str) -> Result<Vec<Statement>> {
    let is_upsert = (table.meta.primary_key.is_some() || table.meta.timestamp_key.is_some())
        && table.meta.truncate != Some(true);

    if is_upsert {
        build_upsert_plan(table, stage_root)
    } else {
        build_overwrite_plan(table, stage_root)
    }
}

fn build_overwrite_plan(table: &Table, stage_root: &str) -> Result<Vec<Statement>> {
    Ok(vec![
        Statement {
            kind: SqlStatementKind::Truncate,
            sql: truncate_table_stmt(table),
        },
        Statement {
            kind: SqlStatementKind::Copy,
            sql: copy_table_stmt(table, stage_root, "")?,
        },
        Statement {
            kind: SqlStatementKind::Update,
            sql: update_load_date_stmt(table, ""),
        },
    ])
}

fn build_upsert_plan(table: &Table, stage_root: &str) -> Result<Vec<Statement>> {
    Ok(vec![
        Statement {
            kind: SqlStatementKind::Drop,
            sql: drop_staging_table_stmt(table),
        },
        Statement {
            kind: SqlStatementKind::Create,
            sql: create_staging_table_stmt(table),
        },
        Statement {
            kind: SqlStatementKind::Copy,
            sql: copy_table_stmt(table, stage_root, "_stage")?,
        },
        Statement {
            kind: SqlStatementKind::Update,
            sql: update_load_date_stmt(table, "_stage"),
        },
        Statement {
            kind: SqlStatementKind::Delete,
            sql: delete_from_table_stmt(table)?,
        },
        Statement {
            kind: SqlStatementKind::Insert,
            sql: insert_into_table_stmt(table),
        },
    ])
}

pub fn create_table_stmt(table: &Table) -> String {
    let columns: Vec<&Column> = table.columns.values().collect();
    let mut ddl = column_ddl(&columns);
    if !ddl.is_empty() {
        ddl.push(',');
        ddl.push('\n');
    }
    format!(
        "DROP TABLE IF EXISTS {uri};\nCREATE TABLE {uri} (\n{ddl}  load_date TIMESTAMP_NTZ\n);",
        uri = table.table_uri(),
        ddl = ddl,
    )
}

fn staging_table_uri(table: &Table) -> String {
    format!("{}_stage", table.table_uri())
}

pub fn drop_staging_table_stmt(table: &Table) -> String {
    format!("DROP TABLE IF EXISTS {}", staging_table_uri(table))
}

pub fn create_staging_table_stmt(table: &Table) -> String {
    format!("CREATE TABLE {} LIKE {}", staging_table_uri(table), table.table_uri())
}

pub fn truncate_table_stmt(table: &Table) -> String {
    format!("TRUNCATE TABLE IF EXISTS {}", table.table_uri())
}

/// Builds the `@db.stage/schema/table/` path a COPY statement reads
/// from, matching the original's `stage_files` assembly.
fn stage_files_path(table: &Table, stage_root: &str) -> String {
    format!(
        "{}.{}/{}/{}/",
        table.database_name(),
        stage_root,
        table.schema_name(),
        table.name
    )
}

pub fn copy_table_stmt(table: &Table, stage_root: &str, suffix: &str) -> Result<String> {
    validate_suffix(suffix)?;
    let target = if suffix.is_empty() {
        table.table_uri()
    } else {
        format!("{}{}", table.table_uri(), suffix)
    };
    let columns: Vec<&Column> = table.columns.values().collect();
    let column_names = columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ");
    let stage_files = stage_files_path(table, stage_root);
    Ok(match table.meta.file_format {
        stratum_core::FileFormat::Csv => format!(
            "COPY INTO {target} ({column_names}) FROM @{stage_files} FILE_FORMAT = ({format})",
            format = file_format_clause(table),
        ),
        stratum_core::FileFormat::Parquet => {
            let projection = columns
                .iter()
                .map(|c| {
                    if c.dtype == "datetime" || c.dtype == "timestamp" {
                        format!("TO_TIMESTAMP_NTZ($1:{}::int, 6)", c.name)
                    } else {
                        format!("$1:{}::{}", c.name, sql_type_for(&c.dtype))
                    }
                })
                .collect::<Vec<_>>()
                .join(",\n");
            format!(
                "COPY INTO {target} ({column_names}) FROM (\n    SELECT {projection}\n    FROM @{stage_files}\n) FILE_FORMAT = ({format})",
                format = file_format_clause(table),
            )
        }
    })
}

pub fn update_load_date_stmt(table: &Table, suffix: &str) -> String {
    let target = if suffix.is_empty() {
        table.table_uri()
    } else {
        format!("{}{}", table.table_uri(), suffix)
    };
    format!("UPDATE {target} SET load_date = CURRENT_TIMESTAMP()")
}

fn delete_by_primary_key_stmt(table: &Table, primary_key: &str) -> String {
    let stage_name = format!("{}_stage", table.name);
    let predicate = primary_key
        .split(';')
        .map(|col| format!("{name}.{col} = {stage_name}.{col}", name = table.name))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(
        "DELETE FROM {target} USING {stage} WHERE {predicate}",
        target = table.table_uri(),
        stage = staging_table_uri(table),
    )
}

fn delete_by_datetime_range_stmt(table: &Table, timestamp_key: &str) -> String {
    format!(
        "DELETE FROM {target} USING (SELECT MIN({ts}) AS min_ts, MAX({ts}) AS max_ts FROM {stage}) AS range \
         WHERE ({ts} BETWEEN range.min_ts AND range.max_ts) OR {ts} IS NULL",
        target = table.table_uri(),
        stage = staging_table_uri(table),
        ts = timestamp_key,
    )
}

pub fn delete_from_table_stmt(table: &Table) -> Result<String> {
    if let Some(primary_key) = &table.meta.primary_key {
        Ok(delete_by_primary_key_stmt(table, primary_key))
    } else if let Some(timestamp_key) = &table.meta.timestamp_key {
        Ok(delete_by_datetime_range_stmt(table, timestamp_key))
    } else {
        Err(OrchestratorError::LoadPolicyUnresolved(table.table_uri()))
    }
}

pub fn insert_into_table_stmt(table: &Table) -> String {
    format!(
        "INSERT INTO {target} SELECT * FROM {stage}",
        target = table.table_uri(),
        stage = staging_table_uri(table),
    )
}

/// Joins a load plan's statements the way the original's
/// `load_stmt_str` does, for logging or literal-text assertions.
pub fn plan_to_string(plan: &[Statement]) -> String {
    plan.iter().map(|s| s.sql.as_str()).collect::<Vec<_>>().join(";\n")
}

/// Runs a table's load plan end to end, refreshing its watermark
/// afterward when it tracks `meta.timestamp_field`.
pub async fn run_load(
    cursor: &dyn WarehouseCursor,
    watermark_store: &dyn WatermarkStore,
    table: &Table,
    stage_root: &str,
) -> Result<Vec<CursorResult>> {
    let plan = build_load_plan(table, stage_root)?;
    let mut results = Vec::with_capacity(plan.len());
    for statement in &plan {
        results.push(cursor.execute(statement).await?);
    }
    if let Some(timestamp_field) = &table.meta.timestamp_field {
        let max_sql = format!("SELECT MAX({timestamp_field}) FROM {};", table.table_uri());
        if let Some(latest) = cursor.query_scalar(&max_sql).await? {
            watermark_store.set_latest_timestamp(&table.table_uri(), latest).await?;
        }
    }
    Ok(results)
}


#[cfg(test)]
mod serial_test_helpers {
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Guards tests that mutate `APP_ENV`/`DATABASE_NAME_DEV` against
    /// interleaving with each other; cargo test runs them on separate
    /// threads by default.
    pub fn with_env_lock<F: FnOnce()>(f: F) {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        f()
    }
}
