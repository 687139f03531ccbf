//! The task model: the sealed set of work items a [`crate::planner`]
//! schedule is built from, plus the extensibility seams (`Extractor`,
//! `ExtractorRegistry`, `Deadline`) their execution depends on.
//!
//! Grounded on `original_source/src/blazel/tasks.py` (`BaseTask`,
//! `TableTask`, `CleanTask`, `ExtractTask`, `LoadTask`, `ScheduleTask`,
//! `ErrorTask`, `TaskFactory`). The original's class-level
//! `_task_types` registry and `register_extract_function` mutable
//! singleton are replaced here with a closed `Task` enum (dispatch is
//! then just a `match`, checked at compile time) and an explicit
//! `ExtractorRegistry` passed in by the caller instead of a global.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::catalog::{Table, Value};
use crate::config;
use crate::error::{OrchestratorError, Result};
use crate::time_range::TimeRange;

fn new_task_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Per-job extraction parameters: explicit date bounds, batch count,
/// row caps and the error-injection knobs used by `stratum test`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOptions {
    pub start: Option<String>,
    pub end: Option<String>,
    pub batches: u32,
    pub total_rows: u64,
    pub limit: u32,
    pub test_error: bool,
    pub fail_on_error: String,
}

impl Default for TaskOptions {
    fn default() -> Self {
        TaskOptions {
            start: None,
            end: None,
            batches: 1,
            total_rows: 0,
            limit: 0,
            test_error: false,
            fail_on_error: "false".to_string(),
        }
    }
}

/// Fields shared by every task that addresses a single catalog table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableTaskData {
    pub task_id: String,
    pub job_id: String,
    pub database_name: String,
    pub schema_name: String,
    pub table_name: String,
}

impl TableTaskData {
    /// All four identifying fields are required and are lowercased,
    /// matching `TableTask.__post_init__` in the original.
    pub fn new(
        job_id: impl Into<String>,
        database_name: impl Into<String>,
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Result<Self> {
        let database_name = database_name.into();
        let schema_name = schema_name.into();
        let table_name = table_name.into();
        if database_name.is_empty() || schema_name.is_empty() || table_name.is_empty() {
            return Err(OrchestratorError::InvalidRange(
                "database_name, schema_name and table_name are all required".into(),
            ));
        }
        Ok(TableTaskData {
            task_id: new_task_id(),
            job_id: job_id.into(),
            database_name: database_name.to_lowercase(),
            schema_name: schema_name.to_lowercase(),
            table_name: table_name.to_lowercase(),
        })
    }

    pub fn for_table(job_id: impl Into<String>, table: &Table) -> Self {
        TableTaskData {
            task_id: new_task_id(),
            job_id: job_id.into(),
            database_name: table.database_name().to_string(),
            schema_name: table.schema_name().to_string(),
            table_name: table.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractTaskData {
    #[serde(flatten)]
    pub table: TableTaskData,
    pub task_number: u32,
    pub options: TaskOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadTaskData {
    #[serde(flatten)]
    pub table: TableTaskData,
    pub truncate: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleTaskData {
    pub task_id: String,
    pub database_name: String,
    pub schema_names: Option<Vec<String>>,
    pub table_names: Option<Vec<String>>,
    pub options: TaskOptions,
}

impl ScheduleTaskData {
    pub fn new(
        schema_names: Option<Vec<String>>,
        table_names: Option<Vec<String>>,
        options: TaskOptions,
    ) -> Self {
        ScheduleTaskData {
            task_id: new_task_id(),
            database_name: config::database_name(),
            schema_names: schema_names
                .map(|names| names.into_iter().map(|n| n.to_lowercase()).collect()),
            table_names: table_names
                .map(|names| names.into_iter().map(|n| n.to_lowercase()).collect()),
            options,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorTaskData {
    pub task_id: String,
    pub envs: HashMap<String, String>,
}

impl ErrorTaskData {
    pub fn new(envs: HashMap<String, String>) -> Self {
        ErrorTaskData {
            task_id: new_task_id(),
            envs,
        }
    }
}

/// The closed set of task kinds a schedule can be made of. The
/// `task_type` tag is what the original's `TaskFactory` dispatched on
/// at runtime; here it is a compile-time-checked enum discriminant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task_type")]
pub enum Task {
    CleanTask(TableTaskData),
    ExtractTask(ExtractTaskData),
    LoadTask(LoadTaskData),
    ScheduleTask(ScheduleTaskData),
    ErrorTask(ErrorTaskData),
}

impl Task {
    pub fn task_id(&self) -> &str {
        match self {
            Task::CleanTask(t) => &t.task_id,
            Task::ExtractTask(t) => &t.table.task_id,
            Task::LoadTask(t) => &t.table.task_id,
            Task::ScheduleTask(t) => &t.task_id,
            Task::ErrorTask(t) => &t.task_id,
        }
    }

    pub fn task_type(&self) -> &'static str {
        match self {
            Task::CleanTask(_) => "CleanTask",
            Task::ExtractTask(_) => "ExtractTask",
            Task::LoadTask(_) => "LoadTask",
            Task::ScheduleTask(_) => "ScheduleTask",
            Task::ErrorTask(_) => "ErrorTask",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| OrchestratorError::Other(e.into()))
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| {
            OrchestratorError::UnknownTaskType(format!("could not parse task: {e}"))
        })
    }
}

/// A row source pulled by the stage encoder. `sink` is the
/// backpressured channel rows are pushed through; the return value is
/// the total row count extracted, used for progress logging against
/// `TaskOptions::total_rows`.
#[async_trait]
pub trait Extractor: Send + Sync + std::fmt::Debug {
    async fn extract(
        &self,
        table: &Table,
        range: &TimeRange,
        options: &TaskOptions,
        deadline: &Deadline,
        sink: mpsc::Sender<Vec<Value>>,
    ) -> Result<u64>;
}

/// Maps a table's fully-qualified URI to the extractor that knows how
/// to pull its rows. Replaces the original's mutable
/// `register_extract_function` class attribute with explicit
/// dependency injection.
#[derive(Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<String, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        ExtractorRegistry::default()
    }

    pub fn register(&mut self, table_uri: impl Into<String>, extractor: Arc<dyn Extractor>) {
        self.extractors.insert(table_uri.into(), extractor);
    }

    pub fn get(&self, table_uri: &str) -> Result<Arc<dyn Extractor>> {
        self.extractors
            .get(table_uri)
            .cloned()
            .ok_or_else(|| OrchestratorError::ExtractorMissing(table_uri.to_string()))
    }
}

/// Wall-clock budget tracker for a running task, replacing the
/// original's `get_remaining_time_in_millis` Lambda-context callback
/// with an explicit handle any caller can construct or fake in tests.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    timeout_ms: i64,
}

impl Deadline {
    pub fn from_config() -> Self {
        Deadline {
            start: Instant::now(),
            timeout_ms: config::aws_lambda_timeout_ms(),
        }
    }

    pub fn with_timeout_ms(timeout_ms: i64) -> Self {
        Deadline {
            start: Instant::now(),
            timeout_ms,
        }
    }

    pub fn remaining_ms(&self) -> i64 {
        self.timeout_ms - self.start.elapsed().as_millis() as i64
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_ms() <= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_task_data_lowercases_identifiers() {
        let t = TableTaskData::new("job-1", "DB", "SCHEMA", "TABLE").unwrap();
        assert_eq!(t.database_name, "db");
        assert_eq!(t.schema_name, "schema");
        assert_eq!(t.table_name, "table");
    }

    #[test]
    fn table_task_data_requires_all_identifiers() {
        assert!(TableTaskData::new("job-1", "", "schema", "table").is_err());
    }

    #[test]
    fn task_json_round_trips_with_tag_dispatch() {
        let task = Task::CleanTask(TableTaskData::new("job-1", "db", "s", "t").unwrap());
        let json = task.to_json().unwrap();
        assert!(json.contains("\"task_type\":\"CleanTask\""));
        let back = Task::from_json(&json).unwrap();
        assert_eq!(task, back);
    }

    #[test]
    fn unknown_task_type_is_rejected() {
        let err = Task::from_json(r#"{"task_type":"BogusTask"}"#).unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownTaskType(_)));
    }

    #[test]
    fn extractor_registry_reports_missing_extractor() {
        let registry = ExtractorRegistry::new();
        let err = registry.get("db.schema.table").unwrap_err();
        assert!(matches!(err, OrchestratorError::ExtractorMissing(_)));
    }

    #[test]
    fn deadline_counts_down() {
        let deadline = Deadline::with_timeout_ms(1000);
        assert!(deadline.remaining_ms() <= 1000);
        assert!(!deadline.is_expired());
    }

    #[test]
    fn expired_deadline_reports_true() {
        let deadline = Deadline::with_timeout_ms(0);
        assert!(deadline.is_expired());
    }
}
