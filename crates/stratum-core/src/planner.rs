//! Builds deterministic job schedules from a filtered catalog: one
//! [`Job`] per table, each a clean task, N extract tasks and a load
//! task sharing a job id and options.
//!
//! Grounded on `original_source/src/blazel/tasks.py`
//! (`ExtractLoadJob.from_table`, `Schedule.from_tables`,
//! `Schedule.error_schedule`, `ScheduleTask.__call__`).

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::{Table, Warehouse};
use crate::error::{OrchestratorError, Result};
use crate::task::{ErrorTaskData, ExtractTaskData, LoadTaskData, ScheduleTaskData, Task, TableTaskData, TaskOptions};

/// One table's worth of work: a clean, N extracts and a load, all
/// sharing `job_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub clean: Task,
    pub extract: Vec<Task>,
    pub load: Task,
}

impl Job {
    /// The five-step planning algorithm:
    /// 1. if `options.start` is unset and the table has a
    ///    `look_back_days` policy, derive `[start, end)` from
    ///    `now - look_back_days` to `now` in the table's timezone, and
    ///    set `batches` to `look_back_days` when the table tracks a
    ///    `timestamp_key` (one batch per day), else 1;
    /// 2. `batches = max(options.batches, table.meta.batches)`;
    /// 3. `total_rows` is copied from the table's policy;
    /// 4. emit one `CleanTask`, `batches` `ExtractTask`s numbered
    ///    `0..batches`, and one `LoadTask` carrying the table's
    ///    `truncate` override.
    pub fn from_table(
        table: &Table,
        job_id: impl Into<String>,
        mut options: TaskOptions,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let job_id = job_id.into();

        if options.start.is_none() {
            if let Some(look_back_days) = table.meta.look_back_days {
                options.batches = if table.meta.timestamp_key.is_some() {
                    look_back_days
                } else {
                    1
                };
                let tz = Tz::from_str(&table.meta.timezone).map_err(|_| {
                    OrchestratorError::InvalidRange(format!(
                        "unknown timezone {}",
                        table.meta.timezone
                    ))
                })?;
                let now_local = now.with_timezone(&tz);
                let start_date = (now_local - Duration::days(look_back_days as i64)).date_naive();
                let end_date = now_local.date_naive();
                options.start = Some(start_date.format("%Y-%m-%d").to_string());
                options.end = Some(end_date.format("%Y-%m-%d").to_string());
            }
        }

        options.batches = options.batches.max(table.meta.batches);
        options.total_rows = table.meta.total_rows;

        let clean = Task::CleanTask(TableTaskData::for_table(&job_id, table));
        let extract = (0..options.batches)
            .map(|task_number| {
                Task::ExtractTask(ExtractTaskData {
                    table: TableTaskData::for_table(&job_id, table),
                    task_number,
                    options: options.clone(),
                })
            })
            .collect();
        let load = Task::LoadTask(LoadTaskData {
            table: TableTaskData::for_table(&job_id, table),
            truncate: table.meta.truncate,
        });

        Ok(Job {
            job_id,
            clean,
            extract,
            load,
        })
    }
}

/// A full run's worth of jobs. Serializes to `{"schedule": []}` when
/// empty, matching the original's `Schedule.as_dict`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Schedule {
    pub schedule: Vec<Job>,
}

impl Schedule {
    /// One job per table, skipping any whose policy marks them
    /// `ignore` (a belt-and-suspenders check: `Warehouse::filter`
    /// without explicit table names already excludes them, but an
    /// explicit table list can still admit an ignored table here).
    pub fn from_tables(tables: &[&Table], options: TaskOptions, now: DateTime<Utc>) -> Result<Schedule> {
        let mut jobs = Vec::with_capacity(tables.len());
        for table in tables {
            if table.meta.ignore {
                continue;
            }
            let job_id = Uuid::new_v4().simple().to_string();
            jobs.push(Job::from_table(table, job_id, options.clone(), now)?);
        }
        Ok(Schedule { schedule: jobs })
    }

    /// A single job whose clean, sole extract and load are literally
    /// the same `ErrorTask`, used by `stratum test schedule` to
    /// exercise the dispatcher's failure path end to end.
    pub fn error_schedule(envs: HashMap<String, String>) -> Schedule {
        let error_task = Task::ErrorTask(ErrorTaskData::new(envs));
        let job_id = Uuid::new_v4().simple().to_string();
        Schedule {
            schedule: vec![Job {
                job_id,
                clean: error_task.clone(),
                extract: vec![error_task.clone()],
                load: error_task,
            }],
        }
    }
}

/// Resolves a `ScheduleTask`: under error injection, either builds the
/// single-job error schedule (when specific tables were targeted) or
/// fails outright (mirroring the original raising immediately rather
/// than ever returning a schedule); otherwise filters the catalog with
/// stratified interleaving and plans one job per surviving table.
pub fn run_schedule_task(task: &ScheduleTaskData, warehouse: &Warehouse, now: DateTime<Utc>) -> Result<Schedule> {
    if task.options.test_error {
        let has_targets = task
            .table_names
            .as_ref()
            .map(|names| !names.is_empty())
            .unwrap_or(false);
        if has_targets {
            let mut envs = HashMap::new();
            envs.insert("FAIL_ON_ERROR".to_string(), task.options.fail_on_error.clone());
            return Ok(Schedule::error_schedule(envs));
        }
        return Err(OrchestratorError::InvalidRange(
            "test_error requested with no target tables; failing the schedule task itself".into(),
        ));
    }
    let tables = warehouse.filter(
        task.schema_names.as_deref(),
        task.table_names.as_deref(),
        true,
    );
    Schedule::from_tables(&tables, task.options.clone(), now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Schema, TableMeta};

    fn table_with_meta(name: &str, meta: TableMeta) -> Table {
        let mut t = Table::new(name);
        t.meta = meta;
        t
    }

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-06-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn job_shape_is_clean_plus_n_extracts_plus_load() {
        let mut meta = TableMeta::default();
        meta.batches = 3;
        let table = table_with_meta("t", meta);
        let job = Job::from_table(&table, "job-1", TaskOptions::default(), fixed_now()).unwrap();
        assert_eq!(job.extract.len(), 3);
        assert!(matches!(job.clean, Task::CleanTask(_)));
        assert!(matches!(job.load, Task::LoadTask(_)));
        for (i, task) in job.extract.iter().enumerate() {
            match task {
                Task::ExtractTask(data) => assert_eq!(data.task_number, i as u32),
                other => panic!("expected ExtractTask, got {other:?}"),
            }
        }
    }

    #[test]
    fn batches_is_max_of_options_and_table_policy() {
        let mut meta = TableMeta::default();
        meta.batches = 2;
        let table = table_with_meta("t", meta);
        let mut options = TaskOptions::default();
        options.batches = 5;
        let job = Job::from_table(&table, "job-1", options, fixed_now()).unwrap();
        assert_eq!(job.extract.len(), 5);
    }

    #[test]
    fn look_back_days_without_timestamp_key_is_single_batch() {
        let mut meta = TableMeta::default();
        meta.look_back_days = Some(7);
        let table = table_with_meta("t", meta);
        let job = Job::from_table(&table, "job-1", TaskOptions::default(), fixed_now()).unwrap();
        assert_eq!(job.extract.len(), 1);
        match &job.extract[0] {
            Task::ExtractTask(data) => {
                assert_eq!(data.options.start.as_deref(), Some("2026-06-08"));
                assert_eq!(data.options.end.as_deref(), Some("2026-06-15"));
            }
            other => panic!("expected ExtractTask, got {other:?}"),
        }
    }

    #[test]
    fn look_back_days_with_timestamp_key_batches_per_day() {
        let mut meta = TableMeta::default();
        meta.look_back_days = Some(4);
        meta.timestamp_key = Some("updated_at".to_string());
        let table = table_with_meta("t", meta);
        let job = Job::from_table(&table, "job-1", TaskOptions::default(), fixed_now()).unwrap();
        assert_eq!(job.extract.len(), 4);
    }

    #[test]
    fn explicit_start_bypasses_look_back_computation() {
        let mut meta = TableMeta::default();
        meta.look_back_days = Some(30);
        let table = table_with_meta("t", meta);
        let mut options = TaskOptions::default();
        options.start = Some("2020-01-01".to_string());
        let job = Job::from_table(&table, "job-1", options, fixed_now()).unwrap();
        match &job.extract[0] {
            Task::ExtractTask(data) => assert_eq!(data.options.start.as_deref(), Some("2020-01-01")),
            other => panic!("expected ExtractTask, got {other:?}"),
        }
    }

    #[test]
    fn total_rows_is_copied_from_table_policy() {
        let mut meta = TableMeta::default();
        meta.total_rows = 42_000;
        let table = table_with_meta("t", meta);
        let job = Job::from_table(&table, "job-1", TaskOptions::default(), fixed_now()).unwrap();
        match &job.load {
            Task::LoadTask(_) => {}
            other => panic!("expected LoadTask, got {other:?}"),
        }
        match &job.extract[0] {
            Task::ExtractTask(data) => assert_eq!(data.options.total_rows, 42_000),
            other => panic!("expected ExtractTask, got {other:?}"),
        }
    }

    #[test]
    fn schedule_from_tables_skips_ignored() {
        let mut ignored_meta = TableMeta::default();
        ignored_meta.ignore = true;
        let ignored = table_with_meta("ignored", ignored_meta);
        let kept = table_with_meta("kept", TableMeta::default());
        let tables = vec![&ignored, &kept];
        let schedule = Schedule::from_tables(&tables, TaskOptions::default(), fixed_now()).unwrap();
        assert_eq!(schedule.schedule.len(), 1);
    }

    #[test]
    fn empty_schedule_serializes_to_empty_list() {
        let schedule = Schedule::default();
        let json = serde_json::to_string(&schedule).unwrap();
        assert_eq!(json, r#"{"schedule":[]}"#);
    }

    #[test]
    fn error_schedule_shares_one_task_id_across_roles() {
        let mut envs = HashMap::new();
        envs.insert("FAIL_ON_ERROR".to_string(), "true".to_string());
        let schedule = Schedule::error_schedule(envs);
        let job = &schedule.schedule[0];
        assert_eq!(job.clean.task_id(), job.load.task_id());
        assert_eq!(job.clean.task_id(), job.extract[0].task_id());
    }

    #[test]
    fn run_schedule_task_builds_error_schedule_when_targeted() {
        let warehouse = Warehouse::new();
        let mut options = TaskOptions::default();
        options.test_error = true;
        options.fail_on_error = "true".to_string();
        let task = ScheduleTaskData::new(None, Some(vec!["some_table".to_string()]), options);
        let schedule = run_schedule_task(&task, &warehouse, fixed_now()).unwrap();
        assert_eq!(schedule.schedule.len(), 1);
        assert!(matches!(schedule.schedule[0].clean, Task::ErrorTask(_)));
    }

    #[test]
    fn run_schedule_task_fails_outright_without_targets() {
        let warehouse = Warehouse::new();
        let mut options = TaskOptions::default();
        options.test_error = true;
        let task = ScheduleTaskData::new(None, None, options);
        assert!(run_schedule_task(&task, &warehouse, fixed_now()).is_err());
    }

    #[test]
    fn run_schedule_task_filters_and_plans_normally() {
        let mut warehouse = Warehouse::new();
        let mut schema = Schema::new("s");
        schema.add_table(Table::new("t"));
        warehouse.add_schema(schema);
        let task = ScheduleTaskData::new(None, None, TaskOptions::default());
        let schedule = run_schedule_task(&task, &warehouse, fixed_now()).unwrap();
        assert_eq!(schedule.schedule.len(), 1);
    }
}
