//! Executes a [`Schedule`] either locally (sequential, in-process) or
//! by handing a `ScheduleTask` off to a remote workflow engine.
//!
//! Grounded on `original_source/src/blazel/cli.py` (`run`, `pipeline`
//! commands: local inline execution vs. `start_statemachine`) and
//! `original_source/src/blazel/tasks.py` (`BaseTask.__call__` per
//! task kind).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use stratum_core::{
    Deadline, ErrorTaskData, ExtractTaskData, ExtractorRegistry, Job, LoadTaskData, OrchestratorError,
    Result, Schedule, ScheduleTaskData, Task, TaskStore, TimeRange, Warehouse,
};
use stratum_io::{clean_stage, new_encoder, upload_chunk, ObjectBucket, WatermarkStore};
use stratum_sql::{run_load, WarehouseCursor};

/// Submits a `ScheduleTask` to a remote orchestration backend (e.g. an
/// AWS Step Functions state machine in the original) instead of
/// running it inline. No concrete remote backend ships in this crate
/// — connecting one is an integration concern outside this repo's
/// scope — so only the trait and a logging stand-in live here.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    async fn submit_schedule_task(&self, task: &ScheduleTaskData) -> Result<String>;
}

pub struct LoggingWorkflowEngine;

#[async_trait]
impl WorkflowEngine for LoggingWorkflowEngine {
    async fn submit_schedule_task(&self, task: &ScheduleTaskData) -> Result<String> {
        let execution_id = Uuid::new_v4().simple().to_string();
        tracing::info!(
            execution_id = %execution_id,
            task_id = %task.task_id,
            "submitted schedule task to remote workflow engine"
        );
        Ok(execution_id)
    }
}

/// Rows are encoded and uploaded in batches of this size before the
/// encoder's own size threshold is even checked, bounding how much
/// extracted data sits unflushed in memory.
const EXTRACT_FLUSH_ROWS: usize = stratum_io::stage_encoder::DEFAULT_CSV_BATCH_SIZE;

/// Runs every task in a schedule sequentially, in process.
pub struct LocalDispatcher<'a> {
    pub warehouse: &'a Warehouse,
    pub extractors: &'a ExtractorRegistry,
    pub bucket: &'a dyn ObjectBucket,
    pub cursor: &'a dyn WarehouseCursor,
    pub watermark_store: &'a dyn WatermarkStore,
    pub task_store: &'a dyn TaskStore,
    pub stage_root: String,
    pub max_file_size: usize,
}

impl<'a> LocalDispatcher<'a> {
    pub async fn run_schedule(&self, schedule: &Schedule) -> Result<()> {
        for job in &schedule.schedule {
            self.run_job(job).await?;
        }
        Ok(())
    }

    pub async fn run_job(&self, job: &Job) -> Result<()> {
        self.task_store.put_job(job).await?;
        self.run_task(&job.clean).await?;
        for extract in &job.extract {
            self.run_task(extract).await?;
        }
        self.run_task(&job.load).await?;
        Ok(())
    }

    pub async fn run_task(&self, task: &Task) -> Result<()> {
        self.task_store.put_task(task).await?;
        match task {
            Task::ErrorTask(data) => self.run_error(data).await,
            Task::CleanTask(data) => clean_stage(self.bucket, &data.schema_name, &data.table_name)
                .await
                .map(|_| ()),
            Task::ExtractTask(data) => self.run_extract(data).await,
            Task::LoadTask(data) => self.run_load_task(data).await,
            Task::ScheduleTask(_) => Ok(()),
        }
    }

    async fn run_error(&self, data: &ErrorTaskData) -> Result<()> {
        for (key, value) in &data.envs {
            std::env::set_var(key, value);
        }
        Err(OrchestratorError::Other(anyhow::anyhow!(
            "ErrorTask {} raised its injected failure",
            data.task_id
        )))
    }

    async fn run_extract(&self, data: &ExtractTaskData) -> Result<()> {
        let table = self
            .warehouse
            .get(&data.table.schema_name, &data.table.table_name)?
            .clone();
        let extractor = self.extractors.get(&table.table_uri())?;

        let latest = if table.meta.timestamp_field.is_some() {
            self.watermark_store.get_latest_timestamp(&table.table_uri()).await?
        } else {
            None
        };
        let range = TimeRange::from_task(
            data.options.start.clone(),
            data.options.end.clone(),
            table.meta.timestamp_field.is_some(),
            latest,
        );
        let deadline = Deadline::from_config();

        let (tx, mut rx) = mpsc::channel(EXTRACT_FLUSH_ROWS);
        let table_for_extract = table.clone();
        let range_for_extract = range.clone();
        let options_for_extract = data.options.clone();
        let extractor_handle = tokio::spawn(async move {
            extractor
                .extract(&table_for_extract, &range_for_extract, &options_for_extract, &deadline, tx)
                .await
        });

        let columns: Vec<(String, String)> = table
            .columns
            .values()
            .map(|c| (c.name.clone(), c.dtype.clone()))
            .collect();
        let schema = stratum_io::arrow_schema_for(&columns);
        let mut encoder = new_encoder(table.meta.file_format, schema, self.max_file_size);
        let suffix = encoder.suffix();

        let mut batch = Vec::with_capacity(EXTRACT_FLUSH_ROWS);
        while let Some(row) = rx.recv().await {
            batch.push(row);
            if batch.len() >= EXTRACT_FLUSH_ROWS {
                if let Some(chunk) = encoder.write_batch(&batch)? {
                    upload_chunk(
                        self.bucket,
                        table.schema_name(),
                        &table.name,
                        data.task_number,
                        &chunk,
                        suffix,
                    )
                    .await?;
                }
                batch.clear();
            }
        }
        if !batch.is_empty() {
            if let Some(chunk) = encoder.write_batch(&batch)? {
                upload_chunk(self.bucket, table.schema_name(), &table.name, data.task_number, &chunk, suffix)
                    .await?;
            }
        }
        if let Some(chunk) = encoder.finish()? {
            upload_chunk(self.bucket, table.schema_name(), &table.name, data.task_number, &chunk, suffix).await?;
        }

        extractor_handle
            .await
            .map_err(|e| OrchestratorError::Other(e.into()))??;
        Ok(())
    }

    async fn run_load_task(&self, data: &LoadTaskData) -> Result<()> {
        let mut table = self
            .warehouse
            .get(&data.table.schema_name, &data.table.table_name)?
            .clone();
        if let Some(truncate) = data.truncate {
            table.meta.truncate = Some(truncate);
        }
        run_load(self.cursor, self.watermark_store, &table, &self.stage_root).await?;
        Ok(())
    }
}

pub async fn submit_remote(engine: &dyn WorkflowEngine, task: &ScheduleTaskData) -> Result<String> {
    engine.submit_schedule_task(task).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::{InMemoryTaskStore, TaskOptions};

    #[tokio::test]
    async fn logging_workflow_engine_returns_an_execution_id() {
        let engine = LoggingWorkflowEngine;
        let task = ScheduleTaskData::new(None, None, TaskOptions::default());
        let execution_id = submit_remote(&engine, &task).await.unwrap();
        assert!(!execution_id.is_empty());
    }

    #[tokio::test]
    async fn task_store_records_every_dispatched_task_id() {
        let warehouse = Warehouse::new();
        let extractors = ExtractorRegistry::new();
        let bucket = stratum_io::ObjectStoreBucket::new(Arc::new(object_store::memory::InMemory::new()));
        let cursor = NoopCursor;
        let watermark_store = stratum_io::InMemoryWatermarkStore::new();
        let task_store = InMemoryTaskStore::new();
        let dispatcher = LocalDispatcher {
            warehouse: &warehouse,
            extractors: &extractors,
            bucket: &bucket,
            cursor: &cursor,
            watermark_store: &watermark_store,
            task_store: &task_store,
            stage_root: "stage0".to_string(),
            max_file_size: 1024,
        };
        let clean = Task::CleanTask(stratum_core::TableTaskData::new("job-1", "db", "s", "t").unwrap());
        let id = clean.task_id().to_string();
        dispatcher.run_task(&clean).await.unwrap();
        assert!(task_store.get_task(&id).await.unwrap().is_some());
    }

    struct NoopCursor;

    #[async_trait]
    impl WarehouseCursor for NoopCursor {
        async fn execute(&self, _statement: &stratum_sql::Statement) -> Result<stratum_sql::CursorResult> {
            Ok(stratum_sql::CursorResult::Status("ok".to_string()))
        }
        async fn query_scalar(&self, _sql: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }
}
