//! Persistence seam for jobs and tasks.
//!
//! Grounded on `original_source/src/blazel/tasks.py`
//! (`ExtractLoadJob.to_dynamodb` / `from_dynamodb`): the original keeps
//! a job row referencing its task ids plus one fully-serialized row
//! per task. `TaskStore` generalizes that over any backing store; a
//! DynamoDB, Postgres or other implementation lives outside this
//! crate. An in-memory implementation is provided for tests and for
//! local/sequential dispatch where nothing needs to survive the
//! process.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::Result;
use crate::planner::Job;
use crate::task::Task;

/// A job row plus its full task rows, exactly as the original's
/// `ExtractLoadJob.to_dynamodb` pairs them.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn put_job(&self, job: &Job) -> Result<()>;
    async fn get_job(&self, job_id: &str) -> Result<Option<Job>>;
    async fn put_task(&self, task: &Task) -> Result<()>;
    async fn get_task(&self, task_id: &str) -> Result<Option<Task>>;
}

/// Last-write-wins in-memory store.
#[derive(Default)]
pub struct InMemoryTaskStore {
    jobs: RwLock<HashMap<String, Job>>,
    tasks: RwLock<HashMap<String, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        InMemoryTaskStore::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn put_job(&self, job: &Job) -> Result<()> {
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(job_id)
            .cloned())
    }

    async fn put_task(&self, task: &Task) -> Result<()> {
        self.tasks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task.task_id().to_string(), task.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(self
            .tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(task_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Table;
    use crate::task::{TableTaskData, TaskOptions};

    fn sample_job() -> Job {
        let table = Table::new("t");
        Job::from_table(&table, "job-1", TaskOptions::default(), chrono::Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn put_then_get_job_round_trips() {
        let store = InMemoryTaskStore::new();
        let job = sample_job();
        store.put_job(&job).await.unwrap();
        let got = store.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(got.job_id, job.job_id);
    }

    #[tokio::test]
    async fn get_unknown_job_is_none() {
        let store = InMemoryTaskStore::new();
        assert!(store.get_job("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_is_idempotent_last_write_wins() {
        let store = InMemoryTaskStore::new();
        let task = Task::CleanTask(TableTaskData::new("job-1", "db", "s", "t").unwrap());
        store.put_task(&task).await.unwrap();
        store.put_task(&task).await.unwrap();
        let got = store.get_task(task.task_id()).await.unwrap().unwrap();
        assert_eq!(got, task);
    }
}
