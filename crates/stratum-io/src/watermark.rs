//! Incremental-extraction watermark tracking: the last successfully
//! loaded timestamp per table, consulted by [`stratum_core::TimeRange::from_task`]
//! when a task's options don't pin an explicit start date.
//!
//! Grounded on `original_source/src/blazel/tasks.py`
//! (`get_latest_timestamp` / `set_latest_timestamp`, backed by what
//! the original calls the "extract time table").

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use stratum_core::{OrchestratorError, Result};

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn get_latest_timestamp(&self, table_uri: &str) -> Result<Option<String>>;
    /// Last-write-wins: a newer call always overwrites, regardless of
    /// ordering against reads racing it.
    async fn set_latest_timestamp(&self, table_uri: &str, timestamp: String) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryWatermarkStore {
    watermarks: RwLock<HashMap<String, String>>,
}

impl InMemoryWatermarkStore {
    pub fn new() -> Self {
        InMemoryWatermarkStore::default()
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
    async fn get_latest_timestamp(&self, table_uri: &str) -> Result<Option<String>> {
        Ok(self
            .watermarks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(table_uri)
            .cloned())
    }

    async fn set_latest_timestamp(&self, table_uri: &str, timestamp: String) -> Result<()> {
        self.watermarks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(table_uri.to_string(), timestamp);
        Ok(())
    }
}

/// Requires `meta.timestamp_field` to be set before touching the
/// watermark store, matching the original raising `ValueError` when
/// it is `None`.
pub fn require_timestamp_field(table_uri: &str, timestamp_field: Option<&str>) -> Result<()> {
    if timestamp_field.is_none() {
        return Err(OrchestratorError::WatermarkRequired {
            table: table_uri.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_table_has_no_watermark() {
        let store = InMemoryWatermarkStore::new();
        assert_eq!(store.get_latest_timestamp("db.s.t").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = InMemoryWatermarkStore::new();
        store
            .set_latest_timestamp("db.s.t", "2026-01-01T00:00:00".to_string())
            .await
            .unwrap();
        assert_eq!(
            store.get_latest_timestamp("db.s.t").await.unwrap().as_deref(),
            Some("2026-01-01T00:00:00")
        );
    }

    #[tokio::test]
    async fn later_write_overwrites_earlier_one() {
        let store = InMemoryWatermarkStore::new();
        store.set_latest_timestamp("db.s.t", "2026-01-01T00:00:00".to_string()).await.unwrap();
        store.set_latest_timestamp("db.s.t", "2026-02-01T00:00:00".to_string()).await.unwrap();
        assert_eq!(
            store.get_latest_timestamp("db.s.t").await.unwrap().as_deref(),
            Some("2026-02-01T00:00:00")
        );
    }

    #[test]
    fn missing_timestamp_field_is_rejected() {
        let err = require_timestamp_field("db.s.t", None).unwrap_err();
        assert!(matches!(err, OrchestratorError::WatermarkRequired { .. }));
    }

    #[test]
    fn present_timestamp_field_is_accepted() {
        require_timestamp_field("db.s.t", Some("updated_at")).unwrap();
    }
}
