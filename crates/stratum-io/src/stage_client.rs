//! Object-storage access for staged files: upload, prefix listing and
//! batched cleanup.
//!
//! Grounded on `original_source/src/blazel/tables.py` (`get_key`,
//! `clean_stage`, `upload_to_stage`) and on `object_store`'s
//! `ObjectStore` trait, which the teacher already depends on for its
//! Parquet sink destinations.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;

use stratum_core::{OrchestratorError, Result};

use crate::stage_encoder::DataChunk;

/// Matches the original's S3 multi-object-delete chunking; batching
/// here just bounds how many concurrent single-object deletes are
/// in flight at once, since `object_store` has no multi-key delete.
pub const DELETE_BATCH_SIZE: usize = 1000;

#[async_trait]
pub trait ObjectBucket: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
    async fn delete_batch(&self, keys: &[String]) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
}

/// Thin adapter over any `object_store::ObjectStore`. Tests and local
/// dispatch can use `object_store::memory::InMemory` directly as the
/// backing store — no separate fake implementation is needed.
pub struct ObjectStoreBucket {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBucket {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        ObjectStoreBucket { store }
    }
}

#[async_trait]
impl ObjectBucket for ObjectStoreBucket {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.store
            .put(&ObjectPath::from(key), bytes.into())
            .await
            .map_err(|e| OrchestratorError::StageIoFailure(e.into()))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let path = ObjectPath::from(prefix);
        let mut stream = self.store.list(Some(&path));
        let mut keys = Vec::new();
        while let Some(entry) = stream.next().await {
            let meta = entry.map_err(|e| OrchestratorError::StageIoFailure(e.into()))?;
            keys.push(meta.location.to_string());
        }
        Ok(keys)
    }

    async fn delete_batch(&self, keys: &[String]) -> Result<()> {
        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            for key in chunk {
                self.store
                    .delete(&ObjectPath::from(key.as_str()))
                    .await
                    .map_err(|e| OrchestratorError::StageIoFailure(e.into()))?;
            }
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let result = self
            .store
            .get(&ObjectPath::from(key))
            .await
            .map_err(|e| OrchestratorError::StageIoFailure(e.into()))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| OrchestratorError::StageIoFailure(e.into()))?;
        Ok(bytes.to_vec())
    }
}

/// `<schema>/<table>/<table>_b<BB>_f<FF>.<suffix>`, zero-padded to two
/// digits, matching the original's `get_key`.
pub fn stage_key(schema: &str, table: &str, batch: u32, file: u32, suffix: &str) -> String {
    format!("{schema}/{table}/{table}_b{batch:02}_f{file:02}.{suffix}")
}

pub fn stage_prefix(schema: &str, table: &str) -> String {
    format!("{schema}/{table}/")
}

/// Deletes every staged object for a table ahead of an extract run.
pub async fn clean_stage(bucket: &dyn ObjectBucket, schema: &str, table: &str) -> Result<String> {
    let prefix = stage_prefix(schema, table);
    let keys = bucket.list(&prefix).await?;
    let count = keys.len();
    bucket.delete_batch(&keys).await?;
    Ok(format!("Deleted {count} file(s) from {prefix}"))
}

/// Uploads one rotated-out chunk and returns the key it was written
/// to.
pub async fn upload_chunk(
    bucket: &dyn ObjectBucket,
    schema: &str,
    table: &str,
    batch: u32,
    chunk: &DataChunk,
    suffix: &str,
) -> Result<String> {
    let key = stage_key(schema, table, batch, chunk.file_number, suffix);
    bucket.put(&key, chunk.bytes.clone()).await?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn bucket() -> ObjectStoreBucket {
        ObjectStoreBucket::new(Arc::new(InMemory::new()))
    }

    #[test]
    fn stage_key_zero_pads_batch_and_file() {
        let key = stage_key("schema0", "table0", 1, 23, "csv.gz");
        assert_eq!(key, "schema0/table0/table0_b01_f23.csv.gz");
    }

    #[tokio::test]
    async fn clean_stage_reports_deleted_count() {
        let bucket = bucket();
        bucket.put("schema0/table0/table0_b00_f00.csv.gz", vec![1, 2, 3]).await.unwrap();
        bucket.put("schema0/table0/table0_b00_f01.csv.gz", vec![4, 5]).await.unwrap();
        bucket.put("schema0/other/other_b00_f00.csv.gz", vec![9]).await.unwrap();

        let message = clean_stage(&bucket, "schema0", "table0").await.unwrap();
        assert_eq!(message, "Deleted 2 file(s) from schema0/table0/");

        let remaining = bucket.list("schema0/").await.unwrap();
        assert_eq!(remaining, vec!["schema0/other/other_b00_f00.csv.gz".to_string()]);
    }

    #[tokio::test]
    async fn put_then_get_round_trips_bytes() {
        let bucket = bucket();
        bucket.put("k", vec![1, 2, 3]).await.unwrap();
        assert_eq!(bucket.get("k").await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn upload_chunk_writes_to_expected_key() {
        let bucket = bucket();
        let chunk = DataChunk {
            bytes: vec![1],
            file_number: 2,
            row_count: 1,
        };
        let key = upload_chunk(&bucket, "s", "t", 3, &chunk, "csv.gz").await.unwrap();
        assert_eq!(key, "s/t/t_b03_f02.csv.gz");
        assert_eq!(bucket.get(&key).await.unwrap(), vec![1]);
    }
}
