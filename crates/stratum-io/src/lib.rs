//! Stage encoding, object storage and watermark tracking: the I/O
//! boundary stratum-core's pure planner and task model are dispatched
//! against.

pub mod stage_client;
pub mod stage_encoder;
pub mod watermark;

pub use stage_client::{clean_stage, stage_key, stage_prefix, upload_chunk, ObjectBucket, ObjectStoreBucket};
pub use stage_encoder::{arrow_schema_for, new_encoder, DataChunk, StageEncoderKind};
pub use watermark::{InMemoryWatermarkStore, WatermarkStore};
