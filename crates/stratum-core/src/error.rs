//! Error types for catalog parsing, task scheduling and time-range planning.

use thiserror::Error;

/// Errors raised anywhere in the stratum orchestrator core.
///
/// Propagation unwinds the task that raised it; the dispatcher decides
/// whether execution of the remaining schedule continues.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("failed to parse catalog document: {0}")]
    CatalogParseError(String),

    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("no table named {table} in schema {schema}")]
    TableNotFound { schema: String, table: String },

    #[error("no schema named {0}")]
    SchemaNotFound(String),

    #[error("no extractor registered for table {0}")]
    ExtractorMissing(String),

    #[error("invalid staging table suffix: {0}")]
    InvalidSuffix(String),

    #[error("unable to parse date {value:?}. required format: {required_format}")]
    InvalidDateFormat {
        value: String,
        required_format: &'static str,
    },

    #[error("{0}")]
    InvalidRange(String),

    #[error("load policy unresolved for table {0}: requires primary_key, timestamp_key or truncate override")]
    LoadPolicyUnresolved(String),

    #[error("watermark operation on {table} requires meta.timestamp_field to be set")]
    WatermarkRequired { table: String },

    #[error("stage I/O failure: {0}")]
    StageIoFailure(#[source] anyhow::Error),

    #[error("warehouse failure: {0}")]
    WarehouseFailure(#[source] anyhow::Error),

    #[error("workflow submission failure: {0}")]
    WorkflowSubmitFailure(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
