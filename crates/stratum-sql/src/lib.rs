//! SQL generation and execution for the load stage: overwrite
//! (truncate + copy) and upsert (stage + delete + insert) statement
//! sequences, plus the `WarehouseCursor` seam real warehouse drivers
//! implement.

pub mod load_engine;

pub use load_engine::{
    build_load_plan, copy_table_stmt, create_staging_table_stmt, create_table_stmt,
    delete_from_table_stmt, drop_staging_table_stmt, insert_into_table_stmt, plan_to_string, run_load,
    truncate_table_stmt, update_load_date_stmt, CopyFileResult, CursorResult, SqlStatementKind,
    Statement, WarehouseCursor,
};
