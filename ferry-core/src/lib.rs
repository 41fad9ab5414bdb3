//! # Ferry Core
//!
//! Configuration model for file ingestion, and the compilers deriving
//! external source schemas, destination table schemas and transformation
//! queries from it.

pub mod configuration;
pub mod job;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use configuration::{
    AdditionalColumnSpec, AdditionalColumnValue, ColumnTransformation, ColumnValue, ConfigError,
    FieldSpec, FieldTransformation, JobConfiguration, TimePartitioningSpec, WriteMode,
};
pub use job::{
    compile_external_source, compile_load_job, compile_probe_job, CompiledJob, Destination,
    ExternalSource, TimePartitioning,
};
pub use query::{build_count_query, build_query, CompileError, ROW_COUNT_COLUMN};
pub use schema::{
    build_external_schema, build_table_schema, ColumnMode, SourceColumn, TableColumn,
};
