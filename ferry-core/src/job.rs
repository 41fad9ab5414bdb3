//! Compiled query jobs
//!
//! A [`CompiledJob`] is everything the warehouse needs to run one query: the
//! query text, the description of the files exposed as a temporary external
//! table and, for write jobs, the destination table with its schema.
//! Jobs are rebuilt for every invocation since source URIs and request values
//! change from call to call.

use crate::configuration::{AdditionalColumnValue, JobConfiguration, TimePartitioningSpec};
use crate::query::{build_count_query, build_query, CompileError};
use crate::schema::{build_external_schema, build_table_schema, SourceColumn, TableColumn};
use serde::{Deserialize, Serialize};

/// Create disposition used for every write job
pub const CREATE_IF_NEEDED: &str = "CREATE_IF_NEEDED";

/// Incoming files exposed to the query as a temporary table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSource {
    /// Relation name the query reads from
    pub relation: String,
    pub source_uris: Vec<String>,
    pub schema: Vec<SourceColumn>,
    pub field_delimiter: String,
    pub quote_character: String,
    pub skip_leading_rows: u32,
    pub max_bad_records: u32,
    pub ignore_unknown_values: bool,
}

/// Compiled time partitioning of a destination table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePartitioning {
    pub partition_type: String,
    pub field: Option<String>,
    pub expiration_ms: Option<u64>,
}

impl From<&TimePartitioningSpec> for TimePartitioning {
    fn from(spec: &TimePartitioningSpec) -> Self {
        Self {
            partition_type: spec.partition_type.clone(),
            field: spec.field.clone(),
            expiration_ms: spec.expiration_ms(),
        }
    }
}

/// Table the query result is written to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub dataset: String,
    pub table: String,
    pub schema: Vec<TableColumn>,
    pub write_disposition: String,
    pub create_disposition: String,
    pub time_partitioning: Option<TimePartitioning>,
}

/// Fully resolved query job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledJob {
    pub query: String,
    pub source: ExternalSource,
    /// `None` for read-only jobs such as the row count probe
    pub destination: Option<Destination>,
    pub location: String,
}

impl CompiledJob {
    pub fn is_write(&self) -> bool {
        self.destination.is_some()
    }
}

/// Describe the incoming files as an external source
pub fn compile_external_source(
    configuration: &JobConfiguration,
    source_uris: &[String],
) -> ExternalSource {
    ExternalSource {
        relation: configuration.temporary_table_name(),
        source_uris: source_uris.to_vec(),
        schema: build_external_schema(&configuration.file_schema),
        field_delimiter: configuration.field_delimiter.clone(),
        quote_character: configuration.quote_character.clone(),
        skip_leading_rows: configuration.header_rows,
        max_bad_records: configuration.footer_rows,
        ignore_unknown_values: true,
    }
}

/// Compile the row count probe, which writes nothing
pub fn compile_probe_job(configuration: &JobConfiguration, source_uris: &[String]) -> CompiledJob {
    let source = compile_external_source(configuration, source_uris);
    CompiledJob {
        query: build_count_query(&source.relation),
        source,
        destination: None,
        location: configuration.location.clone(),
    }
}

/// Compile the job writing the transformed rows into the destination table
pub fn compile_load_job(
    configuration: &JobConfiguration,
    source_uris: &[String],
    request_values: &[AdditionalColumnValue],
) -> Result<CompiledJob, CompileError> {
    let source = compile_external_source(configuration, source_uris);
    let query = build_query(
        &configuration.file_schema,
        &configuration.additional_columns,
        request_values,
        &source.relation,
    )?;

    let destination = Destination {
        dataset: configuration.dataset.clone(),
        table: configuration.table.clone(),
        schema: build_table_schema(
            &configuration.file_schema,
            &configuration.additional_columns,
        ),
        write_disposition: configuration.mode.write_disposition().to_string(),
        create_disposition: CREATE_IF_NEEDED.to_string(),
        time_partitioning: configuration
            .time_partitioning
            .as_ref()
            .map(TimePartitioning::from),
    };

    Ok(CompiledJob {
        query,
        source,
        destination: Some(destination),
        location: configuration.location.clone(),
    })
}
