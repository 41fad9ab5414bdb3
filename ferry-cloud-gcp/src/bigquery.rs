//! BigQuery query engine over the REST v2 API
//!
//! Jobs are query jobs reading the incoming files through a temporary external
//! table definition. Write jobs target the destination table with the
//! configured dispositions. The table is created with the compiled schema and
//! partitioning beforehand so descriptions and modes are applied even on
//! append.

use crate::auth::{GcpAuth, CLOUD_PLATFORM_SCOPE};
use crate::metrics::{record_request, GCP_API_DURATION};
use crate::rest::{http_client, ApiError};
use crate::Result;
use async_trait::async_trait;
use ferry_core::{CompiledJob, Destination, ExternalSource, TimePartitioning};
use ferry_runtime::{EngineError, EngineResult, JobHandle, QueryEngine, ResultSet};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

const SERVICE: &str = "bigquery";

/// Extra time granted to the HTTP call on top of the server-side wait
const FETCH_GRACE: Duration = Duration::from_secs(10);

/// HTTP timeout of a cancellation request
const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Error reasons BigQuery uses for malformed queries and requests
const BAD_REQUEST_REASONS: &[&str] = &["invalidQuery", "invalid"];

fn table_definition(source: &ExternalSource) -> Value {
    json!({
        "sourceFormat": "CSV",
        "sourceUris": source.source_uris,
        "schema": { "fields": source.schema },
        "csvOptions": {
            "fieldDelimiter": source.field_delimiter,
            "quote": source.quote_character,
            "skipLeadingRows": source.skip_leading_rows.to_string(),
        },
        "maxBadRecords": source.max_bad_records,
        "ignoreUnknownValues": source.ignore_unknown_values,
    })
}

fn time_partitioning(partitioning: &TimePartitioning) -> Value {
    let mut value = json!({ "type": partitioning.partition_type });
    if let Some(field) = &partitioning.field {
        value["field"] = json!(field);
    }
    if let Some(expiration_ms) = partitioning.expiration_ms {
        value["expirationMs"] = json!(expiration_ms.to_string());
    }
    value
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReference,
    status: Option<JobStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct Cell {
    v: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(default)]
    f: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResultsPage {
    #[serde(default)]
    job_complete: bool,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<Row>,
    page_token: Option<String>,
}

fn cell_text(cell: Cell) -> Option<String> {
    match cell.v? {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

/// Map a transport failure to the engine taxonomy
fn transport_error(e: reqwest::Error) -> EngineError {
    if e.is_timeout() {
        EngineError::ClientTimeout(e.to_string())
    } else if e.is_connect() || e.is_request() || e.is_body() {
        EngineError::ConnectionLost(e.to_string())
    } else {
        EngineError::Unexpected(e.to_string())
    }
}

/// Map an error response to the engine taxonomy
fn status_error(status: StatusCode, body: &str) -> EngineError {
    let error = ApiError::parse(body);
    let message = format!("{}: {}", status, error.message);

    if status == StatusCode::BAD_REQUEST && error.has_reason(BAD_REQUEST_REASONS) {
        EngineError::BadRequest(message)
    } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        EngineError::ClientTimeout(message)
    } else {
        EngineError::Service(message)
    }
}

/// BigQuery implementation of [`QueryEngine`]
pub struct BigQueryClient {
    project_id: String,
    base_url: String,
    auth: Arc<GcpAuth>,
    http_client: reqwest::Client,
}

impl BigQueryClient {
    /// Create a client for `project_id`
    ///
    /// `base_url` is the API root, e.g. `https://bigquery.googleapis.com/bigquery/v2`.
    pub fn new(project_id: impl Into<String>, base_url: &str, auth: Arc<GcpAuth>) -> Result<Self> {
        Ok(Self {
            project_id: project_id.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            http_client: http_client()?,
        })
    }

    fn project_url(&self) -> String {
        format!("{}/projects/{}", self.base_url, self.project_id)
    }

    /// `{project}/{collection}/{job_id}{action}?location=...`
    fn job_url(&self, collection: &str, handle: &JobHandle, action: &str) -> String {
        format!(
            "{}/{}/{}{}?location={}",
            self.project_url(),
            collection,
            urlencoding::encode(&handle.job_id),
            action,
            urlencoding::encode(&handle.location)
        )
    }

    /// Send an authorized request and return the successful response
    async fn send(&self, operation: &str, request: RequestBuilder) -> EngineResult<Response> {
        let token = self
            .auth
            .get_access_token(CLOUD_PLATFORM_SCOPE)
            .await
            .map_err(|e| EngineError::Unexpected(e.to_string()))?;

        let _timer = GCP_API_DURATION
            .with_label_values(&[SERVICE, operation])
            .start_timer();

        let response = request.bearer_auth(token).send().await.map_err(|e| {
            record_request(SERVICE, operation, false);
            transport_error(e)
        })?;

        record_request(SERVICE, operation, response.status().is_success());
        Ok(response)
    }

    async fn expect_success(response: Response) -> EngineResult<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }

    async fn parse<T: serde::de::DeserializeOwned>(response: Response) -> EngineResult<T> {
        let body = response.text().await.map_err(transport_error)?;
        serde_json::from_str(&body)
            .map_err(|e| EngineError::Unexpected(format!("Malformed BigQuery response: {}", e)))
    }

    /// Create the destination table unless it already exists
    pub async fn ensure_table(&self, destination: &Destination) -> EngineResult<()> {
        let url = format!(
            "{}/datasets/{}/tables",
            self.project_url(),
            urlencoding::encode(&destination.dataset)
        );

        let mut table = json!({
            "tableReference": {
                "projectId": self.project_id,
                "datasetId": destination.dataset,
                "tableId": destination.table,
            },
            "schema": { "fields": destination.schema },
        });
        if let Some(partitioning) = &destination.time_partitioning {
            table["timePartitioning"] = time_partitioning(partitioning);
        }

        let response = self
            .send("tables.insert", self.http_client.post(&url).json(&table))
            .await?;

        if response.status() == StatusCode::CONFLICT {
            debug!(dataset = %destination.dataset, table = %destination.table, "Destination table already exists");
            return Ok(());
        }

        Self::expect_success(response).await?;
        info!(dataset = %destination.dataset, table = %destination.table, "Created destination table");
        Ok(())
    }

    fn job_body(&self, job: &CompiledJob, job_id: &str) -> Value {
        let mut table_definitions = serde_json::Map::new();
        table_definitions.insert(job.source.relation.clone(), table_definition(&job.source));

        let mut query = json!({
            "query": job.query,
            "useLegacySql": false,
            "tableDefinitions": table_definitions,
        });

        if let Some(destination) = &job.destination {
            query["destinationTable"] = json!({
                "projectId": self.project_id,
                "datasetId": destination.dataset,
                "tableId": destination.table,
            });
            query["writeDisposition"] = json!(destination.write_disposition);
            query["createDisposition"] = json!(destination.create_disposition);
            if let Some(partitioning) = &destination.time_partitioning {
                query["timePartitioning"] = time_partitioning(partitioning);
            }
        }

        json!({
            "jobReference": {
                "projectId": self.project_id,
                "jobId": job_id,
                "location": job.location,
            },
            "configuration": { "query": query },
        })
    }

    async fn fetch_page(
        &self,
        handle: &JobHandle,
        wait: Duration,
        page_token: Option<&str>,
    ) -> EngineResult<QueryResultsPage> {
        let mut url = format!(
            "{}&timeoutMs={}",
            self.job_url("queries", handle, ""),
            wait.as_millis()
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        let request = self.http_client.get(&url).timeout(wait + FETCH_GRACE);
        let response = self.send("jobs.getQueryResults", request).await?;
        let response = Self::expect_success(response).await?;
        Self::parse(response).await
    }
}

#[async_trait]
impl QueryEngine for BigQueryClient {
    async fn submit(&self, job: &CompiledJob) -> EngineResult<JobHandle> {
        if let Some(destination) = &job.destination {
            self.ensure_table(destination).await?;
        }

        let job_id = format!("ferry_{}", Uuid::new_v4().simple());
        let url = format!("{}/jobs", self.project_url());
        let request = self.http_client.post(&url).json(&self.job_body(job, &job_id));

        let response = self.send("jobs.insert", request).await?;
        let response = Self::expect_success(response).await?;
        let resource: JobResource = Self::parse(response).await?;

        let location = resource
            .job_reference
            .location
            .unwrap_or_else(|| job.location.clone());
        debug!(job_id = %resource.job_reference.job_id, "BigQuery job inserted");
        Ok(JobHandle::new(resource.job_reference.job_id, location))
    }

    async fn is_running(&self, handle: &JobHandle) -> EngineResult<bool> {
        let request = self.http_client.get(self.job_url("jobs", handle, ""));
        let response = self.send("jobs.get", request).await?;
        let response = Self::expect_success(response).await?;
        let resource: JobResource = Self::parse(response).await?;

        match resource.status {
            Some(status) => Ok(status.state != "DONE"),
            None => {
                debug!(job_id = %handle.job_id, "BigQuery job has no status yet, still running");
                Ok(true)
            }
        }
    }

    async fn cancel(&self, handle: &JobHandle) -> EngineResult<bool> {
        let request = self
            .http_client
            .post(self.job_url("jobs", handle, "/cancel"))
            .timeout(CANCEL_TIMEOUT);
        let response = self.send("jobs.cancel", request).await?;

        if response.status().is_success() {
            return Ok(true);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        warn!(
            job_id = %handle.job_id,
            status = %status,
            error = %ApiError::parse(&body).message,
            "BigQuery rejected job cancellation"
        );
        Ok(false)
    }

    async fn fetch_result(&self, handle: &JobHandle, wait: Duration) -> EngineResult<ResultSet> {
        // Pages share one wait bound
        let deadline = Instant::now() + wait;
        let mut page = self.fetch_page(handle, wait, None).await?;
        if !page.job_complete {
            return Err(EngineError::ClientTimeout(format!(
                "job {} not complete after {}s",
                handle.job_id,
                wait.as_secs()
            )));
        }

        let columns: Vec<String> = page
            .schema
            .take()
            .map(|schema| schema.fields.into_iter().map(|f| f.name).collect())
            .unwrap_or_default();
        let mut rows = Vec::new();

        loop {
            rows.extend(
                page.rows
                    .drain(..)
                    .map(|row| row.f.into_iter().map(cell_text).collect::<Vec<_>>()),
            );
            match page.page_token.take() {
                Some(token) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    page = self.fetch_page(handle, left, Some(&token)).await?;
                }
                None => break,
            }
        }

        Ok(ResultSet::new(columns, rows))
    }
}
