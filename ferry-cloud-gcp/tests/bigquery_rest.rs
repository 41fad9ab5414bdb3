//! BigQuery REST contract tests
//!
//! Run the BigQuery engine against a wiremock server and check the requests it
//! sends and how responses map onto the engine error taxonomy.

use ferry_cloud_gcp::{BigQueryClient, GcpAuth};
use ferry_core::{compile_load_job, compile_probe_job, AdditionalColumnValue, JobConfiguration};
use ferry_runtime::{EngineError, JobHandle, QueryEngine};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CONFIGURATION: &str = r#"
dataset: sales
table: orders
field_delimiter: "|"
header_rows: 1
file_schema:
  - name: id
    type: INTEGER
    required: true
  - name: raw_name
    type: STRING
    transformation:
      expression: UPPER(raw_name)
mode: APPEND
time_partitioning:
  type: DAY
  expiration_day: 1
additional_columns:
  - name: source
    type: STRING
    in_request: true
"#;

fn configuration() -> JobConfiguration {
    JobConfiguration::from_yaml(CONFIGURATION).unwrap()
}

fn uris() -> Vec<String> {
    vec!["gs://landing/sales/orders.csv".to_string()]
}

async fn client(server: &MockServer) -> BigQueryClient {
    let auth = Arc::new(GcpAuth::from_static_token("test-token").unwrap());
    BigQueryClient::new("acme", &format!("{}/bigquery/v2", server.uri()), auth).unwrap()
}

fn handle() -> JobHandle {
    JobHandle::new("ferry_job_1", "EU")
}

#[tokio::test]
async fn submit_probe_job_sends_external_table_definition() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bigquery/v2/projects/acme/jobs"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({
            "jobReference": { "projectId": "acme", "location": "EU" },
            "configuration": {
                "query": {
                    "query": "SELECT COUNT(*) as nb_lines FROM orders_tmp",
                    "useLegacySql": false,
                    "tableDefinitions": {
                        "orders_tmp": {
                            "sourceFormat": "CSV",
                            "sourceUris": ["gs://landing/sales/orders.csv"],
                            "csvOptions": {
                                "fieldDelimiter": "|",
                                "quote": "'",
                                "skipLeadingRows": "1"
                            },
                            "ignoreUnknownValues": true
                        }
                    }
                }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobReference": { "projectId": "acme", "jobId": "ferry_abc", "location": "EU" },
            "status": { "state": "RUNNING" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let job = compile_probe_job(&configuration(), &uris());
    let handle = client(&server).await.submit(&job).await.unwrap();

    assert_eq!(handle, JobHandle::new("ferry_abc", "EU"));
}

#[tokio::test]
async fn submit_write_job_creates_table_first() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bigquery/v2/projects/acme/datasets/sales/tables"))
        .and(body_partial_json(json!({
            "tableReference": { "datasetId": "sales", "tableId": "orders" },
            "schema": { "fields": [
                { "name": "id", "type": "INTEGER", "mode": "REQUIRED" },
                { "name": "raw_name", "type": "STRING", "mode": "NULLABLE" },
                { "name": "source", "type": "STRING", "mode": "NULLABLE" }
            ]},
            "timePartitioning": { "type": "DAY", "expirationMs": "86400000" }
        })))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": { "code": 409, "message": "Already Exists: Table acme:sales.orders" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/bigquery/v2/projects/acme/jobs"))
        .and(body_partial_json(json!({
            "configuration": {
                "query": {
                    "destinationTable": { "projectId": "acme", "datasetId": "sales", "tableId": "orders" },
                    "writeDisposition": "WRITE_APPEND",
                    "createDisposition": "CREATE_IF_NEEDED"
                }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobReference": { "projectId": "acme", "jobId": "ferry_write" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let values = vec![AdditionalColumnValue::new("source", "upload-api")];
    let job = compile_load_job(&configuration(), &uris(), &values).unwrap();
    let handle = client(&server).await.submit(&job).await.unwrap();

    // Location falls back to the job location when the response omits it
    assert_eq!(handle, JobHandle::new("ferry_write", "EU"));
}

#[tokio::test]
async fn submit_rejected_query_is_bad_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bigquery/v2/projects/acme/jobs"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "code": 400,
                "message": "Syntax error: Unexpected end of script",
                "errors": [{ "reason": "invalidQuery" }]
            }
        })))
        .mount(&server)
        .await;

    let job = compile_probe_job(&configuration(), &uris());
    let err = client(&server).await.submit(&job).await.unwrap_err();

    assert!(matches!(err, EngineError::BadRequest(msg) if msg.contains("Syntax error")));
}

#[tokio::test]
async fn is_running_follows_job_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bigquery/v2/projects/acme/jobs/ferry_job_1"))
        .and(query_param("location", "EU"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobReference": { "jobId": "ferry_job_1", "location": "EU" },
            "status": { "state": "RUNNING" }
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bigquery/v2/projects/acme/jobs/ferry_job_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobReference": { "jobId": "ferry_job_1", "location": "EU" },
            "status": { "state": "DONE" }
        })))
        .mount(&server)
        .await;

    let client = client(&server).await;
    assert!(client.is_running(&handle()).await.unwrap());
    assert!(!client.is_running(&handle()).await.unwrap());
}

#[tokio::test]
async fn job_without_status_is_still_running() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bigquery/v2/projects/acme/jobs/ferry_job_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobReference": { "jobId": "ferry_job_1", "location": "EU" }
        })))
        .mount(&server)
        .await;

    assert!(client(&server).await.is_running(&handle()).await.unwrap());
}

#[tokio::test]
async fn cancel_request_is_time_boxed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bigquery/v2/projects/acme/jobs/ferry_job_1/cancel"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "kind": "bigquery#jobCancelResponse" }))
                .set_delay(Duration::from_secs(8)),
        )
        .mount(&server)
        .await;

    let started = std::time::Instant::now();
    let result = client(&server).await.cancel(&handle()).await;

    assert!(result.is_err());
    assert!(started.elapsed() < Duration::from_secs(8));
}

#[tokio::test]
async fn cancel_reports_acknowledgment() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bigquery/v2/projects/acme/jobs/ferry_job_1/cancel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "kind": "bigquery#jobCancelResponse" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/bigquery/v2/projects/acme/jobs/ferry_gone/cancel"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": 404, "message": "Not found: Job acme:EU.ferry_gone" }
        })))
        .mount(&server)
        .await;

    let client = client(&server).await;
    assert!(client.cancel(&handle()).await.unwrap());
    assert!(!client
        .cancel(&JobHandle::new("ferry_gone", "EU"))
        .await
        .unwrap());
}

#[tokio::test]
async fn fetch_result_reads_all_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bigquery/v2/projects/acme/queries/ferry_job_1"))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobComplete": true,
            "rows": [{ "f": [{ "v": "3" }, { "v": null }] }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bigquery/v2/projects/acme/queries/ferry_job_1"))
        .and(query_param("timeoutMs", "30000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobComplete": true,
            "schema": { "fields": [{ "name": "id", "type": "INTEGER" }, { "name": "name", "type": "STRING" }] },
            "rows": [
                { "f": [{ "v": "1" }, { "v": "ALICE" }] },
                { "f": [{ "v": "2" }, { "v": "BOB" }] }
            ],
            "pageToken": "page-2"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let result = client(&server)
        .await
        .fetch_result(&handle(), Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(result.columns, vec!["id".to_string(), "name".to_string()]);
    assert_eq!(result.rows.len(), 3);
    assert_eq!(result.value(1, "name"), Some("BOB"));
    assert_eq!(result.value(2, "id"), Some("3"));
    assert_eq!(result.value(2, "name"), None);
}

#[tokio::test]
async fn fetch_result_pages_share_one_wait_bound() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bigquery/v2/projects/acme/queries/ferry_job_1"))
        .and(query_param("pageToken", "page-2"))
        .and(query_param("timeoutMs", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobComplete": true,
            "rows": [{ "f": [{ "v": "2" }] }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bigquery/v2/projects/acme/queries/ferry_job_1"))
        .and(query_param("timeoutMs", "2000"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "jobComplete": true,
                    "schema": { "fields": [{ "name": "id", "type": "INTEGER" }] },
                    "rows": [{ "f": [{ "v": "1" }] }],
                    "pageToken": "page-2"
                }))
                .set_delay(Duration::from_millis(2500)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let result = client(&server)
        .await
        .fetch_result(&handle(), Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.value(1, "id"), Some("2"));
}

#[tokio::test]
async fn fetch_result_incomplete_job_is_client_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bigquery/v2/projects/acme/queries/ferry_job_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobComplete": false })))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .fetch_result(&handle(), Duration::from_secs(1))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::ClientTimeout(_)));
}

#[tokio::test]
async fn fetch_result_failed_job_is_service_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bigquery/v2/projects/acme/queries/ferry_job_1"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": {
                "code": 500,
                "message": "Error encountered during execution. Retrying may solve the problem.",
                "errors": [{ "reason": "backendError" }]
            }
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .fetch_result(&handle(), Duration::from_secs(1))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Service(msg) if msg.contains("500")));
}

#[tokio::test]
async fn fetch_result_malformed_body_is_unexpected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bigquery/v2/projects/acme/queries/ferry_job_1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .fetch_result(&handle(), Duration::from_secs(1))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Unexpected(_)));
}

#[tokio::test]
async fn fetch_result_unreachable_engine_is_connection_lost() {
    // Reserve a port, then release it so nothing listens there
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let auth = Arc::new(GcpAuth::from_static_token("test-token").unwrap());
    let client = BigQueryClient::new("acme", &format!("http://127.0.0.1:{}", port), auth).unwrap();

    let err = client
        .fetch_result(&handle(), Duration::from_secs(1))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::ConnectionLost(_)));
}
