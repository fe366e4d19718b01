//! BigQuery REST client
//!
//! Implements the Warehouse trait against the BigQuery v2 API: dataset
//! get/insert, multipart load-job upload and job polling.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    DatasetInfo, DatasetRef, LoadJobConfig, LoadOutcome, ServiceAccountKey, TableRef, TokenProvider, Warehouse,
    WarehouseError,
};
use crate::config::WarehouseConfig;

const MULTIPART_BOUNDARY: &str = "sheetload_boundary_7f3c2a";

/// BigQuery client holding one HTTP pool and one token cache for the run
pub struct BigQueryClient {
    base_url: String,
    location: Option<String>,
    poll_interval: Duration,
    http: Client,
    tokens: TokenProvider,
}

impl BigQueryClient {
    /// Create a client, reading the service-account key once
    pub fn from_config(config: &WarehouseConfig) -> Result<Self, WarehouseError> {
        debug!(?config, "BigQueryClient::from_config: called");
        let key = ServiceAccountKey::from_file(&config.credentials)?;
        Self::with_key(config, key)
    }

    pub fn with_key(config: &WarehouseConfig, key: ServiceAccountKey) -> Result<Self, WarehouseError> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            location: config.location.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            tokens: TokenProvider::new(key, http.clone()),
            http,
        })
    }

    fn datasets_url(&self, project: &str) -> String {
        format!("{}/bigquery/v2/projects/{}/datasets", self.base_url, project)
    }

    fn upload_url(&self, project: &str) -> String {
        format!(
            "{}/upload/bigquery/v2/projects/{}/jobs?uploadType=multipart",
            self.base_url, project
        )
    }

    fn job_url(&self, project: &str, job_id: &str) -> String {
        format!("{}/bigquery/v2/projects/{}/jobs/{}", self.base_url, project, job_id)
    }

    async fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder, WarehouseError> {
        let token = self.tokens.access_token().await?;
        Ok(builder.bearer_auth(token))
    }

    /// Load-job resource sent as the metadata part of the upload
    fn load_job_body(&self, table: &TableRef, config: &LoadJobConfig, job_id: &str) -> Value {
        let mut job_reference = json!({
            "projectId": table.project,
            "jobId": job_id,
        });
        if let Some(location) = &self.location {
            job_reference["location"] = json!(location);
        }

        json!({
            "jobReference": job_reference,
            "configuration": {
                "load": {
                    "destinationTable": {
                        "projectId": table.project,
                        "datasetId": table.dataset,
                        "tableId": table.table,
                    },
                    "writeDisposition": config.write_disposition,
                    "sourceFormat": config.source_format,
                    "schema": { "fields": config.schema },
                    "skipLeadingRows": config.skip_leading_rows,
                    "allowQuotedNewlines": true,
                }
            }
        })
    }

    async fn submit_load(&self, table: &TableRef, data: Vec<u8>, config: &LoadJobConfig) -> Result<String, WarehouseError> {
        let job_id = job_id_for(&table.table);
        let metadata = self.load_job_body(table, config, &job_id);
        let body = multipart_related(&metadata, &data)?;
        debug!(%job_id, body_len = body.len(), "BigQueryClient::submit_load: uploading");

        let request = self
            .http
            .post(self.upload_url(&table.project))
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", MULTIPART_BOUNDARY),
            )
            .body(body);
        let response = self.authorized(request).await?.send().await?;
        let job: Value = check(response).await?.json().await?;

        let job_id = job["jobReference"]["jobId"].as_str().unwrap_or(&job_id).to_string();
        info!(%job_id, table = %table, "Submitted load job");
        Ok(job_id)
    }

    /// Poll the job until it reaches DONE
    async fn wait_for_job(&self, project: &str, job_id: &str) -> Result<LoadOutcome, WarehouseError> {
        loop {
            let mut request = self.http.get(self.job_url(project, job_id));
            if let Some(location) = &self.location {
                request = request.query(&[("location", location)]);
            }
            let response = self.authorized(request).await?.send().await?;
            let job: Value = check(response).await?.json().await?;

            let state = job["status"]["state"]
                .as_str()
                .ok_or_else(|| WarehouseError::InvalidResponse(format!("Job {} has no status.state", job_id)))?;
            debug!(%job_id, %state, "BigQueryClient::wait_for_job: polled");
            if state == "DONE" {
                return job_outcome(job_id, &job);
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn get_dataset(&self, dataset: &DatasetRef) -> Result<DatasetInfo, WarehouseError> {
        debug!(%dataset, "BigQueryClient::get_dataset: called");
        let url = format!("{}/{}", self.datasets_url(&dataset.project), dataset.dataset);
        let response = self.authorized(self.http.get(url)).await?.send().await?;
        let body: Value = check(response).await?.json().await?;
        Ok(DatasetInfo {
            dataset: dataset.clone(),
            location: body["location"].as_str().map(str::to_string),
        })
    }

    async fn create_dataset(&self, dataset: &DatasetRef) -> Result<DatasetInfo, WarehouseError> {
        debug!(%dataset, "BigQueryClient::create_dataset: called");
        let mut body = json!({
            "datasetReference": {
                "projectId": dataset.project,
                "datasetId": dataset.dataset,
            }
        });
        if let Some(location) = &self.location {
            body["location"] = json!(location);
        }

        let request = self.http.post(self.datasets_url(&dataset.project)).json(&body);
        let response = self.authorized(request).await?.send().await?;
        let created: Value = check(response).await?.json().await?;
        Ok(DatasetInfo {
            dataset: dataset.clone(),
            location: created["location"].as_str().map(str::to_string),
        })
    }

    async fn load_csv(
        &self,
        table: &TableRef,
        data: Vec<u8>,
        config: &LoadJobConfig,
    ) -> Result<LoadOutcome, WarehouseError> {
        debug!(%table, bytes = data.len(), "BigQueryClient::load_csv: called");
        let job_id = self.submit_load(table, data, config).await?;
        self.wait_for_job(&table.project, &job_id).await
    }
}

/// Map non-success responses to typed errors
async fn check(response: Response) -> Result<Response, WarehouseError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = api_error_message(&text);
    debug!(%status, %message, "check: API error");
    if status == StatusCode::NOT_FOUND {
        Err(WarehouseError::NotFound(message))
    } else {
        Err(WarehouseError::ApiError {
            status: status.as_u16(),
            message,
        })
    }
}

/// Pull `error.message` out of a Google API error body, falling back to the raw text
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Interpret a finished job resource
fn job_outcome(job_id: &str, job: &Value) -> Result<LoadOutcome, WarehouseError> {
    if let Some(error) = job["status"].get("errorResult") {
        let mut message = error["message"].as_str().unwrap_or("unknown error").to_string();
        if let Some(details) = job["status"]["errors"].as_array() {
            let extra: Vec<&str> = details
                .iter()
                .filter_map(|e| e["message"].as_str())
                .filter(|m| *m != message)
                .collect();
            if !extra.is_empty() {
                message = format!("{} ({})", message, extra.join("; "));
            }
        }
        return Err(WarehouseError::JobFailed {
            job_id: job_id.to_string(),
            message,
        });
    }

    // int64 values are serialized as strings
    let output_rows = job["statistics"]["load"]["outputRows"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .or_else(|| job["statistics"]["load"]["outputRows"].as_u64());

    Ok(LoadOutcome {
        job_id: job_id.to_string(),
        output_rows,
    })
}

/// Job ids allow letters, digits, `_` and `-`
fn job_id_for(table: &str) -> String {
    let safe: String = table
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    format!("sheetload_{}_{}", safe, Uuid::now_v7().simple())
}

/// Build a `multipart/related` body: JSON metadata then the CSV payload
fn multipart_related(metadata: &Value, data: &[u8]) -> Result<Vec<u8>, WarehouseError> {
    let mut body = Vec::with_capacity(data.len() + 1024);
    body.extend_from_slice(format!("--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(&serde_json::to_vec(metadata)?);
    body.extend_from_slice(format!("\r\n--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
    body.extend_from_slice(b"Content-Type: text/csv\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{DatasetProvisioner, ProvisionOutcome};
    use crate::warehouse::test_server::{TestServer, token_response};
    use crate::warehouse::{FieldType, SchemaField};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const KEY_JSON: &str = r#"{
        "type": "service_account",
        "private_key": "unused",
        "client_email": "loader@example.iam.gserviceaccount.com"
    }"#;

    fn client(location: Option<&str>) -> BigQueryClient {
        let config = WarehouseConfig {
            location: location.map(str::to_string),
            base_url: "https://bq.example.com/".to_string(),
            ..Default::default()
        };
        BigQueryClient::with_key(&config, ServiceAccountKey::from_json(KEY_JSON).unwrap()).unwrap()
    }

    #[test]
    fn test_urls() {
        let client = client(None);
        assert_eq!(client.datasets_url("p"), "https://bq.example.com/bigquery/v2/projects/p/datasets");
        assert_eq!(
            client.upload_url("p"),
            "https://bq.example.com/upload/bigquery/v2/projects/p/jobs?uploadType=multipart"
        );
        assert_eq!(client.job_url("p", "j1"), "https://bq.example.com/bigquery/v2/projects/p/jobs/j1");
    }

    fn schema_config() -> LoadJobConfig {
        LoadJobConfig::replace_csv(vec![
            SchemaField::nullable("nom", FieldType::String),
            SchemaField::nullable("ville", FieldType::String),
        ])
    }

    #[test]
    fn test_load_job_body_carries_schema() {
        let client = client(Some("EU"));
        let table = DatasetRef::new("proj", "raw").table("villes");
        let body = client.load_job_body(&table, &schema_config(), "job_1");

        let load = &body["configuration"]["load"];
        assert_eq!(load["writeDisposition"], "WRITE_TRUNCATE");
        assert_eq!(load["sourceFormat"], "CSV");
        assert_eq!(load["skipLeadingRows"], 1);
        assert!(load.get("autodetect").is_none());
        assert_eq!(
            load["schema"]["fields"],
            json!([
                {"name": "nom", "type": "STRING", "mode": "NULLABLE"},
                {"name": "ville", "type": "STRING", "mode": "NULLABLE"}
            ])
        );
        assert_eq!(load["destinationTable"]["tableId"], "villes");
        assert_eq!(body["jobReference"]["location"], "EU");
    }

    #[test]
    fn test_multipart_layout() {
        let body = multipart_related(&json!({"a": 1}), b"x,y\n1,2\n").unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with(&format!("--{}\r\n", MULTIPART_BOUNDARY)));
        assert!(text.contains("{\"a\":1}"));
        assert!(text.contains("Content-Type: text/csv\r\n\r\nx,y\n1,2\n"));
        assert!(text.ends_with(&format!("--{}--\r\n", MULTIPART_BOUNDARY)));
    }

    #[test]
    fn test_job_outcome_success_parses_string_rows() {
        let job = json!({
            "status": {"state": "DONE"},
            "statistics": {"load": {"outputRows": "42"}}
        });
        let outcome = job_outcome("job_1", &job).unwrap();
        assert_eq!(outcome.output_rows, Some(42));
    }

    #[test]
    fn test_job_outcome_failure() {
        let job = json!({
            "status": {
                "state": "DONE",
                "errorResult": {"reason": "invalid", "message": "Error while reading data"},
                "errors": [
                    {"message": "Error while reading data"},
                    {"message": "Too many values in row 3"}
                ]
            }
        });
        let err = job_outcome("job_1", &job).unwrap_err();
        match err {
            WarehouseError::JobFailed { job_id, message } => {
                assert_eq!(job_id, "job_1");
                assert_eq!(message, "Error while reading data (Too many values in row 3)");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_api_error_message() {
        let body = r#"{"error": {"code": 403, "message": "Access Denied: Project p"}}"#;
        assert_eq!(api_error_message(body), "Access Denied: Project p");
        assert_eq!(api_error_message("  plain text  "), "plain text");
    }

    #[test]
    fn test_job_id_sanitized() {
        let id = job_id_for("total (€)");
        assert!(id.starts_with("sheetload_total____"));
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }

    fn local_client(server: &TestServer) -> BigQueryClient {
        let config = WarehouseConfig {
            base_url: server.base_url.clone(),
            poll_interval_ms: 1,
            timeout_ms: 5_000,
            ..Default::default()
        };
        BigQueryClient::with_key(&config, server.service_account_key()).unwrap()
    }

    fn not_found() -> (u16, String) {
        (404, r#"{"error": {"code": 404, "message": "Not found: Dataset proj:raw"}}"#.to_string())
    }

    #[tokio::test]
    async fn test_get_dataset_404_is_not_found() {
        let server = TestServer::start(|req| match req.path.as_str() {
            "/token" => token_response(),
            _ => not_found(),
        })
        .await;
        let client = local_client(&server);

        let err = client.get_dataset(&DatasetRef::new("proj", "raw")).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Not found: Not found: Dataset proj:raw");

        let lookups = server.requests_to("/bigquery/v2/projects/proj/datasets/raw");
        assert_eq!(lookups.len(), 1);
        assert_eq!(lookups[0].authorization.as_deref(), Some("Bearer test-token"));
    }

    #[tokio::test]
    async fn test_missing_dataset_is_created_over_http() {
        let server = TestServer::start(|req| match (req.method.as_str(), req.path.as_str()) {
            (_, "/token") => token_response(),
            ("GET", _) => not_found(),
            ("POST", "/bigquery/v2/projects/proj/datasets") => (200, r#"{"location": "US"}"#.to_string()),
            _ => (500, "{}".to_string()),
        })
        .await;
        let provisioner = DatasetProvisioner::new(Arc::new(local_client(&server)));

        let outcome = provisioner.ensure_container(&DatasetRef::new("proj", "raw")).await.unwrap();
        assert_eq!(outcome, ProvisionOutcome::Created);

        let inserts = server.requests_to("/bigquery/v2/projects/proj/datasets");
        let methods: Vec<&str> = inserts.iter().map(|r| r.method.as_str()).collect();
        assert_eq!(methods, vec!["GET", "POST"]);
        let body: Value = serde_json::from_slice(&inserts[1].body).unwrap();
        assert_eq!(body["datasetReference"]["datasetId"], "raw");
    }

    #[tokio::test]
    async fn test_existing_dataset_skips_create_over_http() {
        let server = TestServer::start(|req| match (req.method.as_str(), req.path.as_str()) {
            (_, "/token") => token_response(),
            ("GET", _) => (200, r#"{"location": "EU"}"#.to_string()),
            _ => (500, "{}".to_string()),
        })
        .await;
        let provisioner = DatasetProvisioner::new(Arc::new(local_client(&server)));

        let outcome = provisioner.ensure_container(&DatasetRef::new("proj", "raw")).await.unwrap();
        assert_eq!(outcome, ProvisionOutcome::AlreadyExists);
        assert!(server.requests().iter().all(|r| r.method != "POST" || r.path == "/token"));
    }

    #[tokio::test]
    async fn test_permission_denied_is_not_not_found() {
        let server = TestServer::start(|req| match req.path.as_str() {
            "/token" => token_response(),
            _ => (403, r#"{"error": {"code": 403, "message": "Access Denied"}}"#.to_string()),
        })
        .await;
        let client = local_client(&server);

        let err = client.get_dataset(&DatasetRef::new("proj", "raw")).await.unwrap_err();
        assert!(!err.is_not_found());
        assert!(err.is_permission_denied());
    }

    #[tokio::test]
    async fn test_load_csv_polls_until_done() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let server = TestServer::start(move |req| match (req.method.as_str(), req.path.as_str()) {
            (_, "/token") => token_response(),
            ("POST", p) if p.starts_with("/upload/bigquery/v2/projects/proj/jobs") => (
                200,
                json!({"jobReference": {"jobId": "job_villes"}, "status": {"state": "PENDING"}}).to_string(),
            ),
            ("GET", "/bigquery/v2/projects/proj/jobs/job_villes") => {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    (200, json!({"status": {"state": "RUNNING"}}).to_string())
                } else {
                    (
                        200,
                        json!({"status": {"state": "DONE"}, "statistics": {"load": {"outputRows": "2"}}}).to_string(),
                    )
                }
            }
            _ => (500, "{}".to_string()),
        })
        .await;
        let client = local_client(&server);
        let table = DatasetRef::new("proj", "raw").table("villes");

        let outcome = client
            .load_csv(&table, b"nom,ville\nA,Paris\nB,Lyon\n".to_vec(), &schema_config())
            .await
            .unwrap();
        assert_eq!(outcome.job_id, "job_villes");
        assert_eq!(outcome.output_rows, Some(2));
        assert_eq!(polls.load(Ordering::SeqCst), 2);

        let uploads = server.requests_to("/upload/");
        assert_eq!(uploads.len(), 1);
        let body = uploads[0].body_text();
        assert!(body.contains(r#""name":"nom""#));
        assert!(body.contains(r#""name":"ville""#));
        assert!(body.contains("nom,ville\nA,Paris\nB,Lyon\n"));
    }

    #[tokio::test]
    async fn test_load_csv_job_error() {
        let server = TestServer::start(|req| match (req.method.as_str(), req.path.as_str()) {
            (_, "/token") => token_response(),
            ("POST", _) => (200, json!({"jobReference": {"jobId": "job_bad"}}).to_string()),
            ("GET", _) => (
                200,
                json!({
                    "status": {
                        "state": "DONE",
                        "errorResult": {"reason": "invalid", "message": "Too many values in row 2"}
                    }
                })
                .to_string(),
            ),
            _ => (500, "{}".to_string()),
        })
        .await;
        let client = local_client(&server);

        let err = client
            .load_csv(&DatasetRef::new("proj", "raw").table("bad"), b"nom\nA\n".to_vec(), &schema_config())
            .await
            .unwrap_err();
        match err {
            WarehouseError::JobFailed { job_id, message } => {
                assert_eq!(job_id, "job_bad");
                assert_eq!(message, "Too many values in row 2");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_load_csv_job_without_state() {
        let server = TestServer::start(|req| match (req.method.as_str(), req.path.as_str()) {
            (_, "/token") => token_response(),
            ("POST", _) => (200, json!({"jobReference": {"jobId": "job_odd"}}).to_string()),
            ("GET", _) => (200, json!({"jobReference": {"jobId": "job_odd"}}).to_string()),
            _ => (500, "{}".to_string()),
        })
        .await;
        let client = local_client(&server);

        let err = client
            .load_csv(&DatasetRef::new("proj", "raw").table("odd"), b"nom\nA\n".to_vec(), &schema_config())
            .await
            .unwrap_err();
        assert!(matches!(err, WarehouseError::InvalidResponse(_)));
        assert_eq!(server.requests_to("/bigquery/v2/projects/proj/jobs/job_odd").len(), 1);
    }
}
