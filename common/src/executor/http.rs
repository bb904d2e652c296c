// HTTP job executor implementation

use super::put_job_data;
use crate::errors::ExecutionError;
use crate::executor::JobExecutor;
use crate::models::{HttpMethod, Job, JobDetail, JobType, NodeRecord};
use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method};
use serde_json::json;
use std::time::Duration;

/// Sends the job's configured request; any non-2xx status fails the attempt
pub struct HttpJobExecutor {
    client: Client,
}

impl HttpJobExecutor {
    pub fn new() -> Result<Self, ExecutionError> {
        let client = Client::builder().build().map_err(|e| {
            ExecutionError::HttpRequestFailed(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self { client })
    }

    fn convert_method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

#[async_trait]
impl JobExecutor for HttpJobExecutor {
    fn supports(&self, job_type: JobType) -> bool {
        job_type == JobType::Http
    }

    #[tracing::instrument(skip_all, fields(job_id = job.id, job_name = %job.name))]
    async fn execute(
        &self,
        _now: DateTime<Utc>,
        job: &mut Job,
        _node: &NodeRecord,
        _store: &dyn Store,
    ) -> Result<(), ExecutionError> {
        let JobDetail::Http(detail) = &job.detail else {
            return Err(ExecutionError::DetailMismatch(format!(
                "job {} is not an HTTP job",
                job.id
            )));
        };

        let method = Self::convert_method(detail.method);
        tracing::info!(method = %method, url = %detail.url, "Executing HTTP request");

        let mut request = self.client.request(method, &detail.url);
        for (key, value) in &detail.headers {
            request = request.header(key, value);
        }
        if let Some(body) = &detail.body {
            request = request.body(body.clone());
        }
        if detail.timeout_ms > 0 {
            request = request.timeout(Duration::from_millis(detail.timeout_ms as u64));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ExecutionError::Timeout(detail.timeout_ms.max(0) as u64)
            } else {
                ExecutionError::HttpRequestFailed(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| {
            ExecutionError::HttpRequestFailed(format!("Failed to read response body: {}", e))
        })?;
        tracing::info!(status = status.as_u16(), "HTTP response received");

        if !status.is_success() {
            return Err(ExecutionError::HttpRequestFailed(format!(
                "HTTP request failed with status {}: {}",
                status.as_u16(),
                response_body
            )));
        }

        if job.is_update_data {
            // Try to parse as JSON, fallback to string
            let body_json = serde_json::from_str::<serde_json::Value>(&response_body)
                .unwrap_or_else(|_| json!(response_body));
            put_job_data(
                job,
                "last_response",
                json!({ "status_code": status.as_u16(), "body": body_json }),
            );
        }

        Ok(())
    }
}
