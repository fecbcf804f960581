//! HTTP client for the manager API, used by the worker agent.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{JobConfig, JobStatus, WorkerStatus};

/// A claimed job as the worker sees it.
#[derive(Debug, Clone, Deserialize)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub name: String,
    pub status: JobStatus,
    pub priority: i32,
    pub config: JobConfig,
}

#[derive(Debug, Deserialize)]
struct ClaimResponse {
    job: Option<ClaimedJob>,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    id: String,
}

/// Thin wrapper over reqwest with the base URL and bearer token applied.
pub struct ManagerClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ManagerClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}/api/v2{path}", self.base_url));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn expect_success(resp: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(Error::Other(anyhow::anyhow!(
            "{context} failed with {status}: {body}"
        )))
    }

    /// Register and return the manager-assigned worker id.
    pub async fn register(&self, worker_id: Option<&str>, hostname: &str) -> Result<String> {
        let resp = self
            .request(reqwest::Method::POST, "/workers/register")
            .json(&json!({ "worker_id": worker_id, "hostname": hostname }))
            .send()
            .await?;
        let resp = Self::expect_success(resp, "register").await?;
        let registered: RegisterResponse = resp.json().await?;
        Ok(registered.id)
    }

    pub async fn heartbeat(
        &self,
        worker_id: &str,
        hostname: &str,
        status: WorkerStatus,
        current_job_id: Option<Uuid>,
    ) -> Result<()> {
        let resp = self
            .request(reqwest::Method::POST, "/workers/heartbeat")
            .json(&json!({
                "worker_id": worker_id,
                "hostname": hostname,
                "status": status,
                "current_job_id": current_job_id,
            }))
            .send()
            .await?;
        Self::expect_success(resp, "heartbeat").await?;
        Ok(())
    }

    /// Claim work. With `job_id` (broker mode) the claim targets that job;
    /// without it the manager picks the best available.
    pub async fn claim(&self, worker_id: &str, job_id: Option<Uuid>) -> Result<Option<ClaimedJob>> {
        let resp = self
            .request(reqwest::Method::POST, &format!("/workers/{worker_id}/claim"))
            .json(&json!({ "job_id": job_id }))
            .send()
            .await?;
        let resp = Self::expect_success(resp, "claim").await?;
        let claimed: ClaimResponse = resp.json().await?;
        Ok(claimed.job)
    }

    pub async fn complete(&self, worker_id: &str, job_id: Uuid, places_scraped: i64) -> Result<()> {
        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/workers/{worker_id}/complete"),
            )
            .json(&json!({ "job_id": job_id, "places_scraped": places_scraped }))
            .send()
            .await?;
        Self::expect_success(resp, "complete").await?;
        Ok(())
    }

    pub async fn fail(&self, worker_id: &str, job_id: Uuid, message: &str) -> Result<()> {
        let resp = self
            .request(reqwest::Method::POST, &format!("/workers/{worker_id}/fail"))
            .json(&json!({ "job_id": job_id, "message": message }))
            .send()
            .await?;
        Self::expect_success(resp, "fail").await?;
        Ok(())
    }

    pub async fn release(&self, worker_id: &str, job_id: Uuid) -> Result<()> {
        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/workers/{worker_id}/release"),
            )
            .json(&json!({ "job_id": job_id }))
            .send()
            .await?;
        Self::expect_success(resp, "release").await?;
        Ok(())
    }

    pub async fn unregister(&self, worker_id: &str) -> Result<()> {
        let resp = self
            .request(reqwest::Method::DELETE, &format!("/workers/{worker_id}"))
            .send()
            .await?;
        Self::expect_success(resp, "unregister").await?;
        Ok(())
    }

    /// Submit collected results in one batch.
    pub async fn submit_results(&self, job_id: Uuid, payloads: &[serde_json::Value]) -> Result<()> {
        let resp = self
            .request(reqwest::Method::POST, &format!("/jobs/{job_id}/results"))
            .json(&json!({ "job_id": job_id, "data": payloads }))
            .send()
            .await?;
        Self::expect_success(resp, "submit results").await?;
        Ok(())
    }
}
