//! Function-invocation substrate.
//!
//! Posts the spawn payload to an external function endpoint. In synchronous
//! mode the call must succeed before the instance counts as created; in
//! fire-and-forget mode the request is detached and the instance is
//! considered live until the caller signals completion.

use std::time::Duration;

use tracing::warn;

use crate::spawner::{SpawnRequest, SpawnStatus, Substrate};

pub struct FunctionSubstrate {
    http: reqwest::Client,
    url: String,
    fire_and_forget: bool,
}

impl FunctionSubstrate {
    pub fn new(url: String, fire_and_forget: bool) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            http,
            url,
            fire_and_forget,
        }
    }

    fn payload(instance: &str, request: &SpawnRequest) -> serde_json::Value {
        serde_json::json!({
            "instance": instance,
            "job_id": request.job_id,
            "priority": request.priority,
            "manager_url": request.manager_url,
            "broker_url": request.broker_url,
            "concurrency": request.concurrency,
        })
    }
}

#[async_trait::async_trait]
impl Substrate for FunctionSubstrate {
    fn name(&self) -> &'static str {
        "function"
    }

    async fn create(&self, instance: &str, request: &SpawnRequest) -> anyhow::Result<String> {
        let payload = Self::payload(instance, request);

        if self.fire_and_forget {
            let http = self.http.clone();
            let url = self.url.clone();
            let instance_owned = instance.to_owned();
            tokio::spawn(async move {
                let instance = instance_owned;
                match http.post(&url).json(&payload).send().await {
                    Ok(resp) if !resp.status().is_success() => {
                        warn!(instance, status = %resp.status(), "async function invocation rejected");
                    }
                    Err(e) => warn!(instance, error = %e, "async function invocation failed"),
                    Ok(_) => {}
                }
            });
            return Ok(instance.to_owned());
        }

        let resp = self.http.post(&self.url).json(&payload).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("function endpoint answered {}", resp.status());
        }
        Ok(instance.to_owned())
    }

    async fn status(&self, _instance: &str) -> anyhow::Result<SpawnStatus> {
        // The endpoint offers no lifecycle introspection; the caller's
        // completion signal is the source of truth.
        Ok(SpawnStatus::Unknown)
    }

    async fn stop(&self, _instance: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
