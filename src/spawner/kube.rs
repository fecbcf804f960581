//! Cluster substrate: one Kubernetes Job per worker instance.
//!
//! Workers are expected to exit after finishing, so jobs are created with
//! `restartPolicy: Never` and no backoff retries; redelivery is the
//! dispatcher's concern, not the cluster's.

use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, DeleteParams, PostParams};

use crate::spawner::{SpawnRequest, SpawnStatus, Substrate};

pub struct KubeSubstrate {
    namespace: String,
    image: String,
}

impl KubeSubstrate {
    pub fn new(namespace: String, image: String) -> Self {
        Self { namespace, image }
    }

    async fn api(&self) -> anyhow::Result<Api<Job>> {
        let client = kube::Client::try_default().await?;
        Ok(Api::namespaced(client, &self.namespace))
    }

    fn job_manifest(&self, instance: &str, request: &SpawnRequest) -> anyhow::Result<Job> {
        let mut env = vec![serde_json::json!({
            "name": "MANAGER_URL",
            "value": request.manager_url,
        })];
        if let Some(broker) = &request.broker_url {
            env.push(serde_json::json!({"name": "NATS_URL", "value": broker}));
        }
        env.push(serde_json::json!({
            "name": "WORKER_CONCURRENCY",
            "value": request.concurrency.to_string(),
        }));

        let job: Job = serde_json::from_value(serde_json::json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": instance,
                "labels": { "app": "waypoint-worker" },
            },
            "spec": {
                "parallelism": request.concurrency,
                "completions": request.concurrency,
                "backoffLimit": 0,
                "template": {
                    "metadata": { "labels": { "app": "waypoint-worker" } },
                    "spec": {
                        "restartPolicy": "Never",
                        "containers": [{
                            "name": "worker",
                            "image": self.image,
                            "env": env,
                        }],
                    },
                },
            },
        }))?;
        Ok(job)
    }
}

#[async_trait::async_trait]
impl Substrate for KubeSubstrate {
    fn name(&self) -> &'static str {
        "kube"
    }

    async fn create(&self, instance: &str, request: &SpawnRequest) -> anyhow::Result<String> {
        let api = self.api().await?;
        let job = self.job_manifest(instance, request)?;
        let created = api.create(&PostParams::default(), &job).await?;
        Ok(created
            .metadata
            .uid
            .unwrap_or_else(|| instance.to_owned()))
    }

    async fn status(&self, instance: &str) -> anyhow::Result<SpawnStatus> {
        let api = self.api().await?;
        let job = api.get(instance).await?;
        let status = job.status.unwrap_or_default();
        if status.active.unwrap_or(0) > 0 {
            return Ok(SpawnStatus::Running);
        }
        if status.failed.unwrap_or(0) > 0 {
            return Ok(SpawnStatus::Failed);
        }
        if status.succeeded.unwrap_or(0) > 0 {
            return Ok(SpawnStatus::Stopped);
        }
        Ok(SpawnStatus::Unknown)
    }

    async fn stop(&self, instance: &str) -> anyhow::Result<()> {
        let api = self.api().await?;
        api.delete(instance, &DeleteParams::background()).await?;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
