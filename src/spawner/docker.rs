//! Local-container substrate over the Docker API.

use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};

use crate::spawner::{SpawnRequest, SpawnStatus, Substrate};

pub struct DockerSubstrate {
    docker: Docker,
    image: String,
}

impl DockerSubstrate {
    pub fn connect(image: String) -> anyhow::Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker, image })
    }

    fn worker_env(request: &SpawnRequest) -> Vec<String> {
        let mut env = vec![format!("MANAGER_URL={}", request.manager_url)];
        if let Some(broker) = &request.broker_url {
            env.push(format!("NATS_URL={broker}"));
        }
        env.push(format!("WORKER_CONCURRENCY={}", request.concurrency));
        env
    }
}

#[async_trait::async_trait]
impl Substrate for DockerSubstrate {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn create(&self, instance: &str, request: &SpawnRequest) -> anyhow::Result<String> {
        let options = CreateContainerOptions {
            name: instance.to_owned(),
            platform: None,
        };
        let config = Config::<String> {
            image: Some(self.image.clone()),
            env: Some(Self::worker_env(request)),
            ..Default::default()
        };

        let created = self.docker.create_container(Some(options), config).await?;
        self.docker
            .start_container(instance, None::<StartContainerOptions<String>>)
            .await?;
        Ok(created.id)
    }

    async fn status(&self, instance: &str) -> anyhow::Result<SpawnStatus> {
        let inspected = self
            .docker
            .inspect_container(instance, None::<InspectContainerOptions>)
            .await?;
        let running = inspected
            .state
            .and_then(|state| state.running)
            .unwrap_or(false);
        Ok(if running {
            SpawnStatus::Running
        } else {
            SpawnStatus::Stopped
        })
    }

    async fn stop(&self, instance: &str) -> anyhow::Result<()> {
        self.docker
            .stop_container(instance, Some(StopContainerOptions { t: 10 }))
            .await?;
        self.docker
            .remove_container(
                instance,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
