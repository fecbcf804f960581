//! Worker binary: registers with the manager and processes jobs until told
//! to stop.

use std::time::Duration;

use clap::Parser;
use figment::value::UncasedStr;
use figment::{Figment, providers::Env};
use tokio::signal;
use tracing::{error, info, warn};

use waypoint::agent::AgentService;
use waypoint::config::Config;
use waypoint::logging::{self, LogFormat};
use waypoint::services::ServiceResult;
use waypoint::services::manager::ServiceManager;

/// Waypoint worker - scraping fleet agent
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log formatter to use
    #[arg(long, value_enum, default_value_t = LogFormat::Auto)]
    formatter: LogFormat,

    /// Override the stable worker id
    #[arg(long)]
    worker_id: Option<String>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut config: Config = Figment::new()
        .merge(Env::raw().map(|k| {
            if k == UncasedStr::new("API_KEY") {
                "API_TOKEN".into()
            } else {
                k.into()
            }
        }))
        .extract()
        .expect("Failed to load config");
    if args.worker_id.is_some() {
        config.worker_id = args.worker_id;
    }

    logging::init(&config, args.formatter);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        manager_url = config.manager_url,
        "starting waypoint worker"
    );

    let agent = AgentService::from_config(&config)
        .await
        .expect("Failed to build worker agent");

    let mut service_manager = ServiceManager::new();
    service_manager.register("worker-agent", Box::new(agent));
    service_manager.spawn_all();

    let exit_code = supervise(service_manager, config.shutdown_timeout).await;
    info!(exit_code, "worker shutdown complete");
    std::process::exit(exit_code);
}

async fn supervise(mut service_manager: ServiceManager, shutdown_timeout: Duration) -> i32 {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("received ctrl+c, gracefully shutting down...");
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm_stream =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM signal handler");
        sigterm_stream.recv().await;
        info!("received SIGTERM, gracefully shutting down...");
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    let mut exit_code = 0;
    tokio::select! {
        (service_name, result) = service_manager.run() => {
            match result {
                ServiceResult::GracefulShutdown => {
                    info!(service = service_name, "service completed gracefully");
                }
                ServiceResult::NormalCompletion => {
                    warn!(service = service_name, "service completed unexpectedly");
                    exit_code = 1;
                }
                ServiceResult::Error(e) => {
                    error!(service = service_name, error = ?e, "service failed");
                    exit_code = 1;
                }
            }
        }
        _ = ctrl_c => {}
        _ = sigterm => {}
    }

    match service_manager.shutdown(shutdown_timeout).await {
        Ok(elapsed) => {
            info!(
                remaining = format!("{:.2?}", shutdown_timeout.saturating_sub(elapsed)),
                "graceful shutdown complete"
            );
        }
        Err(pending) => {
            warn!(
                pending_count = pending.len(),
                pending_services = ?pending,
                "graceful shutdown elapsed with {} service(s) pending",
                pending.len()
            );
            exit_code = if exit_code == 0 { 2 } else { exit_code };
        }
    }
    exit_code
}
