//! Manager binary: API server, heartbeat monitor, dispatcher, spawner, and
//! (optionally) the proxy gateway.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use figment::value::UncasedStr;
use figment::{Figment, providers::Env};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing::{error, info, warn};

use waypoint::cache::{Cache, MemoryCache, NoopCache};
use waypoint::config::Config;
use waypoint::db::DbContext;
use waypoint::dispatch::nats::NatsDispatcher;
use waypoint::dispatch::{JobPublisher, NoopPublisher};
use waypoint::logging::{self, LogFormat};
use waypoint::monitor::HeartbeatMonitor;
use waypoint::proxy::GatewayService;
use waypoint::services::ServiceResult;
use waypoint::services::manager::ServiceManager;
use waypoint::spawner::Spawner;
use waypoint::state::AppState;
use waypoint::web::WebService;
use waypoint::web::auth::AuthConfig;

/// Waypoint manager - scraping control plane
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log formatter to use
    #[arg(long, value_enum, default_value_t = LogFormat::Auto)]
    formatter: LogFormat,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Accept the legacy API_KEY variable as API_TOKEN.
    let config: Config = Figment::new()
        .merge(Env::raw().map(|k| {
            if k == UncasedStr::new("API_KEY") {
                "API_TOKEN".into()
            } else {
                k.into()
            }
        }))
        .extract()
        .expect("Failed to load config");

    logging::init(&config, args.formatter);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        "starting waypoint manager"
    );

    let database_url = config
        .database_url
        .as_deref()
        .expect("DATABASE_URL is required");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .expect("Failed to create database pool");
    let db = DbContext::new(db_pool);

    db.migrate().await.expect("Failed to run migrations");

    // Recover jobs left held by a previous unclean shutdown.
    match db.jobs().release_orphans().await {
        Ok(0) => {}
        Ok(count) => warn!(count, "released orphaned jobs from previous run"),
        Err(e) => warn!(error = ?e, "failed to release orphaned jobs"),
    }

    // Broker profile when a NATS URL is configured; an unreachable broker
    // degrades to the polling profile instead of refusing to start.
    let publisher: Arc<dyn JobPublisher> = match &config.nats_url {
        Some(url) => match NatsDispatcher::connect(url).await {
            Ok(dispatcher) => match dispatcher.ensure_stream().await {
                Ok(_) => {
                    info!(url, "dispatching jobs over broker");
                    Arc::new(dispatcher)
                }
                Err(e) => {
                    warn!(error = ?e, "failed to provision broker stream, falling back to polling");
                    Arc::new(NoopPublisher)
                }
            },
            Err(e) => {
                warn!(error = ?e, "broker unreachable, falling back to polling dispatch");
                Arc::new(NoopPublisher)
            }
        },
        None => Arc::new(NoopPublisher),
    };

    let cache: Arc<dyn Cache> = if config.cache_enabled {
        Arc::new(MemoryCache::new())
    } else {
        Arc::new(NoopCache)
    };

    let spawner = match Spawner::from_config(&config) {
        Ok(Some(spawner)) => {
            info!(substrate = spawner.substrate_name(), max_workers = config.max_workers, "spawner ready");
            Some(Arc::new(spawner))
        }
        Ok(None) => None,
        Err(e) => {
            warn!(error = ?e, "spawner unavailable, continuing without autoscaling");
            None
        }
    };

    let auth_config = AuthConfig {
        token: config.api_token.clone(),
    };
    if auth_config.token.is_none() {
        warn!("no API_TOKEN configured, the API is unprotected");
    }

    let state = AppState {
        db: db.clone(),
        cache,
        publisher,
        spawner,
        heartbeat_timeout: config.heartbeat_timeout,
        manager_url: format!("http://localhost:{}", config.port),
        broker_url: config.nats_url.clone(),
    };

    let mut service_manager = ServiceManager::new();
    service_manager.register(
        "web",
        Box::new(WebService::new(config.port, state, auth_config)),
    );
    service_manager.register(
        "heartbeat-monitor",
        Box::new(HeartbeatMonitor::new(
            db.clone(),
            config.heartbeat_interval,
            config.heartbeat_timeout,
            config.offline_retention,
        )),
    );
    if config.proxy_enabled {
        service_manager.register(
            "proxy-gateway",
            Box::new(GatewayService::new(db.clone(), config.proxy())),
        );
    }
    service_manager.spawn_all();

    let exit_code = supervise(service_manager, config.shutdown_timeout).await;
    info!(exit_code, "manager shutdown complete");
    std::process::exit(exit_code);
}

/// Wait for a signal or an unexpected service exit, then drain everything.
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
