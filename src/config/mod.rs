//! Environment-driven configuration.
//!
//! Loaded once at startup through figment's `Env` provider. Duration fields
//! accept plain numbers (seconds) or unit strings (`"30s"`, `"10m"`) via
//! fundu.

use std::time::Duration;

use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};

/// Main application configuration for both binaries. Fields the other
/// binary doesn't use are simply ignored there.
#[derive(Deserialize)]
pub struct Config {
    /// Log level applied to this crate's target (`warn` elsewhere).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Port for the manager's HTTP server.
    #[serde(default = "default_port")]
    pub port: u16,

    /// PostgreSQL connection URL. Required by the manager; the worker agent
    /// doesn't touch the database.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Graceful shutdown deadline.
    #[serde(default = "default_shutdown_timeout", deserialize_with = "duration")]
    pub shutdown_timeout: Duration,

    /// Bearer token protecting the API. When unset the API is open and the
    /// manager logs a warning at startup.
    #[serde(default)]
    pub api_token: Option<String>,

    /// NATS server URL. When set, dispatch prefers the broker path.
    #[serde(default)]
    pub nats_url: Option<String>,

    /// Redis URL for the shared dedupe set. Absent means per-process
    /// in-memory dedup.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Dedupe key retention.
    #[serde(default = "default_dedupe_ttl", deserialize_with = "duration")]
    pub dedupe_ttl: Duration,

    /// Whether the manager fronts read endpoints with the in-memory cache.
    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    /// Heartbeat send interval (worker) and monitor tick (manager).
    #[serde(default = "default_heartbeat_interval", deserialize_with = "duration")]
    pub heartbeat_interval: Duration,

    /// Silence after which a worker is considered offline.
    #[serde(default = "default_heartbeat_timeout", deserialize_with = "duration")]
    pub heartbeat_timeout: Duration,

    /// How long offline workers are kept before garbage collection.
    #[serde(default = "default_offline_retention", deserialize_with = "duration")]
    pub offline_retention: Duration,

    // ── proxy gateway ───────────────────────────────────────────────
    #[serde(default)]
    pub proxy_enabled: bool,
    #[serde(default = "default_proxy_listen_addr")]
    pub proxy_listen_addr: String,
    #[serde(default = "default_proxy_refresh_interval", deserialize_with = "duration")]
    pub proxy_refresh_interval: Duration,
    #[serde(default = "default_validator_workers")]
    pub proxy_validator_workers: usize,
    /// Comma-separated source URLs seeded into `proxy_sources`.
    #[serde(default)]
    pub proxy_sources: String,
    #[serde(default = "default_proxy_check_url")]
    pub proxy_check_url: String,
    #[serde(default = "default_proxy_target_check_url")]
    pub proxy_target_check_url: String,

    // ── spawner ─────────────────────────────────────────────────────
    /// `docker`, `kube`, `function`, or `none`.
    #[serde(default = "default_spawner_kind")]
    pub spawner_kind: String,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_worker_image")]
    pub worker_image: String,
    #[serde(default = "default_kube_namespace")]
    pub kube_namespace: String,
    #[serde(default)]
    pub function_url: Option<String>,
    /// Fire-and-forget function invocations instead of waiting for a reply.
    #[serde(default)]
    pub function_async: bool,

    // ── worker agent ────────────────────────────────────────────────
    /// Base URL of the manager API, as seen from the worker.
    #[serde(default = "default_manager_url")]
    pub manager_url: String,
    /// Stable worker identity; generated when unset.
    #[serde(default)]
    pub worker_id: Option<String>,
    /// Directory for local JSONL result files.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// External scraper sidecar endpoint.
    #[serde(default)]
    pub scraper_url: Option<String>,
    /// Claim poll interval in polling dispatch mode.
    #[serde(default = "default_poll_interval", deserialize_with = "duration")]
    pub poll_interval: Duration,
}

/// Gateway sub-config handed to `proxy::GatewayService`.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen_addr: String,
    pub refresh_interval: Duration,
    pub validator_workers: usize,
    pub sources: Vec<String>,
    pub check_url: String,
    pub target_check_url: String,
}

impl Config {
    pub fn proxy(&self) -> ProxyConfig {
        ProxyConfig {
            listen_addr: self.proxy_listen_addr.clone(),
            refresh_interval: self.proxy_refresh_interval,
            validator_workers: self.proxy_validator_workers,
            sources: self
                .proxy_sources
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
            check_url: self.proxy_check_url.clone(),
            target_check_url: self.proxy_target_check_url.clone(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_dedupe_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_heartbeat_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_offline_retention() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_proxy_listen_addr() -> String {
    "127.0.0.1:1080".to_owned()
}

fn default_proxy_refresh_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_validator_workers() -> usize {
    50
}

fn default_proxy_check_url() -> String {
    "https://www.google.com".to_owned()
}

fn default_proxy_target_check_url() -> String {
    "https://www.google.com/maps".to_owned()
}

fn default_spawner_kind() -> String {
    "none".to_owned()
}

fn default_max_workers() -> usize {
    10
}

fn default_worker_image() -> String {
    "waypoint-worker:latest".to_owned()
}

fn default_kube_namespace() -> String {
    "default".to_owned()
}

fn default_manager_url() -> String {
    "http://localhost:8080".to_owned()
}

fn default_data_dir() -> String {
    "./data".to_owned()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

/// Duration parser: seconds by default, `ms`/`s`/`m`/`h` units, optional
/// whitespace before the unit.
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[
        TimeUnit::MilliSecond,
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
    ])
    .allow_time_unit_delimiter()
    .disable_infinity()
    .disable_fraction()
    .disable_exponent()
    .default_unit(TimeUnit::Second)
    .build();

/// Accept both numeric seconds and duration strings for `Duration` fields.
fn duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Visitor;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a duration string or number of seconds")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            DURATION_PARSER
                .parse(value)
                .map_err(|e| {
                    serde::de::Error::custom(format!(
                        "invalid duration '{value}': {e}. Examples: '5', '1500ms', '30s', '2m'"
                    ))
                })?
                .try_into()
                .map_err(|e| serde::de::Error::custom(format!("duration conversion error: {e}")))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if value < 0 {
                return Err(serde::de::Error::custom("duration cannot be negative"));
            }
            Ok(Duration::from_secs(value as u64))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}
