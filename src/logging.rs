//! Logging setup shared by both binaries.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::Config;

/// Output format, selectable from the CLI.
#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum LogFormat {
    /// Human-oriented output (default in debug builds).
    Pretty,
    /// One JSON object per event (default in release builds).
    Json,
    /// Pick by build mode.
    Auto,
}

/// Configure and install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise the configured level applies to this
/// crate's targets with `warn` for everything else.
pub fn init(config: &Config, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,waypoint={}", config.log_level))
    });

    let use_pretty = match format {
        LogFormat::Pretty => true,
        LogFormat::Json => false,
        LogFormat::Auto => cfg!(debug_assertions),
    };

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if use_pretty {
        Box::new(
            FmtSubscriber::builder()
                .with_target(true)
                .with_env_filter(filter)
                .finish(),
        )
    } else {
        Box::new(
            FmtSubscriber::builder()
                .with_target(true)
                .json()
                .with_env_filter(filter)
                .finish(),
        )
    };
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}
