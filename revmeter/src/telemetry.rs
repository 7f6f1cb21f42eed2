//! Log output for hosts that do not install their own `tracing` subscriber.
//!
//! The library itself only emits events. Applications that already configure `tracing` should
//! skip this; everything else can call [`init_telemetry`] once at startup.
//!
//! `RUST_LOG` takes precedence when set. Otherwise the level comes from `REVENIUM_LOG_LEVEL`
//! and applies to this crate only, leaving other crates at `warn`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Config, LogLevel};

/// Install a fmt subscriber filtered according to `config`.
///
/// Fails if a global subscriber is already set.
pub fn init_telemetry(config: &Config) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_directives(config.log_level)))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

fn default_directives(level: LogLevel) -> String {
    format!("warn,{}={}", env!("CARGO_CRATE_NAME"), level.as_filter())
}
