//! Configuration management.
//!
//! Configuration is read from an optional YAML file and then from `REVENIUM_` prefixed
//! environment variables, which take precedence:
//!
//! ```yaml
//! metering_api_key: hak_...
//! metering_base_url: https://api.revenium.io/meter/v2
//! log_level: DEBUG
//! report_mode: background
//! timeout: 5s
//! ```
//!
//! Every field has a default, so an empty environment yields a valid configuration with
//! metering disabled (no API key).

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::errors::{Error, Result};
use crate::metering::DEFAULT_COMPLETIONS_PATH;

pub const DEFAULT_BASE_URL: &str = "https://api.revenium.io/meter/v2";

/// Command line arguments for the `revmeter` binary.
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to an optional YAML configuration file
    #[arg(short = 'f', long, env = "REVENIUM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Validate configuration and exit.
    #[arg(long)]
    pub validate: bool,

    /// Send one synthetic zero-token record to the collector and report the outcome.
    #[arg(long)]
    pub send_test: bool,
}

/// Verbosity of the crate's own log output.
///
/// Parsed case-insensitively from `DEBUG`, `INFO`, `WARNING` (or `WARN`) and `ERROR`.
/// Unrecognised values fall back to `INFO`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<String> for LogLevel {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => LogLevel::Debug,
            "WARNING" | "WARN" => LogLevel::Warning,
            "ERROR" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.to_string()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        })
    }
}

/// When a metering report is sent relative to the metered call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportMode {
    /// The wrapped call waits for the report before returning. A stream waits before
    /// yielding its final `None`.
    #[default]
    Await,
    /// The report is spawned onto the runtime and the call returns immediately.
    Background,
}

/// Metering configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Collector API key. Metering is disabled when absent.
    #[serde(
        default,
        deserialize_with = "optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub metering_api_key: Option<String>,
    /// Collector base URL
    #[serde(deserialize_with = "text")]
    pub metering_base_url: String,
    /// Path of the completions endpoint, appended to the base URL
    pub completions_path: String,
    pub log_level: LogLevel,
    /// Log each activation step at debug level. Only a case-insensitive `true` enables it.
    #[serde(deserialize_with = "flag")]
    pub verbose_startup: bool,
    pub report_mode: ReportMode,
    /// Per-report HTTP timeout, e.g. `5s`. No timeout when unset.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metering_api_key: None,
            metering_base_url: DEFAULT_BASE_URL.to_string(),
            completions_path: DEFAULT_COMPLETIONS_PATH.to_string(),
            log_level: LogLevel::default(),
            verbose_startup: false,
            report_mode: ReportMode::default(),
            timeout: None,
        }
    }
}

impl Config {
    /// Load from the environment only.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> std::result::Result<Self, figment::Error> {
        Self::load(&Args::default())
    }

    /// Load from the file named in `args` (if any) and the environment, then validate.
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> std::result::Result<Self, figment::Error> {
        if let Some(path) = &args.config
            && !path.exists()
        {
            return Err(figment::Error::from(format!(
                "Config file {} does not exist",
                path.display()
            )));
        }

        let config: Self = Self::figment(args.config.as_deref()).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(config_file: Option<&Path>) -> Figment {
        let mut figment = Figment::new();
        if let Some(path) = config_file {
            figment = figment.merge(Yaml::file(path));
        }
        // REVENIUM_CONFIG names the file itself and is not a setting
        figment = figment.merge(
            Env::prefixed("REVENIUM_")
                .ignore(&["CONFIG", "METERING_API_KEY"])
                .split("__"),
        );
        // Keys are opaque; skip env value parsing so digits and leading zeros survive
        if let Some(key) = Env::var("REVENIUM_METERING_API_KEY") {
            figment = figment.merge(Serialized::default("metering_api_key", key));
        }
        figment
    }

    /// Check the configuration for values that would make every report fail.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.metering_base_url).map_err(|e| {
            Error::configuration(format!(
                "Invalid metering base URL '{}': {}",
                self.metering_base_url, e
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::configuration(format!(
                "Metering base URL must use http or https, got '{}'",
                url.scheme()
            )));
        }

        if !self.completions_path.starts_with('/') {
            return Err(Error::configuration(format!(
                "Completions path must start with '/', got '{}'",
                self.completions_path
            )));
        }

        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::configuration("Metering timeout must be greater than zero"));
        }

        Ok(())
    }

    /// Whether an API key is configured. Blank keys count as absent.
    pub fn metering_enabled(&self) -> bool {
        self.api_key().is_some()
    }

    pub(crate) fn api_key(&self) -> Option<&str> {
        self.metering_api_key.as_deref().map(str::trim).filter(|key| !key.is_empty())
    }
}

/// A scalar as figment guesses it from an environment string.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Text(String),
}

impl From<Scalar> for String {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Unsigned(n) => n.to_string(),
            Scalar::Signed(n) => n.to_string(),
            Scalar::Float(n) => n.to_string(),
            Scalar::Text(s) => s,
        }
    }
}

fn text<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Scalar::deserialize(deserializer).map(String::from)
}

fn optional_text<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(String::from))
}

fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Bool(b) => b,
        Scalar::Text(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    })
}
