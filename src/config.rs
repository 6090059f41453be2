//! Exporter configuration
//!
//! Built once at startup from the environment and never mutated afterwards.
//!
//! Environment variables:
//! - `OS_REGION`: Region id (required)
//! - `OS_PROJECT_ID`: Project (tenant) id (required)
//! - `OS_DOMAIN_ID`: Domain id (default: empty)
//! - `OS_AUTH_TOKEN`: Pre-issued token sent to the trace service (optional)
//! - `CTS_ENDPOINT`: Trace service base URL (default: `https://cts.{region}.otc.t-systems.com`)
//! - `CTS_TRACKER`: Tracker name (default: system)
//! - `CTS_FROM`: Look-back minutes and poll interval, 1-10800 (default: 5)
//! - `CTS_PAGE_SIZE`: Traces per page, 50-200 (default: 100)
//! - `OS_DEBUG`: Debug logging (default: false)
//! - `CTS_X_PNP`: Pull and forward events to the sink (default: false)
//! - `CTS_STREAMS`: Streaming pipeline instead of batch (default: true)
//! - `K_SINK`: Sink URL (required)
//! - `K_CE_OVERRIDES`: JSON overrides, e.g. `{"extensions": {"env": "prod"}}`
//! - `K_SINK_TIMEOUT_SECS`: Sink request timeout (default: 30)

use std::time::Duration;

use serde::Deserialize;

use crate::events::{is_reserved_attribute, is_valid_extension_name, AccountIdentity, Extensions};
use crate::schedule::CycleMode;
use crate::source::{DEFAULT_TRACKER_NAME, MAX_PAGE_SIZE, MIN_PAGE_SIZE};

pub const MIN_LOOKBACK_MINUTES: u32 = 1;
pub const MAX_LOOKBACK_MINUTES: u32 = 10_800;
pub const DEFAULT_LOOKBACK_MINUTES: u32 = 5;
pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_SINK_TIMEOUT_SECS: u64 = 30;

/// Trace service connection settings
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub endpoint: String,
    pub region: String,
    pub project_id: String,
    pub domain_id: String,
    pub auth_token: Option<String>,
    pub tracker: String,
    pub page_size: u32,
}

impl SourceConfig {
    pub fn identity(&self) -> AccountIdentity {
        AccountIdentity {
            region: self.region.clone(),
            domain: self.domain_id.clone(),
            tenant: self.project_id.clone(),
        }
    }
}

/// Sink binding: where events go and what to stamp on them
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub url: reqwest::Url,
    pub overrides: Extensions,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub lookback_minutes: u32,
    pub debug: bool,
    /// Pull-and-forward: deliver collected events to the sink
    pub forward: bool,
    pub streaming: bool,
}

/// Shape of `K_CE_OVERRIDES`
#[derive(Debug, Default, Deserialize)]
struct CloudEventOverrides {
    #[serde(default)]
    extensions: Extensions,
}

impl ExporterConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let region = var("OS_REGION").ok_or(ConfigError::Missing("OS_REGION"))?;
        let project_id = var("OS_PROJECT_ID").ok_or(ConfigError::Missing("OS_PROJECT_ID"))?;
        let endpoint = var("CTS_ENDPOINT")
            .unwrap_or_else(|| format!("https://cts.{}.otc.t-systems.com", region.trim()));
        reqwest::Url::parse(&endpoint)
            .map_err(|e| ConfigError::InvalidUrl("CTS_ENDPOINT", e.to_string()))?;

        let lookback_minutes =
            parse_number(var("CTS_FROM"), "CTS_FROM", DEFAULT_LOOKBACK_MINUTES)?;
        validate_lookback(lookback_minutes)?;

        let page_size = parse_number(var("CTS_PAGE_SIZE"), "CTS_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(ConfigError::OutOfRange {
                key: "CTS_PAGE_SIZE",
                value: u64::from(page_size),
                min: u64::from(MIN_PAGE_SIZE),
                max: u64::from(MAX_PAGE_SIZE),
            });
        }

        let sink_timeout_secs = parse_number(
            var("K_SINK_TIMEOUT_SECS"),
            "K_SINK_TIMEOUT_SECS",
            DEFAULT_SINK_TIMEOUT_SECS,
        )?;

        let sink_url = var("K_SINK").ok_or(ConfigError::Missing("K_SINK"))?;
        let sink = SinkConfig {
            url: parse_sink_url(&sink_url)?,
            overrides: var("K_CE_OVERRIDES")
                .map(|raw| parse_overrides(&raw))
                .transpose()?
                .unwrap_or_default(),
            timeout: Duration::from_secs(sink_timeout_secs.max(1)),
        };

        Ok(Self {
            source: SourceConfig {
                endpoint,
                region,
                project_id,
                domain_id: var("OS_DOMAIN_ID").unwrap_or_default(),
                auth_token: var("OS_AUTH_TOKEN"),
                tracker: var("CTS_TRACKER").unwrap_or_else(|| DEFAULT_TRACKER_NAME.to_string()),
                page_size,
            },
            sink,
            lookback_minutes,
            debug: parse_bool(var("OS_DEBUG"), "OS_DEBUG", false)?,
            forward: parse_bool(var("CTS_X_PNP"), "CTS_X_PNP", false)?,
            streaming: parse_bool(var("CTS_STREAMS"), "CTS_STREAMS", true)?,
        })
    }

    /// Override the look-back period (command line `--from`)
    pub fn with_lookback(mut self, minutes: u32) -> Result<Self, ConfigError> {
        validate_lookback(minutes)?;
        self.lookback_minutes = minutes;
        Ok(self)
    }

    /// Time between two cycles; equal to the look-back period
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.lookback_minutes) * 60)
    }

    pub fn mode(&self) -> CycleMode {
        if self.streaming {
            CycleMode::Streaming
        } else {
            CycleMode::Batch
        }
    }
}

fn validate_lookback(minutes: u32) -> Result<(), ConfigError> {
    if (MIN_LOOKBACK_MINUTES..=MAX_LOOKBACK_MINUTES).contains(&minutes) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            key: "CTS_FROM",
            value: u64::from(minutes),
            min: u64::from(MIN_LOOKBACK_MINUTES),
            max: u64::from(MAX_LOOKBACK_MINUTES),
        })
    }
}

fn parse_number<T: std::str::FromStr>(
    raw: Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(key, raw)),
    }
}

fn parse_bool(raw: Option<String>, key: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid(key, raw)),
    }
}

/// The sink must be an absolute http(s) URL
pub fn parse_sink_url(raw: &str) -> Result<reqwest::Url, ConfigError> {
    let url = reqwest::Url::parse(raw.trim())
        .map_err(|e| ConfigError::InvalidUrl("K_SINK", e.to_string()))?;

    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        _ => Err(ConfigError::InvalidUrl(
            "K_SINK",
            format!("{} is not an http(s) URL", raw),
        )),
    }
}

/// Parse the `K_CE_OVERRIDES` payload into extension overrides
pub fn parse_overrides(raw: &str) -> Result<Extensions, ConfigError> {
    let overrides: CloudEventOverrides =
        serde_json::from_str(raw).map_err(|e| ConfigError::Overrides(e.to_string()))?;

    for name in overrides.extensions.keys() {
        if !is_valid_extension_name(name) {
            return Err(ConfigError::Overrides(format!(
                "extension name '{}' must be lowercase letters and digits",
                name
            )));
        }
        if is_reserved_attribute(name) {
            return Err(ConfigError::Overrides(format!(
                "extension name '{}' is a reserved event attribute",
                name
            )));
        }
    }

    Ok(overrides.extensions)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),

    #[error("{key} out of range: {value} not between {min} and {max}")]
    OutOfRange {
        key: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("Invalid URL in {0}: {1}")]
    InvalidUrl(&'static str, String),

    #[error("Parsing cloud event overrides failed: {0}")]
    Overrides(String),
}
