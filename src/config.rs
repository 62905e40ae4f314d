//! Configuration module for the AQI sampler.
//!
//! `SamplerConfig` carries the parameters of a sampling run and enforces
//! their invariants at construction. `Config` wraps it with the HTTP client
//! settings and loads everything from environment variables for the binary.

use std::env;
use std::time::Duration;

use crate::geo::BoundingBox;

/// Default base URL of the WAQI API
const DEFAULT_API_URL: &str = "https://api.waqi.info";

/// Default sampling period in minutes
const DEFAULT_SAMPLING_PERIOD_MINUTES: i64 = 5;

/// Default sampling rate in samples per minute
const DEFAULT_SAMPLING_RATE: i64 = 1;

/// Default per-request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Default number of attempts for a station feed query
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between station feed attempts in seconds
const DEFAULT_RETRY_DELAY_SECS: u64 = 2;

/// Error type for configuration failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl ConfigError {
    fn for_var(env_var: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: Some(env_var.to_string()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parameters of a sampling run.
///
/// Period and rate are clamped to at least 1; the token must be non-empty.
#[derive(Clone, PartialEq)]
pub struct SamplerConfig {
    bbox: BoundingBox,
    sampling_period: u32,
    sampling_rate: u32,
    api_token: String,
}

impl SamplerConfig {
    /// Build a validated sampler configuration.
    ///
    /// `sampling_period` is in minutes, `sampling_rate` in samples per
    /// minute. Values below 1 are raised to 1.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `api_token` is empty or only whitespace.
    pub fn new(
        bbox: BoundingBox,
        sampling_period: i64,
        sampling_rate: i64,
        api_token: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let api_token = api_token.into();
        if api_token.trim().is_empty() {
            return Err(ConfigError {
                message: "API token must be provided".to_string(),
                env_var: None,
            });
        }

        Ok(Self {
            bbox,
            sampling_period: clamp_to_u32(sampling_period),
            sampling_rate: clamp_to_u32(sampling_rate),
            api_token,
        })
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    /// Sampling period in minutes.
    pub fn sampling_period(&self) -> u32 {
        self.sampling_period
    }

    /// Samples taken per minute.
    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    pub fn api_token(&self) -> &str {
        &self.api_token
    }

    /// Number of intervals in a full run: `period * rate`.
    pub fn total_samples(&self) -> u64 {
        u64::from(self.sampling_period) * u64::from(self.sampling_rate)
    }

    /// Time between two intervals: `60s / rate`.
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(60.0 / f64::from(self.sampling_rate))
    }
}

impl std::fmt::Debug for SamplerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplerConfig")
            .field("bbox", &self.bbox)
            .field("sampling_period", &self.sampling_period)
            .field("sampling_rate", &self.sampling_rate)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

fn clamp_to_u32(value: i64) -> u32 {
    u32::try_from(value.max(1)).unwrap_or(u32::MAX)
}

/// Full configuration for the sampler binary.
///
/// All settings can be configured via environment variables:
/// - `AQI_SAMPLER_API_TOKEN`: WAQI API token (required)
/// - `AQI_SAMPLER_BBOX`: `lat1,lon1,lat2,lon2` (required)
/// - `AQI_SAMPLER_PERIOD_MINUTES`: Sampling period (default: 5)
/// - `AQI_SAMPLER_RATE`: Samples per minute (default: 1)
/// - `AQI_SAMPLER_API_URL`: Provider base URL (default: https://api.waqi.info)
/// - `AQI_SAMPLER_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 5)
/// - `AQI_SAMPLER_MAX_ATTEMPTS`: Feed attempts per station (default: 3)
/// - `AQI_SAMPLER_RETRY_DELAY_SECS`: Pause between feed attempts (default: 2)
#[derive(Debug, Clone)]
pub struct Config {
    /// Run parameters
    pub sampler: SamplerConfig,

    /// Base URL of the WAQI API, without trailing slash
    pub api_url: String,

    /// HTTP request timeout duration
    pub request_timeout: Duration,

    /// Maximum number of attempts for a station feed query
    pub max_attempts: u32,

    /// Pause between two station feed attempts
    pub retry_delay: Duration,
}

impl Config {
    /// Create a configuration with default client settings.
    pub fn new(sampler: SamplerConfig) -> Self {
        Self {
            sampler,
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `AQI_SAMPLER_API_TOKEN` or `AQI_SAMPLER_BBOX` is missing
    /// - `AQI_SAMPLER_BBOX` cannot be parsed
    /// - any numeric variable is not a valid number
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_token = env::var("AQI_SAMPLER_API_TOKEN").map_err(|_| {
            ConfigError::for_var("AQI_SAMPLER_API_TOKEN", "API token must be provided")
        })?;

        let bbox = Self::parse_bbox()?;

        let sampling_period =
            parse_var("AQI_SAMPLER_PERIOD_MINUTES", DEFAULT_SAMPLING_PERIOD_MINUTES)?;
        let sampling_rate = parse_var("AQI_SAMPLER_RATE", DEFAULT_SAMPLING_RATE)?;

        let sampler = SamplerConfig::new(bbox, sampling_period, sampling_rate, api_token)
            .map_err(|e| ConfigError::for_var("AQI_SAMPLER_API_TOKEN", e.message))?;

        let api_url = env::var("AQI_SAMPLER_API_URL")
            .unwrap_or_else(|_| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let request_timeout_secs: u64 =
            parse_var("AQI_SAMPLER_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;

        let max_attempts: u32 = parse_var("AQI_SAMPLER_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        if max_attempts == 0 {
            return Err(ConfigError::for_var(
                "AQI_SAMPLER_MAX_ATTEMPTS",
                "max attempts must be greater than 0",
            ));
        }

        let retry_delay_secs: u64 =
            parse_var("AQI_SAMPLER_RETRY_DELAY_SECS", DEFAULT_RETRY_DELAY_SECS)?;

        Ok(Self {
            sampler,
            api_url,
            request_timeout: Duration::from_secs(request_timeout_secs),
            max_attempts,
            retry_delay: Duration::from_secs(retry_delay_secs),
        })
    }

    fn parse_bbox() -> Result<BoundingBox, ConfigError> {
        let env_var = "AQI_SAMPLER_BBOX";
        let value = env::var(env_var)
            .map_err(|_| ConfigError::for_var(env_var, "bounding box must be provided"))?;

        value
            .parse()
            .map_err(|e: crate::geo::ParseBoundsError| ConfigError::for_var(env_var, e.message))
    }
}

/// Parse an optional numeric environment variable, falling back to `default` when unset.
fn parse_var<T: std::str::FromStr>(env_var: &str, default: T) -> Result<T, ConfigError> {
    match env::var(env_var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::for_var(env_var, format!("'{}' is not a valid number", value))),
        Err(_) => Ok(default),
    }
}
