//! AQI Sampler - PM2.5 sampling over a WAQI bounding box
//!
//! This binary discovers the monitoring stations inside a bounding box,
//! samples their PM2.5 readings at a fixed cadence and prints a JSON report
//! of the run.
//!
//! ## Features
//!
//! - Async sampling loop using tokio runtime
//! - Station feed queries with retry
//! - Ctrl+C stops the run at the next interval boundary
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `AQI_SAMPLER_API_TOKEN`: WAQI API token (required)
//! - `AQI_SAMPLER_BBOX`: `lat1,lon1,lat2,lon2` (required)
//! - `AQI_SAMPLER_PERIOD_MINUTES`: Sampling period (default: 5)
//! - `AQI_SAMPLER_RATE`: Samples per minute (default: 1)
//! - `AQI_SAMPLER_API_URL`: Provider base URL (default: https://api.waqi.info)
//! - `AQI_SAMPLER_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 5)
//! - `AQI_SAMPLER_MAX_ATTEMPTS`: Feed attempts per station (default: 3)
//! - `AQI_SAMPLER_RETRY_DELAY_SECS`: Pause between feed attempts (default: 2)
//! - `RUST_LOG`: Logging level filter (default: info)

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use aqi_sampler::client::WaqiClient;
use aqi_sampler::config::Config;
use aqi_sampler::sampler::{RunStatus, Sampler};

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with environment filter
    init_tracing();

    info!("Starting AQI sampler...");

    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                api_url = %config.api_url,
                bbox = %config.sampler.bbox(),
                sampling_period = config.sampler.sampling_period(),
                sampling_rate = config.sampler.sampling_rate(),
                max_attempts = config.max_attempts,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let client = match WaqiClient::new(&config) {
        Ok(client) => {
            info!(api_url = %client.api_url(), "HTTP client initialized");
            client
        }
        Err(e) => {
            error!(error = %e, "Failed to create HTTP client");
            std::process::exit(1);
        }
    };

    let mut sampler = Sampler::new(config.sampler.clone(), client);
    let stop = sampler.stop_handle();

    // Translate Ctrl+C into a stop request
    let signal_handle = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, stopping after the current interval...");
                if !stop.stop() {
                    warn!(status = %stop.status(), "Sampler was not running");
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        }
    });

    sampler.start_sampling().await;
    signal_handle.abort();

    let report = sampler.report();
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => error!(error = %e, "Failed to serialize report"),
    }

    match sampler.avg_pm25() {
        Some(avg) => info!(avg_pm25 = avg, "Final average PM2.5 (µg/m³)"),
        None => warn!(status = %sampler.status(), "No PM2.5 data available"),
    }

    if sampler.status() == RunStatus::Failed {
        std::process::exit(2);
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
///
/// Logs go to stderr so stdout carries only the JSON report.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
